use ammonia::Builder;
use regex::Regex;
use std::collections::HashSet;

/// Sanitizes rich post content by cleaning it against a whitelist.
/// A safe subset of HTML tags and attributes survives for formatting;
/// all scripting capability (`onclick`, `onerror`, `<script>`, etc.) is removed.
pub fn sanitize_rich_content(html_input: &str) -> String {
    let tags_to_allow = [
        "h1", "h2", "h3", "h4", "h5", "h6", "b", "strong", "i", "em", "p", "br",
        "a", "ul", "ol", "li", "blockquote", "code", "pre", "hr", "img", "table",
        "thead", "tbody", "tr", "th", "td", "s", "del", "div", "span",
    ];
    let safe_tags = tags_to_allow.iter().cloned().collect::<HashSet<_>>();

    let safe_attributes = ["src", "href", "alt", "title", "class", "width", "height", "align"];
    let generic_attributes = safe_attributes.iter().cloned().collect::<HashSet<_>>();

    Builder::new()
        .tags(safe_tags)
        .generic_attributes(generic_attributes)
        .link_rel(Some("nofollow ugc"))
        .clean(html_input)
        .to_string()
}

/// Sanitizes comment bodies by escaping all HTML outside fenced code blocks,
/// while preserving the code blocks (```) untouched.
/// Prevents double-escaping by normalizing entities first.
pub fn sanitize_comment_content(comment_input: &str) -> String {
    let mut code_blocks: Vec<String> = Vec::new();
    let code_block_regex = Regex::new(r"(?s)```[\s\S]*?```").unwrap();

    // Step 1: Extract code blocks with placeholders
    let with_placeholders = code_block_regex.replace_all(comment_input, |caps: &regex::Captures| {
        code_blocks.push(caps[0].to_string());
        format!("__CODE_BLOCK_PLACEHOLDER_{}__", code_blocks.len() - 1)
    });

    // Step 2: Decode existing entities (normalize), then escape HTML
    let decoded = html_escape::decode_html_entities(&with_placeholders);
    let escaped = html_escape::encode_text(&decoded).to_string();

    // Step 3: Restore original code blocks
    let mut final_output = escaped;
    for (i, block) in code_blocks.iter().enumerate() {
        let placeholder = format!("__CODE_BLOCK_PLACEHOLDER_{}__", i);
        final_output = final_output.replacen(&placeholder, block, 1);
    }

    final_output
}

/// Strips all HTML tags from input (for titles, bylines, usernames, bios)
pub fn strip_all_html(input: &str) -> String {
    Builder::new()
        .tags(HashSet::new())
        .clean(input)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rich_content_keeps_formatting_but_drops_scripts() {
        let cleaned = sanitize_rich_content("<p>hi <b>there</b></p><script>alert(1)</script>");
        assert!(cleaned.contains("<b>there</b>"));
        assert!(!cleaned.contains("script"));
        assert!(!cleaned.contains("alert"));
    }

    #[test]
    fn rich_content_strips_event_handlers() {
        let cleaned = sanitize_rich_content("<img src=\"x.png\" onerror=\"steal()\">");
        assert!(cleaned.contains("src"));
        assert!(!cleaned.contains("onerror"));
    }

    #[test]
    fn comment_html_is_escaped_outside_code_blocks() {
        let out = sanitize_comment_content("look: <b>bold</b>\n```\n<b>kept</b>\n```");
        assert!(out.contains("&lt;b&gt;bold&lt;/b&gt;"));
        assert!(out.contains("```\n<b>kept</b>\n```"));
    }

    #[test]
    fn strip_removes_every_tag() {
        assert_eq!(strip_all_html("<i>name</i> <script>x</script>"), "name ");
    }
}
