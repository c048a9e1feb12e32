use crate::config::Config;
use crate::models::db_operations::users_db_operations;
use actix_multipart::Multipart;
use actix_web::web;
use chrono::Utc;
use futures_util::StreamExt;
use rand::Rng;
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use url::Url;

/// The two public media areas, mirrored as directories under the media root
/// and as URL prefixes under `/media/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaArea {
    BlogImages,
    ProfilePictures,
}

impl MediaArea {
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaArea::BlogImages => "blog_images",
            MediaArea::ProfilePictures => "profile_pictures",
        }
    }

    fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "blog_images" => Some(MediaArea::BlogImages),
            "profile_pictures" => Some(MediaArea::ProfilePictures),
            _ => None,
        }
    }
}

/// Upload limits, read from the settings table so an admin can adjust them
/// without a restart.
pub struct UploadLimits {
    pub max_file_size_bytes: u64,
    pub allowed_mime_types: HashSet<String>,
}

impl UploadLimits {
    pub fn load(conn: &Connection) -> Self {
        let max_file_size_mb = users_db_operations::read_setting(conn, "max_file_upload_size_mb")
            .unwrap_or_else(|| "10".to_string())
            .parse::<u64>()
            .unwrap_or(10);

        let allowed_mime_types = users_db_operations::read_setting(conn, "allowed_mime_types")
            .unwrap_or_else(|| "".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        UploadLimits {
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            allowed_mime_types,
        }
    }
}

/// Maps a validated MIME type to the extension we store files under. The
/// client-supplied filename is never trusted for anything.
fn mime_to_safe_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Timestamp-derived filename with a random suffix against same-millisecond
/// collisions.
fn generate_filename(ext: &str) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{}_{:04}.{}", Utc::now().timestamp_millis(), suffix, ext)
}

/// Streams a single image out of a multipart payload into the given media
/// area and returns its public `/media/...` URL. The file field must be named
/// `file`; the size cap is enforced mid-stream and a partial file is removed
/// on overflow.
pub async fn save_image(
    config: &Config,
    limits: &UploadLimits,
    area: MediaArea,
    mut payload: Multipart,
) -> Result<String, Box<dyn std::error::Error>> {
    if limits.allowed_mime_types.is_empty() {
        return Err("File uploads are currently disabled. No MIME types are configured.".into());
    }

    let mut stored: Option<(PathBuf, String)> = None;
    let mut file_size: u64 = 0;

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let field_name = field.content_disposition().get_name().unwrap_or_default().to_string();
        if field_name != "file" {
            continue;
        }

        let content_type = field.content_type().ok_or("Content-Type not available.")?;
        let content_type_str = content_type.to_string();

        if !limits.allowed_mime_types.contains(&content_type_str) {
            return Err(format!(
                "Unsupported file type: '{}'. Please upload one of the allowed types.", content_type_str
            ).into());
        }

        let file_ext = match mime_to_safe_extension(&content_type_str) {
            Some(ext) => ext,
            None => {
                log::error!("Allowed MIME type '{}' has no safe extension mapping.", content_type_str);
                return Err("An internal server configuration error occurred. Please contact an administrator.".into());
            }
        };

        let filename = generate_filename(file_ext);
        let dir = config.media_dir(area.dir_name());

        web::block({
            let dir_clone = dir.clone();
            move || fs::create_dir_all(&dir_clone)
        }).await??;

        let final_path = dir.join(&filename);
        let mut f = web::block({
            let final_path_clone = final_path.clone();
            move || fs::File::create(final_path_clone)
        }).await??;

        while let Some(chunk) = field.next().await {
            let data = chunk?;
            file_size += data.len() as u64;
            if file_size > limits.max_file_size_bytes {
                drop(f);
                let _ = fs::remove_file(&final_path);
                return Err(format!(
                    "File is too large. Maximum size is {}MB.",
                    limits.max_file_size_bytes / (1024 * 1024)
                ).into());
            }
            f = web::block(move || f.write_all(&data).map(|_| f)).await??;
        }

        stored = Some((final_path, filename));
    }

    match stored {
        Some((_, filename)) => Ok(format!("/media/{}/{}", area.dir_name(), filename)),
        None => Err("No file was uploaded.".into()),
    }
}

/// Resolves a stored public URL (absolute or `/media/...`-relative) back to
/// the file it names. Anything that does not point into a known media area
/// resolves to nothing, so a crafted URL cannot reach outside the media root.
pub fn storage_path_for_public_url(config: &Config, public_url: &str) -> Option<PathBuf> {
    let path_part = if public_url.starts_with("http://") || public_url.starts_with("https://") {
        Url::parse(public_url).ok()?.path().to_string()
    } else {
        public_url.to_string()
    };

    let relative = path_part.strip_prefix("/media/")?;
    let mut segments = relative.split('/');
    let area = MediaArea::from_dir_name(segments.next()?)?;
    let filename = segments.next()?;
    if segments.next().is_some() || filename.is_empty() || filename.contains("..") {
        return None;
    }

    Some(config.media_dir(area.dir_name()).join(filename))
}

/// Deletes the file behind a public media URL. Returns whether a file was
/// actually removed; a URL that no longer resolves is not an error, the
/// caller only cares that it is gone.
pub fn delete_by_public_url(config: &Config, public_url: &str) -> std::io::Result<bool> {
    let Some(target) = storage_path_for_public_url(config, public_url) else {
        return Ok(false);
    };
    match fs::remove_file(&target) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebConfig;
    use tempfile::tempdir;

    fn test_config(media_path: &std::path::Path) -> Config {
        Config {
            web: WebConfig { host: "127.0.0.1".to_string(), port: 0 },
            database_path: "/tmp/unused".to_string(),
            media_path: media_path.to_string_lossy().to_string(),
            allowed_origins: "".to_string(),
            log_level: "info".to_string(),
            session_secret_key: "0".repeat(128),
            use_secure_cookies: false,
        }
    }

    #[test]
    fn mime_mapping_covers_the_allowed_images_only() {
        assert_eq!(mime_to_safe_extension("image/jpeg"), Some("jpg"));
        assert_eq!(mime_to_safe_extension("image/png"), Some("png"));
        assert_eq!(mime_to_safe_extension("application/x-msdownload"), None);
    }

    #[test]
    fn public_urls_resolve_into_their_media_area() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let path = storage_path_for_public_url(&config, "/media/blog_images/17123_0042.jpg").unwrap();
        assert_eq!(path, dir.path().join("blog_images").join("17123_0042.jpg"));

        // Absolute URLs resolve through their path component.
        let path = storage_path_for_public_url(&config, "http://forum.school.test/media/profile_pictures/a.png").unwrap();
        assert_eq!(path, dir.path().join("profile_pictures").join("a.png"));
    }

    #[test]
    fn urls_outside_the_media_areas_resolve_to_nothing() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        assert!(storage_path_for_public_url(&config, "/etc/passwd").is_none());
        assert!(storage_path_for_public_url(&config, "/media/other_area/x.png").is_none());
        assert!(storage_path_for_public_url(&config, "/media/blog_images/../../etc/passwd").is_none());
        assert!(storage_path_for_public_url(&config, "/media/blog_images/a/b.png").is_none());
    }

    #[test]
    fn delete_removes_the_file_and_tolerates_absence() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let area_dir = dir.path().join("blog_images");
        fs::create_dir_all(&area_dir).unwrap();
        fs::write(area_dir.join("x.jpg"), b"img").unwrap();

        assert!(delete_by_public_url(&config, "/media/blog_images/x.jpg").unwrap());
        assert!(!area_dir.join("x.jpg").exists());
        // Second delete is a no-op, not an error.
        assert!(!delete_by_public_url(&config, "/media/blog_images/x.jpg").unwrap());
    }
}
