use redb::{Database, ReadableTable, TableDefinition, CommitError, StorageError, TableError, TransactionError};
use rusqlite::Connection;
use crate::models::{Comment, Post, PostSummary, ProfileComment};
use crate::models::db_operations::users_db_operations;
use uuid::Uuid;
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Redb storage error: {0}")]
    RedbStorage(#[from] StorageError),
    #[error("Redb transaction error: {0}")]
    RedbTransaction(#[from] TransactionError),
    #[error("Redb table error: {0}")]
    RedbTable(#[from] TableError),
    #[error("Redb commit error: {0}")]
    RedbCommit(#[from] CommitError),
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("Item not found in database: {0}")]
    NotFound(String),
}

// Post documents, keyed by UUID bytes, stored as JSON.
pub const POSTS: TableDefinition<&[u8; 16], &str> = TableDefinition::new("posts");
// Chronological index for efficient latest-first listing. The timestamp is
// negated so that iteration order is newest-first.
pub const CHRONOLOGICAL_INDEX: TableDefinition<(i64, &[u8; 16]), ()> = TableDefinition::new("chronological_index");
// Per-author index, newest-first within each author.
pub const AUTHOR_INDEX: TableDefinition<(&str, i64, &[u8; 16]), ()> = TableDefinition::new("author_index");

// ====================================================================
// ======================= POST LIFECYCLE =============================
// ====================================================================

pub fn create_post(
    db: &Database,
    title: &str,
    short_description: &str,
    content: &str,
    author: &str,
    author_name: &str,
    images: Vec<String>,
) -> Result<String, DbError> {
    let post_uuid = Uuid::new_v4();
    let created_at = Utc::now();

    let post = Post {
        id: post_uuid.to_string(),
        title: title.to_string(),
        short_description: short_description.to_string(),
        content: content.to_string(),
        author: author.to_string(),
        author_name: author_name.to_string(),
        likes: 0,
        liked_by: Vec::new(),
        views: 0,
        viewed_by: Vec::new(),
        images,
        comments: Vec::new(),
        created_at,
    };
    let post_json = serde_json::to_string(&post)?;

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;
        let mut chrono_index = write_txn.open_table(CHRONOLOGICAL_INDEX)?;
        let mut author_index = write_txn.open_table(AUTHOR_INDEX)?;

        let post_id_bytes = post_uuid.into_bytes();
        let timestamp = -created_at.timestamp();

        posts_table.insert(&post_id_bytes, post_json.as_str())?;
        chrono_index.insert((timestamp, &post_id_bytes), ())?;
        author_index.insert((author, timestamp, &post_id_bytes), ())?;
    }
    write_txn.commit()?;

    Ok(post_uuid.to_string())
}

pub fn read_post(db: &Database, id: &str) -> Option<Post> {
    let post_uuid = Uuid::parse_str(id).ok()?;
    let post_id_bytes = post_uuid.into_bytes();

    let read_txn = db.begin_read().ok()?;
    let posts_table = read_txn.open_table(POSTS).ok()?;

    let guard = posts_table.get(&post_id_bytes).ok().flatten()?;
    serde_json::from_str(guard.value()).ok()
}

pub fn read_summary_by_id(db: &Database, id: &str) -> Result<Option<PostSummary>, DbError> {
    let post_uuid = match Uuid::parse_str(id) {
        Ok(uuid) => uuid,
        Err(_) => return Ok(None),
    };
    let post_id_bytes = post_uuid.into_bytes();

    let read_txn = db.begin_read()?;
    let posts_table = read_txn.open_table(POSTS)?;

    let result = match posts_table.get(&post_id_bytes)? {
        Some(guard) => {
            let post: Post = serde_json::from_str(guard.value())?;
            Ok(Some(post.summary()))
        }
        None => Ok(None),
    };
    result
}

/// Replaces title, short description, content and image list on an existing
/// post. Returns the image URLs that were dropped by the update so the caller
/// can remove the underlying files.
pub fn update_post(
    db: &Database,
    post_id: &str,
    title: &str,
    short_description: &str,
    content: &str,
    images: Vec<String>,
) -> Result<Vec<String>, DbError> {
    let post_uuid = Uuid::parse_str(post_id)?;
    let post_id_bytes = post_uuid.into_bytes();
    let mut removed_images = Vec::new();

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;

        let mut post: Post = {
            let guard = posts_table.get(&post_id_bytes)?
                .ok_or_else(|| DbError::NotFound(post_id.to_string()))?;
            serde_json::from_str(guard.value())?
        };

        removed_images = post.images.iter()
            .filter(|url| !images.contains(*url))
            .cloned()
            .collect();

        post.title = title.to_string();
        post.short_description = short_description.to_string();
        post.content = content.to_string();
        post.images = images;

        let post_json = serde_json::to_string(&post)?;
        posts_table.insert(&post_id_bytes, post_json.as_str())?;
    }
    write_txn.commit()?;

    Ok(removed_images)
}

/// Deletes a post and cascades into the users database: the post id is purged
/// from every favorites list and every commenter's comment count is reduced
/// by the number of comments they had on the post, all in one SQLite
/// transaction. Returns the deleted document so the caller can remove the
/// image files.
pub fn delete_post(db: &Database, conn: &mut Connection, post_id: &str) -> Result<Post, DbError> {
    let post_uuid = Uuid::parse_str(post_id)?;
    let post_id_bytes = post_uuid.into_bytes();

    let post = read_post(db, post_id)
        .ok_or_else(|| DbError::NotFound(post_id.to_string()))?;

    // Comments per author, so each commenter's counter drops by the right amount.
    let mut comment_counts: HashMap<String, u32> = HashMap::new();
    for comment in &post.comments {
        *comment_counts.entry(comment.author.clone()).or_insert(0) += 1;
    }

    // SQLite side first, mirroring the ordering used elsewhere for
    // cross-store writes: losing a favorites row is recoverable, an orphaned
    // favorites row pointing at a deleted post is not.
    let tx = conn.transaction()?;
    users_db_operations::remove_post_from_all_favorites(&tx, post_id)?;
    for (author, count) in &comment_counts {
        users_db_operations::reduce_comment_count(&tx, author, *count)?;
    }
    tx.commit()?;

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;
        let mut chrono_index = write_txn.open_table(CHRONOLOGICAL_INDEX)?;
        let mut author_index = write_txn.open_table(AUTHOR_INDEX)?;

        let timestamp = -post.created_at.timestamp();
        chrono_index.remove((timestamp, &post_id_bytes))?;
        author_index.remove((post.author.as_str(), timestamp, &post_id_bytes))?;
        posts_table.remove(&post_id_bytes)?;
    }
    write_txn.commit()?;

    Ok(post)
}

// ====================================================================
// ======================= ENGAGEMENT WRITES ==========================
// ====================================================================

/// Records a view for `viewer`. Idempotent per viewer: the membership set is
/// authoritative and the counter is recomputed from it inside the same write
/// transaction, so a repeated call cannot double-count.
pub fn record_view(db: &Database, post_id: &str, viewer: &str) -> Result<Post, DbError> {
    let post_uuid = Uuid::parse_str(post_id)?;
    let post_id_bytes = post_uuid.into_bytes();
    let updated;

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;

        let mut post: Post = {
            let guard = posts_table.get(&post_id_bytes)?
                .ok_or_else(|| DbError::NotFound(post_id.to_string()))?;
            serde_json::from_str(guard.value())?
        };

        if !post.viewed_by.iter().any(|uid| uid == viewer) {
            post.viewed_by.push(viewer.to_string());
        }
        post.views = post.viewed_by.len() as u32;

        let post_json = serde_json::to_string(&post)?;
        posts_table.insert(&post_id_bytes, post_json.as_str())?;
        updated = post;
    }
    write_txn.commit()?;

    Ok(updated)
}

/// Toggles `uid`'s like on a post. Returns the updated post and whether the
/// post is now liked by the user. The like counter always equals the size of
/// the `liked_by` set; concurrent togglers serialize on the store's single
/// write transaction.
pub fn toggle_like(db: &Database, post_id: &str, uid: &str) -> Result<(Post, bool), DbError> {
    let post_uuid = Uuid::parse_str(post_id)?;
    let post_id_bytes = post_uuid.into_bytes();
    let updated;
    let now_liked;

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;

        let mut post: Post = {
            let guard = posts_table.get(&post_id_bytes)?
                .ok_or_else(|| DbError::NotFound(post_id.to_string()))?;
            serde_json::from_str(guard.value())?
        };

        if post.liked_by.iter().any(|u| u == uid) {
            post.liked_by.retain(|u| u != uid);
            now_liked = false;
        } else {
            post.liked_by.push(uid.to_string());
            now_liked = true;
        }
        post.likes = post.liked_by.len() as u32;

        let post_json = serde_json::to_string(&post)?;
        posts_table.insert(&post_id_bytes, post_json.as_str())?;
        updated = post;
    }
    write_txn.commit()?;

    Ok((updated, now_liked))
}

// ====================================================================
// ======================= COMMENT OPERATIONS =========================
// ====================================================================

pub fn append_comment(db: &Database, post_id: &str, comment: Comment) -> Result<Post, DbError> {
    let post_uuid = Uuid::parse_str(post_id)?;
    let post_id_bytes = post_uuid.into_bytes();
    let updated;

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;

        let mut post: Post = {
            let guard = posts_table.get(&post_id_bytes)?
                .ok_or_else(|| DbError::NotFound(post_id.to_string()))?;
            serde_json::from_str(guard.value())?
        };

        post.comments.push(comment);

        let post_json = serde_json::to_string(&post)?;
        posts_table.insert(&post_id_bytes, post_json.as_str())?;
        updated = post;
    }
    write_txn.commit()?;

    Ok(updated)
}

/// Removes a comment from a post. Returns the updated post and the removed
/// comment so the caller can adjust the author's comment count.
pub fn remove_comment(db: &Database, post_id: &str, comment_id: &str) -> Result<(Post, Comment), DbError> {
    let post_uuid = Uuid::parse_str(post_id)?;
    let post_id_bytes = post_uuid.into_bytes();
    let updated;
    let removed;

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;

        let mut post: Post = {
            let guard = posts_table.get(&post_id_bytes)?
                .ok_or_else(|| DbError::NotFound(post_id.to_string()))?;
            serde_json::from_str(guard.value())?
        };

        let position = post.comments.iter().position(|c| c.id == comment_id)
            .ok_or_else(|| DbError::NotFound(comment_id.to_string()))?;
        removed = post.comments.remove(position);

        let post_json = serde_json::to_string(&post)?;
        posts_table.insert(&post_id_bytes, post_json.as_str())?;
        updated = post;
    }
    write_txn.commit()?;

    Ok((updated, removed))
}

pub fn toggle_comment_like(db: &Database, post_id: &str, comment_id: &str, uid: &str) -> Result<Post, DbError> {
    let post_uuid = Uuid::parse_str(post_id)?;
    let post_id_bytes = post_uuid.into_bytes();
    let updated;

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;

        let mut post: Post = {
            let guard = posts_table.get(&post_id_bytes)?
                .ok_or_else(|| DbError::NotFound(post_id.to_string()))?;
            serde_json::from_str(guard.value())?
        };

        let comment = post.comments.iter_mut().find(|c| c.id == comment_id)
            .ok_or_else(|| DbError::NotFound(comment_id.to_string()))?;

        if comment.liked_by.iter().any(|u| u == uid) {
            comment.liked_by.retain(|u| u != uid);
        } else {
            comment.liked_by.push(uid.to_string());
        }
        comment.likes = comment.liked_by.len() as u32;

        let post_json = serde_json::to_string(&post)?;
        posts_table.insert(&post_id_bytes, post_json.as_str())?;
        updated = post;
    }
    write_txn.commit()?;

    Ok(updated)
}

// ====================================================================
// ======================= FAN-OUT MAINTENANCE ========================
// ====================================================================

/// Rewrites the denormalized username/picture snapshots on every comment the
/// user has authored, across all posts, in a single write transaction. A
/// crash cannot leave half the comments renamed. Returns the number of
/// comments touched. Full-scan work, proportional to total platform posts.
pub fn rewrite_comment_snapshots(
    db: &Database,
    uid: &str,
    username: &str,
    profile_picture: Option<&str>,
) -> Result<usize, DbError> {
    let mut touched = 0;

    let write_txn = db.begin_write()?;
    {
        let mut posts_table = write_txn.open_table(POSTS)?;

        // Collect first; the iteration borrow must end before we write back.
        let mut rewritten: Vec<([u8; 16], String)> = Vec::new();
        for item in posts_table.iter()? {
            let (id_bytes, post_json) = item?;
            let mut post: Post = serde_json::from_str(post_json.value())?;

            let mut changed = false;
            for comment in post.comments.iter_mut().filter(|c| c.author == uid) {
                comment.username = username.to_string();
                comment.author_profile_picture = profile_picture.map(|s| s.to_string());
                changed = true;
                touched += 1;
            }

            if changed {
                rewritten.push((*id_bytes.value(), serde_json::to_string(&post)?));
            }
        }

        for (id_bytes, post_json) in &rewritten {
            posts_table.insert(id_bytes, post_json.as_str())?;
        }
    }
    write_txn.commit()?;

    Ok(touched)
}

// ====================================================================
// ======================= READ QUERIES ===============================
// ====================================================================

pub fn read_latest_summaries(db: &Database, limit: u32, offset: u32) -> Result<Vec<PostSummary>, DbError> {
    let read_txn = db.begin_read()?;
    let chrono_index = read_txn.open_table(CHRONOLOGICAL_INDEX)?;
    let posts_table = read_txn.open_table(POSTS)?;

    let posts = chrono_index
        .iter()?
        .skip(offset as usize)
        .take(limit as usize)
        .filter_map(|item_result| {
            item_result.ok().and_then(|(key, _value)| {
                let post_id_bytes = key.value().1;
                posts_table.get(post_id_bytes).ok().flatten().and_then(|post_json| {
                    serde_json::from_str::<Post>(post_json.value())
                        .ok()
                        .map(|post| post.summary())
                })
            })
        })
        .collect();
    Ok(posts)
}

pub fn read_summaries_by_author(
    db: &Database,
    author: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<PostSummary>, DbError> {
    let read_txn = db.begin_read()?;
    let author_index = read_txn.open_table(AUTHOR_INDEX)?;
    let posts_table = read_txn.open_table(POSTS)?;

    let start_key = (author, i64::MIN, &[0u8; 16]);
    let end_key = (author, i64::MAX, &[255u8; 16]);

    let posts = author_index
        .range(start_key..=end_key)?
        .skip(offset as usize)
        .take(limit as usize)
        .filter_map(|item_result| {
            item_result.ok().and_then(|(key, _value)| {
                let post_id_bytes = key.value().2;
                posts_table.get(post_id_bytes).ok().flatten().and_then(|post_json| {
                    serde_json::from_str::<Post>(post_json.value())
                        .ok()
                        .map(|post| post.summary())
                })
            })
        })
        .collect();
    Ok(posts)
}

/// Posts published under a given byline. Table scan; the byline has no index
/// because it is a free-form display string, and this backs an infrequent
/// profile page.
pub fn read_summaries_by_author_name(db: &Database, author_name: &str) -> Result<Vec<PostSummary>, DbError> {
    let read_txn = db.begin_read()?;
    let posts_table = read_txn.open_table(POSTS)?;

    let mut posts: Vec<PostSummary> = posts_table.iter()?
        .filter_map(|res| res.ok())
        .filter_map(|(_id_bytes, post_json)| {
            serde_json::from_str::<Post>(post_json.value())
                .ok()
                .filter(|post| post.author_name == author_name)
                .map(|post| post.summary())
        })
        .collect();

    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(posts)
}

/// Case-insensitive substring search over title, short description and
/// byline, the same three fields the client-side filter matched.
pub fn search_summaries(
    db: &Database,
    query: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<PostSummary>, DbError> {
    let read_txn = db.begin_read()?;
    let posts_table = read_txn.open_table(POSTS)?;

    let needle = query.to_lowercase();

    let mut posts: Vec<PostSummary> = posts_table.iter()?
        .filter_map(|res| res.ok())
        .filter_map(|(_id_bytes, post_json)| {
            serde_json::from_str::<Post>(post_json.value())
                .ok()
                .filter(|post| {
                    post.title.to_lowercase().contains(&needle)
                        || post.short_description.to_lowercase().contains(&needle)
                        || post.author_name.to_lowercase().contains(&needle)
                })
                .map(|post| post.summary())
        })
        .collect();

    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let paginated = posts
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();

    Ok(paginated)
}

/// Every post summary, newest first. Feeds the analytics aggregation, which
/// wants the whole corpus.
pub fn read_all_summaries(db: &Database) -> Result<Vec<PostSummary>, DbError> {
    let read_txn = db.begin_read()?;
    let chrono_index = read_txn.open_table(CHRONOLOGICAL_INDEX)?;
    let posts_table = read_txn.open_table(POSTS)?;

    let posts = chrono_index
        .iter()?
        .filter_map(|item_result| {
            item_result.ok().and_then(|(key, _value)| {
                let post_id_bytes = key.value().1;
                posts_table.get(post_id_bytes).ok().flatten().and_then(|post_json| {
                    serde_json::from_str::<Post>(post_json.value())
                        .ok()
                        .map(|post| post.summary())
                })
            })
        })
        .collect();
    Ok(posts)
}

/// All comments a user has written, paired with the posts that carry them.
/// Scans every post's embedded comment array, newest comment first.
pub fn read_comments_by_author(db: &Database, uid: &str) -> Result<Vec<ProfileComment>, DbError> {
    let read_txn = db.begin_read()?;
    let posts_table = read_txn.open_table(POSTS)?;

    let mut comments: Vec<ProfileComment> = Vec::new();
    for item in posts_table.iter()? {
        let (_id_bytes, post_json) = item?;
        let post: Post = serde_json::from_str(post_json.value())?;
        for comment in post.comments.iter().filter(|c| c.author == uid) {
            comments.push(ProfileComment {
                post_id: post.id.clone(),
                comment: comment.clone(),
            });
        }
    }

    comments.sort_by(|a, b| b.comment.created_at.cmp(&a.comment.created_at));
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::db_setup;
    use tempfile::tempdir;

    fn open_post_db(dir: &std::path::Path) -> Database {
        let db = Database::create(dir.join("posts.db")).unwrap();
        db_setup::setup_posts_db(&db).unwrap();
        db
    }

    fn seeded_post(db: &Database, author: &str) -> String {
        create_post(db, "Title", "Short", "<p>Body</p>", author, "Byline", Vec::new()).unwrap()
    }

    fn comment_by(uid: &str, n: u32) -> Comment {
        Comment {
            id: format!("c-{}-{}", uid, n),
            author: uid.to_string(),
            username: format!("user-{}", uid),
            author_profile_picture: None,
            content: "hello".to_string(),
            created_at: Utc::now(),
            likes: 0,
            liked_by: Vec::new(),
            is_active_citizen: false,
        }
    }

    #[test]
    fn like_toggle_is_idempotent_per_user() {
        let dir = tempdir().unwrap();
        let db = open_post_db(dir.path());
        let post_id = seeded_post(&db, "author-1");

        let (post, liked) = toggle_like(&db, &post_id, "u1").unwrap();
        assert!(liked);
        assert_eq!(post.likes, 1);
        assert_eq!(post.liked_by, vec!["u1".to_string()]);

        // A second toggle from the same user removes the like instead of
        // double-counting it.
        let (post, liked) = toggle_like(&db, &post_id, "u1").unwrap();
        assert!(!liked);
        assert_eq!(post.likes, 0);
        assert!(post.liked_by.is_empty());
    }

    #[test]
    fn like_count_always_matches_liked_by_set() {
        let dir = tempdir().unwrap();
        let db = open_post_db(dir.path());
        let post_id = seeded_post(&db, "author-1");

        // Two "sessions" interleaving toggles: each committed state must keep
        // the counter equal to the set size.
        for uid in ["u1", "u2", "u1", "u2", "u2"] {
            let (post, _) = toggle_like(&db, &post_id, uid).unwrap();
            assert_eq!(post.likes as usize, post.liked_by.len());
        }

        let post = read_post(&db, &post_id).unwrap();
        assert_eq!(post.likes, 1);
        assert_eq!(post.liked_by, vec!["u2".to_string()]);
    }

    #[test]
    fn view_recording_is_once_per_viewer() {
        let dir = tempdir().unwrap();
        let db = open_post_db(dir.path());
        let post_id = seeded_post(&db, "author-1");

        record_view(&db, &post_id, "u1").unwrap();
        record_view(&db, &post_id, "u1").unwrap();
        let post = record_view(&db, &post_id, "u2").unwrap();

        assert_eq!(post.views, 2);
        assert_eq!(post.viewed_by.len(), 2);
    }

    #[test]
    fn comment_removal_returns_the_removed_comment() {
        let dir = tempdir().unwrap();
        let db = open_post_db(dir.path());
        let post_id = seeded_post(&db, "author-1");

        append_comment(&db, &post_id, comment_by("u1", 1)).unwrap();
        append_comment(&db, &post_id, comment_by("u2", 1)).unwrap();

        let (post, removed) = remove_comment(&db, &post_id, "c-u1-1").unwrap();
        assert_eq!(removed.author, "u1");
        assert_eq!(post.comments.len(), 1);
        assert_eq!(post.comments[0].author, "u2");
    }

    #[test]
    fn snapshot_rewrite_reaches_comments_on_every_post() {
        let dir = tempdir().unwrap();
        let db = open_post_db(dir.path());
        let post_a = seeded_post(&db, "author-1");
        let post_b = seeded_post(&db, "author-1");

        append_comment(&db, &post_a, comment_by("u1", 1)).unwrap();
        append_comment(&db, &post_b, comment_by("u1", 2)).unwrap();
        append_comment(&db, &post_b, comment_by("u2", 1)).unwrap();

        let touched = rewrite_comment_snapshots(&db, "u1", "renamed", Some("/media/profile_pictures/p.png")).unwrap();
        assert_eq!(touched, 2);

        for post_id in [&post_a, &post_b] {
            let post = read_post(&db, post_id).unwrap();
            for comment in post.comments.iter().filter(|c| c.author == "u1") {
                assert_eq!(comment.username, "renamed");
                assert_eq!(comment.author_profile_picture.as_deref(), Some("/media/profile_pictures/p.png"));
            }
        }

        // Other authors' snapshots are untouched.
        let post = read_post(&db, &post_b).unwrap();
        let other = post.comments.iter().find(|c| c.author == "u2").unwrap();
        assert_eq!(other.username, "user-u2");
    }

    #[test]
    fn delete_cascades_into_favorites_and_comment_counts() {
        let dir = tempdir().unwrap();
        let db = open_post_db(dir.path());
        let mut conn = Connection::open_in_memory().unwrap();
        db_setup::setup_users_db(&mut conn).unwrap();

        for uid in ["u1", "u2", "u3"] {
            users_db_operations::create_user(&conn, uid, &format!("{}@school.test", uid), "pw-not-relevant-here").unwrap();
        }

        let post_id = seeded_post(&db, "author-1");
        let other_post = seeded_post(&db, "author-1");

        for uid in ["u1", "u2", "u3"] {
            users_db_operations::add_favorite(&conn, uid, &post_id).unwrap();
        }
        users_db_operations::add_favorite(&conn, "u1", &other_post).unwrap();

        append_comment(&db, &post_id, comment_by("u1", 1)).unwrap();
        append_comment(&db, &post_id, comment_by("u1", 2)).unwrap();
        users_db_operations::increment_comment_count(&conn, "u1").unwrap();
        users_db_operations::increment_comment_count(&conn, "u1").unwrap();

        let deleted = delete_post(&db, &mut conn, &post_id).unwrap();
        assert_eq!(deleted.comments.len(), 2);

        assert!(read_post(&db, &post_id).is_none());
        // Every favorites reference to the dead post is gone; unrelated ones stay.
        for uid in ["u1", "u2", "u3"] {
            let favorites = users_db_operations::list_favorites(&conn, uid).unwrap();
            assert!(!favorites.contains(&post_id));
        }
        assert_eq!(users_db_operations::list_favorites(&conn, "u1").unwrap(), vec![other_post]);

        let u1 = users_db_operations::read_user(&conn, "u1").unwrap();
        assert_eq!(u1.comment_count, 0);
    }

    #[test]
    fn latest_listing_is_newest_first_and_paginated() {
        let dir = tempdir().unwrap();
        let db = open_post_db(dir.path());
        let ids: Vec<String> = (0..3).map(|_| seeded_post(&db, "author-1")).collect();

        let all = read_latest_summaries(&db, 50, 0).unwrap();
        assert_eq!(all.len(), 3);
        // Same creation second is possible; every id must be present exactly once.
        for id in &ids {
            assert_eq!(all.iter().filter(|p| &p.id == id).count(), 1);
        }
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let page = read_latest_summaries(&db, 2, 2).unwrap();
        assert_eq!(page.len(), 1);
    }
}
