use crate::helper::sanitization_helpers;
use crate::models::db_operations::posts_db_operations::{self, DbError};
use crate::models::db_operations::users_db_operations;
use crate::models::{Comment, Post, PostSummary, ProfileComment, UserAccount, ACTIVE_CITIZEN_THRESHOLD};
use chrono::Utc;
use redb::Database;
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ForumHelperError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Posts database error: {0}")]
    PostsDatabase(#[from] DbError),
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not allowed")]
    Forbidden,
}

/// A member may browse once logged in; participating (likes, comments)
/// additionally requires the finished setup flow and the accepted rules.
pub fn forum_ready(user: &UserAccount) -> bool {
    user.setup_completed && user.accepted_rules
}

/// Posts can be edited and deleted by their author or by an admin.
pub fn can_modify_post(user: &UserAccount, post: &Post) -> bool {
    user.is_admin() || user.id == post.author
}

fn display_name(user: &UserAccount) -> String {
    user.username.clone().unwrap_or_else(|| "Unknown".to_string())
}

/// Appends a comment to a post, keeping the author's authoritative comment
/// count in step. The counter moves first; if the post-store append fails the
/// increment is rolled back so the badge source of truth cannot drift ahead
/// of the stored comments.
///
/// The badge snapshot on the comment reflects the author's standing with
/// this comment included, so the 25th comment itself carries the badge.
pub fn post_comment(
    db: &Database,
    conn: &Connection,
    user: &UserAccount,
    post_id: &str,
    raw_content: &str,
) -> Result<Post, ForumHelperError> {
    if !forum_ready(user) {
        return Err(ForumHelperError::Forbidden);
    }

    let content = sanitization_helpers::sanitize_comment_content(raw_content.trim());
    let is_active_citizen = user.comment_count + 1 >= ACTIVE_CITIZEN_THRESHOLD;

    let comment = Comment {
        id: Uuid::new_v4().to_string(),
        author: user.id.clone(),
        username: display_name(user),
        author_profile_picture: user.profile_picture.clone(),
        content,
        created_at: Utc::now(),
        likes: 0,
        liked_by: Vec::new(),
        is_active_citizen,
    };

    users_db_operations::increment_comment_count(conn, &user.id)?;

    match posts_db_operations::append_comment(db, post_id, comment) {
        Ok(post) => Ok(post),
        Err(e) => {
            log::error!("Comment append failed for post {}. Rolling back comment count for {}.", post_id, user.id);
            if let Err(rollback_err) = users_db_operations::reduce_comment_count(conn, &user.id, 1) {
                log::error!("Comment count rollback failed for {}: {}", user.id, rollback_err);
            }
            Err(e.into())
        }
    }
}

/// Removes a comment on behalf of `requester` (its author or an admin) and
/// walks the comment author's count back down. Losing the 25th comment loses
/// the badge.
pub fn delete_comment(
    db: &Database,
    conn: &Connection,
    requester: &UserAccount,
    post_id: &str,
    comment_id: &str,
) -> Result<Post, ForumHelperError> {
    let post = posts_db_operations::read_post(db, post_id)
        .ok_or_else(|| ForumHelperError::NotFound(post_id.to_string()))?;
    let comment = post.comments.iter().find(|c| c.id == comment_id)
        .ok_or_else(|| ForumHelperError::NotFound(comment_id.to_string()))?;

    if comment.author != requester.id && !requester.is_admin() {
        return Err(ForumHelperError::Forbidden);
    }

    let (updated, removed) = posts_db_operations::remove_comment(db, post_id, comment_id)?;
    users_db_operations::reduce_comment_count(conn, &removed.author, 1)?;
    Ok(updated)
}

/// Fills in live author details on post summaries. Posts by members show the
/// author's current username and picture; posts published by an admin keep
/// their stored byline and no picture.
pub fn resolve_author_profiles(conn: &Connection, summaries: &mut [PostSummary]) {
    for summary in summaries.iter_mut() {
        match users_db_operations::read_user(conn, &summary.author) {
            Some(author) if !author.is_admin() => {
                summary.author_name = author.username.unwrap_or_else(|| "Unknown Author".to_string());
                summary.author_profile_picture = author.profile_picture;
            }
            Some(_) => {
                summary.author_profile_picture = None;
            }
            None => {
                summary.author_name = "Unknown Author".to_string();
                summary.author_profile_picture = None;
            }
        }
    }
}

/// Resolves a user's favorites to post summaries. References to posts that
/// have since disappeared are skipped and pruned from the list so they stop
/// resurfacing on every read.
pub fn resolve_favorites(
    db: &Database,
    conn: &Connection,
    uid: &str,
) -> Result<Vec<PostSummary>, ForumHelperError> {
    let mut summaries = Vec::new();
    for post_id in users_db_operations::list_favorites(conn, uid)? {
        match posts_db_operations::read_summary_by_id(db, &post_id)? {
            Some(summary) => summaries.push(summary),
            None => {
                users_db_operations::remove_favorite(conn, uid, &post_id)?;
            }
        }
    }
    resolve_author_profiles(conn, &mut summaries);
    Ok(summaries)
}

/// Everything a profile page shows about a user.
#[derive(Serialize)]
pub struct PublicProfile {
    pub id: String,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub is_active_citizen: bool,
    pub comment_count: u32,
    pub favorites: Vec<PostSummary>,
    pub comments: Vec<ProfileComment>,
}

pub fn assemble_profile(
    db: &Database,
    conn: &Connection,
    uid: &str,
) -> Result<PublicProfile, ForumHelperError> {
    let user = users_db_operations::read_user(conn, uid)
        .ok_or_else(|| ForumHelperError::NotFound(uid.to_string()))?;

    let favorites = resolve_favorites(db, conn, uid)?;
    let comments = posts_db_operations::read_comments_by_author(db, uid)?;

    Ok(PublicProfile {
        id: user.id,
        username: user.username.clone(),
        bio: user.bio.clone(),
        profile_picture: user.profile_picture.clone(),
        is_active_citizen: user.comment_count >= ACTIVE_CITIZEN_THRESHOLD,
        comment_count: user.comment_count,
        favorites,
        comments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::db_setup;
    use tempfile::tempdir;

    fn fixtures() -> (Database, Connection, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("posts.db")).unwrap();
        db_setup::setup_posts_db(&db).unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        db_setup::setup_users_db(&mut conn).unwrap();
        (db, conn, dir)
    }

    fn ready_user(conn: &Connection, uid: &str) -> UserAccount {
        users_db_operations::create_user(conn, uid, &format!("{}@school.test", uid), "secret").unwrap();
        users_db_operations::complete_setup(conn, uid, &format!("user-{}", uid), None, None).unwrap();
        users_db_operations::accept_rules(conn, uid).unwrap();
        users_db_operations::read_user(conn, uid).unwrap()
    }

    #[test]
    fn commenting_requires_the_finished_onboarding_flow() {
        let (db, conn, _dir) = fixtures();
        users_db_operations::create_user(&conn, "u1", "u1@school.test", "secret").unwrap();
        let user = users_db_operations::read_user(&conn, "u1").unwrap();
        let post_id = posts_db_operations::create_post(&db, "t", "d", "c", "adm", "Staff", Vec::new()).unwrap();

        let result = post_comment(&db, &conn, &user, &post_id, "hi");
        assert!(matches!(result, Err(ForumHelperError::Forbidden)));
    }

    #[test]
    fn the_twenty_fifth_comment_carries_the_badge() {
        let (db, conn, _dir) = fixtures();
        let post_id = posts_db_operations::create_post(&db, "t", "d", "c", "adm", "Staff", Vec::new()).unwrap();

        let user = ready_user(&conn, "u1");
        let post = post_comment(&db, &conn, &user, &post_id, "first").unwrap();
        assert!(!post.comments.last().unwrap().is_active_citizen);

        // 23 more, bringing the count to 24.
        for i in 0..23 {
            let user = users_db_operations::read_user(&conn, "u1").unwrap();
            post_comment(&db, &conn, &user, &post_id, &format!("comment {}", i)).unwrap();
        }
        let user = users_db_operations::read_user(&conn, "u1").unwrap();
        assert_eq!(user.comment_count, 24);
        assert!(!user.is_active_citizen());

        let post = post_comment(&db, &conn, &user, &post_id, "the 25th").unwrap();
        assert!(post.comments.last().unwrap().is_active_citizen);
        assert!(users_db_operations::read_user(&conn, "u1").unwrap().is_active_citizen());
    }

    #[test]
    fn failed_comment_append_rolls_the_counter_back() {
        let (db, conn, _dir) = fixtures();
        let user = ready_user(&conn, "u1");

        // A post id that does not exist makes the append fail after the
        // counter has already moved.
        let result = post_comment(&db, &conn, &user, &Uuid::new_v4().to_string(), "hi");
        assert!(result.is_err());
        assert_eq!(users_db_operations::read_user(&conn, "u1").unwrap().comment_count, 0);
    }

    #[test]
    fn comment_deletion_is_author_or_admin_only() {
        let (db, conn, _dir) = fixtures();
        let post_id = posts_db_operations::create_post(&db, "t", "d", "c", "adm", "Staff", Vec::new()).unwrap();

        let author = ready_user(&conn, "u1");
        let stranger = ready_user(&conn, "u2");
        let post = post_comment(&db, &conn, &author, &post_id, "mine").unwrap();
        let comment_id = post.comments[0].id.clone();

        let result = delete_comment(&db, &conn, &stranger, &post_id, &comment_id);
        assert!(matches!(result, Err(ForumHelperError::Forbidden)));

        let updated = delete_comment(&db, &conn, &author, &post_id, &comment_id).unwrap();
        assert!(updated.comments.is_empty());
        assert_eq!(users_db_operations::read_user(&conn, "u1").unwrap().comment_count, 0);
    }

    #[test]
    fn favorites_resolution_prunes_dead_references() {
        let (db, conn, _dir) = fixtures();
        let user = ready_user(&conn, "u1");

        let alive = posts_db_operations::create_post(&db, "t", "d", "c", "adm", "Staff", Vec::new()).unwrap();
        users_db_operations::add_favorite(&conn, &user.id, &alive).unwrap();
        users_db_operations::add_favorite(&conn, &user.id, &Uuid::new_v4().to_string()).unwrap();

        let favorites = resolve_favorites(&db, &conn, &user.id).unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, alive);

        // The dead reference is gone from storage, not just from the response.
        assert_eq!(users_db_operations::list_favorites(&conn, &user.id).unwrap(), vec![alive]);
    }

    #[test]
    fn member_posts_show_live_author_details_admin_posts_keep_their_byline() {
        let (db, conn, _dir) = fixtures();
        let member = ready_user(&conn, "u1");
        users_db_operations::update_profile_picture(&conn, &member.id, "/media/profile_pictures/u1.png").unwrap();

        conn.execute(
            "INSERT INTO users (id, email, password_hash, role) VALUES ('adm', 'adm@school.test', 'x', 'admin')",
            [],
        ).unwrap();

        let member_post = posts_db_operations::create_post(&db, "t", "d", "c", &member.id, "stale-name", Vec::new()).unwrap();
        let admin_post = posts_db_operations::create_post(&db, "t", "d", "c", "adm", "The Editors", Vec::new()).unwrap();

        let mut summaries = posts_db_operations::read_all_summaries(&db).unwrap();
        resolve_author_profiles(&conn, &mut summaries);

        let member_summary = summaries.iter().find(|s| s.id == member_post).unwrap();
        assert_eq!(member_summary.author_name, "user-u1");
        assert_eq!(member_summary.author_profile_picture.as_deref(), Some("/media/profile_pictures/u1.png"));

        let admin_summary = summaries.iter().find(|s| s.id == admin_post).unwrap();
        assert_eq!(admin_summary.author_name, "The Editors");
        assert!(admin_summary.author_profile_picture.is_none());
    }
}
