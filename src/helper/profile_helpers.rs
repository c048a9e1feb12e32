use crate::config::Config;
use crate::helper::forum_helpers::ForumHelperError;
use crate::helper::{media_helpers, sanitization_helpers};
use crate::helper::media_helpers::{MediaArea, UploadLimits};
use crate::models::db_operations::{posts_db_operations, users_db_operations};
use crate::models::UserAccount;
use actix_multipart::Multipart;
use redb::Database;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UsernameChange {
    /// `remaining_changes` is absent for admins, who are not rate-limited.
    Applied {
        username: String,
        remaining_changes: Option<u32>,
        comments_updated: usize,
    },
    LimitReached,
}

/// Applies a username change under the lifetime limit and fans the new name
/// out to the denormalized snapshots on every comment the user has written.
pub fn change_username(
    db: &Database,
    conn: &Connection,
    user: &UserAccount,
    new_username: &str,
) -> Result<UsernameChange, ForumHelperError> {
    let cleaned = sanitization_helpers::strip_all_html(new_username.trim());
    let exempt = user.is_admin();

    if !users_db_operations::change_username(conn, &user.id, &cleaned, exempt)? {
        return Ok(UsernameChange::LimitReached);
    }

    let comments_updated = posts_db_operations::rewrite_comment_snapshots(
        db,
        &user.id,
        &cleaned,
        user.profile_picture.as_deref(),
    )?;

    let remaining_changes = if exempt {
        None
    } else {
        Some(users_db_operations::USERNAME_CHANGE_LIMIT.saturating_sub(user.username_change_count + 1))
    };

    Ok(UsernameChange::Applied {
        username: cleaned,
        remaining_changes,
        comments_updated,
    })
}

/// Stores a freshly uploaded profile picture: saves the file, removes the
/// previous one, updates the user row and rewrites the picture snapshot on
/// every comment the user has written.
pub async fn change_profile_picture(
    db: &Database,
    conn: &Connection,
    config: &Config,
    user: &UserAccount,
    payload: Multipart,
) -> Result<String, Box<dyn std::error::Error>> {
    let limits = UploadLimits::load(conn);
    let public_url = media_helpers::save_image(config, &limits, MediaArea::ProfilePictures, payload).await?;

    if let Some(old_url) = &user.profile_picture {
        if let Err(e) = media_helpers::delete_by_public_url(config, old_url) {
            log::error!("Failed to delete previous profile picture '{}': {}", old_url, e);
        }
    }

    users_db_operations::update_profile_picture(conn, &user.id, &public_url)?;

    let username = user.username.clone().unwrap_or_else(|| "Unknown".to_string());
    posts_db_operations::rewrite_comment_snapshots(db, &user.id, &username, Some(&public_url))?;

    Ok(public_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::forum_helpers;
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
    fn rename_updates_comments_on_every_post() {
        let (db, conn, _dir) = fixtures();
        let user = ready_user(&conn, "u1");

        let post_a = posts_db_operations::create_post(&db, "a", "d", "c", "adm", "Staff", Vec::new()).unwrap();
        let post_b = posts_db_operations::create_post(&db, "b", "d", "c", "adm", "Staff", Vec::new()).unwrap();
        forum_helpers::post_comment(&db, &conn, &user, &post_a, "one").unwrap();
        let user = users_db_operations::read_user(&conn, "u1").unwrap();
        forum_helpers::post_comment(&db, &conn, &user, &post_b, "two").unwrap();

        let user = users_db_operations::read_user(&conn, "u1").unwrap();
        let outcome = change_username(&db, &conn, &user, "  brand<new> ").unwrap();
        match outcome {
            UsernameChange::Applied { username, remaining_changes, comments_updated } => {
                assert_eq!(username, "brand");
                assert_eq!(remaining_changes, Some(1));
                assert_eq!(comments_updated, 2);
            }
            UsernameChange::LimitReached => panic!("change should have applied"),
        }

        for post_id in [&post_a, &post_b] {
            let post = posts_db_operations::read_post(&db, post_id).unwrap();
            assert_eq!(post.comments[0].username, "brand");
        }
    }

    #[test]
    fn third_rename_hits_the_limit_and_touches_nothing() {
        let (db, conn, _dir) = fixtures();
        let user = ready_user(&conn, "u1");
        let post = posts_db_operations::create_post(&db, "a", "d", "c", "adm", "Staff", Vec::new()).unwrap();
        forum_helpers::post_comment(&db, &conn, &user, &post, "one").unwrap();

        for name in ["first", "second"] {
            let user = users_db_operations::read_user(&conn, "u1").unwrap();
            assert!(matches!(
                change_username(&db, &conn, &user, name).unwrap(),
                UsernameChange::Applied { .. }
            ));
        }

        let user = users_db_operations::read_user(&conn, "u1").unwrap();
        assert!(matches!(
            change_username(&db, &conn, &user, "third").unwrap(),
            UsernameChange::LimitReached
        ));

        let stored = posts_db_operations::read_post(&db, &post).unwrap();
        assert_eq!(stored.comments[0].username, "second");
    }

    #[test]
    fn admin_renames_are_unlimited() {
        let (db, conn, _dir) = fixtures();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, role, setup_completed, accepted_rules) \
             VALUES ('adm', 'adm@school.test', 'x', 'admin', 1, 1)",
            [],
        ).unwrap();

        for name in ["a", "b", "c", "d"] {
            let user = users_db_operations::read_user(&conn, "adm").unwrap();
            let outcome = change_username(&db, &conn, &user, name).unwrap();
            match outcome {
                UsernameChange::Applied { remaining_changes, .. } => assert_eq!(remaining_changes, None),
                UsernameChange::LimitReached => panic!("admins are exempt"),
            }
        }
    }
}
