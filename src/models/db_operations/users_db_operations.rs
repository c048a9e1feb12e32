use crate::models::UserAccount;
use bcrypt::{hash, verify, BcryptError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Error as RusqliteError};

/// Lifetime username changes a regular member gets. Admins are exempt.
pub const USERNAME_CHANGE_LIMIT: u32 = 2;

fn bcrypt_to_rusqlite_error(e: BcryptError) -> RusqliteError {
    RusqliteError::ToSqlConversionFailure(Box::new(e))
}

pub fn create_user(
    conn: &Connection,
    id: &str,
    email: &str,
    password: &str,
) -> Result<(), RusqliteError> {
    let hashed_password = hash(password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "INSERT INTO users (id, email, password_hash, role) VALUES (?1, ?2, ?3, 'member')",
        params![id, email, hashed_password],
    )?;
    Ok(())
}

pub fn email_exists(conn: &Connection, email: &str) -> Result<bool, RusqliteError> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM users WHERE email = ?1", [email], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserAccount> {
    Ok(UserAccount {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        bio: row.get(3)?,
        profile_picture: row.get(4)?,
        role: row.get(5)?,
        setup_completed: row.get(6)?,
        accepted_rules: row.get(7)?,
        username_change_count: row.get(8)?,
        last_username_change: row.get(9)?,
        comment_count: row.get(10)?,
        created_at: row.get(11)?,
    })
}

const USER_COLUMNS: &str = "id, email, username, bio, profile_picture, role, setup_completed, \
    accepted_rules, username_change_count, last_username_change, comment_count, created_at";

pub fn read_user(conn: &Connection, uid: &str) -> Option<UserAccount> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [uid],
        user_from_row,
    ).ok()
}

/// Checks an email/password pair and returns the account on success. The
/// caller cannot distinguish an unknown email from a wrong password.
pub fn verify_credentials(conn: &Connection, email: &str, password: &str) -> Option<UserAccount> {
    let res: rusqlite::Result<(String, String)> = conn.query_row(
        "SELECT id, password_hash FROM users WHERE email = ?1",
        [email],
        |row| Ok((row.get(0)?, row.get(1)?)),
    );

    if let Ok((id, password_hash)) = res {
        if verify(password, &password_hash).unwrap_or(false) {
            return read_user(conn, &id);
        }
    }
    None
}

/// First-login profile setup. `created_at` is stamped once and never
/// overwritten; it feeds the registration-growth histogram.
pub fn complete_setup(
    conn: &Connection,
    uid: &str,
    username: &str,
    bio: Option<&str>,
    profile_picture: Option<&str>,
) -> Result<(), RusqliteError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE users SET username = ?1, bio = ?2, \
         profile_picture = COALESCE(?3, profile_picture), setup_completed = 1, \
         created_at = COALESCE(created_at, ?4) WHERE id = ?5",
        params![username, bio, profile_picture, now, uid],
    )?;
    Ok(())
}

pub fn accept_rules(conn: &Connection, uid: &str) -> Result<(), RusqliteError> {
    conn.execute("UPDATE users SET accepted_rules = 1 WHERE id = ?1", [uid])?;
    Ok(())
}

pub fn update_bio(conn: &Connection, uid: &str, bio: &str) -> Result<(), RusqliteError> {
    conn.execute("UPDATE users SET bio = ?1 WHERE id = ?2", params![bio, uid])?;
    Ok(())
}

pub fn update_profile_picture(conn: &Connection, uid: &str, url: &str) -> Result<(), RusqliteError> {
    conn.execute("UPDATE users SET profile_picture = ?1 WHERE id = ?2", params![url, uid])?;
    Ok(())
}

/// Applies a username change under the lifetime rate limit. Returns false
/// when the member has exhausted their changes. Exempt callers (admins) do
/// not advance the counter. The guard lives in the UPDATE's WHERE clause so
/// two racing changes cannot both slip under the limit.
pub fn change_username(
    conn: &Connection,
    uid: &str,
    new_username: &str,
    exempt: bool,
) -> Result<bool, RusqliteError> {
    let now = Utc::now().to_rfc3339();
    let changed = if exempt {
        conn.execute(
            "UPDATE users SET username = ?1, last_username_change = ?2 WHERE id = ?3",
            params![new_username, now, uid],
        )?
    } else {
        conn.execute(
            "UPDATE users SET username = ?1, last_username_change = ?2, \
             username_change_count = username_change_count + 1 \
             WHERE id = ?3 AND username_change_count < ?4",
            params![new_username, now, uid, USERNAME_CHANGE_LIMIT],
        )?
    };
    Ok(changed > 0)
}

// --- Authoritative comment counter (drives the active-citizen badge) ---

pub fn increment_comment_count(conn: &Connection, uid: &str) -> Result<(), RusqliteError> {
    conn.execute("UPDATE users SET comment_count = comment_count + 1 WHERE id = ?1", [uid])?;
    Ok(())
}

pub fn reduce_comment_count(conn: &Connection, uid: &str, by: u32) -> Result<(), RusqliteError> {
    conn.execute(
        "UPDATE users SET comment_count = MAX(comment_count - ?1, 0) WHERE id = ?2",
        params![by, uid],
    )?;
    Ok(())
}

// --- Favorites (the posts a user has liked) ---

pub fn add_favorite(conn: &Connection, uid: &str, post_id: &str) -> Result<(), RusqliteError> {
    conn.execute(
        "INSERT OR IGNORE INTO favorites (user_id, post_id) VALUES (?1, ?2)",
        params![uid, post_id],
    )?;
    Ok(())
}

pub fn remove_favorite(conn: &Connection, uid: &str, post_id: &str) -> Result<(), RusqliteError> {
    conn.execute(
        "DELETE FROM favorites WHERE user_id = ?1 AND post_id = ?2",
        params![uid, post_id],
    )?;
    Ok(())
}

pub fn list_favorites(conn: &Connection, uid: &str) -> Result<Vec<String>, RusqliteError> {
    let mut stmt = conn.prepare("SELECT post_id FROM favorites WHERE user_id = ?1 ORDER BY rowid")?;
    let ids = stmt.query_map([uid], |row| row.get::<_, String>(0))?
        .filter_map(|id| id.ok())
        .collect();
    Ok(ids)
}

/// Part of the post-delete cascade: no favorites list may keep a reference
/// to a deleted post.
pub fn remove_post_from_all_favorites(conn: &Connection, post_id: &str) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM favorites WHERE post_id = ?1", [post_id])
}

/// Registration timestamps of every user that finished setup, for the
/// growth-by-day histogram.
pub fn registration_dates(conn: &Connection) -> Result<Vec<DateTime<Utc>>, RusqliteError> {
    let mut stmt = conn.prepare("SELECT created_at FROM users WHERE created_at IS NOT NULL")?;
    let dates = stmt.query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|raw| raw.ok())
        .filter_map(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .collect();
    Ok(dates)
}

// --- Settings (upload limits, allowed MIME types) ---

pub fn read_setting(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .unwrap_or(None)
}

pub fn update_setting(conn: &Connection, key: &str, value: &str) -> Result<(), RusqliteError> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ACTIVE_CITIZEN_THRESHOLD;
    use crate::setup::db_setup;

    fn memory_db() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        db_setup::setup_users_db(&mut conn).unwrap();
        conn
    }

    #[test]
    fn username_changes_stop_at_the_lifetime_limit() {
        let conn = memory_db();
        create_user(&conn, "u1", "u1@school.test", "secret").unwrap();

        assert!(change_username(&conn, "u1", "first", false).unwrap());
        assert!(change_username(&conn, "u1", "second", false).unwrap());
        assert!(!change_username(&conn, "u1", "third", false).unwrap());

        let user = read_user(&conn, "u1").unwrap();
        assert_eq!(user.username.as_deref(), Some("second"));
        assert_eq!(user.username_change_count, USERNAME_CHANGE_LIMIT);
    }

    #[test]
    fn exempt_changes_never_advance_the_counter() {
        let conn = memory_db();
        create_user(&conn, "adm", "adm@school.test", "secret").unwrap();

        for name in ["a", "b", "c", "d"] {
            assert!(change_username(&conn, "adm", name, true).unwrap());
        }
        let user = read_user(&conn, "adm").unwrap();
        assert_eq!(user.username_change_count, 0);
        assert_eq!(user.username.as_deref(), Some("d"));
    }

    #[test]
    fn comment_counter_does_not_go_negative() {
        let conn = memory_db();
        create_user(&conn, "u1", "u1@school.test", "secret").unwrap();

        increment_comment_count(&conn, "u1").unwrap();
        reduce_comment_count(&conn, "u1", 5).unwrap();

        let user = read_user(&conn, "u1").unwrap();
        assert_eq!(user.comment_count, 0);
    }

    #[test]
    fn active_citizen_badge_flips_exactly_at_the_threshold() {
        let conn = memory_db();
        create_user(&conn, "u1", "u1@school.test", "secret").unwrap();

        for _ in 0..(ACTIVE_CITIZEN_THRESHOLD - 1) {
            increment_comment_count(&conn, "u1").unwrap();
        }
        assert!(!read_user(&conn, "u1").unwrap().is_active_citizen());

        increment_comment_count(&conn, "u1").unwrap();
        assert!(read_user(&conn, "u1").unwrap().is_active_citizen());
    }

    #[test]
    fn favorites_are_a_set_with_stable_order() {
        let conn = memory_db();
        create_user(&conn, "u1", "u1@school.test", "secret").unwrap();

        add_favorite(&conn, "u1", "p1").unwrap();
        add_favorite(&conn, "u1", "p2").unwrap();
        add_favorite(&conn, "u1", "p1").unwrap(); // duplicate, ignored

        assert_eq!(list_favorites(&conn, "u1").unwrap(), vec!["p1".to_string(), "p2".to_string()]);

        remove_favorite(&conn, "u1", "p1").unwrap();
        assert_eq!(list_favorites(&conn, "u1").unwrap(), vec!["p2".to_string()]);
    }

    #[test]
    fn credentials_verify_against_the_stored_hash() {
        let conn = memory_db();
        create_user(&conn, "u1", "u1@school.test", "secret").unwrap();

        assert!(verify_credentials(&conn, "u1@school.test", "secret").is_some());
        assert!(verify_credentials(&conn, "u1@school.test", "wrong").is_none());
        assert!(verify_credentials(&conn, "nobody@school.test", "secret").is_none());
    }

    #[test]
    fn setup_stamps_created_at_only_once() {
        let conn = memory_db();
        create_user(&conn, "u1", "u1@school.test", "secret").unwrap();

        complete_setup(&conn, "u1", "name", Some("bio"), None).unwrap();
        let first = read_user(&conn, "u1").unwrap().created_at.unwrap();

        complete_setup(&conn, "u1", "name2", Some("bio2"), None).unwrap();
        let second = read_user(&conn, "u1").unwrap().created_at.unwrap();
        assert_eq!(first, second);

        assert_eq!(registration_dates(&conn).unwrap().len(), 1);
    }
}
