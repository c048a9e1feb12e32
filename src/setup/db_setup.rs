use redb::{Database, TableDefinition, CommitError, StorageError, TableError, TransactionError};
use rusqlite::{Connection, Result as RusqliteResult, Transaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("Redb storage error: {0}")]
    RedbStorage(#[from] StorageError),
    #[error("Redb transaction error: {0}")]
    RedbTransaction(#[from] TransactionError),
    #[error("Redb table error: {0}")]
    RedbTable(#[from] TableError),
    #[error("Redb commit error: {0}")]
    RedbCommit(#[from] CommitError),
}

pub fn setup_users_db(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;
    println!("- Creating 'users' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            username TEXT,
            bio TEXT,
            profile_picture TEXT,
            role TEXT NOT NULL DEFAULT 'member' CHECK(role IN ('admin', 'member')),
            setup_completed INTEGER NOT NULL DEFAULT 0,
            accepted_rules INTEGER NOT NULL DEFAULT 0,
            username_change_count INTEGER NOT NULL DEFAULT 0,
            last_username_change TEXT,
            comment_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;

    println!("- Creating 'favorites' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS favorites (
            user_id TEXT NOT NULL,
            post_id TEXT NOT NULL,
            PRIMARY KEY (user_id, post_id),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;

    println!("- Creating 'settings' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    seed_initial_settings(&tx)?;

    tx.commit()?;
    Ok(())
}

fn seed_initial_settings(tx: &Transaction) -> RusqliteResult<()> {
    println!("- Seeding initial settings...");
    let default_max_size = "10";
    tx.execute(
        "INSERT OR IGNORE INTO settings (key, value) VALUES ('max_file_upload_size_mb', ?1)",
        [&default_max_size],
    )?;
    println!("  > Default max file upload size set to: {} MB", default_max_size);

    // Image uploads only; anything else is rejected at the door.
    let default_mime_types = "image/jpeg,image/png,image/webp,image/gif";
    tx.execute(
        "INSERT OR IGNORE INTO settings (key, value) VALUES ('allowed_mime_types', ?1)",
        [&default_mime_types],
    )?;
    println!("  > Default allowed MIME types set to: {}", default_mime_types);

    Ok(())
}

pub fn setup_posts_db(db: &Database) -> Result<(), SetupError> {
    let write_txn = db.begin_write()?;
    {
        const POSTS: TableDefinition<&[u8; 16], &str> = TableDefinition::new("posts");
        const CHRONOLOGICAL_INDEX: TableDefinition<(i64, &[u8; 16]), ()> = TableDefinition::new("chronological_index");
        const AUTHOR_INDEX: TableDefinition<(&str, i64, &[u8; 16]), ()> = TableDefinition::new("author_index");

        println!("- Creating 'posts' table in Redb...");
        write_txn.open_table(POSTS)?;

        println!("- Creating 'chronological_index' table in Redb...");
        write_txn.open_table(CHRONOLOGICAL_INDEX)?;

        println!("- Creating 'author_index' table in Redb...");
        write_txn.open_table(AUTHOR_INDEX)?;
    }
    write_txn.commit()?;
    Ok(())
}
