use clap::{Parser, Subcommand};
use agora_backend::config::Config;
use agora_backend::helper::media_helpers;
use agora_backend::models::Post;
use agora_backend::models::db_operations::posts_db_operations;
use agora_backend::setup::db_setup;
use rusqlite::{params, Connection};
use bcrypt::{hash, DEFAULT_COST};
use chrono::Utc;
use redb::{Database, ReadableTable};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "setup_cli", author, version, about = "A CLI for initial forum setup and maintenance.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    Media {
        #[command(subcommand)]
        action: MediaAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    Setup {
        db_type: Option<String>,
    }
}

#[derive(Subcommand, Debug)]
enum AdminAction {
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        username: String,
    },
    List,
    ChangePassword {
        #[arg(long)]
        email: String,
        #[arg(long)]
        new_password: String,
    },
}

#[derive(Subcommand, Debug)]
enum MediaAction {
    /// Lists files in the media areas that no post or profile references.
    Audit,
}

fn main() {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file)
        .expect("FATAL: Failed to load or parse configuration.");

    match &cli.command {
        Commands::Db { action } => match action {
            DbAction::Setup { db_type } => {
                match db_type.as_deref() {
                    Some("users") => setup_users_database(&config),
                    Some("posts") => setup_posts_database(&config),
                    Some(other) => eprintln!("❌ Error: Unknown database type '{}'. Use 'users' or 'posts'.", other),
                    None => {
                        setup_users_database(&config);
                        setup_posts_database(&config);
                    }
                }
            }
        },
        Commands::Admin { action } => match action {
            AdminAction::Create { email, password, username } => {
                create_admin_user(&config, email, password, username);
            }
            AdminAction::List => {
                list_admin_users(&config);
            }
            AdminAction::ChangePassword { email, new_password } => {
                change_admin_password(&config, email, new_password);
            }
        },
        Commands::Media { action } => match action {
            MediaAction::Audit => {
                audit_media(&config);
            }
        },
    }
}

fn setup_users_database(config: &Config) {
    let db_path = config.users_db_path();
    if db_path.exists() {
        println!("ℹ️ Users database already exists at '{}'. Skipping creation.", db_path.display());
        return;
    }
    println!("\nSetting up users database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let mut conn = Connection::open(&db_path).expect("Could not create users database file.");
    match db_setup::setup_users_db(&mut conn) {
        Ok(_) => println!("✅ Users database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up users database: {}", e),
    }
}

fn setup_posts_database(config: &Config) {
    let db_path = config.posts_db_path();
    if db_path.exists() {
        println!("ℹ️ Posts database already exists at '{}'. Skipping creation.", db_path.display());
        return;
    }
    println!("\nSetting up posts database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let db = Database::create(&db_path).expect("Failed to create posts database file.");
    match db_setup::setup_posts_db(&db) {
        Ok(_) => println!("✅ Posts database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up posts database: {}", e),
    }
}

/// Admin accounts skip the onboarding flow; the gates exist for members.
fn create_admin_user(config: &Config, email: &str, password: &str, username: &str) {
    let db_path = config.users_db_path();
    if !db_path.exists() {
        eprintln!("❌ Error: Users database not found at '{}'. Please run `setup_cli db setup` first.", db_path.display());
        return;
    }
    let conn = Connection::open(&db_path).expect("Could not open users database.");
    let hashed_password = hash(password, DEFAULT_COST).expect("Failed to hash password");
    let uid = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    match conn.execute(
        "INSERT INTO users (id, email, password_hash, username, role, setup_completed, accepted_rules, created_at) \
         VALUES (?1, ?2, ?3, ?4, 'admin', 1, 1, ?5)",
        params![uid, email, hashed_password, username, now],
    ) {
        Ok(_) => println!("✅ Admin user '{}' created successfully with id {}.", email, uid),
        Err(e) => eprintln!("❌ Error creating admin user: {}. It might be because the email already exists.", e),
    }
}

fn list_admin_users(config: &Config) {
    let conn = match Connection::open(config.users_db_path()) {
        Ok(c) => c,
        Err(_) => {
            eprintln!("❌ Error: Users database not found. Please run `setup_cli db setup` first.");
            return;
        }
    };
    let mut stmt = match conn.prepare("SELECT email FROM users WHERE role = 'admin' ORDER BY email") {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Error preparing database query: {}", e);
            return;
        }
    };
    let user_iter = stmt.query_map([], |row| row.get::<_, String>(0));

    println!("Listing Admin Users:");
    match user_iter {
        Ok(users) => {
            for user in users {
                println!("- {}", user.unwrap_or_else(|_| "Invalid email".to_string()));
            }
        }
        Err(e) => eprintln!("❌ Error fetching admins: {}", e),
    }
}

fn change_admin_password(config: &Config, email: &str, new_password: &str) {
    let conn = match Connection::open(config.users_db_path()) {
        Ok(c) => c,
        Err(_) => {
            eprintln!("❌ Error: Users database not found.");
            return;
        }
    };
    let hashed_password = hash(new_password, DEFAULT_COST).expect("Failed to hash new password");
    match conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE email = ?2 AND role = 'admin'",
        params![hashed_password, email],
    ) {
        Ok(0) => eprintln!("❌ Error: No admin user with email '{}' found.", email),
        Ok(_) => println!("✅ Password for admin user '{}' changed successfully.", email),
        Err(e) => eprintln!("❌ Error updating password: {}", e),
    }
}

/// Walks the media areas and cross-checks every file against the URLs still
/// referenced by posts, comments and profiles. The post-delete cascade is
/// supposed to keep these in step; this reports anything it missed.
fn audit_media(config: &Config) {
    let mut referenced: HashSet<PathBuf> = HashSet::new();

    // Post images and comment picture snapshots.
    if config.posts_db_path().exists() {
        let db = Database::open(config.posts_db_path()).expect("Could not open posts database.");
        let read_txn = db.begin_read().expect("Could not read posts database.");
        let posts_table = read_txn.open_table(posts_db_operations::POSTS)
            .expect("Posts table missing. Run `setup_cli db setup` first.");
        for item in posts_table.iter().expect("Could not iterate posts table.") {
            let (_id, post_json) = item.expect("Corrupt row in posts table.");
            let Ok(post) = serde_json::from_str::<Post>(post_json.value()) else {
                continue;
            };
            for url in post.images.iter().chain(post.comments.iter().filter_map(|c| c.author_profile_picture.as_ref())) {
                if let Some(path) = media_helpers::storage_path_for_public_url(config, url) {
                    referenced.insert(path);
                }
            }
        }
    }

    // Profile pictures.
    if config.users_db_path().exists() {
        let conn = Connection::open(config.users_db_path()).expect("Could not open users database.");
        let mut stmt = conn.prepare("SELECT profile_picture FROM users WHERE profile_picture IS NOT NULL")
            .expect("Could not query users table.");
        let urls = stmt.query_map([], |row| row.get::<_, String>(0)).expect("Could not read profile pictures.");
        for url in urls.flatten() {
            if let Some(path) = media_helpers::storage_path_for_public_url(config, &url) {
                referenced.insert(path);
            }
        }
    }

    let mut orphans = 0;
    for area in ["blog_images", "profile_pictures"] {
        let dir = config.media_dir(area);
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            if !referenced.contains(entry.path()) {
                println!("orphan: {}", entry.path().display());
                orphans += 1;
            }
        }
    }

    if orphans == 0 {
        println!("✅ No orphaned media files found.");
    } else {
        println!("Found {} orphaned file(s). They are safe to delete manually.", orphans);
    }
}
