use actix_cors::Cors;
use actix_web::{web, App, HttpServer, middleware::{Logger, DefaultHeaders}, cookie::Key, HttpResponse, Responder};
use actix_session::{SessionMiddleware, storage::CookieSessionStore, SessionExt};
use agora_backend::{
    config::Config,
    routes,
    middleware::{admin_guard, ip_guard},
};
use redb::Database;
use r2d2_sqlite::SqliteConnectionManager;
use r2d2::Pool;
use std::fs;
use clap::Parser;
use std::path::PathBuf;
use std::convert::TryFrom;

/// A simple handler for the root URL.
async fn root_handler() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain").body("OK")
}

#[derive(Parser, Debug)]
#[command(name = "agora_server", author, version, about = "Starts the Agora forum server.")]
struct Cli {
    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    // Load configuration first
    let config = Config::from_env(&cli.env_file)
        .expect("FATAL: Failed to load or parse configuration.");

    // Initialize logger using the value from config
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    fs::create_dir_all(&config.database_path)
        .expect("Failed to create database directory");
    for area in ["blog_images", "profile_pictures"] {
        fs::create_dir_all(config.media_dir(area))
            .expect("Failed to create media directory");
    }

    let posts_db = web::Data::new(Database::open(config.posts_db_path())
        .expect("FATAL: posts.db not found. Run 'cargo run --bin setup_cli -- --env-file <path> db setup'"));

    // Thread-safe connection pool for the users database.
    let manager = SqliteConnectionManager::file(config.users_db_path());
    let pool = Pool::builder()
        .build(manager)
        .expect("FATAL: Failed to create Rusqlite connection pool.");

    let session_key_bytes = hex::decode(&config.session_secret_key)
        .expect("FATAL: SESSION_SECRET_KEY in .env is not a valid hex string.");
    let session_key = Key::try_from(session_key_bytes.as_slice())
        .expect("FATAL: The decoded SESSION_SECRET_KEY is not long enough (minimum 64 bytes required).");

    let server_address = format!("{}:{}", config.web.host, config.web.port);
    println!("🚀 Server starting at http://{}", server_address);

    HttpServer::new(move || {
        let session_mw = SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
            .cookie_secure(config.use_secure_cookies)
            .cookie_http_only(true)
            .cookie_same_site(actix_web::cookie::SameSite::Lax)
            .build();

        let cors = {
            let allowed_origins_str = &config.allowed_origins;
            if allowed_origins_str.trim() == "*" {
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
                    .allowed_headers(vec![actix_web::http::header::AUTHORIZATION, actix_web::http::header::ACCEPT, actix_web::http::header::CONTENT_TYPE])
                    .supports_credentials()
                    .max_age(3600)
            } else {
                let mut cors = Cors::default();
                let origins: Vec<&str> = allowed_origins_str.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
                for origin in origins {
                    cors = cors.allowed_origin(origin);
                }
                cors.allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
                    .allowed_headers(vec![actix_web::http::header::AUTHORIZATION, actix_web::http::header::ACCEPT, actix_web::http::header::CONTENT_TYPE])
                    .supports_credentials()
                    .max_age(3600)
            }
        };

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block"))
            )
            .app_data(web::Data::new(config.clone()))
            .app_data(posts_db.clone())
            .app_data(web::Data::new(pool.clone()))

            .service(actix_files::Files::new("/media", &config.media_path))

            .route("/", web::get().to(root_handler))

            // The whole API shares the cookie session; the admin scope is
            // additionally fenced by role and source IP.
            .service(
                web::scope("/api")
                    .wrap(session_mw)
                    .configure(routes::auth::config_api)
                    .configure(routes::posts::config_api)
                    .configure(routes::users::config_api)
                    .service(
                        web::scope("/admin")
                            .guard(actix_web::guard::fn_guard(ip_guard))
                            .guard(actix_web::guard::fn_guard(|ctx| admin_guard(&ctx.get_session())))
                            .configure(routes::admin::config_api)
                    )
            )
    })
    .bind(server_address)?
    .run()
    .await
}
