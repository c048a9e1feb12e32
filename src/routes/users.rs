use crate::config::Config;
use crate::helper::{analytics_helpers, forum_helpers, profile_helpers, sanitization_helpers};
use crate::helper::forum_helpers::ForumHelperError;
use crate::helper::profile_helpers::UsernameChange;
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::{posts_db_operations, users_db_operations};
use crate::models::UserAccount;
use crate::DbPool;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use redb::Database;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct SetupProfileRequest {
    username: String,
    bio: Option<String>,
    profile_picture: Option<String>,
}

#[derive(Deserialize)]
struct UsernameRequest {
    username: String,
}

#[derive(Deserialize)]
struct BioRequest {
    bio: String,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/setup")
            .route("/profile", web::post().to(setup_profile))
            .route("/accept-rules", web::post().to(accept_rules)),
    )
    .service(
        web::scope("/me")
            .route("/favorites", web::get().to(my_favorites))
            .route("/dashboard", web::get().to(my_dashboard))
            .route("/username", web::put().to(change_username))
            .route("/bio", web::put().to(change_bio))
            .route("/profile-picture", web::post().to(change_profile_picture)),
    )
    .route("/users/{id}", web::get().to(public_profile));
}

type PooledConn = PooledConnection<SqliteConnectionManager>;

fn current_user(
    pool: &web::Data<DbPool>,
    auth_user: &AuthenticatedUser,
) -> Result<(PooledConn, UserAccount), HttpResponse> {
    let conn = pool.get().map_err(|e| {
        log::error!("Failed to get DB connection: {}", e);
        HttpResponse::InternalServerError().finish()
    })?;
    let user = users_db_operations::read_user(&conn, &auth_user.uid)
        .ok_or_else(|| HttpResponse::Unauthorized().json(json!({ "success": false, "error": "Account no longer exists." })))?;
    Ok((conn, user))
}

// --- Onboarding flow ---

async fn setup_profile(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    payload: web::Json<SetupProfileRequest>,
) -> impl Responder {
    let username = sanitization_helpers::strip_all_html(payload.username.trim());
    if username.is_empty() {
        return HttpResponse::BadRequest().json(json!({ "success": false, "error": "A username is required." }));
    }

    let (conn, _user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let bio = payload.bio.as_deref().map(|b| sanitization_helpers::strip_all_html(b.trim()));
    match users_db_operations::complete_setup(
        &conn,
        &auth_user.uid,
        &username,
        bio.as_deref(),
        payload.profile_picture.as_deref(),
    ) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => {
            log::error!("Failed to complete setup for '{}': {}", auth_user.uid, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn accept_rules(auth_user: AuthenticatedUser, pool: web::Data<DbPool>) -> impl Responder {
    let (conn, _user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match users_db_operations::accept_rules(&conn, &auth_user.uid) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => {
            log::error!("Failed to record rules acceptance for '{}': {}", auth_user.uid, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

// --- Own data ---

async fn my_favorites(
    auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    let (conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match forum_helpers::resolve_favorites(&db, &conn, &user.id) {
        Ok(favorites) => HttpResponse::Ok().json(favorites),
        Err(e) => {
            log::error!("Failed to resolve favorites for '{}': {}", user.id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Engagement report over the user's own posts, the member counterpart of
/// the admin dashboard.
async fn my_dashboard(
    auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    let (_conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match posts_db_operations::read_summaries_by_author(&db, &user.id, u32::MAX, 0) {
        Ok(posts) => {
            let report = analytics_helpers::compute_report(&posts);
            HttpResponse::Ok().json(json!({ "report": report, "posts": posts }))
        }
        Err(e) => {
            log::error!("Failed to build dashboard for '{}': {}", user.id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

// --- Settings ---

async fn change_username(
    auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    payload: web::Json<UsernameRequest>,
) -> impl Responder {
    if payload.username.trim().is_empty() {
        return HttpResponse::BadRequest().json(json!({ "success": false, "error": "A username is required." }));
    }

    let (conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match profile_helpers::change_username(&db, &conn, &user, &payload.username) {
        Ok(outcome @ UsernameChange::Applied { .. }) => HttpResponse::Ok().json(outcome),
        Ok(outcome @ UsernameChange::LimitReached) => HttpResponse::Conflict().json(outcome),
        Err(e) => {
            log::error!("Failed to change username for '{}': {}", user.id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn change_bio(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    payload: web::Json<BioRequest>,
) -> impl Responder {
    let (conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let bio = sanitization_helpers::strip_all_html(payload.bio.trim());
    match users_db_operations::update_bio(&conn, &user.id, &bio) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => {
            log::error!("Failed to update bio for '{}': {}", user.id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn change_profile_picture(
    auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    payload: Multipart,
) -> impl Responder {
    let (conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match profile_helpers::change_profile_picture(&db, &conn, &config, &user, payload).await {
        Ok(url) => HttpResponse::Ok().json(json!({ "success": true, "url": url })),
        Err(e) => HttpResponse::BadRequest().json(json!({ "success": false, "error": e.to_string() })),
    }
}

// --- Public profiles ---

async fn public_profile(
    _auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    let uid = path.into_inner();
    let conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    match forum_helpers::assemble_profile(&db, &conn, &uid) {
        Ok(profile) => HttpResponse::Ok().json(profile),
        Err(ForumHelperError::NotFound(_)) => {
            HttpResponse::NotFound().json(json!({ "success": false, "error": "User not found" }))
        }
        Err(e) => {
            log::error!("Failed to assemble profile for '{}': {}", uid, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}
