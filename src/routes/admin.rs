use crate::config::Config;
use crate::helper::{analytics_helpers, forum_helpers, media_helpers, sanitization_helpers};
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::{posts_db_operations, users_db_operations};
use crate::routes::posts::validate_post_fields;
use crate::DbPool;
use actix_web::{web, HttpResponse, Responder};
use redb::Database;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct CreatePostRequest {
    title: String,
    short_description: String,
    content: String,
    author_name: String,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct AnalyticsQuery {
    author_name: Option<String>,
}

// Mounted under an admin-guarded scope; handlers can assume the session
// role is checked.
pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/posts", web::post().to(create_post))
        .route("/posts", web::get().to(list_all_posts))
        .route("/posts/{id}", web::delete().to(delete_post))
        .route("/analytics", web::get().to(analytics));
}

async fn create_post(
    auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    payload: web::Json<CreatePostRequest>,
) -> impl Responder {
    if let Some(resp) = validate_post_fields(&payload.title, &payload.short_description, &payload.content) {
        return resp;
    }
    // The byline is chosen per post; staff publish under arbitrary names.
    if payload.author_name.trim().is_empty() {
        return HttpResponse::BadRequest().json(json!({ "success": false, "error": "An author name is required." }));
    }

    let title = sanitization_helpers::strip_all_html(payload.title.trim());
    let short_description = sanitization_helpers::strip_all_html(payload.short_description.trim());
    let content = sanitization_helpers::sanitize_rich_content(&payload.content);
    let author_name = sanitization_helpers::strip_all_html(payload.author_name.trim());

    match posts_db_operations::create_post(
        &db,
        &title,
        &short_description,
        &content,
        &auth_user.uid,
        &author_name,
        payload.images.clone(),
    ) {
        Ok(post_id) => HttpResponse::Ok().json(json!({ "success": true, "post_id": post_id })),
        Err(e) => {
            log::error!("Failed to create post: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn list_all_posts(
    _auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    match posts_db_operations::read_all_summaries(&db) {
        Ok(mut posts) => {
            if let Ok(conn) = pool.get() {
                forum_helpers::resolve_author_profiles(&conn, &mut posts);
            }
            HttpResponse::Ok().json(posts)
        }
        Err(e) => {
            log::error!("Failed to list posts for admin: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Same cascade as the member-facing delete; the guard on the scope stands
/// in for the author check.
async fn delete_post(
    _auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let post_id = path.into_inner();
    let mut conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    match posts_db_operations::delete_post(&db, &mut conn, &post_id) {
        Ok(deleted) => {
            for image_url in &deleted.images {
                if let Err(e) = media_helpers::delete_by_public_url(&config, image_url) {
                    log::error!("Failed to delete image '{}' of removed post: {}", image_url, e);
                }
            }
            HttpResponse::Ok().json(json!({ "success": true }))
        }
        Err(posts_db_operations::DbError::NotFound(_)) | Err(posts_db_operations::DbError::Uuid(_)) => {
            HttpResponse::NotFound().json(json!({ "success": false, "error": "Post not found" }))
        }
        Err(e) => {
            log::error!("Failed to delete post '{}': {}", post_id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// The dashboard payload: engagement report over all posts (or one byline's
/// posts), plus the registration-growth histogram and the byline list for
/// the filter dropdown.
async fn analytics(
    _auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    query: web::Query<AnalyticsQuery>,
) -> impl Responder {
    let posts_result = match query.author_name.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => posts_db_operations::read_summaries_by_author_name(&db, name),
        None => posts_db_operations::read_all_summaries(&db),
    };

    let posts = match posts_result {
        Ok(posts) => posts,
        Err(e) => {
            log::error!("Failed to fetch posts for analytics: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let report = analytics_helpers::compute_report(&posts);

    let conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };
    let growth = match users_db_operations::registration_dates(&conn) {
        Ok(dates) => analytics_helpers::user_growth(&dates),
        Err(e) => {
            log::error!("Failed to read registration dates: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut author_names: Vec<String> = posts.iter().map(|p| p.author_name.clone()).collect();
    author_names.sort();
    author_names.dedup();

    HttpResponse::Ok().json(json!({
        "report": report,
        "user_growth": growth,
        "author_names": author_names,
    }))
}
