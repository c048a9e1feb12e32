use crate::config::Config;
use crate::helper::forum_helpers::{self, ForumHelperError};
use crate::helper::media_helpers::{self, MediaArea, UploadLimits};
use crate::helper::sanitization_helpers;
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

pub const MAX_TITLE_LENGTH: usize = 50;
pub const MAX_DESCRIPTION_LENGTH: usize = 170;
pub const MAX_IMAGES_PER_POST: usize = 5;
const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Deserialize)]
pub struct ApiQuery {
    limit: Option<u32>,
    offset: Option<u32>,
    q: Option<String>,
}

#[derive(Deserialize)]
struct UpdatePostRequest {
    title: String,
    short_description: String,
    content: String,
    images: Vec<String>,
}

#[derive(Deserialize)]
struct CommentRequest {
    content: String,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/posts")
            .route("", web::get().to(list_posts))
            .route("/search", web::get().to(search_posts))
            .route("/images", web::post().to(upload_blog_image))
            .route("/by-author/{uid}", web::get().to(posts_by_author))
            .route("/by-author-name/{name}", web::get().to(posts_by_author_name))
            .route("/{id}", web::get().to(get_post))
            .route("/{id}", web::put().to(update_post))
            .route("/{id}", web::delete().to(delete_post))
            .route("/{id}/like", web::post().to(toggle_like))
            .route("/{id}/comments", web::post().to(add_comment))
            .route("/{id}/comments/{comment_id}", web::delete().to(delete_comment))
            .route("/{id}/comments/{comment_id}/like", web::post().to(toggle_comment_like)),
    );
}

type PooledConn = PooledConnection<SqliteConnectionManager>;

/// Fetches the full account behind the session, or the response to send
/// instead.
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

fn helper_error_response(e: ForumHelperError) -> HttpResponse {
    match e {
        ForumHelperError::Forbidden => HttpResponse::Forbidden()
            .json(json!({ "success": false, "error": "You are not allowed to do this." })),
        ForumHelperError::NotFound(what) => HttpResponse::NotFound()
            .json(json!({ "success": false, "error": format!("Not found: {}", what) })),
        other => {
            log::error!("Forum operation failed: {}", other);
            HttpResponse::InternalServerError().finish()
        }
    }
}

// --- Listing & search ---

async fn list_posts(
    _auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    query: web::Query<ApiQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    match posts_db_operations::read_latest_summaries(&db, limit, offset) {
        Ok(mut posts) => {
            if let Ok(conn) = pool.get() {
                forum_helpers::resolve_author_profiles(&conn, &mut posts);
            }
            HttpResponse::Ok().json(posts)
        }
        Err(e) => {
            log::error!("Failed to fetch latest posts: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn search_posts(
    _auth_user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    query: web::Query<ApiQuery>,
) -> impl Responder {
    let needle = match query.q.as_deref() {
        Some(q) if !q.trim().is_empty() => q.trim(),
        _ => return HttpResponse::BadRequest().json("A non-empty 'q' query parameter is required for search."),
    };

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    match posts_db_operations::search_summaries(&db, needle, limit, offset) {
        Ok(mut posts) => {
            if let Ok(conn) = pool.get() {
                forum_helpers::resolve_author_profiles(&conn, &mut posts);
            }
            HttpResponse::Ok().json(posts)
        }
        Err(e) => {
            log::error!("Failed to search posts for '{}': {}", needle, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn posts_by_author(
    _auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    query: web::Query<ApiQuery>,
) -> impl Responder {
    let author = path.into_inner();
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    match posts_db_operations::read_summaries_by_author(&db, &author, limit, offset) {
        Ok(mut posts) => {
            if let Ok(conn) = pool.get() {
                forum_helpers::resolve_author_profiles(&conn, &mut posts);
            }
            HttpResponse::Ok().json(posts)
        }
        Err(e) => {
            log::error!("Failed to fetch posts by author '{}': {}", author, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn posts_by_author_name(
    _auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    let name = path.into_inner();
    match posts_db_operations::read_summaries_by_author_name(&db, &name) {
        Ok(mut posts) => {
            if let Ok(conn) = pool.get() {
                forum_helpers::resolve_author_profiles(&conn, &mut posts);
            }
            HttpResponse::Ok().json(posts)
        }
        Err(e) => {
            log::error!("Failed to fetch posts by byline '{}': {}", name, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

// --- Reading (records a view) ---

async fn get_post(
    auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
) -> impl Responder {
    let post_id = path.into_inner();
    match posts_db_operations::record_view(&db, &post_id, &auth_user.uid) {
        Ok(post) => HttpResponse::Ok().json(post),
        Err(posts_db_operations::DbError::NotFound(_)) | Err(posts_db_operations::DbError::Uuid(_)) => {
            HttpResponse::NotFound().json(json!({ "success": false, "error": "Post not found" }))
        }
        Err(e) => {
            log::error!("Failed to fetch post '{}': {}", post_id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

// --- Mutations ---

async fn update_post(
    auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    payload: web::Json<UpdatePostRequest>,
) -> impl Responder {
    let post_id = path.into_inner();
    let (_conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let post = match posts_db_operations::read_post(&db, &post_id) {
        Some(post) => post,
        None => return HttpResponse::NotFound().json(json!({ "success": false, "error": "Post not found" })),
    };
    if !forum_helpers::can_modify_post(&user, &post) {
        return HttpResponse::Forbidden().json(json!({ "success": false, "error": "You are not allowed to edit this post." }));
    }

    if let Some(resp) = validate_post_fields(&payload.title, &payload.short_description, &payload.content) {
        return resp;
    }
    if payload.images.len() > MAX_IMAGES_PER_POST && !user.is_admin() {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": format!("A post can carry at most {} images.", MAX_IMAGES_PER_POST)
        }));
    }

    let title = sanitization_helpers::strip_all_html(payload.title.trim());
    let short_description = sanitization_helpers::strip_all_html(payload.short_description.trim());
    let content = sanitization_helpers::sanitize_rich_content(&payload.content);

    match posts_db_operations::update_post(&db, &post_id, &title, &short_description, &content, payload.images.clone()) {
        Ok(removed_images) => {
            for image_url in &removed_images {
                if let Err(e) = media_helpers::delete_by_public_url(&config, image_url) {
                    log::error!("Failed to delete dropped image '{}': {}", image_url, e);
                }
            }
            HttpResponse::Ok().json(json!({ "success": true }))
        }
        Err(e) => {
            log::error!("Failed to update post '{}': {}", post_id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn delete_post(
    auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let post_id = path.into_inner();
    let (mut conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let post = match posts_db_operations::read_post(&db, &post_id) {
        Some(post) => post,
        None => return HttpResponse::NotFound().json(json!({ "success": false, "error": "Post not found" })),
    };
    if !forum_helpers::can_modify_post(&user, &post) {
        return HttpResponse::Forbidden().json(json!({ "success": false, "error": "You are not allowed to delete this post." }));
    }

    match posts_db_operations::delete_post(&db, &mut conn, &post_id) {
        Ok(deleted) => {
            for image_url in &deleted.images {
                if let Err(e) = media_helpers::delete_by_public_url(&config, image_url) {
                    log::error!("Failed to delete image '{}' of removed post: {}", image_url, e);
                }
            }
            HttpResponse::Ok().json(json!({ "success": true }))
        }
        Err(e) => {
            log::error!("Failed to delete post '{}': {}", post_id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn toggle_like(
    auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    let post_id = path.into_inner();
    let (conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    if !forum_helpers::forum_ready(&user) {
        return HttpResponse::Forbidden().json(json!({ "success": false, "error": "Finish profile setup and accept the rules first." }));
    }

    match posts_db_operations::toggle_like(&db, &post_id, &user.id) {
        Ok((post, now_liked)) => {
            // Liked posts double as the user's favorites list.
            let favorites_result = if now_liked {
                users_db_operations::add_favorite(&conn, &user.id, &post_id)
            } else {
                users_db_operations::remove_favorite(&conn, &user.id, &post_id)
            };
            if let Err(e) = favorites_result {
                log::error!("Failed to update favorites for '{}': {}", user.id, e);
                return HttpResponse::InternalServerError().finish();
            }
            HttpResponse::Ok().json(json!({ "success": true, "liked": now_liked, "likes": post.likes }))
        }
        Err(posts_db_operations::DbError::NotFound(_)) | Err(posts_db_operations::DbError::Uuid(_)) => {
            HttpResponse::NotFound().json(json!({ "success": false, "error": "Post not found" }))
        }
        Err(e) => {
            log::error!("Failed to toggle like on '{}': {}", post_id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn add_comment(
    auth_user: AuthenticatedUser,
    path: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    payload: web::Json<CommentRequest>,
) -> impl Responder {
    let post_id = path.into_inner();
    if payload.content.trim().is_empty() {
        return HttpResponse::BadRequest().json(json!({ "success": false, "error": "Comment content is required." }));
    }

    let (conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match forum_helpers::post_comment(&db, &conn, &user, &post_id, &payload.content) {
        Ok(post) => HttpResponse::Ok().json(post),
        Err(ForumHelperError::PostsDatabase(posts_db_operations::DbError::NotFound(_)))
        | Err(ForumHelperError::PostsDatabase(posts_db_operations::DbError::Uuid(_))) => {
            HttpResponse::NotFound().json(json!({ "success": false, "error": "Post not found" }))
        }
        Err(e) => helper_error_response(e),
    }
}

async fn delete_comment(
    auth_user: AuthenticatedUser,
    path: web::Path<(String, String)>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    let (post_id, comment_id) = path.into_inner();
    let (conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match forum_helpers::delete_comment(&db, &conn, &user, &post_id, &comment_id) {
        Ok(post) => HttpResponse::Ok().json(post),
        Err(e) => helper_error_response(e),
    }
}

async fn toggle_comment_like(
    auth_user: AuthenticatedUser,
    path: web::Path<(String, String)>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    let (post_id, comment_id) = path.into_inner();
    let (_conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    if !forum_helpers::forum_ready(&user) {
        return HttpResponse::Forbidden().json(json!({ "success": false, "error": "Finish profile setup and accept the rules first." }));
    }

    match posts_db_operations::toggle_comment_like(&db, &post_id, &comment_id, &user.id) {
        Ok(post) => HttpResponse::Ok().json(post),
        Err(posts_db_operations::DbError::NotFound(what)) => {
            HttpResponse::NotFound().json(json!({ "success": false, "error": format!("Not found: {}", what) }))
        }
        Err(e) => {
            log::error!("Failed to toggle comment like on '{}': {}", post_id, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

// --- Image upload for post bodies ---

async fn upload_blog_image(
    auth_user: AuthenticatedUser,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    payload: Multipart,
) -> impl Responder {
    let (conn, user) = match current_user(&pool, &auth_user) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    if !forum_helpers::forum_ready(&user) {
        return HttpResponse::Forbidden().json(json!({ "success": false, "error": "Finish profile setup and accept the rules first." }));
    }

    let limits = UploadLimits::load(&conn);
    match media_helpers::save_image(&config, &limits, MediaArea::BlogImages, payload).await {
        Ok(url) => HttpResponse::Ok().json(json!({ "success": true, "url": url })),
        Err(e) => HttpResponse::BadRequest().json(json!({ "success": false, "error": e.to_string() })),
    }
}

/// Shared between member edits and admin publishing.
pub fn validate_post_fields(title: &str, short_description: &str, content: &str) -> Option<HttpResponse> {
    if title.trim().is_empty() || short_description.trim().is_empty() || content.trim().is_empty() {
        return Some(HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": "Title, short description, and content are required."
        })));
    }
    if title.trim().chars().count() > MAX_TITLE_LENGTH {
        return Some(HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": format!("Title cannot exceed {} characters.", MAX_TITLE_LENGTH)
        })));
    }
    if short_description.trim().chars().count() > MAX_DESCRIPTION_LENGTH {
        return Some(HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": format!("Short description cannot exceed {} characters.", MAX_DESCRIPTION_LENGTH)
        })));
    }
    None
}
