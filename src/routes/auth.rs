use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::users_db_operations;
use crate::DbPool;
use actix_session::Session;
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/me", web::get().to(me)),
    );
}

async fn register(
    session: Session,
    pool: web::Data<DbPool>,
    payload: web::Json<RegisterRequest>,
) -> impl Responder {
    let email = payload.email.trim().to_lowercase();
    if !email.contains('@') {
        return HttpResponse::BadRequest().json(json!({ "success": false, "error": "A valid email address is required." }));
    }
    if payload.password.len() < MIN_PASSWORD_LENGTH {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": format!("Password must be at least {} characters long.", MIN_PASSWORD_LENGTH)
        }));
    }

    let conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection for registration: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    match users_db_operations::email_exists(&conn, &email) {
        Ok(true) => {
            return HttpResponse::Conflict().json(json!({ "success": false, "error": "An account with this email already exists." }));
        }
        Ok(false) => {}
        Err(e) => {
            log::error!("Email lookup failed during registration: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    }

    let uid = Uuid::new_v4().to_string();
    if let Err(e) = users_db_operations::create_user(&conn, &uid, &email, &payload.password) {
        log::error!("Failed to create user: {}", e);
        return HttpResponse::InternalServerError().finish();
    }

    session.insert("uid", uid.clone()).unwrap();
    session.insert("role", "member").unwrap();

    HttpResponse::Ok().json(json!({ "success": true, "uid": uid }))
}

async fn login(
    session: Session,
    pool: web::Data<DbPool>,
    payload: web::Json<LoginRequest>,
) -> impl Responder {
    let conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection for login: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let email = payload.email.trim().to_lowercase();
    match users_db_operations::verify_credentials(&conn, &email, &payload.password) {
        Some(user) => {
            session.insert("uid", user.id.clone()).unwrap();
            session.insert("role", user.role.clone()).unwrap();
            HttpResponse::Ok().json(json!({
                "success": true,
                "uid": user.id,
                "role": user.role,
                "setup_completed": user.setup_completed,
                "accepted_rules": user.accepted_rules,
            }))
        }
        // One answer for unknown email and wrong password.
        None => HttpResponse::Unauthorized().json(json!({ "success": false, "error": "Invalid credentials." })),
    }
}

async fn logout(session: Session) -> impl Responder {
    session.clear();
    HttpResponse::Ok().json(json!({ "success": true }))
}

/// Who am I, and where in the onboarding flow am I? Drives the client's
/// setup → rules → forum redirect.
async fn me(auth_user: AuthenticatedUser, pool: web::Data<DbPool>) -> impl Responder {
    let conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    match users_db_operations::read_user(&conn, &auth_user.uid) {
        Some(user) => HttpResponse::Ok().json(json!({
            "uid": user.id,
            "role": user.role,
            "username": user.username,
            "profile_picture": user.profile_picture,
            "setup_completed": user.setup_completed,
            "accepted_rules": user.accepted_rules,
            "is_active_citizen": user.is_active_citizen(),
        })),
        // A live session for a deleted account.
        None => HttpResponse::NotFound().json(json!({ "success": false, "error": "Account no longer exists." })),
    }
}
