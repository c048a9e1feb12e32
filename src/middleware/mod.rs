use actix_web::{
    dev,
    guard, FromRequest, HttpRequest,
};
use actix_session::{Session, SessionExt};
use serde::Serialize;
use std::env;
use std::future::{ready, Ready as StdReady};

/// The logged-in user, pulled out of the cookie session. Handlers that take
/// this extractor reject unauthenticated requests with 401.
#[derive(Serialize)]
pub struct AuthenticatedUser {
    pub uid: String,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = StdReady<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let session = req.get_session();
        if let (Ok(Some(uid)), Ok(Some(role))) = (session.get("uid"), session.get("role")) {
            ready(Ok(AuthenticatedUser { uid, role }))
        } else {
            ready(Err(actix_web::error::ErrorUnauthorized("Not logged in.")))
        }
    }
}

pub fn admin_guard(session: &Session) -> bool {
    session.get::<String>("role").unwrap_or(None) == Some("admin".to_string())
}

/// Restricts the admin API to an allowlist of source IPs. With no allowlist
/// configured, every admin request is denied.
pub fn ip_guard(ctx: &guard::GuardContext) -> bool {
    let allowed_ips_str = match env::var("ADMIN_API_ACCEPT_IP") {
        Ok(val) => val,
        Err(_) => {
            log::warn!("ADMIN_API_ACCEPT_IP is not set. Denying all admin API requests.");
            return false;
        }
    };

    if allowed_ips_str.trim() == "*" {
        return true;
    }

    // Get the real IP, considering reverse proxies
    let request_ip = ctx.head().headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next()) // Take the first IP if there's a list
        .map(|s| s.trim().to_string())
        .or_else(|| {
            ctx.head().peer_addr.map(|addr| addr.ip().to_string())
        });

    let peer_addr = match request_ip {
        Some(ip) => ip,
        None => {
            log::warn!("Could not determine peer IP address for admin API request.");
            return false;
        }
    };

    let is_allowed = allowed_ips_str.split(',').any(|ip| ip.trim() == peer_addr);

    if !is_allowed {
        log::warn!("Blocked admin API request from unauthorized IP: {}", peer_addr);
    }

    is_allowed
}
