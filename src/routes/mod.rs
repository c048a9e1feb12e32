pub mod admin;
pub mod auth;
pub mod posts;
pub mod users;
