pub mod analytics_helpers;
pub mod forum_helpers;
pub mod media_helpers;
pub mod profile_helpers;
pub mod sanitization_helpers;
