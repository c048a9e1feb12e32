use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comment count at which a member earns the "active citizen" badge.
pub const ACTIVE_CITIZEN_THRESHOLD: u32 = 25;

/// A comment embedded in its post document.
///
/// `username` and `author_profile_picture` are denormalized snapshots of the
/// author's profile; username and picture changes rewrite them in place.
/// `is_active_citizen` records the author's standing at creation time.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub username: String,
    pub author_profile_picture: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub likes: u32,
    pub liked_by: Vec<String>,
    pub is_active_citizen: bool,
}

/// A full post document as stored in the posts database.
///
/// Engagement counters are kept consistent with their membership sets:
/// `likes == liked_by.len()` and `views == viewed_by.len()` hold after every
/// committed write.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub short_description: String,
    pub content: String,
    pub author: String,
    pub author_name: String,
    pub likes: u32,
    pub liked_by: Vec<String>,
    pub views: u32,
    pub viewed_by: Vec<String>,
    pub images: Vec<String>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn summary(&self) -> PostSummary {
        PostSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            short_description: self.short_description.clone(),
            author: self.author.clone(),
            author_name: self.author_name.clone(),
            author_profile_picture: None,
            likes: self.likes,
            views: self.views,
            comment_count: self.comments.len() as u32,
            created_at: self.created_at,
        }
    }
}

/// Listing/card view of a post. `author_profile_picture` is resolved from the
/// users database at read time, not stored with the post.
#[derive(Debug, Serialize, Clone)]
pub struct PostSummary {
    pub id: String,
    pub title: String,
    pub short_description: String,
    pub author: String,
    pub author_name: String,
    pub author_profile_picture: Option<String>,
    pub likes: u32,
    pub views: u32,
    pub comment_count: u32,
    pub created_at: DateTime<Utc>,
}

/// A user row from the users database.
#[derive(Debug, Serialize, Clone)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub role: String,
    pub setup_completed: bool,
    pub accepted_rules: bool,
    pub username_change_count: u32,
    pub last_username_change: Option<String>,
    pub comment_count: u32,
    pub created_at: Option<String>,
}

impl UserAccount {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Derived from the maintained counter; there is no stored badge flag.
    pub fn is_active_citizen(&self) -> bool {
        self.comment_count >= ACTIVE_CITIZEN_THRESHOLD
    }
}

/// A comment located for a profile page, paired with its parent post.
#[derive(Debug, Serialize, Clone)]
pub struct ProfileComment {
    pub post_id: String,
    pub comment: Comment,
}

pub mod db_operations;
