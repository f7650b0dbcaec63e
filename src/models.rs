use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Display name used when a submission carries no (or a blank) name.
pub const DEFAULT_NAME: &str = "Anonymous";
/// Upper bound on the text body, in characters.
pub const MAX_BODY_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub public_id: String,
    pub name: String,
    pub body: String,
    /// Base64 of the stored (possibly recompressed) picture payload.
    pub image: Option<String>,
    pub client_ip: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub public_id: String,
    pub name: String,
    pub body: String,
    pub image: Option<String>,
    pub client_ip: String,
}

/// One row per origin IP; `public_id` never changes once assigned.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdentityMapping {
    pub client_ip: String,
    pub public_id: String,
    pub created_at: DateTime<Utc>,
    pub last_posted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIdentity {
    pub client_ip: String,
    pub public_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BanRecord {
    pub public_id: String,
    pub client_ip: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBan {
    pub public_id: String,
    pub client_ip: String,
    pub reason: String,
}

/// Append-only record of accepted posts, consulted only for rate-window counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub public_id: String,
    pub posted_at: DateTime<Utc>,
}

// ---------------- wire types ----------------

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubmitPost {
    pub name: Option<String>,
    pub body: Option<String>,
    pub image_base64: Option<String>,
    /// Accepted for wire compatibility; identity is resolved from the origin IP.
    #[allow(dead_code)]
    pub public_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub message: String,
    pub public_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PostView {
    pub public_id: String,
    pub name: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Post> for PostView {
    fn from(p: Post) -> Self {
        Self {
            public_id: p.public_id,
            name: p.name,
            body: p.body,
            image: p.image,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PostsResponse {
    pub posts: Vec<PostView>,
}
