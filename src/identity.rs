use actix_web::HttpRequest;
use rand::{distributions::Alphanumeric, Rng};

use crate::models::{IdentityMapping, NewIdentity};
use crate::repo::{Repo, RepoResult};

pub const PUBLIC_ID_LEN: usize = 7;

/// Random alphanumeric token shown in place of the poster's IP.
/// Collisions across IPs are not checked.
pub fn generate_public_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PUBLIC_ID_LEN)
        .map(char::from)
        .collect()
}

/// First hop of the forwarded-for chain, falling back to the peer address.
pub fn client_ip(req: &HttpRequest) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            req.peer_addr()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "unknown".into())
        })
}

/// Stable IP -> public id mapping, created lazily on first post.
///
/// A concurrent duplicate insert surfaces the store's conflict error to the
/// caller; there is no retry or merge.
pub async fn resolve_identity(repo: &dyn Repo, client_ip: &str) -> RepoResult<IdentityMapping> {
    if let Some(found) = repo.find_identity(client_ip).await? {
        return Ok(found);
    }
    repo.create_identity(NewIdentity {
        client_ip: client_ip.to_string(),
        public_id: generate_public_id(),
    })
    .await
}
