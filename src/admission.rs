use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ApiError;
use crate::models::{IdentityMapping, NewBan, NewPost};
use crate::repo::Repo;

/// Author attributed to notification and acknowledgement posts.
pub const SYSTEM_PUBLIC_ID: &str = "0000000";
pub const SYSTEM_NAME: &str = "System";
const SYSTEM_CLIENT_IP: &str = "system";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleMode {
    /// Sliding window over the activity log; violators are banned.
    Window,
    /// Fixed pause between consecutive posts from one identity.
    Cooldown,
    Off,
}

impl ThrottleMode {
    fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "cooldown" => ThrottleMode::Cooldown,
            "off" => ThrottleMode::Off,
            _ => ThrottleMode::Window,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    pub mode: ThrottleMode,
    pub max_posts: u64,
    pub window: Duration,
    pub cooldown: Duration,
}

impl AdmissionConfig {
    pub fn from_env() -> Self {
        Self {
            mode: ThrottleMode::from_label(
                &std::env::var("RBB_THROTTLE").unwrap_or_else(|_| "window".into()),
            ),
            max_posts: u64_env("RL_MAX_POSTS", 5),
            window: dur_env("RL_WINDOW_SECS", 10),
            cooldown: dur_env("RBB_COOLDOWN_SECS", 3),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetentionConfig {
    /// Maximum stored post count; 0 disables culling.
    pub cap: u64,
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        Self {
            cap: u64_env("RBB_POSTS_CAP", 100),
        }
    }

    pub fn enabled(&self) -> bool {
        self.cap > 0
    }
}

pub(crate) fn u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn dur_env(name: &str, default: u64) -> Duration {
    Duration::from_secs(u64_env(name, default))
}

/// Decide whether a validated post may be persisted.
///
/// Ordered, short-circuiting checks; each performs its own read against the
/// store with no cross-step locking, so two near-simultaneous requests from
/// one identity can both pass the rate check. The ban insert is idempotent,
/// which keeps that race convergent.
pub async fn admit(
    repo: &dyn Repo,
    cfg: &AdmissionConfig,
    ident: &IdentityMapping,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if repo.find_ban(&ident.public_id).await?.is_some() {
        metrics::increment_counter!("rbb_posts_rejected_total", "reason" => "banned");
        return Err(ApiError::Forbidden);
    }

    match cfg.mode {
        ThrottleMode::Window => {
            let since = now - chrono::Duration::seconds(cfg.window.as_secs() as i64);
            let prior = repo.count_activity_since(&ident.public_id, since).await?;
            // the in-flight post counts toward the threshold
            if prior + 1 >= cfg.max_posts {
                issue_ban(repo, cfg, ident).await?;
                metrics::increment_counter!("rbb_posts_rejected_total", "reason" => "rate");
                return Err(ApiError::RateExceeded);
            }
        }
        ThrottleMode::Cooldown => {
            if let Some(last) = ident.last_posted_at {
                let cool = chrono::Duration::seconds(cfg.cooldown.as_secs() as i64);
                let elapsed = now - last;
                if elapsed < cool {
                    metrics::increment_counter!("rbb_posts_rejected_total", "reason" => "cooldown");
                    return Err(ApiError::Cooldown {
                        retry_after_secs: remaining_secs(cool - elapsed),
                    });
                }
            }
        }
        ThrottleMode::Off => {}
    }

    Ok(())
}

/// Whole seconds left to wait, rounded up, never zero.
fn remaining_secs(remaining: chrono::Duration) -> u64 {
    let ms = remaining.num_milliseconds().max(0) as u64;
    ((ms + 999) / 1000).max(1)
}

async fn issue_ban(
    repo: &dyn Repo,
    cfg: &AdmissionConfig,
    ident: &IdentityMapping,
) -> Result<(), ApiError> {
    repo.create_ban(NewBan {
        public_id: ident.public_id.clone(),
        client_ip: ident.client_ip.clone(),
        reason: format!(
            "rate limit exceeded: {} posts within {}s",
            cfg.max_posts,
            cfg.window.as_secs()
        ),
    })
    .await?;
    metrics::increment_counter!("rbb_bans_issued_total");
    tracing::warn!(public_id = %ident.public_id, "identity banned for rate violation");

    // the feed notice is best effort and never fails the rejection
    let notice = NewPost {
        public_id: SYSTEM_PUBLIC_ID.to_string(),
        name: SYSTEM_NAME.to_string(),
        body: format!(
            "{} has been banned for exceeding the posting rate limit.",
            ident.public_id
        ),
        image: None,
        client_ip: SYSTEM_CLIENT_IP.to_string(),
    };
    if let Err(e) = repo.create_post(notice).await {
        log::warn!("ban notice write failed: {e}");
    }
    Ok(())
}

/// Best-effort oldest-first eviction back down to the cap. Runs after the
/// insert that may have pushed the count over, so a concurrent insert can
/// leave the store transiently over cap.
pub async fn cull_excess_posts(repo: &dyn Repo, cap: u64) {
    let result = async {
        let count = repo.count_posts().await?;
        if count <= cap {
            return Ok(0);
        }
        let excess = (count - cap) as i64;
        let ids = repo.oldest_post_ids(excess).await?;
        repo.delete_posts(&ids).await
    }
    .await;
    match result {
        Ok(0) => {}
        Ok(n) => {
            metrics::counter!("rbb_posts_culled_total", n);
            tracing::debug!(culled = n, "evicted oldest posts over retention cap");
        }
        Err(e) => log::warn!("retention cull failed: {e}"),
    }
}
