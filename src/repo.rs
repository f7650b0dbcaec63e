use chrono::{DateTime, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("store: {0}")]
    Store(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    /// Newest first; optionally filtered to one public id.
    async fn list_posts(&self, public_id: Option<&str>, limit: i64) -> RepoResult<Vec<Post>>;
    async fn count_posts(&self) -> RepoResult<u64>;
    /// Ids of the `n` oldest posts, creation-time ascending.
    async fn oldest_post_ids(&self, n: i64) -> RepoResult<Vec<Id>>;
    async fn delete_posts(&self, ids: &[Id]) -> RepoResult<u64>;
}

#[async_trait]
pub trait IdentityRepo: Send + Sync {
    async fn find_identity(&self, client_ip: &str) -> RepoResult<Option<IdentityMapping>>;
    /// Fails with `Conflict` when a mapping for the IP already exists.
    async fn create_identity(&self, new: NewIdentity) -> RepoResult<IdentityMapping>;
    async fn touch_last_posted(&self, public_id: &str, at: DateTime<Utc>) -> RepoResult<()>;
}

#[async_trait]
pub trait BanRepo: Send + Sync {
    async fn find_ban(&self, public_id: &str) -> RepoResult<Option<BanRecord>>;
    /// Idempotent: inserting a ban that already exists is not an error.
    async fn create_ban(&self, new: NewBan) -> RepoResult<()>;
}

#[async_trait]
pub trait ActivityRepo: Send + Sync {
    async fn record_activity(&self, public_id: &str, posted_at: DateTime<Utc>) -> RepoResult<()>;
    async fn count_activity_since(&self, public_id: &str, since: DateTime<Utc>) -> RepoResult<u64>;
}

pub trait Repo: PostRepo + IdentityRepo + BanRepo + ActivityRepo {}

impl<T> Repo for T where T: PostRepo + IdentityRepo + BanRepo + ActivityRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        posts: HashMap<Id, Post>,
        identities: HashMap<String, IdentityMapping>,
        bans: Vec<BanRecord>,
        activity: Vec<ActivityEntry>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("RBB_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!(
                            "failed to parse snapshot '{}': {e}; starting empty",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    log::warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                public_id: new.public_id,
                name: new.name,
                body: new.body,
                image: new.image,
                client_ip: new.client_ip,
                created_at: Utc::now(),
            };
            s.posts.insert(id, post.clone());
            drop(s); // release lock before persisting
            self.persist();
            Ok(post)
        }

        async fn list_posts(&self, public_id: Option<&str>, limit: i64) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .posts
                .values()
                .filter(|p| public_id.map_or(true, |pid| p.public_id == pid))
                .cloned()
                .collect();
            v.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            v.truncate(limit.max(0) as usize);
            Ok(v)
        }

        async fn count_posts(&self) -> RepoResult<u64> {
            let s = self.state.read().unwrap();
            Ok(s.posts.len() as u64)
        }

        async fn oldest_post_ids(&self, n: i64) -> RepoResult<Vec<Id>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.posts.values().map(|p| (p.created_at, p.id)).collect();
            v.sort();
            Ok(v.into_iter().take(n.max(0) as usize).map(|(_, id)| id).collect())
        }

        async fn delete_posts(&self, ids: &[Id]) -> RepoResult<u64> {
            let mut s = self.state.write().unwrap();
            let mut removed = 0;
            for id in ids {
                if s.posts.remove(id).is_some() {
                    removed += 1;
                }
            }
            drop(s);
            self.persist();
            Ok(removed)
        }
    }

    #[async_trait]
    impl IdentityRepo for InMemRepo {
        async fn find_identity(&self, client_ip: &str) -> RepoResult<Option<IdentityMapping>> {
            let s = self.state.read().unwrap();
            Ok(s.identities.get(client_ip).cloned())
        }

        async fn create_identity(&self, new: NewIdentity) -> RepoResult<IdentityMapping> {
            let mut s = self.state.write().unwrap();
            if s.identities.contains_key(&new.client_ip) {
                return Err(RepoError::Conflict);
            }
            let mapping = IdentityMapping {
                client_ip: new.client_ip.clone(),
                public_id: new.public_id,
                created_at: Utc::now(),
                last_posted_at: None,
            };
            s.identities.insert(new.client_ip, mapping.clone());
            drop(s);
            self.persist();
            Ok(mapping)
        }

        async fn touch_last_posted(&self, public_id: &str, at: DateTime<Utc>) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if let Some(m) = s.identities.values_mut().find(|m| m.public_id == public_id) {
                m.last_posted_at = Some(at);
            }
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl BanRepo for InMemRepo {
        async fn find_ban(&self, public_id: &str) -> RepoResult<Option<BanRecord>> {
            let s = self.state.read().unwrap();
            Ok(s.bans.iter().find(|b| b.public_id == public_id).cloned())
        }

        async fn create_ban(&self, new: NewBan) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            // duplicate ban is tolerated, first record wins
            if !s.bans.iter().any(|b| b.public_id == new.public_id) {
                s.bans.push(BanRecord {
                    public_id: new.public_id,
                    client_ip: new.client_ip,
                    reason: new.reason,
                    created_at: Utc::now(),
                });
            }
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl ActivityRepo for InMemRepo {
        async fn record_activity(&self, public_id: &str, posted_at: DateTime<Utc>) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.activity.push(ActivityEntry {
                public_id: public_id.to_string(),
                posted_at,
            });
            drop(s);
            self.persist();
            Ok(())
        }

        async fn count_activity_since(
            &self,
            public_id: &str,
            since: DateTime<Utc>,
        ) -> RepoResult<u64> {
            let s = self.state.read().unwrap();
            Ok(s.activity
                .iter()
                .filter(|e| e.public_id == public_id && e.posted_at >= since)
                .count() as u64)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn store_err(e: sqlx::Error) -> RepoError {
        RepoError::Store(e.to_string())
    }

    const POST_COLUMNS: &str = "id, public_id, name, body, image, client_ip, created_at";

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let rec = sqlx::query_as::<_, Post>(
                "INSERT INTO posts (public_id, name, body, image, client_ip, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 RETURNING id, public_id, name, body, image, client_ip, created_at",
            )
            .bind(&new.public_id)
            .bind(&new.name)
            .bind(&new.body)
            .bind(&new.image)
            .bind(&new.client_ip)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
            Ok(rec)
        }

        async fn list_posts(&self, public_id: Option<&str>, limit: i64) -> RepoResult<Vec<Post>> {
            let recs = match public_id {
                Some(pid) => {
                    sqlx::query_as::<_, Post>(&format!(
                        "SELECT {POST_COLUMNS} FROM posts WHERE public_id = $1 \
                         ORDER BY created_at DESC, id DESC LIMIT $2"
                    ))
                    .bind(pid)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
                }
                None => {
                    sqlx::query_as::<_, Post>(&format!(
                        "SELECT {POST_COLUMNS} FROM posts \
                         ORDER BY created_at DESC, id DESC LIMIT $1"
                    ))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
                }
            }
            .map_err(store_err)?;
            Ok(recs)
        }

        async fn count_posts(&self) -> RepoResult<u64> {
            let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts")
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;
            Ok(n as u64)
        }

        async fn oldest_post_ids(&self, n: i64) -> RepoResult<Vec<Id>> {
            let ids = sqlx::query_scalar::<_, Id>(
                "SELECT id FROM posts ORDER BY created_at ASC, id ASC LIMIT $1",
            )
            .bind(n)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
            Ok(ids)
        }

        async fn delete_posts(&self, ids: &[Id]) -> RepoResult<u64> {
            let res = sqlx::query("DELETE FROM posts WHERE id = ANY($1)")
                .bind(ids.to_vec())
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
            Ok(res.rows_affected())
        }
    }

    #[async_trait]
    impl IdentityRepo for PgRepo {
        async fn find_identity(&self, client_ip: &str) -> RepoResult<Option<IdentityMapping>> {
            let rec = sqlx::query_as::<_, IdentityMapping>(
                "SELECT client_ip, public_id, created_at, last_posted_at \
                 FROM identities WHERE client_ip = $1",
            )
            .bind(client_ip)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
            Ok(rec)
        }

        async fn create_identity(&self, new: NewIdentity) -> RepoResult<IdentityMapping> {
            let rec = sqlx::query_as::<_, IdentityMapping>(
                "INSERT INTO identities (client_ip, public_id, created_at) \
                 VALUES ($1, $2, $3) \
                 RETURNING client_ip, public_id, created_at, last_posted_at",
            )
            .bind(&new.client_ip)
            .bind(&new.public_id)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
                _ => store_err(e),
            })?;
            Ok(rec)
        }

        async fn touch_last_posted(&self, public_id: &str, at: DateTime<Utc>) -> RepoResult<()> {
            sqlx::query("UPDATE identities SET last_posted_at = $2 WHERE public_id = $1")
                .bind(public_id)
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
            Ok(())
        }
    }

    #[async_trait]
    impl BanRepo for PgRepo {
        async fn find_ban(&self, public_id: &str) -> RepoResult<Option<BanRecord>> {
            let rec = sqlx::query_as::<_, BanRecord>(
                "SELECT public_id, client_ip, reason, created_at \
                 FROM bans WHERE public_id = $1",
            )
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
            Ok(rec)
        }

        async fn create_ban(&self, new: NewBan) -> RepoResult<()> {
            sqlx::query(
                "INSERT INTO bans (public_id, client_ip, reason, created_at) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (public_id) DO NOTHING",
            )
            .bind(&new.public_id)
            .bind(&new.client_ip)
            .bind(&new.reason)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
            Ok(())
        }
    }

    #[async_trait]
    impl ActivityRepo for PgRepo {
        async fn record_activity(&self, public_id: &str, posted_at: DateTime<Utc>) -> RepoResult<()> {
            sqlx::query("INSERT INTO activity_log (public_id, posted_at) VALUES ($1, $2)")
                .bind(public_id)
                .bind(posted_at)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
            Ok(())
        }

        async fn count_activity_since(
            &self,
            public_id: &str,
            since: DateTime<Utc>,
        ) -> RepoResult<u64> {
            let n = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM activity_log WHERE public_id = $1 AND posted_at >= $2",
            )
            .bind(public_id)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
            Ok(n as u64)
        }
    }
}
