use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::admission::{
    admit, cull_excess_posts, AdmissionConfig, RetentionConfig, SYSTEM_NAME, SYSTEM_PUBLIC_ID,
};
use crate::error::{ApiError, ApiErrorBody};
use crate::identity::{client_ip, resolve_identity};
use crate::media::{process_payload, MediaConfig};
use crate::models::*;
use crate::repo::Repo;

/// Listing size when culling is disabled.
const DEFAULT_LIST_LIMIT: u64 = 100;

/// Body that triggers the automated acknowledgement reply.
const AUTO_REPLY_TRIGGER: &str = "test";
const AUTO_REPLY_BODY: &str = "Test received. Your post went through.";
/// Short pause so the acknowledgement sorts after its trigger by creation time.
const AUTO_REPLY_DELAY: Duration = Duration::from_millis(5);

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/post").route(web::post().to(create_post)))
        .service(web::resource("/posts").route(web::get().to(list_posts)))
        .route("/metrics", web::get().to(render_metrics));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub admission: AdmissionConfig,
    pub retention: RetentionConfig,
    pub media: MediaConfig,
    pub metrics: Option<PrometheusHandle>,
}

#[utoipa::path(
    post,
    path = "/post",
    request_body = SubmitPost,
    responses(
        (status = 200, description = "Post accepted", body = SubmitResponse),
        (status = 400, description = "Empty or oversized body, malformed image", body = ApiErrorBody),
        (status = 403, description = "Identity is banned", body = ApiErrorBody),
        (status = 429, description = "Rate or cooldown limit exceeded", body = ApiErrorBody),
        (status = 500, description = "Record store failure", body = ApiErrorBody)
    )
)]
pub async fn create_post(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<SubmitPost>,
) -> Result<HttpResponse, ApiError> {
    let submission = payload.into_inner();

    let name = submission
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_NAME)
        .to_string();
    let body = submission
        .body
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_string();
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::BadRequest(format!(
            "body exceeds {MAX_BODY_CHARS} characters"
        )));
    }
    let image = match submission.image_base64.as_deref() {
        Some(b64) => Some(process_payload(b64, &data.media)?),
        None => None,
    };
    if body.is_empty() && image.is_none() {
        return Err(ApiError::BadRequest("body is required".into()));
    }

    let ip = client_ip(&req);
    // identity is IP-authoritative; a client-sent public_id is ignored
    let ident = resolve_identity(data.repo.as_ref(), &ip).await?;
    let now = Utc::now();

    admit(data.repo.as_ref(), &data.admission, &ident, now).await?;

    let is_image = image.is_some();
    let post = data
        .repo
        .create_post(NewPost {
            public_id: ident.public_id.clone(),
            name,
            body,
            image,
            client_ip: ip,
        })
        .await?;
    data.repo
        .record_activity(&ident.public_id, post.created_at)
        .await?;
    data.repo
        .touch_last_posted(&ident.public_id, post.created_at)
        .await?;
    metrics::increment_counter!("rbb_posts_accepted_total");

    if !is_image && post.body == AUTO_REPLY_TRIGGER {
        auto_reply(data.repo.as_ref()).await;
    }
    if data.retention.enabled() {
        cull_excess_posts(data.repo.as_ref(), data.retention.cap).await;
    }

    Ok(HttpResponse::Ok().json(SubmitResponse {
        message: "post created".into(),
        public_id: post.public_id,
    }))
}

/// Fire-and-forget acknowledgement for the literal "test" body.
async fn auto_reply(repo: &dyn Repo) {
    tokio::time::sleep(AUTO_REPLY_DELAY).await;
    let ack = NewPost {
        public_id: SYSTEM_PUBLIC_ID.to_string(),
        name: SYSTEM_NAME.to_string(),
        body: AUTO_REPLY_BODY.to_string(),
        image: None,
        client_ip: "system".into(),
    };
    if let Err(e) = repo.create_post(ack).await {
        log::warn!("auto-reply write failed: {e}");
    }
}

#[derive(Debug, serde::Deserialize, utoipa::IntoParams)]
pub struct ListQuery {
    /// Resolve this origin IP to its public id and filter to it.
    pub ip: Option<String>,
    /// Filter to an explicit public id.
    pub public_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/posts",
    params(ListQuery),
    responses(
        (status = 200, description = "Posts, newest first", body = PostsResponse),
        (status = 500, description = "Record store failure", body = ApiErrorBody)
    )
)]
pub async fn list_posts(
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    let limit = if data.retention.enabled() {
        data.retention.cap
    } else {
        DEFAULT_LIST_LIMIT
    } as i64;

    let filter = match (&q.public_id, &q.ip) {
        (Some(pid), _) if !pid.is_empty() => Some(pid.clone()),
        (_, Some(ip)) if !ip.is_empty() => {
            match data.repo.find_identity(ip).await? {
                Some(mapping) => Some(mapping.public_id),
                // unknown IP filters to nothing, not an error
                None => {
                    return Ok(HttpResponse::Ok().json(PostsResponse { posts: Vec::new() }));
                }
            }
        }
        _ => None,
    };

    let posts = data.repo.list_posts(filter.as_deref(), limit).await?;
    Ok(HttpResponse::Ok().json(PostsResponse {
        posts: posts.into_iter().map(PostView::from).collect(),
    }))
}

async fn render_metrics(data: web::Data<AppState>) -> HttpResponse {
    match &data.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
