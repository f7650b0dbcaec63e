#![cfg(feature = "inmem-store")]

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, App};
use rbb::admission::{AdmissionConfig, RetentionConfig, ThrottleMode, SYSTEM_PUBLIC_ID};
use rbb::media::MediaConfig;
use rbb::repo::inmem::InMemRepo;
use rbb::{config, AppState, SecurityHeaders};
use serde_json::json;
use serial_test::serial;

fn repo() -> InMemRepo {
    std::env::set_var("RBB_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn window_cfg(max_posts: u64) -> AdmissionConfig {
    AdmissionConfig {
        mode: ThrottleMode::Window,
        max_posts,
        window: Duration::from_secs(10),
        cooldown: Duration::from_secs(3),
    }
}

fn state(repo: InMemRepo, admission: AdmissionConfig) -> AppState {
    AppState {
        repo: Arc::new(repo),
        admission,
        retention: RetentionConfig { cap: 100 },
        media: MediaConfig::default(),
        metrics: None,
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::default())
                .app_data(actix_web::web::Data::new($state))
                .configure(config),
        )
        .await
    };
}

macro_rules! submit {
    ($app:expr, $ip:expr, $body:expr) => {{
        let req = test::TestRequest::post()
            .uri("/post")
            .insert_header(("X-Forwarded-For", $ip))
            .set_json(&$body)
            .to_request();
        test::call_service($app, req).await
    }};
}

#[actix_web::test]
#[serial]
async fn post_then_list_flow() {
    let app = app!(state(repo(), window_cfg(100)));

    let resp = submit!(&app, "203.0.113.7", json!({"name": "alice", "body": "hello world"}));
    assert_eq!(resp.status(), 200);
    let created: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let public_id = created["public_id"].as_str().unwrap().to_string();
    assert_eq!(public_id.len(), 7);

    // same IP keeps the same public id
    let resp = submit!(&app, "203.0.113.7", json!({"body": "again"}));
    assert_eq!(resp.status(), 200);
    let second: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(second["public_id"].as_str().unwrap(), public_id);

    // a different IP gets a different id
    let resp = submit!(&app, "198.51.100.9", json!({"body": "stranger"}));
    let third: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_ne!(third["public_id"].as_str().unwrap(), public_id);

    // full listing, newest first
    let req = test::TestRequest::get().uri("/posts").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let listing: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let posts = listing["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 3);
    assert_eq!(posts[0]["body"], "stranger");
    assert_eq!(posts[2]["body"], "hello world");
    assert_eq!(posts[2]["name"], "alice");

    // filter by public id
    let req = test::TestRequest::get()
        .uri(&format!("/posts?public_id={public_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let listing: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(listing["posts"].as_array().unwrap().len(), 2);

    // filter by origin IP resolves through the mapping
    let req = test::TestRequest::get()
        .uri("/posts?ip=203.0.113.7")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let listing: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(listing["posts"].as_array().unwrap().len(), 2);

    // unknown IP filters to an empty collection, not an error
    let req = test::TestRequest::get()
        .uri("/posts?ip=192.0.2.200")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let listing: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(listing["posts"].as_array().unwrap().is_empty());
}

#[actix_web::test]
#[serial]
async fn blank_submissions_are_rejected() {
    let app = app!(state(repo(), window_cfg(100)));

    let resp = submit!(&app, "203.0.113.7", json!({}));
    assert_eq!(resp.status(), 400);

    let resp = submit!(&app, "203.0.113.7", json!({"body": "   "}));
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
#[serial]
async fn oversized_body_is_rejected() {
    let app = app!(state(repo(), window_cfg(100)));

    let resp = submit!(&app, "203.0.113.7", json!({"body": "x".repeat(200)}));
    assert_eq!(resp.status(), 200);

    let resp = submit!(&app, "203.0.113.7", json!({"body": "x".repeat(201)}));
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
#[serial]
async fn blank_name_falls_back_to_default() {
    let app = app!(state(repo(), window_cfg(100)));

    let resp = submit!(&app, "203.0.113.7", json!({"name": "  ", "body": "hi"}));
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/posts").to_request();
    let resp = test::call_service(&app, req).await;
    let listing: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(listing["posts"][0]["name"], "Anonymous");
}

#[actix_web::test]
#[serial]
async fn test_body_triggers_system_acknowledgement() {
    let app = app!(state(repo(), window_cfg(100)));

    let resp = submit!(&app, "203.0.113.7", json!({"body": "test"}));
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/posts").to_request();
    let resp = test::call_service(&app, req).await;
    let listing: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let posts = listing["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 2);

    // newest first: the acknowledgement sorts after the trigger by creation time
    assert_eq!(posts[0]["public_id"], SYSTEM_PUBLIC_ID);
    assert_eq!(posts[1]["body"], "test");
    let ack_at: chrono::DateTime<chrono::Utc> =
        posts[0]["created_at"].as_str().unwrap().parse().unwrap();
    let trigger_at: chrono::DateTime<chrono::Utc> =
        posts[1]["created_at"].as_str().unwrap().parse().unwrap();
    assert!(ack_at > trigger_at);
}
