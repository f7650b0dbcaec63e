#![cfg(feature = "inmem-store")]

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, App};
use rbb::admission::{AdmissionConfig, RetentionConfig, ThrottleMode};
use rbb::media::MediaConfig;
use rbb::repo::inmem::InMemRepo;
use rbb::repo::PostRepo;
use rbb::{config, AppState};
use serde_json::json;
use serial_test::serial;

fn repo() -> InMemRepo {
    std::env::set_var("RBB_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn state(repo: InMemRepo, cap: u64) -> AppState {
    AppState {
        repo: Arc::new(repo),
        admission: AdmissionConfig {
            mode: ThrottleMode::Off,
            max_posts: 5,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(3),
        },
        retention: RetentionConfig { cap },
        media: MediaConfig::default(),
        metrics: None,
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
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
            .set_json(&json!({ "body": $body }))
            .to_request();
        test::call_service($app, req).await
    }};
}

#[actix_web::test]
#[serial]
async fn cap_evicts_the_oldest_posts() {
    let r = repo();
    let handle = r.clone();
    let app = app!(state(r, 5));

    for i in 1..=6 {
        let resp = submit!(&app, "203.0.113.50", format!("post {i}"));
        assert_eq!(resp.status(), 200);
    }

    // the insert that crossed the cap evicted exactly the single oldest post
    assert_eq!(handle.count_posts().await.unwrap(), 5);
    let posts = handle.list_posts(None, 100).await.unwrap();
    assert_eq!(posts[0].body, "post 6");
    assert!(posts.iter().all(|p| p.body != "post 1"));
    assert!(posts.iter().any(|p| p.body == "post 2"));
}

#[actix_web::test]
#[serial]
async fn zero_cap_disables_culling() {
    let r = repo();
    let handle = r.clone();
    let app = app!(state(r, 0));

    for i in 1..=3 {
        let resp = submit!(&app, "203.0.113.51", format!("keep {i}"));
        assert_eq!(resp.status(), 200);
    }
    assert_eq!(handle.count_posts().await.unwrap(), 3);
}
