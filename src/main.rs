use actix_web::{middleware::Compress, App, HttpServer};
use actix_cors::Cors;
use metrics_exporter_prometheus::PrometheusBuilder;
use utoipa_swagger_ui::SwaggerUi;

mod admission;
mod error;
mod identity;
mod media;
mod models;
mod openapi;
mod repo;
mod routes;
mod security;

use admission::{AdmissionConfig, RetentionConfig};
use media::MediaConfig;
use openapi::ApiDoc;
use routes::{config, AppState};
use security::SecurityHeaders;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

#[cfg(feature = "inmem-store")]
use repo::inmem::InMemRepo;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping rbb server");

    let admission = AdmissionConfig::from_env();
    let retention = RetentionConfig::from_env();
    let media = MediaConfig::from_env();
    info!(
        "Admission: mode {:?}, {} posts / {}s window, {}s cooldown; retention cap {}",
        admission.mode,
        admission.max_posts,
        admission.window.as_secs(),
        admission.cooldown.as_secs(),
        retention.cap
    );

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = InMemRepo::new();
    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    info!("Using in-memory record store");

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&db_url)
            .expect("Failed to create Pg pool");
        if std::env::var("RBB_RUN_MIGRATIONS").is_ok() {
            sqlx::migrate!()
                .run(&pool)
                .await
                .expect("migrations failed");
            info!("Migrations applied");
        }
        info!("Using Postgres record store");
        repo::pg::PgRepo::new(pool)
    };

    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Prometheus recorder not installed: {e}");
            None
        }
    };

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontends
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
            .app_data(actix_web::web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
                admission: admission.clone(),
                retention,
                media,
                metrics: metrics_handle.clone(),
            }))
    })
    .bind(("0.0.0.0", 8080))?;

    info!("Listening on http://0.0.0.0:8080");

    server.run().await
}

/// Fail fast on configuration the selected backend cannot run without.
fn validate_env_vars() {
    if cfg!(feature = "postgres-store") && std::env::var("DATABASE_URL").is_err() {
        eprintln!("Missing required environment variable DATABASE_URL");
        eprintln!("The postgres-store backend needs a connection string");
        std::process::exit(1);
    }
}
