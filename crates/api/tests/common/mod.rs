#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use triage_api::config::ServerConfig;
use triage_api::router::build_app_router;
use triage_api::state::AppState;
use triage_db::DbPool;
use triage_worker::config::{EngineConfig, JudgeMode};
use triage_worker::dispatcher::JobDispatcher;
use triage_worker::runner::AnyRunner;
use triage_worker::Engine;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 1,
    }
}

/// A migrated database plus the router and dispatcher built on it.
pub struct TestApp {
    pub app: Router,
    pub dispatcher: JobDispatcher<AnyRunner>,
    pub pool: DbPool,
    _dir: TempDir,
}

/// Build the full application router over a fresh database, with the
/// engine in mock mode. The dispatcher is returned unstarted so tests
/// drive cycles explicitly.
pub async fn build_test_app() -> TestApp {
    build_test_app_with_sleep(Duration::from_millis(20)).await
}

/// [`build_test_app`] with a chosen mock judge latency.
pub async fn build_test_app_with_sleep(mock_sleep: Duration) -> TestApp {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("judge.sqlite").display());
    let pool = triage_db::create_pool(&url).await.expect("open pool");
    triage_db::run_migrations(&pool).await.expect("run migrations");

    let engine_config = EngineConfig {
        mode: JudgeMode::Mock,
        mock_sleep,
        mock_jitter: Duration::ZERO,
        max_inflight: 2,
        report_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let Engine {
        service,
        dispatcher,
        ..
    } = Engine::from_config(pool.clone(), engine_config).expect("build engine");

    let config = test_config();
    let state = AppState {
        service,
        config: Arc::new(config.clone()),
    };

    TestApp {
        app: build_app_router(state, &config),
        dispatcher,
        pool,
        _dir: dir,
    }
}

pub async fn seed_posts(pool: &DbPool, thread_id: &str, count: usize) {
    sqlx::query("INSERT OR IGNORE INTO threads (thread_id, title) VALUES (?1, ?2)")
        .bind(thread_id)
        .bind(format!("Thread {thread_id}"))
        .execute(pool)
        .await
        .expect("insert thread");
    for i in 0..count {
        sqlx::query("INSERT INTO posts (post_id, thread_id, body_text) VALUES (?1, ?2, ?3)")
            .bind(format!("{thread_id}-{i}"))
            .bind(thread_id)
            .bind(format!("post {i}"))
            .execute(pool)
            .await
            .expect("insert post");
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
