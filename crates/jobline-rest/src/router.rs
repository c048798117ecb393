//! Main application router.

use crate::{
    controllers::{health_controller, jobs_controller, ws_controller},
    middleware::logging_middleware,
    state::AppState,
};
use axum::{http::HeaderValue, middleware, routing::get, Router};
use jobline_config::ServerConfig;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Creates the main application router.
pub fn create_router(state: AppState, server_config: &ServerConfig) -> Router {
    let cors = create_cors_layer(server_config);

    let api_router = jobs_controller::router(server_config.max_upload_bytes);

    let router = Router::new()
        // Health endpoints
        .merge(health_controller::router())
        // Job snapshot feed
        .merge(ws_controller::router())
        .nest("/api", api_router)
        .route("/", get(root))
        .with_state(state)
        .layer(TimeoutLayer::new(server_config.request_timeout()))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(middleware::from_fn(logging_middleware));

    info!("Router created with job endpoints under /api and snapshot feed at /ws");
    router
}

/// Creates a CORS layer based on server configuration.
fn create_cors_layer(server_config: &ServerConfig) -> CorsLayer {
    if !server_config.cors_enabled {
        return CorsLayer::new();
    }

    if server_config.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = server_config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Root endpoint handler.
async fn root() -> &'static str {
    "Jobline API"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use jobline_engine::{
        EngineConfig, InMemoryJobStore, JobEngine, JobLifecycle, SimulatedWorkUnit,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Engine whose jobs stay in flight for the duration of a test.
    fn slow_engine() -> JobEngine {
        let work = SimulatedWorkUnit::new(50, Duration::from_secs(60), 1.0);
        JobEngine::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(work),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn app(engine: JobEngine) -> Router {
        create_router(AppState::new(engine), &ServerConfig::default())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn multipart(files: &[(&str, Option<&str>)]) -> Request<Body> {
        let boundary = "jobline-test-boundary";
        let mut body = String::new();
        for (name, filename) in files {
            body.push_str(&format!("--{boundary}\r\n"));
            match filename {
                Some(filename) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: text/csv\r\n\r\nid,value\r\n1,2\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\nplain\r\n"
                )),
            }
        }
        body.push_str(&format!("--{boundary}--\r\n"));

        Request::builder()
            .method("POST")
            .uri("/api/jobs/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn submit(app: &Router) -> String {
        let request = post_json("/api/jobs", json!({ "inputs": ["a.txt"] }));
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let engine = slow_engine();
        let app = app(engine.clone());

        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _) = send(&app, get("/live")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, get("/ready")).await;
        assert_eq!(status, StatusCode::OK);

        engine.shutdown().await;
        let (status, _) = send(&app, get("/ready")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_submit_returns_pending_snapshot() {
        let app = app(slow_engine());

        let (status, body) =
            send(&app, post_json("/api/jobs", json!({ "inputs": ["a.txt"] }))).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["progress"], 0);
        assert_eq!(body["data"]["retry_count"], 0);
        assert_eq!(body["data"]["inputs"], json!(["a.txt"]));
    }

    #[tokio::test]
    async fn test_empty_submission_is_bad_request() {
        let engine = slow_engine();
        let app = app(engine.clone());

        let (status, body) = send(&app, post_json("/api/jobs", json!({ "inputs": [] }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
        assert!(engine.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let app = app(slow_engine());
        let first = submit(&app).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = submit(&app).await;

        let (status, body) = send(&app, get(&format!("/api/jobs/{first}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], first.as_str());

        let (status, body) = send(&app, get("/api/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|job| job["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec![second.as_str(), first.as_str()]);

        let (status, body) = send(&app, get("/api/jobs?status=completed")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_and_status() {
        let app = app(slow_engine());

        let (status, body) = send(&app, get("/api/jobs/does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, body) = send(&app, get("/api/jobs?status=exploded")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_cancel_then_cancel_again_conflicts() {
        let app = app(slow_engine());
        let id = submit(&app).await;

        let (status, body) = send(&app, post(&format!("/api/jobs/{id}/cancel"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");

        let (status, body) = send(&app, post(&format!("/api/jobs/{id}/cancel"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "INVALID_STATE");
    }

    #[tokio::test]
    async fn test_retry_cancelled_job() {
        let app = app(slow_engine());
        let id = submit(&app).await;
        send(&app, post(&format!("/api/jobs/{id}/cancel"))).await;

        let (status, body) = send(&app, post(&format!("/api/jobs/{id}/retry"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["retry_count"], 1);
    }

    #[tokio::test]
    async fn test_backoff_retry_is_accepted() {
        let app = app(slow_engine());
        let id = submit(&app).await;

        let (status, _) = send(&app, post(&format!("/api/jobs/{id}/retry/backoff"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        send(&app, post(&format!("/api/jobs/{id}/cancel"))).await;
        let (status, body) = send(&app, post(&format!("/api/jobs/{id}/retry/backoff"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["job_id"], id.as_str());
        assert_eq!(body["data"]["retry_count"], 0);
        assert_eq!(body["data"]["delay_secs"], 1.0);
        assert_eq!(body["data"]["already_scheduled"], false);

        let (_, body) = send(&app, post(&format!("/api/jobs/{id}/retry/backoff"))).await;
        assert_eq!(body["data"]["already_scheduled"], true);
    }

    #[tokio::test]
    async fn test_retry_failed_without_failures() {
        let app = app(slow_engine());
        submit(&app).await;

        let (status, body) = send(&app, post("/api/jobs/retry-failed")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_uses_filenames_as_inputs() {
        let app = app(slow_engine());

        let (status, body) = send(
            &app,
            multipart(&[
                ("files", Some("a.csv")),
                ("note", None),
                ("files", Some("b.csv")),
            ]),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["inputs"], json!(["a.csv", "b.csv"]));
    }

    #[tokio::test]
    async fn test_upload_without_files_is_bad_request() {
        let app = app(slow_engine());

        let (status, body) = send(&app, multipart(&[("note", None)])).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_unavailable() {
        let engine = slow_engine();
        let app = app(engine.clone());
        engine.shutdown().await;

        let (status, body) =
            send(&app, post_json("/api/jobs", json!({ "inputs": ["a.txt"] }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "SHUTTING_DOWN");
    }
}
