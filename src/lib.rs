//! Ldappass is a small self-service password change API for LDAP
//! directories.

pub mod config;
pub mod error;
pub mod ldap;
mod middleware;
pub mod passwd;
mod router;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
pub use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub(crate) async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    make_request_with_headers(app, method, path, body, &[]).await
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub(crate) async fn make_request_with_headers(
    app: Router,
    method: Method,
    path: &str,
    body: String,
    headers: &[(&str, &str)],
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// Application state with a fake directory, for handler tests.
#[cfg(test)]
pub(crate) fn test_state(directory: ldap::testing::FakeDirectory) -> AppState {
    let config = config::Configuration::from_vars(|key| match key {
        "LDAP_ADMIN_PASSWORD" => Some("admin-secret".to_owned()),
        _ => None,
    })
    .expect("default configuration is valid");

    AppState {
        config: Arc::new(config),
        directory: Arc::new(directory),
        metrics: None,
    }
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub directory: Arc<dyn ldap::DirectoryConnector>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to the Prometheus renderer.
        .route("/metrics", get(telemetry::metrics))
        // `GET /api/whoami` reports the proxy-forwarded identity.
        .route("/api/whoami", get(router::whoami::handler))
        // `POST /api/change-password` goes to the change workflow.
        .route(
            "/api/change-password",
            post(router::change_password::handler),
        )
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(middleware::identify))
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state() -> Result<AppState, config::Error> {
    let config = Arc::new(config::Configuration::from_env()?);

    let directory = Arc::new(ldap::Ldap3Connector::new(config.ldap.url.clone()));

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "metrics recorder not installed");
            None
        },
    };

    Ok(AppState {
        config,
        directory,
        metrics,
    })
}
