//! Shiori authentication service.
//!
//! Checks bookmark manager credentials either against local accounts or an
//! LDAP directory, selected once at startup.

#![forbid(unsafe_code)]
pub mod account;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ldap;
mod router;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::routing::post;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::account::AccountRepository;
use crate::auth::Authenticator;
use crate::crypto::PasswordManager;
use crate::ldap::{DirectoryClient, DirectoryConfig};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<Authenticator>,
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
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Directory round trips are bounded by this.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]));

    Router::new()
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
///
/// Any failure here must stop the process: the service never runs with a
/// half configured backend.
pub async fn initialize_state(
    config: &config::Configuration,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let auth = match &config.ldap {
        Some(path) => {
            let directory = DirectoryConfig::from_path(path)?;
            Authenticator::directory(DirectoryClient::connect(directory).await?)
        },
        None => {
            let Some(postgres) = &config.postgres else {
                return Err(
                    "missing `postgres` entry on configuration file, required without `ldap`"
                        .into(),
                );
            };

            let repository = AccountRepository::connect(postgres).await?;
            let passwords = PasswordManager::new(config.argon2.clone())?;
            Authenticator::database(Arc::new(repository), passwords)
        },
    };

    tracing::info!(
        name = %config.name,
        backend = auth.backend().name(),
        "authentication backend ready"
    );

    Ok(AppState {
        auth: Arc::new(auth),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_backend() {
        let err = initialize_state(&config::Configuration::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("postgres"));
    }

    #[tokio::test]
    async fn test_invalid_directory_config_is_fatal() {
        let dir = std::env::temp_dir().join("shiori-auth-state");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ldap.toml");
        std::fs::write(&path, "version = 1\nhost = \"localhost\"\n").unwrap();

        let mut config = config::Configuration::default();
        config.ldap = Some(path);

        assert!(initialize_state(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let state = AppState {
            auth: Arc::new(Authenticator::database(
                Arc::new(crate::auth::database::MemoryStore::default()),
                crate::crypto::test_manager(),
            )),
        };

        let response = make_request(
            app(state),
            axum::http::Method::GET,
            "/login",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
