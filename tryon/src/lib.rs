//! # tryon: Virtual Try-On Gateway
//!
//! `tryon` is a small HTTP service that shows a shopper what a garment looks like on them. The
//! storefront uploads a photo of the person and a photo of the garment; the service answers with
//! the URL of a generated image.
//!
//! ## Overview
//!
//! Generation is delegated to a hosted diffusion try-on model whenever one is configured and
//! reachable. Hosted models are slow, rate limited and occasionally down, so the service never
//! lets a remote failure reach the shopper: any error from the model (network, non-2xx, malformed
//! reply, timeout) drops the request into a local fallback that pastes the garment onto the
//! person photo at a fixed position. The fallback is crude but always available.
//!
//! ### Request Flow
//!
//! 1. `POST /api/try-on` receives `person_image` and `cloth_image` as multipart fields, plus
//!    optional catalogue metadata (`garment_type`, `garment_category`, `garment_description`).
//! 2. Garments that are not eligible for photo try-on (innerwear, lower and full body garments,
//!    AR-only accessories) are rejected with `400`, see [`garments`].
//! 3. Both uploads are stored under unique names ([`storage`]).
//! 4. The [`service`] calls the remote model ([`inference`]) on its own task, within the
//!    configured timeout and attempt budget.
//! 5. On failure the [`compositor`] resizes the garment and alpha-composites it onto the person
//!    photo on the blocking pool, writing `result_<uuid>.png`.
//! 6. The response carries `output_image_url`, a path under the public prefix (default
//!    `/static`) from which the image is served.
//!
//! If the local composition fails too (for example an undecodable upload) the configured
//! `fallback.on_failure` policy decides between a `500` and a placeholder image URL.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML layout and `TRYON_` environment overrides. An empty configuration
//! runs the local fallback only.
//!
//! ## Documentation
//!
//! The OpenAPI description is served at `/api-docs/openapi.json` and rendered at `/docs`.

pub mod api;
pub mod compositor;
pub mod config;
pub mod errors;
pub mod garments;
pub mod inference;
pub mod openapi;
pub mod service;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::{config::CorsOrigin, openapi::ApiDoc, service::TryOnService, storage::Storage};

/// Shared state handed to every handler.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .service(Arc::new(service))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub service: Arc<TryOnService>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - `GET /`, `GET /healthz`: status
/// - `POST /api/try-on`: try-on generation, bounded by `max_upload_size`
/// - `<public_prefix>/*`: generated images, read-only from the outputs directory
/// - `/api-docs/openapi.json`, `/docs`: API documentation
///
/// # Errors
///
/// Returns an error if the CORS configuration cannot be turned into header values.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let storage = state.service.storage();

    let api_routes = Router::new()
        .route("/", get(api::handlers::status::root))
        .route("/healthz", get(api::handlers::status::healthz))
        .route(
            "/api/try-on",
            post(api::handlers::try_on::try_on).layer(DefaultBodyLimit::max(state.config.max_upload_size)),
        )
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone());

    // Only the outputs directory is exposed; uploads stay private.
    let outputs = ServeDir::new(storage.outputs_dir());

    let router = api_routes
        .nest_service(storage.public_prefix(), outputs)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// The assembled service.
///
/// 1. **Create**: [`Application::new`] prepares storage, builds the remote model client and the
///    router
/// 2. **Serve**: [`Application::serve`] binds to the configured address and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, in-flight requests finish and telemetry
///    is flushed
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance from configuration
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting try-on service with configuration: {:#?}", config);

        let storage = Storage::from_config(&config.storage);
        storage.init().await?;
        info!(
            uploads = %storage.uploads_dir().display(),
            outputs = %storage.outputs_dir().display(),
            "Storage ready"
        );

        let service = TryOnService::from_config(&config, storage)?;
        Self::with_service(config, service)
    }

    /// Create an application around an already-built service
    pub fn with_service(config: Config, service: TryOnService) -> anyhow::Result<Self> {
        if !service.has_remote_model() {
            info!("Serving try-on requests with the local overlay only");
        }

        let state = AppState::builder().config(config.clone()).service(Arc::new(service)).build();
        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Try-on service listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorsConfig;
    use crate::test_utils::{create_test_app, create_test_config};

    #[test_log::test(tokio::test)]
    async fn serves_openapi_and_docs() {
        let (server, _dir) = create_test_app().await;

        let response = server.get("/api-docs/openapi.json").await;
        response.assert_status_ok();
        let spec: serde_json::Value = response.json();
        assert!(spec["paths"]["/api/try-on"]["post"].is_object());

        server.get("/docs").await.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn uploads_are_not_served() {
        let (server, dir) = create_test_app().await;
        std::fs::write(dir.path().join("uploads").join("secret.png"), b"private").unwrap();
        std::fs::write(dir.path().join("static").join("public.png"), b"public").unwrap();

        server.get("/static/public.png").await.assert_status_ok();
        server
            .get("/static/../uploads/secret.png")
            .await
            .assert_status_not_found();
        server.get("/uploads/secret.png").await.assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn cors_allows_configured_origin() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config(dir.path());
        config.cors = CorsConfig {
            allowed_origins: vec![CorsOrigin::Url("https://shop.example.com".parse().unwrap())],
            allow_credentials: true,
            max_age: None,
        };
        let server = Application::new(config).await.unwrap().into_test_server();

        let response = server
            .get("/healthz")
            .add_header(http::header::ORIGIN, HeaderValue::from_static("https://shop.example.com"))
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.header(http::header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "https://shop.example.com"
        );
    }

    #[test_log::test(tokio::test)]
    async fn new_creates_storage_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config(dir.path());
        let _app = Application::new(config).await.unwrap();

        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("static").is_dir());
    }
}
