//! HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers. Centralizing route composition
//! keeps `main` small and lets tests drive the full surface in-process.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::context::ServiceContext;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub context: ServiceContext,
    pub webhook_secret: Arc<str>,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    Router::new()
        .route("/webhook", axum::routing::post(api::webhook::submit_webhook))
        .route(
            "/webhook/:id",
            axum::routing::get(api::webhook::webhook_status),
        )
        .route(
            "/landmarks",
            axum::routing::get(api::landmarks::query_landmarks),
        )
        .route("/healthz", axum::routing::get(api::system::healthz))
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
