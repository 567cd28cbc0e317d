use crate::transport::http::handlers::{commands, health, outbox};
use crate::transport::http::types::{ApiResponse, AppState, CommandRequest, OutboxMessage, ReplyBody};
use axum::routing::{get, post};
use axum::{Json, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthcheck_handler,
        commands::command_handler,
        outbox::drain_outbox_handler
    ),
    components(schemas(ApiResponse, CommandRequest, ReplyBody, OutboxMessage))
)]
pub struct ApiDoc;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::healthcheck_handler))
        .route("/api/commands", post(commands::command_handler))
        .route("/api/outbox/:user_id", get(outbox::drain_outbox_handler))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .with_state(app_state)
}
