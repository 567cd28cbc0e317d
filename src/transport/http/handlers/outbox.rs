use crate::transport::http::types::{ApiResponse, AppState};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[utoipa::path(
    get,
    path = "/api/outbox/{user_id}",
    params(
        ("user_id" = String, Path, description = "Recipient identity")
    ),
    responses(
        (status = 200, description = "Queued messages (removed from the outbox)", body = ApiResponse)
    )
)]
pub async fn drain_outbox_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let messages = state.outbox.drain(user_id.trim());
    (
        StatusCode::OK,
        Json(ApiResponse::ok(serde_json::json!({ "messages": messages }))),
    )
}
