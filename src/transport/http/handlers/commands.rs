use crate::domain::access::Caller;
use crate::transport::http::types::{ApiResponse, AppState, CommandRequest, ReplyBody};
use crate::transport::{Inbound, ReplyHandle};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::warn;

#[utoipa::path(
    post,
    path = "/api/commands",
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Command handled; data.replies holds the replies in order", body = ApiResponse),
        (status = 400, description = "Bad request", body = ApiResponse),
        (status = 503, description = "Command worker is not running", body = ApiResponse),
        (status = 504, description = "No reply within the reply timeout", body = ApiResponse)
    )
)]
pub async fn command_handler(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    let user_id = request.user_id.trim().to_string();
    if user_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failure("user_id must not be empty")),
        )
            .into_response();
    }

    let (reply, replies) = ReplyHandle::channel();
    let inbound = Inbound {
        caller: Caller::new(user_id, request.username),
        text: request.text,
        reply,
    };

    if state.commands.send(inbound).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::failure("command worker is not running")),
        )
            .into_response();
    }

    match tokio::time::timeout(state.reply_timeout, replies).await {
        Ok(Ok(replies)) => {
            let replies: Vec<ReplyBody> = replies.into_iter().map(ReplyBody::from).collect();
            (
                StatusCode::OK,
                Json(ApiResponse::ok(serde_json::json!({ "replies": replies }))),
            )
                .into_response()
        }
        // The handle always sends on drop, so this only happens if the worker panicked.
        Ok(Err(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::failure("command worker stopped before replying")),
        )
            .into_response(),
        Err(_) => {
            warn!(timeout = ?state.reply_timeout, "timed out waiting for command replies");
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ApiResponse::failure("timed out waiting for the command worker")),
            )
                .into_response()
        }
    }
}
