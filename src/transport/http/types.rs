use crate::app::persistence_gateway::SharedGateway;
use crate::transport::http::channel::Outbox;
use crate::transport::{Inbound, Reply};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::mpsc;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct AppState {
    /// Queue feeding the single command worker.
    pub commands: mpsc::Sender<Inbound>,
    pub outbox: Outbox,
    pub gateway: SharedGateway,
    /// How long a request waits for the worker's replies.
    pub reply_timeout: Duration,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CommandRequest {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Raw message text, e.g. `/setconfig max_qty=7`.
    pub text: String,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: JsonValue) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// One reply to a command as sent over HTTP. File contents are base64.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyBody {
    Text { text: String },
    File { name: String, content_base64: String },
}

impl From<Reply> for ReplyBody {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Text(text) => ReplyBody::Text { text },
            Reply::File { name, bytes } => ReplyBody::File {
                name,
                content_base64: BASE64.encode(bytes),
            },
        }
    }
}

/// An unsolicited message waiting for its recipient.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct OutboxMessage {
    pub text: String,
    /// RFC 3339.
    pub queued_at: String,
}
