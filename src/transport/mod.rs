//! Messaging boundary between the command worker and the outside world.
//!
//! A [`Transport`] yields one [`Inbound`] command at a time and can push unsolicited
//! messages (alerts). Replies to a command are collected on its [`ReplyHandle`] and
//! delivered together when the handle is dropped.

pub mod http;

use crate::domain::access::Caller;
use async_trait::async_trait;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    File { name: String, bytes: Vec<u8> },
}

/// Collects replies to one command; sends them on drop.
#[derive(Debug)]
pub struct ReplyHandle {
    replies: Vec<Reply>,
    deliver: Option<oneshot::Sender<Vec<Reply>>>,
}

impl ReplyHandle {
    /// A handle plus the receiving end its replies are delivered to.
    pub fn channel() -> (Self, oneshot::Receiver<Vec<Reply>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                replies: Vec::new(),
                deliver: Some(tx),
            },
            rx,
        )
    }

    pub fn text(&mut self, text: impl Into<String>) {
        self.replies.push(Reply::Text(text.into()));
    }

    pub fn file(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.replies.push(Reply::File {
            name: name.into(),
            bytes,
        });
    }

    pub fn replies(&self) -> &[Reply] {
        &self.replies
    }
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.deliver.take() {
            // The requester may have given up waiting.
            let _ = tx.send(std::mem::take(&mut self.replies));
        }
    }
}

/// One inbound command.
#[derive(Debug)]
pub struct Inbound {
    pub caller: Caller,
    pub text: String,
    pub reply: ReplyHandle,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("read timed out")]
    ReadTimeout,
    /// No further commands will ever arrive.
    #[error("transport closed")]
    Closed,
    #[error("failed to deliver message to {to}: {reason}")]
    Delivery { to: String, reason: String },
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send {
    /// Waits for the next command.
    async fn receive(&mut self) -> Result<Inbound, TransportError>;

    /// Sends an unsolicited text message to `to`.
    async fn send_text(&mut self, to: &str, text: &str) -> Result<(), TransportError>;
}
