//! The worker-side half of the HTTP transport.

use crate::transport::http::types::OutboxMessage;
use crate::transport::{Inbound, Transport, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::warn;

/// Messages kept per recipient; older ones are dropped once a queue is full.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 100;

/// Per-recipient queue of unsolicited messages, drained over `GET /api/outbox/{user_id}`.
#[derive(Debug, Clone)]
pub struct Outbox {
    inner: Arc<Mutex<HashMap<String, VecDeque<OutboxMessage>>>>,
    capacity: usize,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl Outbox {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, to: &str, text: &str) {
        let mut queues = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = queues.entry(to.to_string()).or_default();
        if queue.len() == self.capacity {
            queue.pop_front();
            warn!(to, capacity = self.capacity, "outbox full; dropped oldest message");
        }
        queue.push_back(OutboxMessage {
            text: text.to_string(),
            queued_at: Utc::now().to_rfc3339(),
        });
    }

    /// Removes and returns everything queued for `user_id`, oldest first.
    pub fn drain(&self, user_id: &str) -> Vec<OutboxMessage> {
        let mut queues = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .remove(user_id)
            .map(Vec::from)
            .unwrap_or_default()
    }
}

pub struct HttpTransport {
    commands: mpsc::Receiver<Inbound>,
    outbox: Outbox,
}

impl HttpTransport {
    /// The transport plus the sender the HTTP handlers queue commands on.
    pub fn channel(capacity: usize) -> (Self, mpsc::Sender<Inbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                commands: rx,
                outbox: Outbox::default(),
            },
            tx,
        )
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        self.commands.recv().await.ok_or(TransportError::Closed)
    }

    async fn send_text(&mut self, to: &str, text: &str) -> Result<(), TransportError> {
        self.outbox.push(to, text);
        Ok(())
    }
}
