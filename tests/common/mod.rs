//! Shared fixtures: an in-memory store, a scripted transport and a ready dispatcher.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use whitelist_config_bot::storage::MemoryStore;
use whitelist_config_bot::transport::{Inbound, Reply, ReplyHandle, Transport, TransportError};
use whitelist_config_bot::{
    AdministratorSet, AuthorizationGate, Caller, CommandDispatcher, DispatcherSettings,
    PersistenceGateway, RetryPolicy, SchemaRegistry, SharedGateway,
};

pub const LOG_CONTENTS: &str = "2024-01-01 INFO bot started\n";

/// Feeds a fixed script of inbound events and records everything sent unsolicited.
pub struct ScriptedTransport {
    script: VecDeque<Result<Inbound, TransportError>>,
    /// Once the script runs out: wait forever instead of reporting `Closed`.
    hold_open: bool,
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            hold_open: false,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Queues a command; the receiver yields its replies once it has been handled.
    pub fn command(&mut self, user_id: &str, username: &str, text: &str) -> oneshot::Receiver<Vec<Reply>> {
        let (reply, replies) = ReplyHandle::channel();
        self.script.push_back(Ok(Inbound {
            caller: Caller::new(user_id, Some(username.to_string())),
            text: text.to_string(),
            reply,
        }));
        replies
    }

    pub fn error(&mut self, err: TransportError) {
        self.script.push_back(Err(err));
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        match self.script.pop_front() {
            Some(next) => next,
            None if self.hold_open => std::future::pending().await,
            None => Err(TransportError::Closed),
        }
    }

    async fn send_text(&mut self, to: &str, text: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((to.to_string(), text.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub gateway: SharedGateway,
    pub dispatcher: CommandDispatcher,
    pub log_dir: TempDir,
}

pub fn gateway_for(store: &MemoryStore) -> PersistenceGateway {
    PersistenceGateway::new(
        Box::new(store.clone()),
        Arc::new(SchemaRegistry::standard()),
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::ZERO,
        },
    )
}

/// A dispatcher over a fresh memory store with the given administrators.
pub fn harness(admins: &[&str]) -> Harness {
    let store = MemoryStore::with_table(&SchemaRegistry::standard());
    let gateway = gateway_for(&store).into_shared();

    let log_dir = tempfile::tempdir().unwrap();
    let log_file = log_dir.path().join("log.txt");
    std::fs::write(&log_file, LOG_CONTENTS).unwrap();

    let gate = AuthorizationGate::new(
        gateway.clone(),
        Arc::new(AdministratorSet::from_ids(admins.iter().copied())),
        "@developer",
    );
    let dispatcher = CommandDispatcher::new(
        gateway.clone(),
        gate,
        DispatcherSettings {
            bot_name: "ConfigBot".to_string(),
            documentation_link: "https://docs.example/bot".to_string(),
            error_delay: Duration::ZERO,
            log_file,
        },
    );

    Harness {
        store,
        gateway,
        dispatcher,
        log_dir,
    }
}

pub fn texts(replies: &[Reply]) -> Vec<String> {
    replies
        .iter()
        .filter_map(|r| match r {
            Reply::Text(text) => Some(text.clone()),
            Reply::File { .. } => None,
        })
        .collect()
}
