//! Command Dispatcher: the single worker loop.
//!
//! Receives one command at a time from a [`Transport`], runs it behind the authorization
//! guards, and classifies whatever goes wrong: read timeouts and unexpected errors alert
//! the administrators and back off, an exhausted store retry budget alerts them and stops
//! the loop, and an operator interrupt stops it quietly.

use crate::app::commands::Command;
use crate::app::persistence_gateway::{PersistenceError, SharedGateway};
use crate::domain::access::{AuthorizationGate, Caller, Guarded};
use crate::domain::user_config::{ConfigError, ConfigurationManager};
use crate::transport::{Inbound, ReplyHandle, Transport, TransportError};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sent to the caller whose command hit an unrecoverable store error.
pub const FATAL_REPLY: &str = "A critical database error has occurred, the bot is stopping.";

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub bot_name: String,
    pub documentation_link: String,
    /// Back-off after a recoverable failure; also quoted in the restart notice.
    pub error_delay: Duration,
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
}

/// Why [`CommandDispatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An administrator asked for a restart; the supervisor is expected to start us again.
    Restart,
    FatalPersistence,
    Interrupted,
    TransportClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("configuration record missing for whitelisted user {0}")]
    Integrity(String),
    #[error("could not read log file {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::Persistence(e) if e.is_fatal())
    }
}

impl From<ConfigError> for DispatchError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Integrity(user_id) => DispatchError::Integrity(user_id),
            ConfigError::Persistence(e) => DispatchError::Persistence(e),
        }
    }
}

enum Flow {
    Continue,
    Stop(StopReason),
}

pub struct CommandDispatcher {
    gate: AuthorizationGate,
    configs: ConfigurationManager,
    gateway: SharedGateway,
    settings: DispatcherSettings,
    state: LoopState,
}

/// Returns the allowed value, or records the denial as the reply.
fn granted<T>(reply: &mut ReplyHandle, outcome: Guarded<T>) -> Option<T> {
    match outcome {
        Guarded::Allowed(value) => Some(value),
        Guarded::Denied(denial) => {
            reply.text(denial.message);
            None
        }
    }
}

impl CommandDispatcher {
    pub fn new(gateway: SharedGateway, gate: AuthorizationGate, settings: DispatcherSettings) -> Self {
        Self {
            configs: ConfigurationManager::new(gateway.clone()),
            gate,
            gateway,
            settings,
            state: LoopState::Running,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Runs until a stop condition; `shutdown` resolving is the operator interrupt.
    pub async fn run<T, S>(&mut self, transport: &mut T, shutdown: S) -> StopReason
    where
        T: Transport,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.state = LoopState::Running;
        info!(bot = %self.settings.bot_name, "bot started");

        loop {
            let received = tokio::select! {
                _ = shutdown.as_mut() => {
                    info!("bot stopping for operator interrupt");
                    return self.stop(StopReason::Interrupted);
                }
                received = transport.receive() => received,
            };

            // The inbound (and its reply handle) is consumed here, so replies go out
            // before the loop reacts to the outcome.
            let outcome = match received {
                Ok(inbound) => self.handle(inbound).await,
                Err(e) => Err(DispatchError::Transport(e)),
            };

            let delay = self.settings.error_delay;
            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop(reason)) => return self.stop(reason),
                Err(DispatchError::Transport(TransportError::Closed)) => {
                    warn!("transport closed; stopping");
                    return self.stop(StopReason::TransportClosed);
                }
                Err(DispatchError::Transport(TransportError::ReadTimeout)) => {
                    let message = format!(
                        "Bot has crashed due to read timeout - restarting in {} seconds...",
                        delay.as_secs()
                    );
                    error!("{}", message);
                    self.alert_administrators(transport, &message).await;
                    if self.pause(shutdown.as_mut()).await {
                        return self.stop(StopReason::Interrupted);
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "critical database error; stopping");
                    self.alert_administrators(
                        transport,
                        &format!("A critical database error has occurred:\n{}", e),
                    )
                    .await;
                    return self.stop(StopReason::FatalPersistence);
                }
                Err(e) => {
                    error!(error = %e, "bot has unexpectedly crashed; restarting in {:?}", delay);
                    self.alert_administrators(
                        transport,
                        &format!("Bot has unexpectedly crashed - Error {}", e),
                    )
                    .await;
                    if self.pause(shutdown.as_mut()).await {
                        return self.stop(StopReason::Interrupted);
                    }
                }
            }
        }
    }

    fn stop(&mut self, reason: StopReason) -> StopReason {
        self.state = LoopState::Stopping;
        info!(?reason, "bot stopped");
        reason
    }

    /// Sleeps for the error delay. `true` when interrupted meanwhile.
    async fn pause<S: Future<Output = ()>>(&self, shutdown: Pin<&mut S>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.error_delay) => false,
            _ = shutdown => {
                info!("bot stopping for operator interrupt");
                true
            }
        }
    }

    async fn alert_administrators<T: Transport>(&self, transport: &mut T, message: &str) {
        for admin in self.gate.administrators().iter() {
            if let Err(e) = transport.send_text(admin, message).await {
                warn!(admin, error = %e, "failed to alert administrator");
            }
        }
    }

    async fn handle(&self, inbound: Inbound) -> Result<Flow, DispatchError> {
        let Inbound {
            caller,
            text,
            mut reply,
        } = inbound;

        let Some(command) = Command::parse(&text) else {
            debug!(user_id = %caller.user_id, "ignoring message that is not a known command");
            return Ok(Flow::Continue);
        };
        info!(user_id = %caller.user_id, ?command, access = ?command.access(), "command received");

        match self.execute(command, &caller, &mut reply).await {
            // Data inconsistency for one user; the loop itself is fine.
            Err(e @ DispatchError::Integrity(_)) => {
                reply.text(e.to_string());
                Ok(Flow::Continue)
            }
            Err(e) if e.is_fatal() => {
                reply.text(FATAL_REPLY);
                Err(e)
            }
            Err(e) => {
                reply.text(e.to_string());
                Err(e)
            }
            ok => ok,
        }
    }

    async fn execute(
        &self,
        command: Command,
        caller: &Caller,
        reply: &mut ReplyHandle,
    ) -> Result<Flow, DispatchError> {
        let settings = &self.settings;
        match command {
            Command::Help => {
                let link = &settings.documentation_link;
                let outcome = self
                    .gate
                    .require_whitelisted(caller, || async move {
                        format!("View the documentation for the bot here:\n{}", link)
                    })
                    .await?;
                if let Some(text) = granted(reply, outcome) {
                    reply.text(text);
                }
            }
            Command::ViewConfig => {
                let outcome = self
                    .gate
                    .require_whitelisted(caller, || self.configs.view(&caller.user_id))
                    .await?;
                if let Some(fields) = granted(reply, outcome) {
                    let mut text = format!(
                        "{} {} Configuration:\n\n",
                        caller.display_name(),
                        settings.bot_name
                    );
                    for (name, value) in fields? {
                        text.push_str(&format!("{}={}\n", name, value));
                    }
                    reply.text(text);
                }
            }
            Command::SetConfig(changes) => {
                let outcome = self
                    .gate
                    .require_whitelisted(caller, || {
                        self.configs.apply_changes(&caller.user_id, &changes)
                    })
                    .await?;
                if let Some(report) = granted(reply, outcome) {
                    let report = report?;
                    if !report.applied.is_empty() {
                        let mut text = String::from("Successfully set configuration:\n\n");
                        for applied in &report.applied {
                            text.push_str(&format!("{} set to {}\n", applied.field, applied.value));
                        }
                        reply.text(text);
                    }
                    if !report.failed.is_empty() {
                        let mut text = String::from("Failed to set:\n\n");
                        for failed in &report.failed {
                            text.push_str(&format!("- {} (Error: {})\n", failed.change, failed.error));
                        }
                        reply.text(text);
                    }
                }
            }
            Command::Whitelist(ids) => {
                let outcome = self
                    .gate
                    .require_administrator(caller, || async move {
                        if ids.is_empty() {
                            self.whitelist_listing().await
                        } else {
                            self.whitelist_users(&ids).await
                        }
                    })
                    .await;
                if let Some(text) = granted(reply, outcome) {
                    reply.text(text?);
                }
            }
            Command::Blacklist(ids) => {
                let outcome = self
                    .gate
                    .require_administrator(caller, || self.blacklist_users(&ids))
                    .await;
                if let Some(text) = granted(reply, outcome) {
                    reply.text(text?);
                }
            }
            Command::Restart => {
                let outcome = self.gate.require_administrator(caller, || async {}).await;
                if granted(reply, outcome).is_some() {
                    info!(user_id = %caller.user_id, "restart requested");
                    reply.text(format!(
                        "Bot restarting - Please wait {} seconds",
                        settings.error_delay.as_secs()
                    ));
                    return Ok(Flow::Stop(StopReason::Restart));
                }
            }
            Command::FetchLogs => {
                let outcome = self
                    .gate
                    .require_administrator(caller, || tokio::fs::read(&settings.log_file))
                    .await;
                if let Some(bytes) = granted(reply, outcome) {
                    reply.text("Fetching logfile...");
                    let bytes = bytes.map_err(|source| DispatchError::LogFile {
                        path: settings.log_file.clone(),
                        source,
                    })?;
                    let name = settings
                        .log_file
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "log.txt".to_string());
                    reply.file(name, bytes);
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn whitelist_listing(&self) -> Result<String, PersistenceError> {
        let ids = self.gateway.lock().await.list_whitelisted_ids().await?;
        let mut text = format!("{} Whitelist:\n", self.settings.bot_name);
        for id in ids {
            text.push_str(&format!("- {}\n", id));
        }
        Ok(text)
    }

    async fn whitelist_users(&self, ids: &[String]) -> Result<String, PersistenceError> {
        let mut gateway = self.gateway.lock().await;
        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            match gateway.insert_user(id).await {
                Ok(()) => lines.push(format!("Whitelisted: {}", id)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(user_id = %id, error = %e, "could not whitelist user");
                    lines.push(e.to_string());
                }
            }
        }
        Ok(lines.join("\n"))
    }

    async fn blacklist_users(&self, ids: &[String]) -> Result<String, PersistenceError> {
        if ids.is_empty() {
            return Ok("Usage: /blacklist id1,id2,...".to_string());
        }
        let mut gateway = self.gateway.lock().await;
        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            match gateway.delete_user(id).await {
                Ok(()) => lines.push(format!("Blacklisted: {}", id)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(user_id = %id, error = %e, "could not blacklist user");
                    lines.push(e.to_string());
                }
            }
        }
        Ok(lines.join("\n"))
    }
}
