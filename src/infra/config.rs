//! Centralized configuration (environment variables + defaults).

use crate::app::dispatcher::DispatcherSettings;
use crate::app::persistence_gateway::RetryPolicy;
use crate::domain::schema::{is_plain_identifier, SchemaRegistry};
use crate::infra::logging;
use crate::storage::{Connector, MemoryStore, PostgresConnector};
use anyhow::{anyhow, bail, Context};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    /// In-process table; contents are lost on exit.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub store: StoreBackend,
    pub users_table: String,
    pub administrators_file: PathBuf,
    pub bot_name: String,
    pub documentation_link: String,
    pub developer_contact: String,
    pub error_restart_delay: Duration,
    pub retry: RetryPolicy,
    pub log_dir: PathBuf,
    pub bind_addr: SocketAddr,
}

impl Settings {
    /// Reads settings from the process environment (call `dotenv::dotenv()` first).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| anyhow!("{} must be set", key));

        let store = match get("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres {
                database_url: required("DATABASE_URL")?,
            },
            "memory" => StoreBackend::Memory,
            other => bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        };

        let users_table = get("USERS_TABLE").unwrap_or_else(|| "users".to_string());
        if !is_plain_identifier(&users_table) {
            bail!(
                "USERS_TABLE '{}' is not a valid table name (lowercase letters, digits and '_')",
                users_table
            );
        }

        Ok(Self {
            store,
            users_table,
            administrators_file: get("ADMINISTRATORS_FILE")
                .unwrap_or_else(|| "administrators.json".to_string())
                .into(),
            bot_name: get("BOT_NAME").unwrap_or_else(|| "ConfigBot".to_string()),
            documentation_link: required("DOCUMENTATION_LINK")?,
            developer_contact: required("DEVELOPER_CONTACT")?,
            error_restart_delay: Duration::from_secs(parse_or(&get, "ERROR_RESTART_DELAY_SECS", 10)?),
            retry: RetryPolicy {
                max_attempts: parse_or::<u32>(&get, "DB_CONNECT_ATTEMPTS", 5)?.max(1),
                delay: Duration::from_secs(parse_or(&get, "DB_CONNECT_DELAY_SECS", 2)?),
            },
            log_dir: get("LOG_DIR").unwrap_or_else(|| "logs".to_string()).into(),
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
        })
    }

    /// Opens the configured store backend for `schema`.
    pub fn connector(&self, schema: &SchemaRegistry) -> anyhow::Result<Box<dyn Connector>> {
        match &self.store {
            StoreBackend::Postgres { database_url } => Ok(Box::new(
                PostgresConnector::new(database_url.clone(), self.users_table.clone())
                    .context("invalid users table")?,
            )),
            StoreBackend::Memory => Ok(Box::new(MemoryStore::with_table(schema))),
        }
    }

    pub fn log_file(&self) -> PathBuf {
        logging::log_file_path(&self.log_dir)
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            bot_name: self.bot_name.clone(),
            documentation_link: self.documentation_link.clone(),
            error_delay: self.error_restart_delay,
            log_file: self.log_file(),
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("{} must be a valid value ('{}': {})", key, raw, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "postgres://bot@localhost/bot"),
        ("DOCUMENTATION_LINK", "https://docs.example"),
        ("DEVELOPER_CONTACT", "@dev"),
    ];

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&REQUIRED).unwrap();
        assert_eq!(
            s.store,
            StoreBackend::Postgres {
                database_url: "postgres://bot@localhost/bot".into()
            }
        );
        assert_eq!(s.users_table, "users");
        assert_eq!(s.bot_name, "ConfigBot");
        assert_eq!(s.error_restart_delay, Duration::from_secs(10));
        assert_eq!(s.retry, RetryPolicy::default());
        assert_eq!(s.log_file(), PathBuf::from("logs").join("log.txt"));
        assert_eq!(s.bind_addr.port(), 3000);
    }

    #[test]
    fn required_values_are_named_when_missing() {
        let err = settings(&REQUIRED[..2]).unwrap_err();
        assert!(err.to_string().contains("DEVELOPER_CONTACT"));

        let err = settings(&REQUIRED[1..]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn memory_backend_needs_no_database_url() {
        let s = settings(&[
            ("STORE_BACKEND", "memory"),
            ("DOCUMENTATION_LINK", "https://docs.example"),
            ("DEVELOPER_CONTACT", "@dev"),
        ])
        .unwrap();
        assert_eq!(s.store, StoreBackend::Memory);
    }

    #[test]
    fn rejects_bad_values() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("DB_CONNECT_ATTEMPTS", "many"));
        assert!(settings(&vars).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("USERS_TABLE", "users; DROP TABLE users"));
        assert!(settings(&vars).is_err());

        // Postgres would fold it to `users` and introspection would miss it.
        let mut vars = REQUIRED.to_vec();
        vars.push(("USERS_TABLE", "Users"));
        let err = settings(&vars).unwrap_err();
        assert!(err.to_string().contains("USERS_TABLE 'Users'"));
    }
}
