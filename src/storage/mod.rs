//! Storage backends for the users table.
//!
//! A [`Connector`] opens [`StoreConnection`]s; the persistence gateway owns at most one
//! connection at a time and reconnects through the connector when it is lost.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresConnector;

use crate::domain::schema::{ColumnInfo, ConfigValue, SchemaField, SchemaRegistry, SemanticType};
use async_trait::async_trait;

/// A value in its stored representation. Booleans are single-bit flags.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bit(u8),
}

impl StoredValue {
    /// Decodes a stored value as `target`; `None` when the representation does not fit.
    pub fn decode(&self, target: SemanticType) -> Option<ConfigValue> {
        match (target, self) {
            (SemanticType::String, StoredValue::Text(s)) => Some(ConfigValue::Text(s.clone())),
            (SemanticType::Integer, StoredValue::Integer(n)) => Some(ConfigValue::Integer(*n)),
            (SemanticType::Float, StoredValue::Float(n)) => Some(ConfigValue::Float(*n)),
            (SemanticType::Float, StoredValue::Integer(n)) => Some(ConfigValue::Float(*n as f64)),
            (SemanticType::Boolean, StoredValue::Bit(b)) => Some(ConfigValue::Boolean(*b == 1)),
            _ => None,
        }
    }
}

impl From<&ConfigValue> for StoredValue {
    fn from(value: &ConfigValue) -> Self {
        match value {
            ConfigValue::Text(s) => StoredValue::Text(s.clone()),
            ConfigValue::Integer(n) => StoredValue::Integer(*n),
            ConfigValue::Float(n) => StoredValue::Float(*n),
            ConfigValue::Boolean(b) => StoredValue::Bit(u8::from(*b)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// Errors after which the connection must be considered dead.
    pub fn is_connection_error(&self) -> bool {
        match self {
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed
            ),
            StoreError::ConnectionRefused(_) | StoreError::ConnectionLost(_) => true,
            StoreError::Backend(_) => false,
        }
    }
}

/// Opens connections to a store.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;

    /// Short description for logs (never contains credentials).
    fn describe(&self) -> String;
}

/// One live connection to the users table.
///
/// Column names passed in are always registry field names; values are always bound
/// as statement parameters.
#[async_trait]
pub trait StoreConnection: Send {
    async fn is_alive(&mut self) -> bool;

    async fn list_user_ids(&mut self) -> Result<Vec<String>, StoreError>;

    /// Inserts a row. `Ok(false)` when the user already has one.
    async fn insert_user(
        &mut self,
        user_id: &str,
        values: &[(String, StoredValue)],
    ) -> Result<bool, StoreError>;

    /// Deletes a row. `Ok(false)` when there was none.
    async fn delete_user(&mut self, user_id: &str) -> Result<bool, StoreError>;

    /// All columns of the user's row (key column included) in table order.
    async fn read_user(
        &mut self,
        user_id: &str,
    ) -> Result<Option<Vec<(String, StoredValue)>>, StoreError>;

    /// Updates one column in a single committed transaction. `Ok(false)` when no row matched.
    async fn update_field(
        &mut self,
        user_id: &str,
        column: &str,
        value: &StoredValue,
    ) -> Result<bool, StoreError>;

    /// Live columns in declaration order; empty when the table does not exist.
    async fn describe_columns(&mut self) -> Result<Vec<ColumnInfo>, StoreError>;

    async fn create_table(&mut self, registry: &SchemaRegistry) -> Result<(), StoreError>;

    /// Appends a column, filling existing rows with the field default.
    async fn add_column(&mut self, field: &SchemaField) -> Result<(), StoreError>;

    async fn close(self: Box<Self>);
}
