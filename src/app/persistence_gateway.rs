//! The Persistence Gateway.
//!
//! Owns the single connection to the configuration store and exposes typed CRUD over
//! the users table. Every data operation first makes sure the connection is alive and
//! reconnects through a bounded retry loop when it is not. Running out of attempts is
//! reported as [`PersistenceError::Exhausted`], which callers treat as fatal.

use crate::domain::schema::{
    ColumnInfo, ConfigValue, SchemaError, SchemaRegistry, UserConfigRecord, KEY_COLUMN,
};
use crate::storage::{Connector, StoreConnection, StoreError, StoredValue};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The gateway shared between the command worker and the health probe.
/// One lock per logical connection.
pub type SharedGateway = Arc<Mutex<PersistenceGateway>>;

/// Bounded, fixed-delay connection retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Could not connect to the configuration store after {attempts} attempts - Error: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: StoreError,
    },
    #[error("User ({0}) is already whitelisted.")]
    DuplicateUser(String),
    #[error("User ({0}) not found in database.")]
    UnknownUser(String),
    #[error("{0} does not match any available config settings in database.")]
    UnknownField(String),
    #[error("schema mismatch: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PersistenceError {
    /// Whether the store is unreachable for good (retry budget spent).
    pub fn is_fatal(&self) -> bool {
        matches!(self, PersistenceError::Exhausted { .. })
    }
}

enum ConnectionState {
    Connected(Box<dyn StoreConnection>),
    Disconnected,
    Reconnecting,
}

pub struct PersistenceGateway {
    connector: Box<dyn Connector>,
    schema: Arc<SchemaRegistry>,
    retry: RetryPolicy,
    state: ConnectionState,
}

impl PersistenceGateway {
    /// Creates a disconnected gateway; the first operation (or [`Self::connect`]) connects.
    pub fn new(connector: Box<dyn Connector>, schema: Arc<SchemaRegistry>, retry: RetryPolicy) -> Self {
        Self {
            connector,
            schema,
            retry,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn into_shared(self) -> SharedGateway {
        Arc::new(Mutex::new(self))
    }

    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    /// (Re)establishes the connection, trying up to `max_attempts` times with a fixed
    /// delay between attempts.
    pub async fn connect(&mut self) -> Result<(), PersistenceError> {
        if let ConnectionState::Connected(conn) =
            std::mem::replace(&mut self.state, ConnectionState::Reconnecting)
        {
            conn.close().await;
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connector.connect().await {
                Ok(conn) => {
                    info!(
                        store = %self.connector.describe(),
                        attempt,
                        "connected to configuration store"
                    );
                    self.state = ConnectionState::Connected(conn);
                    return Ok(());
                }
                Err(err) if attempt >= max_attempts => {
                    error!(
                        store = %self.connector.describe(),
                        attempts = attempt,
                        error = %err,
                        "giving up on configuration store"
                    );
                    self.state = ConnectionState::Disconnected;
                    return Err(PersistenceError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "connection attempt failed, retrying in {:?}",
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }

    /// Returns a live connection, reconnecting first if it was dropped.
    async fn ensure_connected(&mut self) -> Result<&mut dyn StoreConnection, PersistenceError> {
        let alive = match &mut self.state {
            ConnectionState::Connected(conn) => conn.is_alive().await,
            _ => false,
        };
        if !alive {
            if matches!(self.state, ConnectionState::Connected(_)) {
                warn!("configuration store connection dropped; reconnecting");
            }
            self.connect().await?;
        }
        match &mut self.state {
            ConnectionState::Connected(conn) => Ok(conn.as_mut()),
            _ => Err(StoreError::ConnectionLost("no connection after reconnect".to_string()).into()),
        }
    }

    /// Marks the connection dead after a connection-class failure so the next
    /// operation reconnects.
    fn fail(&mut self, err: StoreError) -> PersistenceError {
        if err.is_connection_error() {
            warn!(error = %err, "configuration store connection failed mid-operation");
            self.state = ConnectionState::Disconnected;
        }
        PersistenceError::Store(err)
    }

    /// Round-trips the connection (used by the health probe).
    pub async fn ping(&mut self) -> Result<(), PersistenceError> {
        self.ensure_connected().await?;
        Ok(())
    }

    pub async fn list_whitelisted_ids(&mut self) -> Result<BTreeSet<String>, PersistenceError> {
        let result = self.ensure_connected().await?.list_user_ids().await;
        let ids = result.map_err(|e| self.fail(e))?;
        Ok(ids.into_iter().collect())
    }

    /// Creates the user's record with every field at its default.
    pub async fn insert_user(&mut self, user_id: &str) -> Result<(), PersistenceError> {
        let defaults = UserConfigRecord::with_defaults(user_id, &self.schema);
        let values: Vec<(String, StoredValue)> = defaults
            .fields()
            .iter()
            .map(|(name, value)| (name.clone(), StoredValue::from(value)))
            .collect();

        let result = self.ensure_connected().await?.insert_user(user_id, &values).await;
        if !result.map_err(|e| self.fail(e))? {
            return Err(PersistenceError::DuplicateUser(user_id.to_string()));
        }
        info!(user_id, "user whitelisted");
        Ok(())
    }

    pub async fn delete_user(&mut self, user_id: &str) -> Result<(), PersistenceError> {
        let result = self.ensure_connected().await?.delete_user(user_id).await;
        if !result.map_err(|e| self.fail(e))? {
            return Err(PersistenceError::UnknownUser(user_id.to_string()));
        }
        info!(user_id, "user blacklisted");
        Ok(())
    }

    pub async fn read_config(&mut self, user_id: &str) -> Result<UserConfigRecord, PersistenceError> {
        let result = self.ensure_connected().await?.read_user(user_id).await;
        let row = result
            .map_err(|e| self.fail(e))?
            .ok_or_else(|| PersistenceError::UnknownUser(user_id.to_string()))?;
        self.decode_row(user_id, row)
    }

    fn decode_row(
        &self,
        user_id: &str,
        row: Vec<(String, StoredValue)>,
    ) -> Result<UserConfigRecord, PersistenceError> {
        let mut fields = Vec::with_capacity(self.schema.fields().len());
        for (name, stored) in row.into_iter().filter(|(name, _)| name != KEY_COLUMN) {
            let field = self.schema.get(&name).ok_or_else(|| {
                SchemaError::Mismatch(format!("column '{}' is not a declared field", name))
            })?;
            let value = stored.decode(field.semantic_type).ok_or_else(|| {
                SchemaError::Mismatch(format!(
                    "column '{}' does not hold a {} value",
                    name, field.semantic_type
                ))
            })?;
            fields.push((name, value));
        }
        Ok(UserConfigRecord::new(user_id, fields, &self.schema)?)
    }

    /// Updates one field and returns the refreshed record.
    ///
    /// `value` must already have the field's semantic type.
    pub async fn write_field(
        &mut self,
        user_id: &str,
        field_name: &str,
        value: ConfigValue,
    ) -> Result<UserConfigRecord, PersistenceError> {
        let field = self
            .schema
            .get(field_name)
            .ok_or_else(|| PersistenceError::UnknownField(field_name.to_string()))?;
        if field.semantic_type != value.semantic_type() {
            return Err(SchemaError::Mismatch(format!(
                "field '{}' is a {}, got a {} value",
                field.name,
                field.semantic_type,
                value.semantic_type()
            ))
            .into());
        }
        let column = field.name.clone();
        let stored = StoredValue::from(&value);

        let result = self
            .ensure_connected()
            .await?
            .update_field(user_id, &column, &stored)
            .await;
        if !result.map_err(|e| self.fail(e))? {
            return Err(PersistenceError::UnknownUser(user_id.to_string()));
        }
        debug!(user_id, field = %column, value = %value, "config field written");

        self.read_config(user_id).await
    }

    /// Live table layout, key column included, in declaration order.
    pub async fn describe_columns(&mut self) -> Result<Vec<ColumnInfo>, PersistenceError> {
        let result = self.ensure_connected().await?.describe_columns().await;
        result.map_err(|e| self.fail(e))
    }

    /// Fails unless the live table matches the registry exactly.
    pub async fn verify_schema(&mut self) -> Result<(), PersistenceError> {
        let columns = self.describe_columns().await?;
        self.schema.verify_columns(&columns)?;
        Ok(())
    }

    /// Creates the users table when it does not exist. Returns whether it was created.
    pub async fn create_table_if_missing(&mut self) -> Result<bool, PersistenceError> {
        if !self.describe_columns().await?.is_empty() {
            return Ok(false);
        }
        let schema = Arc::clone(&self.schema);
        let result = self.ensure_connected().await?.create_table(&schema).await;
        result.map_err(|e| self.fail(e))?;
        info!("created users table");
        Ok(true)
    }

    /// Appends declared fields the live table lacks. Returns the added field names.
    pub async fn add_missing_columns(&mut self) -> Result<Vec<String>, PersistenceError> {
        let columns = self.describe_columns().await?;
        let schema = Arc::clone(&self.schema);
        let missing = schema.missing_fields(&columns)?;

        let mut added = Vec::with_capacity(missing.len());
        for field in missing {
            let result = self.ensure_connected().await?.add_column(field).await;
            result.map_err(|e| self.fail(e))?;
            info!(field = %field.name, "added column");
            added.push(field.name.clone());
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn gateway(store: &MemoryStore) -> PersistenceGateway {
        PersistenceGateway::new(
            Box::new(store.clone()),
            Arc::new(SchemaRegistry::standard()),
            RetryPolicy {
                max_attempts: 5,
                delay: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn connect_retries_until_the_store_accepts() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        store.refuse_connections(2);
        let mut gateway = gateway(&store);

        gateway.connect().await.unwrap();
        assert_eq!(store.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn connect_gives_up_after_the_retry_bound() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        store.refuse_connections(5);
        let mut gateway = gateway(&store);

        let err = gateway.connect().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, PersistenceError::Exhausted { attempts: 5, .. }));
        assert_eq!(store.connect_attempts(), 5);
    }

    #[tokio::test]
    async fn dropped_connections_are_reestablished_transparently() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        let mut gateway = gateway(&store);
        gateway.insert_user("7").await.unwrap();

        store.drop_connections();
        let ids = gateway.list_whitelisted_ids().await.unwrap();
        assert!(ids.contains("7"));
        assert_eq!(store.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn write_field_rejects_values_of_the_wrong_type() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        let mut gateway = gateway(&store);
        gateway.insert_user("7").await.unwrap();

        let err = gateway
            .write_field("7", "max_qty", ConfigValue::Text("lots".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Schema(_)));

        let err = gateway
            .write_field("7", "nope", ConfigValue::Integer(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::UnknownField(f) if f == "nope"));
    }

    #[tokio::test]
    async fn append_only_migration_adds_missing_fields() {
        let full = SchemaRegistry::standard();
        let older = SchemaRegistry::new(full.fields()[..8].to_vec()).unwrap();
        let store = MemoryStore::with_table(&older);
        let mut gateway = gateway(&store);
        gateway.insert_user("7").await.unwrap_err();
        assert!(gateway.verify_schema().await.is_err());

        let added = gateway.add_missing_columns().await.unwrap();
        assert_eq!(added, vec!["zip_output", "option_data_source"]);
        gateway.verify_schema().await.unwrap();
        assert!(!gateway.create_table_if_missing().await.unwrap());
    }
}
