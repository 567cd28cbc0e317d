//! In-process users table.
//!
//! Used for local trials (`STORE_BACKEND=memory`) and by the test-suite, which relies on
//! its failure injection: refusing connection attempts and dropping live connections.

use crate::domain::schema::{ColumnInfo, SchemaField, SchemaRegistry, KEY_COLUMN};
use crate::storage::{Connector, StoreConnection, StoreError, StoredValue};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryState {
    /// Key column first, then one column per field.
    columns: Vec<ColumnInfo>,
    /// Values exclude the key column.
    rows: Vec<(String, Vec<StoredValue>)>,
    refuse_connects: u32,
    generation: u64,
    connect_attempts: u64,
    row_reads: u64,
    row_writes: u64,
}

/// Shared handle to one in-memory table. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// A store without a users table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose users table already matches `registry`.
    pub fn with_table(registry: &SchemaRegistry) -> Self {
        let store = Self::new();
        store.lock().columns = table_columns(registry.fields());
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `attempts` connection attempts fail.
    pub fn refuse_connections(&self, attempts: u32) {
        self.lock().refuse_connects = attempts;
    }

    /// Invalidates every open connection, as a server restart would.
    pub fn drop_connections(&self) {
        self.lock().generation += 1;
    }

    pub fn connect_attempts(&self) -> u64 {
        self.lock().connect_attempts
    }

    /// Number of single-row reads served (whitelist listings are not counted).
    pub fn row_reads(&self) -> u64 {
        self.lock().row_reads
    }

    /// Number of successful row inserts, updates and deletes.
    pub fn row_writes(&self) -> u64 {
        self.lock().row_writes
    }

    /// Raw stored value of one column, bypassing any decoding.
    pub fn stored_value(&self, user_id: &str, column: &str) -> Option<StoredValue> {
        let state = self.lock();
        let idx = column_index(&state.columns, column)?;
        state
            .rows
            .iter()
            .find(|(id, _)| id == user_id)
            .and_then(|(_, values)| values.get(idx).cloned())
    }
}

fn table_columns(fields: &[SchemaField]) -> Vec<ColumnInfo> {
    std::iter::once(ColumnInfo {
        name: KEY_COLUMN.to_string(),
        declared_type: "text".to_string(),
    })
    .chain(fields.iter().map(column_for))
    .collect()
}

fn column_for(field: &SchemaField) -> ColumnInfo {
    let declared_type = match field.semantic_type.sql_type() {
        "BIT(1)" => "bit".to_string(),
        other => other.to_lowercase(),
    };
    ColumnInfo {
        name: field.name.clone(),
        declared_type,
    }
}

/// Index into a row's value list (which has no key column).
fn column_index(columns: &[ColumnInfo], name: &str) -> Option<usize> {
    columns
        .iter()
        .skip(1)
        .position(|c| c.name == name)
}

#[async_trait]
impl Connector for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(StoreError::ConnectionRefused(
                "memory store is not accepting connections".to_string(),
            ));
        }
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            generation: state.generation,
        }))
    }

    fn describe(&self) -> String {
        "in-memory users table".to_string()
    }
}

pub struct MemoryConnection {
    store: MemoryStore,
    generation: u64,
}

impl MemoryConnection {
    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        let state = self.store.lock();
        if state.generation != self.generation {
            return Err(StoreError::ConnectionLost(
                "memory store connection was dropped".to_string(),
            ));
        }
        Ok(state)
    }
}

fn missing_table() -> StoreError {
    StoreError::Backend("users table does not exist".to_string())
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn is_alive(&mut self) -> bool {
        self.state().is_ok()
    }

    async fn list_user_ids(&mut self) -> Result<Vec<String>, StoreError> {
        let state = self.state()?;
        if state.columns.is_empty() {
            return Err(missing_table());
        }
        let mut ids: Vec<String> = state.rows.iter().map(|(id, _)| id.clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn insert_user(
        &mut self,
        user_id: &str,
        values: &[(String, StoredValue)],
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        if state.columns.is_empty() {
            return Err(missing_table());
        }
        if state.rows.iter().any(|(id, _)| id == user_id) {
            return Ok(false);
        }

        let mut row = Vec::with_capacity(state.columns.len() - 1);
        for column in state.columns.iter().skip(1) {
            let value = values
                .iter()
                .find(|(name, _)| *name == column.name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    StoreError::Backend(format!(
                        "null value in column \"{}\" violates not-null constraint",
                        column.name
                    ))
                })?;
            row.push(value);
        }
        if let Some((name, _)) = values
            .iter()
            .find(|(name, _)| column_index(&state.columns, name).is_none())
        {
            return Err(StoreError::Backend(format!(
                "column \"{}\" does not exist",
                name
            )));
        }

        state.rows.push((user_id.to_string(), row));
        state.row_writes += 1;
        Ok(true)
    }

    async fn delete_user(&mut self, user_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let before = state.rows.len();
        state.rows.retain(|(id, _)| id != user_id);
        let deleted = state.rows.len() != before;
        if deleted {
            state.row_writes += 1;
        }
        Ok(deleted)
    }

    async fn read_user(
        &mut self,
        user_id: &str,
    ) -> Result<Option<Vec<(String, StoredValue)>>, StoreError> {
        let mut state = self.state()?;
        if state.columns.is_empty() {
            return Err(missing_table());
        }
        state.row_reads += 1;

        let Some((id, values)) = state.rows.iter().find(|(id, _)| id == user_id) else {
            return Ok(None);
        };
        let row = std::iter::once((KEY_COLUMN.to_string(), StoredValue::Text(id.clone())))
            .chain(
                state
                    .columns
                    .iter()
                    .skip(1)
                    .zip(values)
                    .map(|(c, v)| (c.name.clone(), v.clone())),
            )
            .collect();
        Ok(Some(row))
    }

    async fn update_field(
        &mut self,
        user_id: &str,
        column: &str,
        value: &StoredValue,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let idx = column_index(&state.columns, column)
            .ok_or_else(|| StoreError::Backend(format!("column \"{}\" does not exist", column)))?;

        let Some((_, values)) = state.rows.iter_mut().find(|(id, _)| id == user_id) else {
            return Ok(false);
        };
        values[idx] = value.clone();
        state.row_writes += 1;
        Ok(true)
    }

    async fn describe_columns(&mut self) -> Result<Vec<ColumnInfo>, StoreError> {
        Ok(self.state()?.columns.clone())
    }

    async fn create_table(&mut self, registry: &SchemaRegistry) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.columns.is_empty() {
            state.columns = table_columns(registry.fields());
        }
        Ok(())
    }

    async fn add_column(&mut self, field: &SchemaField) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.columns.is_empty() {
            return Err(missing_table());
        }
        if column_index(&state.columns, &field.name).is_some() {
            return Err(StoreError::Backend(format!(
                "column \"{}\" already exists",
                field.name
            )));
        }
        state.columns.push(column_for(field));
        let default = StoredValue::from(&field.default_value);
        for (_, values) in state.rows.iter_mut() {
            values.push(default.clone());
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {}
}
