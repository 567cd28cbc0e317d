//! Users table backed by a single PostgreSQL connection.

use crate::domain::schema::{
    is_plain_identifier, ColumnInfo, SchemaError, SchemaField, SchemaRegistry, KEY_COLUMN,
};
use crate::storage::{Connector, StoreConnection, StoreError, StoredValue};
use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Connection, PgConnection, Postgres, Row};

/// Opens connections to the users table of a Postgres database.
pub struct PostgresConnector {
    database_url: String,
    table: String,
}

impl PostgresConnector {
    pub fn new(database_url: impl Into<String>, table: impl Into<String>) -> Result<Self, SchemaError> {
        let table = table.into();
        if !is_plain_identifier(&table) {
            return Err(SchemaError::InvalidName(table));
        }
        Ok(Self {
            database_url: database_url.into(),
            table,
        })
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let conn = PgConnection::connect(&self.database_url).await?;
        Ok(Box::new(PostgresConnection {
            conn,
            table: self.table.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("postgres table '{}'", self.table)
    }
}

pub struct PostgresConnection {
    conn: PgConnection,
    table: String,
}

/// Placeholder with an explicit cast so the parameter type never depends on inference.
fn placeholder(idx: usize, value: &StoredValue) -> String {
    match value {
        StoredValue::Text(_) => format!("${}::TEXT", idx),
        StoredValue::Integer(_) => format!("${}::INT8", idx),
        StoredValue::Float(_) => format!("${}::FLOAT8", idx),
        StoredValue::Bit(_) => format!("${}::INT4::BIT(1)", idx),
    }
}

fn bind_stored<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &StoredValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        StoredValue::Text(s) => query.bind(s.clone()),
        StoredValue::Integer(n) => query.bind(*n),
        StoredValue::Float(n) => query.bind(*n),
        StoredValue::Bit(b) => query.bind(i32::from(*b)),
    }
}

#[derive(Clone, Copy)]
enum ReadAs {
    Text,
    Integer,
    Float,
    Bit,
}

/// How a column is selected and decoded, based on its catalog type.
fn read_as(declared_type: &str) -> ReadAs {
    let declared = declared_type.to_lowercase();
    if declared == "bit" || declared.starts_with("bit(") {
        ReadAs::Bit
    } else if matches!(declared.as_str(), "integer" | "smallint" | "bigint") {
        ReadAs::Integer
    } else if matches!(declared.as_str(), "double precision" | "real" | "numeric") {
        ReadAs::Float
    } else {
        ReadAs::Text
    }
}

#[async_trait]
impl StoreConnection for PostgresConnection {
    async fn is_alive(&mut self) -> bool {
        self.conn.ping().await.is_ok()
    }

    async fn list_user_ids(&mut self) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT {key}::TEXT AS {key} FROM {table} ORDER BY {key}",
            key = KEY_COLUMN,
            table = self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&mut self.conn).await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get::<String, _>(KEY_COLUMN)?);
        }
        Ok(ids)
    }

    async fn insert_user(
        &mut self,
        user_id: &str,
        values: &[(String, StoredValue)],
    ) -> Result<bool, StoreError> {
        let mut columns = vec![KEY_COLUMN.to_string()];
        let mut placeholders = vec!["$1::TEXT".to_string()];
        for (idx, (name, value)) in values.iter().enumerate() {
            columns.push(name.clone());
            placeholders.push(placeholder(idx + 2, value));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
            self.table,
            columns.join(", "),
            placeholders.join(", "),
            KEY_COLUMN
        );

        let mut query = sqlx::query(&sql).bind(user_id.to_string());
        for (_, value) in values {
            query = bind_stored(query, value);
        }
        let result = query.execute(&mut self.conn).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_user(&mut self, user_id: &str) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE {} = $1", self.table, KEY_COLUMN);
        let result = sqlx::query(&sql)
            .bind(user_id.to_string())
            .execute(&mut self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn read_user(
        &mut self,
        user_id: &str,
    ) -> Result<Option<Vec<(String, StoredValue)>>, StoreError> {
        // Bit-flag columns can only be decoded once their declared type is known.
        let columns = self.describe_columns().await?;
        if columns.is_empty() {
            return Err(StoreError::Backend(format!(
                "table '{}' does not exist",
                self.table
            )));
        }

        let plan: Vec<(String, ReadAs)> = columns
            .into_iter()
            .map(|c| {
                let how = read_as(&c.declared_type);
                (c.name, how)
            })
            .collect();

        let select_list = plan
            .iter()
            .map(|(name, how)| match how {
                ReadAs::Text => format!("{name}::TEXT AS {name}"),
                ReadAs::Integer => format!("{name}::INT8 AS {name}"),
                ReadAs::Float => format!("{name}::FLOAT8 AS {name}"),
                ReadAs::Bit => format!("{name}::INT4 AS {name}"),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            select_list, self.table, KEY_COLUMN
        );
        let row = sqlx::query(&sql)
            .bind(user_id.to_string())
            .fetch_optional(&mut self.conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut values = Vec::with_capacity(plan.len());
        for (name, how) in plan {
            let value = match how {
                ReadAs::Text => StoredValue::Text(row.try_get::<String, _>(name.as_str())?),
                ReadAs::Integer => StoredValue::Integer(row.try_get::<i64, _>(name.as_str())?),
                ReadAs::Float => StoredValue::Float(row.try_get::<f64, _>(name.as_str())?),
                ReadAs::Bit => {
                    let bit = row.try_get::<i32, _>(name.as_str())?;
                    StoredValue::Bit(u8::from(bit != 0))
                }
            };
            values.push((name, value));
        }
        Ok(Some(values))
    }

    async fn update_field(
        &mut self,
        user_id: &str,
        column: &str,
        value: &StoredValue,
    ) -> Result<bool, StoreError> {
        if !is_plain_identifier(column) {
            return Err(StoreError::Backend(format!(
                "'{}' is not a valid column identifier",
                column
            )));
        }

        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {} = $2",
            self.table,
            column,
            placeholder(1, value),
            KEY_COLUMN
        );

        let mut tx = self.conn.begin().await?;
        let result = bind_stored(sqlx::query(&sql), value)
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 1 {
            tx.commit().await?;
            Ok(true)
        } else {
            tx.rollback().await?;
            Ok(false)
        }
    }

    async fn describe_columns(&mut self) -> Result<Vec<ColumnInfo>, StoreError> {
        let rows = sqlx::query(
            "SELECT column_name::TEXT AS column_name, data_type::TEXT AS data_type
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(self.table.clone())
        .fetch_all(&mut self.conn)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(ColumnInfo {
                name: row.try_get("column_name")?,
                declared_type: row.try_get("data_type")?,
            });
        }
        Ok(columns)
    }

    async fn create_table(&mut self, registry: &SchemaRegistry) -> Result<(), StoreError> {
        let mut columns = vec![format!("{} TEXT PRIMARY KEY", KEY_COLUMN)];
        for field in registry.fields() {
            columns.push(format!(
                "{} {} NOT NULL",
                field.name,
                field.semantic_type.sql_type()
            ));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            columns.join(", ")
        );
        sqlx::query(&sql).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn add_column(&mut self, field: &SchemaField) -> Result<(), StoreError> {
        if !is_plain_identifier(&field.name) {
            return Err(StoreError::Backend(format!(
                "'{}' is not a valid column identifier",
                field.name
            )));
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {} NOT NULL DEFAULT {}",
            self.table,
            field.name,
            field.semantic_type.sql_type(),
            field.default_value.sql_literal()
        );
        sqlx::query(&sql).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        let this = *self;
        if let Err(err) = this.conn.close().await {
            tracing::debug!(error = %err, "error while closing database connection");
        }
    }
}
