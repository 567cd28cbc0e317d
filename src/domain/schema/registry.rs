//! SchemaRegistry: the ordered list of configuration fields every user record carries.

use crate::domain::schema::value::{ConfigValue, SemanticType};
use serde::Serialize;

/// Primary key column of the users table. Not a configuration field.
pub const KEY_COLUMN: &str = "user_id";

/// A configuration field: name, semantic type and the value new records start with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaField {
    pub name: String,
    pub semantic_type: SemanticType,
    pub default_value: ConfigValue,
}

impl SchemaField {
    /// The field's type is taken from its default value.
    pub fn new(name: impl Into<String>, default_value: ConfigValue) -> Self {
        Self {
            name: name.into(),
            semantic_type: default_value.semantic_type(),
            default_value,
        }
    }
}

/// A live table column as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("'{0}' is not a valid column identifier")]
    InvalidName(String),
    #[error("field '{0}' is declared more than once")]
    Duplicate(String),
    #[error("{0}")]
    Mismatch(String),
}

/// Ordered, read-only declaration of the configuration fields.
///
/// Fields are append-only: removing or reordering an existing field needs a
/// table migration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRegistry {
    fields: Vec<SchemaField>,
}

impl SchemaRegistry {
    pub fn new(fields: Vec<SchemaField>) -> Result<Self, SchemaError> {
        for (idx, field) in fields.iter().enumerate() {
            if !is_plain_identifier(&field.name) || field.name == KEY_COLUMN {
                return Err(SchemaError::InvalidName(field.name.clone()));
            }
            if fields[..idx].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::Duplicate(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    /// The fields the bot ships with. New fields go at the end.
    pub fn standard() -> Self {
        Self {
            fields: vec![
                SchemaField::new("contract_type", ConfigValue::Text("option".into())),
                SchemaField::new("loop_count", ConfigValue::Integer(10_000)),
                SchemaField::new("max_qty", ConfigValue::Integer(4)),
                SchemaField::new("target_price_interval_add", ConfigValue::Float(0.01)),
                SchemaField::new("result_price_interval_start", ConfigValue::Float(-0.4)),
                SchemaField::new("result_price_interval_add", ConfigValue::Float(0.01)),
                SchemaField::new("result_price_interval_end", ConfigValue::Float(0.4)),
                SchemaField::new("strike_percentage", ConfigValue::Float(0.05)),
                SchemaField::new("zip_output", ConfigValue::Boolean(false)),
                SchemaField::new("option_data_source", ConfigValue::Text("dex".into())),
            ],
        }
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Checks a live column list (including the key column) against the registry:
    /// same names, same order, compatible types.
    pub fn verify_columns(&self, columns: &[ColumnInfo]) -> Result<(), SchemaError> {
        let (key, rest) = columns
            .split_first()
            .ok_or_else(|| SchemaError::Mismatch("users table has no columns".to_string()))?;
        if key.name != KEY_COLUMN {
            return Err(SchemaError::Mismatch(format!(
                "first column is '{}', expected '{}'",
                key.name, KEY_COLUMN
            )));
        }

        let live: Vec<&str> = rest.iter().map(|c| c.name.as_str()).collect();
        if live != self.names() {
            return Err(SchemaError::Mismatch(format!(
                "table columns [{}] do not match declared fields [{}]",
                live.join(", "),
                self.names().join(", ")
            )));
        }

        for (field, column) in self.fields.iter().zip(rest) {
            if !field.semantic_type.accepts_declared(&column.declared_type) {
                return Err(SchemaError::Mismatch(format!(
                    "column '{}' is declared as {} but the field is a {}",
                    column.name, column.declared_type, field.semantic_type
                )));
            }
        }
        Ok(())
    }

    /// Declared fields the live table does not have yet.
    ///
    /// The live columns must be a prefix of the registry; anything else is a
    /// mismatch that appending cannot fix.
    pub fn missing_fields(&self, columns: &[ColumnInfo]) -> Result<&[SchemaField], SchemaError> {
        let live: Vec<&str> = columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| *name != KEY_COLUMN)
            .collect();
        if live.len() > self.fields.len() || live[..] != self.names()[..live.len()] {
            return Err(SchemaError::Mismatch(format!(
                "table columns [{}] are not a prefix of the declared fields",
                live.join(", ")
            )));
        }
        Ok(&self.fields[live.len()..])
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Plain SQL identifier: lowercase ASCII letter or `_`, then lowercase letters, digits or `_`.
///
/// Postgres folds unquoted names to lowercase, so `Users` would be created as `users` and
/// then never found by name in `information_schema`.
pub fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(registry: &SchemaRegistry) -> Vec<ColumnInfo> {
        std::iter::once(ColumnInfo {
            name: KEY_COLUMN.to_string(),
            declared_type: "text".to_string(),
        })
        .chain(registry.fields().iter().map(|f| ColumnInfo {
            name: f.name.clone(),
            declared_type: f.semantic_type.sql_type().to_lowercase(),
        }))
        .collect()
    }

    #[test]
    fn standard_registry_is_valid() {
        let standard = SchemaRegistry::standard();
        assert_eq!(SchemaRegistry::new(standard.fields().to_vec()), Ok(standard.clone()));
        assert_eq!(standard.get("zip_output").map(|f| f.semantic_type), Some(SemanticType::Boolean));
    }

    #[test]
    fn rejects_bad_and_duplicate_names() {
        let bad = SchemaRegistry::new(vec![SchemaField::new("max qty", ConfigValue::Integer(1))]);
        assert_eq!(bad, Err(SchemaError::InvalidName("max qty".into())));

        let dup = SchemaRegistry::new(vec![
            SchemaField::new("a", ConfigValue::Integer(1)),
            SchemaField::new("a", ConfigValue::Integer(2)),
        ]);
        assert_eq!(dup, Err(SchemaError::Duplicate("a".into())));

        let key = SchemaRegistry::new(vec![SchemaField::new(KEY_COLUMN, ConfigValue::Integer(1))]);
        assert!(key.is_err());
    }

    #[test]
    fn identifiers_must_be_lowercase() {
        assert!(is_plain_identifier("users"));
        assert!(is_plain_identifier("_users_2"));
        assert!(!is_plain_identifier("Users"));
        assert!(!is_plain_identifier("maxQty"));
        assert!(!is_plain_identifier("2users"));
        assert!(!is_plain_identifier("users;drop"));
        assert!(!is_plain_identifier(""));

        let mixed = SchemaRegistry::new(vec![SchemaField::new("Max_Qty", ConfigValue::Integer(1))]);
        assert_eq!(mixed, Err(SchemaError::InvalidName("Max_Qty".into())));
    }

    #[test]
    fn verify_columns_checks_order_and_types() {
        let registry = SchemaRegistry::standard();
        let mut live = columns(&registry);
        assert!(registry.verify_columns(&live).is_ok());

        // "double precision" for a BIT(1) field
        live[9].declared_type = "double precision".into();
        assert!(registry.verify_columns(&live).is_err());

        let mut swapped = columns(&registry);
        swapped.swap(1, 2);
        assert!(registry.verify_columns(&swapped).is_err());
    }

    #[test]
    fn missing_fields_are_the_registry_suffix() {
        let registry = SchemaRegistry::standard();
        let live = columns(&registry);
        let missing = registry.missing_fields(&live[..4]).unwrap();
        assert_eq!(missing.len(), registry.fields().len() - 3);
        assert_eq!(missing[0].name, "target_price_interval_add");

        assert!(registry.missing_fields(&live).unwrap().is_empty());

        let mut out_of_order = live[..4].to_vec();
        out_of_order.swap(1, 2);
        assert!(registry.missing_fields(&out_of_order).is_err());
    }
}
