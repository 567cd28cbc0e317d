use crate::domain::schema::registry::{SchemaError, SchemaRegistry};
use crate::domain::schema::value::ConfigValue;
use serde::Serialize;

/// One user's configuration: exactly the registry's fields, in registry order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserConfigRecord {
    user_id: String,
    fields: Vec<(String, ConfigValue)>,
}

impl UserConfigRecord {
    /// Builds a record, rejecting missing, extra, reordered or mistyped fields.
    pub fn new(
        user_id: impl Into<String>,
        fields: Vec<(String, ConfigValue)>,
        registry: &SchemaRegistry,
    ) -> Result<Self, SchemaError> {
        let user_id = user_id.into();
        if fields.len() != registry.fields().len() {
            return Err(SchemaError::Mismatch(format!(
                "record for {} has {} fields, {} are declared",
                user_id,
                fields.len(),
                registry.fields().len()
            )));
        }
        for ((name, value), declared) in fields.iter().zip(registry.fields()) {
            if *name != declared.name {
                return Err(SchemaError::Mismatch(format!(
                    "record field '{}' found where '{}' is declared",
                    name, declared.name
                )));
            }
            if value.semantic_type() != declared.semantic_type {
                return Err(SchemaError::Mismatch(format!(
                    "record field '{}' holds a {} value, declared {}",
                    name,
                    value.semantic_type(),
                    declared.semantic_type
                )));
            }
        }
        Ok(Self { user_id, fields })
    }

    /// A record holding every field's default.
    pub fn with_defaults(user_id: impl Into<String>, registry: &SchemaRegistry) -> Self {
        Self {
            user_id: user_id.into(),
            fields: registry
                .fields()
                .iter()
                .map(|f| (f.name.clone(), f.default_value.clone()))
                .collect(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn fields(&self) -> &[(String, ConfigValue)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}
