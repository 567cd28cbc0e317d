//! Configuration Manager: viewing a user's configuration and applying free-text changes.

use crate::app::persistence_gateway::{PersistenceError, SharedGateway};
use crate::domain::schema::{CoercionError, ConfigValue, RawValue};
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A whitelisted user has no configuration record.
    #[error("configuration record missing for whitelisted user {0}")]
    Integrity(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ConfigError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConfigError::Persistence(e) if e.is_fatal())
    }
}

/// Why one `field=value` change was not applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChangeError {
    #[error("expected field=value")]
    Malformed,
    #[error("{0} does not match any available config settings in database.")]
    UnknownField(String),
    #[error(transparent)]
    Type(#[from] CoercionError),
    #[error("{0}")]
    Persistence(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    pub field: String,
    pub value: ConfigValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedChange {
    /// The change exactly as the caller wrote it.
    pub change: String,
    pub error: ChangeError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeReport {
    pub applied: Vec<AppliedChange>,
    pub failed: Vec<FailedChange>,
}

#[derive(Clone)]
pub struct ConfigurationManager {
    gateway: SharedGateway,
}

impl ConfigurationManager {
    pub fn new(gateway: SharedGateway) -> Self {
        Self { gateway }
    }

    /// The user's fields in registry order.
    pub async fn view(&self, user_id: &str) -> Result<Vec<(String, ConfigValue)>, ConfigError> {
        let record = self.gateway.lock().await.read_config(user_id).await;
        match record {
            Ok(record) => Ok(record.fields().to_vec()),
            Err(PersistenceError::UnknownUser(_)) => {
                error!(user_id, "whitelisted user has no configuration record");
                Err(ConfigError::Integrity(user_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies each change independently and reports what succeeded and what did not.
    ///
    /// Only a fatal persistence error aborts the batch.
    pub async fn apply_changes(
        &self,
        user_id: &str,
        changes: &[String],
    ) -> Result<ChangeReport, ConfigError> {
        let mut gateway = self.gateway.lock().await;
        let current = match gateway.read_config(user_id).await {
            Ok(record) => record,
            Err(PersistenceError::UnknownUser(_)) => {
                error!(user_id, "whitelisted user has no configuration record");
                return Err(ConfigError::Integrity(user_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut report = ChangeReport::default();
        for change in changes {
            let Some((field, raw)) = change.split_once('=') else {
                info!(user_id, change = %change, "rejected malformed change");
                report.failed.push(FailedChange {
                    change: change.clone(),
                    error: ChangeError::Malformed,
                });
                continue;
            };
            let raw = RawValue::parse(raw);

            let Some(target) = current.get(field).map(ConfigValue::semantic_type) else {
                info!(user_id, field, "rejected change to unknown field");
                report.failed.push(FailedChange {
                    change: change.clone(),
                    error: ChangeError::UnknownField(field.to_string()),
                });
                continue;
            };

            let value = match ConfigValue::coerce(raw, target) {
                Ok(value) => value,
                Err(e) => {
                    info!(user_id, field, error = %e, "rejected change with wrong type");
                    report.failed.push(FailedChange {
                        change: change.clone(),
                        error: e.into(),
                    });
                    continue;
                }
            };

            match gateway.write_field(user_id, field, value.clone()).await {
                Ok(_) => {
                    info!(user_id, field, value = %value, "config field updated");
                    report.applied.push(AppliedChange {
                        field: field.to_string(),
                        value,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(user_id, field, error = %e, "config field update failed");
                    report.failed.push(FailedChange {
                        change: change.clone(),
                        error: ChangeError::Persistence(e.to_string()),
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::persistence_gateway::{PersistenceGateway, RetryPolicy};
    use crate::domain::schema::{SchemaRegistry, SemanticType};
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    async fn manager_with_user(store: &MemoryStore, user_id: &str) -> ConfigurationManager {
        let gateway = PersistenceGateway::new(
            Box::new(store.clone()),
            Arc::new(SchemaRegistry::standard()),
            RetryPolicy {
                max_attempts: 2,
                delay: Duration::ZERO,
            },
        )
        .into_shared();
        gateway.lock().await.insert_user(user_id).await.unwrap();
        ConfigurationManager::new(gateway)
    }

    fn changes(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn mixed_batch_applies_what_it_can() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        let manager = manager_with_user(&store, "7").await;

        let report = manager
            .apply_changes("7", &changes(&["max_qty=7", "bogus=1", "loop_count=notanumber"]))
            .await
            .unwrap();

        assert_eq!(
            report.applied,
            vec![AppliedChange {
                field: "max_qty".into(),
                value: ConfigValue::Integer(7)
            }]
        );
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].error, ChangeError::UnknownField("bogus".into()));
        assert_eq!(
            report.failed[1].error,
            ChangeError::Type(CoercionError {
                expected: SemanticType::Integer,
                raw: "notanumber".into()
            })
        );

        let view = manager.view("7").await.unwrap();
        let get = |name: &str| view.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone());
        assert_eq!(get("max_qty"), Some(ConfigValue::Integer(7)));
        assert_eq!(get("loop_count"), Some(ConfigValue::Integer(10000)));
    }

    #[tokio::test]
    async fn changes_without_equals_sign_are_malformed() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        let manager = manager_with_user(&store, "7").await;

        let report = manager.apply_changes("7", &changes(&["max_qty"])).await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.failed[0].error, ChangeError::Malformed);
    }

    #[tokio::test]
    async fn flags_are_coerced_for_bit_and_text_fields() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        let manager = manager_with_user(&store, "7").await;

        let report = manager
            .apply_changes("7", &changes(&["zip_output=TRUE", "contract_type=false", "strike_percentage=1e-2"]))
            .await
            .unwrap();
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(report.applied.len(), 3);

        let view = manager.view("7").await.unwrap();
        assert!(view.contains(&("zip_output".into(), ConfigValue::Boolean(true))));
        assert!(view.contains(&("contract_type".into(), ConfigValue::Text("False".into()))));
        assert!(view.contains(&("strike_percentage".into(), ConfigValue::Float(0.01))));
    }

    #[tokio::test]
    async fn missing_record_is_an_integrity_error() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        let manager = manager_with_user(&store, "7").await;

        let err = manager.view("8").await.unwrap_err();
        assert!(matches!(err, ConfigError::Integrity(id) if id == "8"));
        let err = manager.apply_changes("8", &changes(&["max_qty=1"])).await.unwrap_err();
        assert!(matches!(err, ConfigError::Integrity(_)));
    }

    #[tokio::test]
    async fn exhausted_retries_abort_the_batch() {
        let store = MemoryStore::with_table(&SchemaRegistry::standard());
        let manager = manager_with_user(&store, "7").await;

        store.drop_connections();
        store.refuse_connections(2);
        let err = manager.apply_changes("7", &changes(&["max_qty=1"])).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
