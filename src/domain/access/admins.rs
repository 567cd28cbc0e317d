use anyhow::Context;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Deserialize)]
struct AdministratorsFile {
    administrators: Vec<JsonValue>,
}

/// Identities allowed to run privileged commands. Loaded once; immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdministratorSet {
    ids: BTreeSet<String>,
}

impl AdministratorSet {
    /// Reads `{"administrators": [...]}`. Ids may be strings or integers.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read administrators file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid administrators file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let file: AdministratorsFile = serde_json::from_str(raw)?;
        let mut ids = BTreeSet::new();
        for entry in file.administrators {
            let id = match entry {
                JsonValue::String(s) => s.trim().to_string(),
                JsonValue::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
                other => anyhow::bail!("administrator id must be a string or integer, got {}", other),
            };
            if id.is_empty() {
                anyhow::bail!("administrator id must not be empty");
            }
            ids.insert(id);
        }
        Ok(Self { ids })
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.ids.contains(user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
