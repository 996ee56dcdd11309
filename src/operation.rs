//! Operation model and name-based decoding for persisted operations.
//!
//! Operations are owned by producers; the queue only relies on the behavior
//! exposed by the [`Operation`] trait. Persisted operations are stored as JSON
//! and decoded back through an [`OperationRegistry`] keyed by operation name.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::{StoreError, StoreResult};

/// How an operation may be coalesced with other queued operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// Never grouped; always executed alone.
    #[default]
    None,
    /// Grouped by `create_comparison_key`.
    Create,
    /// Grouped by `modify_comparison_key`.
    Modify,
}

impl GroupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Create => "create",
            Self::Modify => "modify",
        }
    }
}

/// Runtime type access for trait objects.
///
/// Blanket-implemented for every `'static` type, so operation implementors
/// get it for free.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A discrete unit of work executed by an [`OperationExecutor`](crate::executor::OperationExecutor).
pub trait Operation: AsAny + fmt::Debug + Send + Sync {
    /// Unique ID, empty until the queue assigns one at enqueue time.
    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Operation type name. Resolves both the executor and the decoder.
    fn name(&self) -> &str;

    fn group_mode(&self) -> GroupMode {
        GroupMode::None
    }

    fn create_comparison_key(&self) -> String {
        String::new()
    }

    fn modify_comparison_key(&self) -> String {
        String::new()
    }

    /// Whether this operation may start a batch right now.
    fn can_start_execute(&self) -> bool {
        true
    }

    /// Remote record this operation applies to, checked against the
    /// visibility tracker before the operation may run.
    fn apply_to_record_id(&self) -> Option<&str> {
        None
    }

    /// Rewrite provisional IDs held by this operation (provisional → permanent).
    fn translate_ids(&mut self, _translations: &HashMap<String, String>) {}

    /// Serialize for the durable store.
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl<'a> dyn Operation + 'a {
    /// Comparison key for the given grouping mode.
    pub fn comparison_key(&self, mode: GroupMode) -> String {
        match mode {
            GroupMode::Create => self.create_comparison_key(),
            _ => self.modify_comparison_key(),
        }
    }

    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

type Decoder = Arc<dyn Fn(serde_json::Value) -> StoreResult<Box<dyn Operation>> + Send + Sync>;

/// Maps operation names to decoders used when loading persisted operations.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    decoders: HashMap<String, Decoder>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` as the concrete type for operations named `name`.
    pub fn register<T>(mut self, name: &str) -> Self
    where
        T: Operation + DeserializeOwned + 'static,
    {
        let decoder: Decoder = Arc::new(|value| {
            let op: T = serde_json::from_value(value)?;
            Ok(Box::new(op) as Box<dyn Operation>)
        });
        self.decoders.insert(name.to_string(), decoder);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Decode a persisted operation by name.
    pub fn decode(&self, name: &str, value: serde_json::Value) -> StoreResult<Box<dyn Operation>> {
        let decoder = self
            .decoders
            .get(name)
            .ok_or_else(|| StoreError::UnknownOperation(name.to_string()))?;
        decoder(value)
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("names", &self.names())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{registry, TestOperation};
    use super::*;

    #[test]
    fn test_comparison_key_follows_mode() {
        let mut op = TestOperation::new("update-user");
        op.create_key = "c".to_string();
        op.modify_key = "m".to_string();
        let op = op.boxed();

        assert_eq!(op.comparison_key(GroupMode::Create), "c");
        assert_eq!(op.comparison_key(GroupMode::Modify), "m");
    }

    #[test]
    fn test_registry_decodes_registered_name() {
        let op = TestOperation::grouped("create-user", GroupMode::Create, "k1");
        let value = op.to_json().unwrap();

        let decoded = registry().decode("create-user", value).unwrap();
        assert_eq!(decoded.name(), "create-user");
        assert_eq!(decoded.group_mode(), GroupMode::Create);
        assert!(decoded.is::<TestOperation>());
    }

    #[test]
    fn test_registry_rejects_unknown_name() {
        let err = registry()
            .decode("delete-everything", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownOperation(name) if name == "delete-everything"));
    }

    #[test]
    fn test_translate_ids_rewrites_record() {
        let mut op = TestOperation::new("update-user");
        op.record_id = Some("local-1".to_string());

        let translations = HashMap::from([("local-1".to_string(), "remote-9".to_string())]);
        op.translate_ids(&translations);

        assert_eq!(op.apply_to_record_id(), Some("remote-9"));
    }
}
