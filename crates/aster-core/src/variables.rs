//! Shared variable store for cross-kernel data exchange.
//!
//! One store exists per notebook. Every kernel in the notebook receives it
//! through its execution context, and every mutation is published on a
//! broadcast channel so front-ends can follow variable changes.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity for the change channel.
/// Slow subscribers lose the oldest changes rather than blocking writers.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A named value together with the kernel that published it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Current value.
    pub value: serde_json::Value,
    /// Language id of the kernel that published it, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// A change to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariableChange {
    /// A variable was created or overwritten.
    Set {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },
    /// A variable was removed.
    Removed { name: String },
    /// The whole store was cleared (kernel restart).
    Cleared,
}

/// Thread-safe named-value bag.
///
/// Callers never lock; all synchronization is internal.
pub struct VariableStore {
    values: RwLock<FxHashMap<String, Variable>>,
    tx: broadcast::Sender<VariableChange>,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("len", &self.len())
            .finish()
    }
}

impl VariableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(FxHashMap::default()),
            tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, FxHashMap<String, Variable>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FxHashMap<String, Variable>> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: VariableChange) {
        // No subscribers is fine.
        let _ = self.tx.send(change);
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<VariableChange> {
        self.tx.subscribe()
    }

    /// Set a variable without an owning kernel.
    pub fn set(&self, name: impl Into<String>, value: serde_json::Value) {
        self.publish(None, name, value);
    }

    /// Set a variable on behalf of a kernel.
    pub fn set_from(
        &self,
        owner: impl Into<String>,
        name: impl Into<String>,
        value: serde_json::Value,
    ) {
        self.publish(Some(owner.into()), name, value);
    }

    fn publish(&self, owner: Option<String>, name: impl Into<String>, value: serde_json::Value) {
        let name = name.into();
        self.write().insert(
            name.clone(),
            Variable {
                name: name.clone(),
                value,
                owner: owner.clone(),
            },
        );
        self.notify(VariableChange::Set { name, owner });
    }

    /// Get a variable's value.
    pub fn get(&self, name: &str) -> Option<serde_json::Value> {
        self.read().get(name).map(|v| v.value.clone())
    }

    /// Get a variable with its metadata.
    pub fn get_variable(&self, name: &str) -> Option<Variable> {
        self.read().get(name).cloned()
    }

    /// Check whether a variable exists.
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Remove a variable, returning its value.
    pub fn remove(&self, name: &str) -> Option<serde_json::Value> {
        let removed = self.write().remove(name);
        if removed.is_some() {
            self.notify(VariableChange::Removed {
                name: name.to_string(),
            });
        }
        removed.map(|v| v.value)
    }

    /// Variable names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All variables, sorted by name.
    pub fn snapshot(&self) -> Vec<Variable> {
        let mut vars: Vec<Variable> = self.read().values().cloned().collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        vars
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every variable, regardless of owner.
    pub fn clear(&self) {
        self.write().clear();
        self.notify(VariableChange::Cleared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_set_get_remove() {
        let store = VariableStore::new();
        store.set("x", json!(1));
        assert_eq!(store.get("x"), Some(json!(1)));
        assert!(store.contains("x"));
        assert_eq!(store.remove("x"), Some(json!(1)));
        assert!(store.get("x").is_none());
        assert!(store.remove("x").is_none());
    }

    #[test]
    fn test_owner_is_recorded() {
        let store = VariableStore::new();
        store.set_from("python", "df", json!([1, 2]));
        let var = store.get_variable("df").unwrap();
        assert_eq!(var.owner.as_deref(), Some("python"));
    }

    #[test]
    fn test_clear_removes_every_owner() {
        let store = VariableStore::new();
        store.set_from("python", "a", json!(1));
        store.set_from("sql", "b", json!(2));
        store.set("c", json!(3));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let store = VariableStore::new();
        store.set("b", json!(2));
        store.set("a", json!(1));
        let names: Vec<_> = store.snapshot().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_changes_are_broadcast() {
        let store = VariableStore::new();
        let mut rx = store.subscribe();
        store.set_from("calc", "x", json!(1));
        store.remove("x");
        store.clear();
        assert_eq!(
            rx.try_recv().unwrap(),
            VariableChange::Set {
                name: "x".to_string(),
                owner: Some("calc".to_string())
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            VariableChange::Removed {
                name: "x".to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), VariableChange::Cleared);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(VariableStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        store.set(format!("v{i}_{j}"), json!(j));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 800);
    }
}
