//! Game-state storage seam.
//!
//! Effects never write a root directly. They open a [`StagedBatch`] over the roots
//! they touch, stage every change against private copies and commit once. Dropping a
//! batch without committing discards the copies.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::path::{self, Change, StatePath};
use crate::error::{ApplicationError, PathError};
use crate::ruleset::EffectOperation;

/// Named roots of structured game state (`character`, `gameState`, ...).
pub trait StateStore: Send + Sync {
    /// Root names, sorted.
    fn roots(&self) -> Vec<String>;

    fn has_root(&self, root: &str) -> bool {
        self.roots().iter().any(|r| r == root)
    }

    /// A copy of one root.
    fn read_root(&self, root: &str) -> Option<Value>;

    /// A copy of the value at `path`.
    fn get(&self, path: &StatePath) -> Option<Value> {
        self.read_root(path.root())
            .and_then(|root| path::get(&root, path.rest()).cloned())
    }

    /// Lock `roots` (in sorted order) for one batch of changes.
    ///
    /// Blocks while another batch holds any of them. A thread must not hold two
    /// batches over overlapping roots.
    fn begin(&self, roots: &[String]) -> Result<Box<dyn StagedBatch + '_>, ApplicationError>;
}

/// Changes staged against locked roots, applied all at once by [`StagedBatch::commit`].
pub trait StagedBatch {
    fn token(&self) -> Uuid;

    /// Roots this batch holds, sorted.
    fn roots(&self) -> Vec<String>;

    /// The staged copy of a locked root, including changes made so far.
    fn view(&self, root: &str) -> Option<&Value>;

    fn get(&self, path: &StatePath) -> Option<Value> {
        self.view(path.root())
            .and_then(|root| path::get(root, path.rest()).cloned())
    }

    fn staged_set(
        &mut self,
        path: &StatePath,
        operation: EffectOperation,
        value: &Value,
    ) -> Result<Change, ApplicationError>;

    /// Publish every staged root and release the locks.
    fn commit(self: Box<Self>);

    /// Release the locks without publishing anything.
    fn rollback(self: Box<Self>);
}

/// Process-local state with one mutex per root.
#[derive(Debug, Default)]
pub struct InMemoryState {
    roots: BTreeMap<String, Mutex<Value>>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty object roots with the given names.
    pub fn with_roots<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roots: names
                .into_iter()
                .map(|name| (name.into(), Mutex::new(Value::Object(Map::new()))))
                .collect(),
        }
    }

    /// One root per top-level key of a JSON object.
    pub fn from_json(value: Value) -> Result<Self, ApplicationError> {
        match value {
            Value::Object(map) => Ok(Self {
                roots: map.into_iter().map(|(k, v)| (k, Mutex::new(v))).collect(),
            }),
            other => Err(ApplicationError::Store(format!(
                "state must be a JSON object, got {}",
                path::type_name(&other)
            ))),
        }
    }

    /// Add or replace a root.
    pub fn insert_root(&mut self, name: impl Into<String>, value: Value) {
        self.roots.insert(name.into(), Mutex::new(value));
    }

    /// Copy of every root as one JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.roots
                .iter()
                .map(|(name, root)| (name.clone(), root.lock().clone()))
                .collect(),
        )
    }
}

impl StateStore for InMemoryState {
    fn roots(&self) -> Vec<String> {
        self.roots.keys().cloned().collect()
    }

    fn has_root(&self, root: &str) -> bool {
        self.roots.contains_key(root)
    }

    fn read_root(&self, root: &str) -> Option<Value> {
        self.roots.get(root).map(|value| value.lock().clone())
    }

    fn begin(&self, roots: &[String]) -> Result<Box<dyn StagedBatch + '_>, ApplicationError> {
        let wanted: BTreeSet<&str> = roots.iter().map(String::as_str).collect();

        if let Some(unknown) = wanted.iter().find(|r| !self.roots.contains_key(**r)) {
            return Err(ApplicationError::UnknownRoot(unknown.to_string()));
        }

        // BTreeSet iteration is sorted, so every batch locks in the same order.
        let mut guards = BTreeMap::new();
        let mut staged = BTreeMap::new();
        for name in wanted {
            if let Some((key, root)) = self.roots.get_key_value(name) {
                let guard = root.lock();
                staged.insert(key.clone(), guard.clone());
                guards.insert(key.clone(), guard);
            }
        }

        let token = Uuid::new_v4();
        debug!(%token, roots = ?guards.keys().collect::<Vec<_>>(), "Opened state batch");
        Ok(Box::new(InMemoryBatch {
            token,
            guards,
            staged,
        }))
    }
}

struct InMemoryBatch<'a> {
    token: Uuid,
    guards: BTreeMap<String, MutexGuard<'a, Value>>,
    staged: BTreeMap<String, Value>,
}

impl StagedBatch for InMemoryBatch<'_> {
    fn token(&self) -> Uuid {
        self.token
    }

    fn roots(&self) -> Vec<String> {
        self.guards.keys().cloned().collect()
    }

    fn view(&self, root: &str) -> Option<&Value> {
        self.staged.get(root)
    }

    fn staged_set(
        &mut self,
        path: &StatePath,
        operation: EffectOperation,
        value: &Value,
    ) -> Result<Change, ApplicationError> {
        let root = self
            .staged
            .get_mut(path.root())
            .ok_or_else(|| ApplicationError::UnknownRoot(path.root().to_string()))?;

        // Work on a scratch copy so a failed operation leaves the staged root intact.
        let mut scratch = root.clone();
        let change = path::apply(&mut scratch, path.rest(), operation, value).map_err(
            |source: PathError| ApplicationError::InvalidTarget {
                target: path.to_string(),
                source,
            },
        )?;
        *root = scratch;
        Ok(change)
    }

    fn commit(mut self: Box<Self>) {
        for (name, guard) in self.guards.iter_mut() {
            if let Some(value) = self.staged.remove(name) {
                **guard = value;
            }
        }
        debug!(token = %self.token, "Committed state batch");
    }

    fn rollback(self: Box<Self>) {
        debug!(token = %self.token, "Rolled back state batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn state() -> InMemoryState {
        InMemoryState::from_json(json!({
            "character": { "hp": 10, "race": "" },
            "gameState": { "turn": 1 }
        }))
        .unwrap()
    }

    fn path(p: &str) -> StatePath {
        StatePath::parse(p).unwrap()
    }

    #[test]
    fn test_roots_and_reads() {
        let store = state();
        assert_eq!(store.roots(), vec!["character", "gameState"]);
        assert_eq!(store.get(&path("character.hp")), Some(json!(10)));
        assert!(store.read_root("world").is_none());
    }

    #[test]
    fn test_commit_publishes() {
        let store = state();
        let mut batch = store.begin(&["character".to_string()]).unwrap();
        batch
            .staged_set(&path("character.hp"), EffectOperation::Add, &json!(-4))
            .unwrap();
        assert_eq!(batch.get(&path("character.hp")), Some(json!(6)));
        batch.commit();
        assert_eq!(store.get(&path("character.hp")), Some(json!(6)));
    }

    #[test]
    fn test_drop_discards() {
        let store = state();
        {
            let mut batch = store.begin(&["character".to_string()]).unwrap();
            batch
                .staged_set(&path("character.race"), EffectOperation::Set, &json!("elf"))
                .unwrap();
        }
        assert_eq!(store.get(&path("character.race")), Some(json!("")));
    }

    #[test]
    fn test_unknown_root() {
        let store = state();
        let err = store.begin(&["world".to_string()]).err().unwrap();
        assert_eq!(err, ApplicationError::UnknownRoot("world".into()));
    }

    #[test]
    fn test_failed_operation_keeps_staged_copy() {
        let store = state();
        let mut batch = store.begin(&["character".to_string()]).unwrap();
        batch
            .staged_set(&path("character.hp"), EffectOperation::Set, &json!(3))
            .unwrap();
        assert!(batch
            .staged_set(&path("character.race"), EffectOperation::Add, &json!(1))
            .is_err());
        assert_eq!(batch.get(&path("character.hp")), Some(json!(3)));
    }

    #[test]
    fn test_overlapping_batches_serialize() {
        let store = Arc::new(state());
        let roots = vec!["character".to_string(), "gameState".to_string()];

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let roots = roots.clone();
                thread::spawn(move || {
                    let mut batch = store.begin(&roots).unwrap();
                    let hp = batch.get(&StatePath::parse("character.hp").unwrap()).unwrap();
                    thread::sleep(Duration::from_millis(2));
                    batch
                        .staged_set(
                            &StatePath::parse("character.hp").unwrap(),
                            EffectOperation::Set,
                            &json!(hp.as_i64().unwrap() + 1),
                        )
                        .unwrap();
                    batch.commit();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get(&path("character.hp")), Some(json!(18)));
    }

    #[test]
    fn test_to_json_round_trip() {
        let store = state();
        let copy = InMemoryState::from_json(store.to_json()).unwrap();
        assert_eq!(copy.to_json(), store.to_json());
        assert!(InMemoryState::from_json(json!([1])).is_err());
    }
}
