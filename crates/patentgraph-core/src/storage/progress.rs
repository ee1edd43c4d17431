//! Progress ledger: which natural keys have already been submitted

use std::collections::HashSet;
use std::path::Path;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::domain::ItemKind;
use crate::error::Result;

/// Ordered, duplicate-free set of keys with O(1) membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct KeySet {
    order: Vec<String>,
    index: HashSet<String>,
}

impl KeySet {
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains(key)
    }

    /// Returns false if the key was already present
    pub fn insert(&mut self, key: String) -> bool {
        if self.index.contains(&key) {
            return false;
        }
        self.index.insert(key.clone());
        self.order.push(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for KeySet {
    fn from(keys: Vec<String>) -> Self {
        let mut set = KeySet::default();
        for key in keys {
            set.insert(key);
        }
        set
    }
}

impl From<KeySet> for Vec<String> {
    fn from(set: KeySet) -> Self {
        set.order
    }
}

/// Persisted as `{session_id, processed_patents, processed_entities, last_update}`
///
/// Append-only: keys are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressLedger {
    pub session_id: String,
    pub processed_patents: KeySet,
    pub processed_entities: KeySet,
    /// ISO-8601 local timestamp of the last mark
    pub last_update: Option<String>,
}

impl ProgressLedger {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Read a ledger file, failing on missing or malformed content
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn keys(&self, kind: ItemKind) -> &KeySet {
        match kind {
            ItemKind::Patent => &self.processed_patents,
            ItemKind::Entity => &self.processed_entities,
        }
    }

    fn keys_mut(&mut self, kind: ItemKind) -> &mut KeySet {
        match kind {
            ItemKind::Patent => &mut self.processed_patents,
            ItemKind::Entity => &mut self.processed_entities,
        }
    }

    pub fn is_processed(&self, kind: ItemKind, key: &str) -> bool {
        self.keys(kind).contains(key)
    }

    pub fn processed_count(&self, kind: ItemKind) -> usize {
        self.keys(kind).len()
    }

    /// Add keys and stamp the update time; returns how many were new
    pub fn mark<I>(&mut self, kind: ItemKind, keys: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let set = self.keys_mut(kind);
        let added = keys.into_iter().filter(|key| set.insert(key.clone())).count();
        self.last_update = Some(Local::now().to_rfc3339());
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyset_dedups_and_keeps_order() {
        let mut set = KeySet::default();
        assert!(set.insert("b".to_string()));
        assert!(set.insert("a".to_string()));
        assert!(!set.insert("b".to_string()));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(set.contains("a"));
    }

    #[test]
    fn test_mark_counts_new_keys_and_stamps_time() {
        let mut ledger = ProgressLedger::new("s1");
        assert!(ledger.last_update.is_none());

        let added = ledger.mark(
            ItemKind::Patent,
            vec!["CN1".to_string(), "CN2".to_string(), "CN1".to_string()],
        );
        assert_eq!(added, 2);
        assert!(ledger.last_update.is_some());
        assert!(ledger.is_processed(ItemKind::Patent, "CN2"));
        assert!(!ledger.is_processed(ItemKind::Entity, "CN2"));
    }

    #[test]
    fn test_serialized_shape() {
        let mut ledger = ProgressLedger::new("20250101_120000");
        ledger.mark(ItemKind::Entity, vec!["氢能科技".to_string()]);

        let value = serde_json::to_value(&ledger).unwrap();
        assert_eq!(value["session_id"], "20250101_120000");
        assert_eq!(value["processed_patents"], serde_json::json!([]));
        assert_eq!(value["processed_entities"][0], "氢能科技");
        assert!(value["last_update"].is_string());
    }

    #[test]
    fn test_accepts_duplicate_keys_on_disk() {
        let json = r#"{"session_id":"s","processed_patents":["a","a","b"],"processed_entities":[],"last_update":"2025-01-01T12:00:00.123456"}"#;
        let ledger: ProgressLedger = serde_json::from_str(json).unwrap();
        assert_eq!(ledger.processed_count(ItemKind::Patent), 2);
    }

    #[test]
    fn test_missing_fields_default() {
        let ledger: ProgressLedger = serde_json::from_str(r#"{"session_id":"s"}"#).unwrap();
        assert_eq!(ledger.processed_count(ItemKind::Entity), 0);
        assert!(ledger.last_update.is_none());
    }
}
