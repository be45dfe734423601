//! Write path / transaction coordinator.
//!
//! The coordinator is the sole mutator. Every mutation - single sets and
//! deletes, batches, heterogeneous transactions, prefix clears, the drop -
//! serializes through one writer mutex and commits through the keyspace's
//! atomic batch, so readers and crashes observe all of a transaction's
//! effects or none.
//!
//! Per transaction the coordinator:
//! 1. folds the listed operations so the last one per key wins,
//! 2. reads the current document for every affected key,
//! 3. diffs old vs new index entry sets,
//! 4. stages document mutations and index deltas into one batch,
//! 5. commits, then publishes one change event per affected key, in key
//!    order, before releasing the writer lock.

use crate::document::{self, DocEntry};
use crate::error::DbResult;
use crate::hub::{ChangeEvent, ChangeHub, ChangeKind};
use crate::index::index_entries;
use crate::keys;
use crate::keyspace::{Batch, Keyspace};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// One operation inside a transaction.
///
/// The wire shape is `{"type": "set", "key": …, "value": …}` or
/// `{"type": "delete", "key": …}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TxnOp {
    /// Replace-or-insert a document.
    Set {
        /// Document key.
        key: String,
        /// New document value.
        value: Value,
    },
    /// Remove a document; absent keys are a no-op.
    Delete {
        /// Document key.
        key: String,
    },
}

/// The single-writer transaction coordinator.
pub(crate) struct Coordinator {
    keyspace: Arc<Keyspace>,
    hub: Arc<ChangeHub>,
    geo_precision: usize,
    write_lock: Mutex<()>,
}

impl Coordinator {
    pub(crate) fn new(keyspace: Arc<Keyspace>, hub: Arc<ChangeHub>, geo_precision: usize) -> Self {
        Self {
            keyspace,
            hub,
            geo_precision,
            write_lock: Mutex::new(()),
        }
    }

    /// Applies a transaction atomically and publishes its change events.
    ///
    /// Returns the commit sequence.
    pub(crate) fn apply(&self, ops: &[TxnOp]) -> DbResult<u64> {
        let _guard = self.write_lock.lock();
        self.apply_locked(ops)
    }

    /// Atomically deletes every document whose key starts with `prefix`.
    ///
    /// Returns the number of documents deleted.
    pub(crate) fn clear_prefix(&self, prefix: &str) -> DbResult<usize> {
        let _guard = self.write_lock.lock();

        let ops: Vec<TxnOp> = self
            .keyspace
            .scan_prefix_keys(&keys::doc_prefix(prefix))
            .iter()
            .filter_map(|k| keys::user_key(k))
            .map(|key| TxnOp::Delete { key: key.to_string() })
            .collect();

        let count = ops.len();
        if count > 0 {
            self.apply_locked(&ops)?;
        }
        debug!(prefix, count, "cleared prefix");
        Ok(count)
    }

    /// Atomically clears the entire keyspace.
    ///
    /// Returns the prior document count (index entries are not counted).
    pub(crate) fn drop_database(&self) -> DbResult<usize> {
        let _guard = self.write_lock.lock();

        let doc_keys: Vec<String> = self
            .keyspace
            .scan_prefix_keys(keys::DOC_NS)
            .iter()
            .filter_map(|k| keys::user_key(k).map(str::to_string))
            .collect();

        let sequence = self.keyspace.clear()?;

        let events: Vec<ChangeEvent> = doc_keys
            .iter()
            .map(|key| ChangeEvent {
                sequence,
                key: key.clone(),
                kind: ChangeKind::Delete,
            })
            .collect();
        self.hub.publish(&events);

        debug!(count = doc_keys.len(), "dropped database");
        Ok(doc_keys.len())
    }

    /// Bulk-upserts a list of documents atomically.
    pub(crate) fn import(&self, items: &[DocEntry]) -> DbResult<u64> {
        let ops: Vec<TxnOp> = items
            .iter()
            .map(|item| TxnOp::Set {
                key: item.key.clone(),
                value: item.value.clone(),
            })
            .collect();
        self.apply(&ops)
    }

    /// Applies operations while the writer lock is already held.
    fn apply_locked(&self, ops: &[TxnOp]) -> DbResult<u64> {
        // Fold in listed order: the final state per key is the last
        // operation naming it. The fold also puts keys in sorted order,
        // which is the required publish order.
        let mut folded: BTreeMap<&str, Option<&Value>> = BTreeMap::new();
        for op in ops {
            match op {
                TxnOp::Set { key, value } => folded.insert(key.as_str(), Some(value)),
                TxnOp::Delete { key } => folded.insert(key.as_str(), None),
            };
        }

        let mut batch = Batch::new();
        let mut events = Vec::with_capacity(folded.len());

        for (key, final_state) in &folded {
            let store_key = keys::doc_key(key);

            let old_entries = match self.keyspace.get(&store_key) {
                Some(bytes) => {
                    let old_doc = document::decode(&bytes)?;
                    index_entries(key, &old_doc, self.geo_precision)
                }
                None => Default::default(),
            };

            let new_entries = match final_state {
                Some(value) => {
                    batch.put(store_key, document::encode(value)?);
                    index_entries(key, value, self.geo_precision)
                }
                None => {
                    batch.delete(store_key);
                    Default::default()
                }
            };

            for stale in old_entries.difference(&new_entries) {
                batch.delete(stale.clone());
            }
            for fresh in new_entries.difference(&old_entries) {
                batch.put(fresh.clone(), Vec::new());
            }

            events.push((
                (*key).to_string(),
                match final_state {
                    Some(_) => ChangeKind::Set,
                    None => ChangeKind::Delete,
                },
            ));
        }

        let sequence = self.keyspace.commit(batch)?;

        let events: Vec<ChangeEvent> = events
            .into_iter()
            .map(|(key, kind)| ChangeEvent {
                sequence,
                key,
                kind,
            })
            .collect();
        self.hub.publish(&events);

        Ok(sequence)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("geo_precision", &self.geo_precision)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn setup() -> (Coordinator, Arc<Keyspace>, Arc<ChangeHub>) {
        let keyspace = Arc::new(Keyspace::in_memory(&Config::default()).unwrap());
        let hub = Arc::new(ChangeHub::new());
        let coordinator = Coordinator::new(Arc::clone(&keyspace), Arc::clone(&hub), 7);
        (coordinator, keyspace, hub)
    }

    fn set(key: &str, value: Value) -> TxnOp {
        TxnOp::Set {
            key: key.to_string(),
            value,
        }
    }

    fn delete(key: &str) -> TxnOp {
        TxnOp::Delete {
            key: key.to_string(),
        }
    }

    fn doc(ks: &Keyspace, key: &str) -> Option<Value> {
        ks.get(&keys::doc_key(key))
            .map(|b| document::decode(&b).unwrap())
    }

    #[test]
    fn txn_op_wire_shape() {
        let op: TxnOp =
            serde_json::from_value(json!({"type": "set", "key": "k", "value": {"a": 1}})).unwrap();
        assert!(matches!(op, TxnOp::Set { .. }));

        let op: TxnOp = serde_json::from_value(json!({"type": "delete", "key": "k"})).unwrap();
        assert!(matches!(op, TxnOp::Delete { .. }));

        let bad: Result<TxnOp, _> = serde_json::from_value(json!({"type": "merge", "key": "k"}));
        assert!(bad.is_err());
    }

    #[test]
    fn set_writes_document_and_index_entries() {
        let (coordinator, ks, _) = setup();
        coordinator
            .apply(&[set("u1", json!({"name": "alice"}))])
            .unwrap();

        assert_eq!(doc(&ks, "u1"), Some(json!({"name": "alice"})));
        assert_eq!(ks.count_prefix(keys::FIELD_NS), 1);
    }

    #[test]
    fn overwrite_removes_stale_index_entries() {
        let (coordinator, ks, _) = setup();
        coordinator
            .apply(&[set("u1", json!({"status": "active", "n": 1}))])
            .unwrap();
        coordinator
            .apply(&[set("u1", json!({"status": "done"}))])
            .unwrap();

        let entries: Vec<_> = ks
            .scan_prefix_keys(keys::FIELD_NS)
            .iter()
            .filter_map(|k| keys::parse_field_entry(k))
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "status");
    }

    #[test]
    fn delete_removes_document_and_entries() {
        let (coordinator, ks, _) = setup();
        coordinator
            .apply(&[set("u1", json!({"name": "alice", "loc": {"lat": 1.0, "lon": 2.0}}))])
            .unwrap();
        coordinator.apply(&[delete("u1")]).unwrap();

        assert_eq!(doc(&ks, "u1"), None);
        assert_eq!(ks.count_prefix(keys::FIELD_NS), 0);
        assert_eq!(ks.count_prefix(keys::GEO_NS), 0);
    }

    #[test]
    fn delete_of_absent_key_succeeds() {
        let (coordinator, _, _) = setup();
        coordinator.apply(&[delete("ghost")]).unwrap();
    }

    #[test]
    fn later_ops_on_same_key_win() {
        let (coordinator, ks, _) = setup();
        coordinator
            .apply(&[
                set("k", json!({"v": 1})),
                set("k", json!({"v": 2})),
                delete("other"),
                set("k", json!({"v": 3})),
            ])
            .unwrap();

        assert_eq!(doc(&ks, "k"), Some(json!({"v": 3})));
        // Only the final version's index entries exist.
        let entries: Vec<_> = ks
            .scan_prefix_keys(keys::FIELD_NS)
            .iter()
            .filter_map(|k| keys::parse_field_entry(k))
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn set_then_delete_in_one_txn_deletes() {
        let (coordinator, ks, _) = setup();
        coordinator.apply(&[set("k", json!(1))]).unwrap();
        coordinator
            .apply(&[set("k", json!({"a": 2})), delete("k")])
            .unwrap();
        assert_eq!(doc(&ks, "k"), None);
        assert_eq!(ks.count_prefix(keys::FIELD_NS), 0);
    }

    #[test]
    fn events_published_in_key_order_with_commit_sequence() {
        let (coordinator, _, hub) = setup();
        let rx = hub.subscribe_all();

        let sequence = coordinator
            .apply(&[
                set("zebra", json!(1)),
                set("apple", json!(2)),
                delete("mango"),
            ])
            .unwrap();

        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        let third = rx.recv().unwrap();

        assert_eq!(first.key, "apple");
        assert_eq!(first.kind, ChangeKind::Set);
        assert_eq!(second.key, "mango");
        assert_eq!(second.kind, ChangeKind::Delete);
        assert_eq!(third.key, "zebra");
        assert!([first.sequence, second.sequence, third.sequence]
            .iter()
            .all(|&s| s == sequence));
    }

    #[test]
    fn clear_prefix_deletes_exactly_the_prefix() {
        let (coordinator, ks, _) = setup();
        coordinator
            .apply(&[
                set("prefix/key1", json!(1)),
                set("prefix/key2", json!(2)),
                set("prefix/deep/key3", json!(3)),
                set("other_key", json!(4)),
            ])
            .unwrap();

        let count = coordinator.clear_prefix("prefix/").unwrap();
        assert_eq!(count, 3);
        assert_eq!(doc(&ks, "prefix/key1"), None);
        assert_eq!(doc(&ks, "prefix/deep/key3"), None);
        assert_eq!(doc(&ks, "other_key"), Some(json!(4)));
    }

    #[test]
    fn clear_prefix_on_empty_match_returns_zero() {
        let (coordinator, _, _) = setup();
        assert_eq!(coordinator.clear_prefix("nothing/").unwrap(), 0);
    }

    #[test]
    fn drop_database_counts_documents_only() {
        let (coordinator, ks, _) = setup();
        coordinator
            .apply(&[
                set("a", json!({"x": 1, "y": 2})),
                set("b", json!({"z": 3})),
            ])
            .unwrap();
        assert!(ks.count_prefix(keys::FIELD_NS) > 2, "indexes present");

        let count = coordinator.drop_database().unwrap();
        assert_eq!(count, 2);
        assert!(ks.is_empty());
    }

    #[test]
    fn import_is_a_bulk_upsert() {
        let (coordinator, ks, _) = setup();
        coordinator.apply(&[set("a", json!("old"))]).unwrap();

        coordinator
            .import(&[
                DocEntry {
                    key: "a".into(),
                    value: json!("new"),
                },
                DocEntry {
                    key: "b".into(),
                    value: json!({"n": 2}),
                },
            ])
            .unwrap();

        assert_eq!(doc(&ks, "a"), Some(json!("new")));
        assert_eq!(doc(&ks, "b"), Some(json!({"n": 2})));
    }
}
