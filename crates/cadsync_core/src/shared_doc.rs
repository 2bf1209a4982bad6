//! Shared CAD document: a typed facade over the replicated containers.
//!
//! This module provides [`CadDoc`], which wraps a yrs [`Doc`] holding one
//! collaboratively edited CAD project. The document layout:
//!
//! ```text
//! yrs::Doc
//! ├── Y.Text "source"    raw source form, kept for diagnostics
//! ├── Y.Array "objects"  one Y.Map per CAD object
//! ├── Y.Map  "options"   document-level settings
//! ├── Y.Map  "metadata"  document-level bookkeeping
//! └── Y.Map  "state"     lifecycle state (dirty flag, path)
//! ```
//!
//! All reads snapshot one committed transaction; a reader never observes a
//! half-applied mutation. Mutating methods open their own write transaction,
//! except the `*_range`/`merge_*` primitives which take a caller-supplied
//! [`TransactionMut`] so that a file import can rewrite several containers as
//! one atomic unit.

use indexmap::IndexMap;
use serde_json::Value;
use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayRef, Doc, GetString, Map, MapRef, Out, ReadTxn, StateVector, Text, TextRef,
    Transact, TransactionMut, Update,
};

use crate::error::{Result, SyncError};
use crate::types::{any_kind, any_to_value, value_to_any, CadObject, DocContent};

/// Name of the Y.Text holding the raw source form of the document.
const SOURCE_TEXT_NAME: &str = "source";

/// Name of the Y.Array holding one map per CAD object.
const OBJECTS_ARRAY_NAME: &str = "objects";

/// Name of the Y.Map holding document-level settings.
const OPTIONS_MAP_NAME: &str = "options";

/// Name of the Y.Map holding document-level bookkeeping.
const METADATA_MAP_NAME: &str = "metadata";

/// Name of the Y.Map holding document lifecycle state.
const STATE_MAP_NAME: &str = "state";

const DIRTY_KEY: &str = "dirty";
const PATH_KEY: &str = "path";

/// A replicated CAD document for one collaborative editing session.
///
/// The facade hides the raw yrs container API behind typed accessors: object
/// records go in and out as [`CadObject`], options and metadata as plain JSON
/// values. Holders of an `Arc<CadDoc>` share one replica; merging replicas is
/// done through [`encode_state_as_update`](CadDoc::encode_state_as_update) and
/// [`apply_update`](CadDoc::apply_update).
pub struct CadDoc {
    /// The underlying yrs document
    doc: Doc,

    /// References to the named containers (cached for efficiency)
    source: TextRef,
    objects: ArrayRef,
    options: MapRef,
    metadata: MapRef,
    state: MapRef,
}

impl CadDoc {
    /// Create a new empty document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let source = doc.get_or_insert_text(SOURCE_TEXT_NAME);
        let objects = doc.get_or_insert_array(OBJECTS_ARRAY_NAME);
        let options = doc.get_or_insert_map(OPTIONS_MAP_NAME);
        let metadata = doc.get_or_insert_map(METADATA_MAP_NAME);
        let state = doc.get_or_insert_map(STATE_MAP_NAME);

        Self {
            doc,
            source,
            objects,
            options,
            metadata,
            state,
        }
    }

    /// Get the underlying yrs document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Open a write transaction on the document.
    ///
    /// Every mutation made through one transaction becomes visible to
    /// observers as a single atomic unit when the transaction is dropped.
    pub fn transact_mut(&self) -> TransactionMut<'_> {
        self.doc.transact_mut()
    }

    pub(crate) fn source_ref(&self) -> &TextRef {
        &self.source
    }

    pub(crate) fn objects_ref(&self) -> &ArrayRef {
        &self.objects
    }

    pub(crate) fn options_ref(&self) -> &MapRef {
        &self.options
    }

    pub(crate) fn metadata_ref(&self) -> &MapRef {
        &self.metadata
    }

    pub(crate) fn state_ref(&self) -> &MapRef {
        &self.state
    }

    // ==================== Source Text ====================

    /// Get the raw source form of the document.
    pub fn get_source(&self) -> String {
        let txn = self.doc.transact();
        self.source.get_string(&txn)
    }

    /// Length of the raw source form.
    pub fn source_len(&self) -> u32 {
        let txn = self.doc.transact();
        self.source.len(&txn)
    }

    /// Set the raw source form, using minimal diff operations.
    ///
    /// Instead of delete-all + insert-all (which breaks merging of concurrent
    /// text edits), this calculates the minimal diff between current and new
    /// content and applies only the necessary insert/delete operations.
    pub fn set_source(&self, content: &str) {
        let current = self.get_source();
        if current == content {
            return;
        }

        let current_chars: Vec<char> = current.chars().collect();
        let new_chars: Vec<char> = content.chars().collect();

        // Find common prefix length
        let common_prefix = current_chars
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();

        // Find common suffix length (but don't overlap with prefix)
        let remaining_current = current_chars.len() - common_prefix;
        let remaining_new = new_chars.len() - common_prefix;
        let common_suffix = current_chars[common_prefix..]
            .iter()
            .rev()
            .zip(new_chars[common_prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .take(remaining_current.min(remaining_new))
            .count();

        let delete_end = current_chars.len() - common_suffix;
        let insert_end = new_chars.len() - common_suffix;

        let mut txn = self.doc.transact_mut();
        if delete_end > common_prefix {
            self.source.remove_range(
                &mut txn,
                common_prefix as u32,
                (delete_end - common_prefix) as u32,
            );
        }
        if insert_end > common_prefix {
            let chunk: String = new_chars[common_prefix..insert_end].iter().collect();
            self.source.insert(&mut txn, common_prefix as u32, &chunk);
        }
    }

    // ==================== Lifecycle State ====================

    /// Whether the document has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        let txn = self.doc.transact();
        match self.state.get(&txn, DIRTY_KEY) {
            Some(out) => matches!(out.to_json(&txn), Any::Bool(true)),
            None => false,
        }
    }

    /// Set the dirty flag.
    pub fn set_dirty(&self, dirty: bool) {
        let mut txn = self.doc.transact_mut();
        self.state.insert(&mut txn, DIRTY_KEY, dirty);
    }

    /// Path the document was loaded from, if recorded.
    pub fn path(&self) -> Option<String> {
        let txn = self.doc.transact();
        match self.state.get(&txn, PATH_KEY).map(|out| out.to_json(&txn)) {
            Some(Any::String(path)) => Some(path.to_string()),
            _ => None,
        }
    }

    /// Record the path the document was loaded from.
    pub fn set_path(&self, path: &str) {
        let mut txn = self.doc.transact_mut();
        self.state.insert(&mut txn, PATH_KEY, path);
    }

    // ==================== Object Operations ====================

    /// Number of records in the objects sequence.
    pub fn object_count(&self) -> u32 {
        let txn = self.doc.transact();
        self.objects.len(&txn)
    }

    /// Number of records in the objects sequence, read through `txn`.
    pub fn objects_len<T: ReadTxn>(&self, txn: &T) -> u32 {
        self.objects.len(txn)
    }

    /// Names of all objects, in sequence order.
    pub fn object_names(&self) -> Vec<String> {
        let txn = self.doc.transact();
        self.objects
            .iter(&txn)
            .filter_map(|out| match out.to_json(&txn) {
                Any::Map(fields) => match fields.get("name") {
                    Some(Any::String(name)) => Some(name.to_string()),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    /// Whether an object with the given name exists.
    pub fn object_exists(&self, name: &str) -> bool {
        let txn = self.doc.transact();
        self.index_of(&txn, name).is_some()
    }

    /// Get one object by name.
    ///
    /// Returns `None` when no object has that name, or when its record is
    /// malformed (a warning is logged for the latter).
    pub fn get_object_by_name(&self, name: &str) -> Option<CadObject> {
        let txn = self.doc.transact();
        let index = self.index_of(&txn, name)?;
        let out = self.objects.get(&txn, index)?;
        match CadObject::from_any(&out.to_json(&txn)) {
            Ok(object) => Some(object),
            Err(err) => {
                log::warn!("object '{}' has a malformed record: {}", name, err);
                None
            }
        }
    }

    /// Append one object to the sequence.
    ///
    /// Callers are responsible for keeping object names unique within the
    /// document.
    pub fn add_object(&self, object: &CadObject) {
        let mut txn = self.doc.transact_mut();
        self.objects.push_back(&mut txn, object.to_prelim());
    }

    /// Append several objects to the sequence, as one transaction.
    pub fn add_objects(&self, objects: &[CadObject]) {
        let mut txn = self.doc.transact_mut();
        for object in objects {
            self.objects.push_back(&mut txn, object.to_prelim());
        }
    }

    /// Remove one object by name. Returns whether anything was removed.
    pub fn remove_object_by_name(&self, name: &str) -> bool {
        let mut txn = self.doc.transact_mut();
        match self.index_of(&txn, name) {
            Some(index) => {
                self.objects.remove(&mut txn, index);
                true
            }
            None => false,
        }
    }

    /// Set one top-level field of the named object's record.
    ///
    /// The write lands inside the record's own sub-container, so other fields
    /// of the record, and concurrent edits to them, are left alone.
    pub fn update_object_by_name(&self, name: &str, key: &str, value: &Value) -> Result<()> {
        let mut txn = self.doc.transact_mut();
        let Some(index) = self.index_of(&txn, name) else {
            return Err(SyncError::Schema {
                container: OBJECTS_ARRAY_NAME.to_string(),
                expected: format!("an object named '{}'", name),
                found: "no such object".to_string(),
            });
        };

        match self.objects.get(&txn, index) {
            Some(Out::YMap(record)) => {
                record.insert(&mut txn, key, value_to_any(value));
                Ok(())
            }
            _ => Err(SyncError::Schema {
                container: OBJECTS_ARRAY_NAME.to_string(),
                expected: "an object record mapping".to_string(),
                found: "a non-mapping entry".to_string(),
            }),
        }
    }

    /// Snapshot the objects sequence as plain records.
    pub fn objects_to_value(&self) -> Result<Vec<CadObject>> {
        let txn = self.doc.transact();
        self.objects_in_txn(&txn)
    }

    fn objects_in_txn<T: ReadTxn>(&self, txn: &T) -> Result<Vec<CadObject>> {
        match self.objects.to_json(txn) {
            Any::Array(items) => items.iter().map(CadObject::from_any).collect(),
            other => Err(SyncError::Schema {
                container: OBJECTS_ARRAY_NAME.to_string(),
                expected: "a sequence".to_string(),
                found: any_kind(&other).to_string(),
            }),
        }
    }

    fn index_of<T: ReadTxn>(&self, txn: &T, name: &str) -> Option<u32> {
        for (index, out) in self.objects.iter(txn).enumerate() {
            if let Any::Map(fields) = out.to_json(txn) {
                if let Some(Any::String(candidate)) = fields.get("name") {
                    if candidate.as_ref() == name {
                        return Some(index as u32);
                    }
                }
            }
        }
        None
    }

    // ==================== Options & Metadata ====================

    /// Get one document-level option.
    pub fn get_option(&self, key: &str) -> Option<Value> {
        let txn = self.doc.transact();
        self.options
            .get(&txn, key)
            .map(|out| any_to_value(&out.to_json(&txn)))
    }

    /// Set one document-level option.
    pub fn set_option(&self, key: &str, value: &Value) {
        let mut txn = self.doc.transact_mut();
        self.options.insert(&mut txn, key, value_to_any(value));
    }

    /// Merge several options in one transaction; keys not present in
    /// `entries` keep their current value.
    pub fn set_options(&self, entries: &IndexMap<String, Value>) {
        let mut txn = self.doc.transact_mut();
        self.merge_options(&mut txn, entries);
    }

    /// Snapshot the options map as plain values.
    pub fn options_to_value(&self) -> IndexMap<String, Value> {
        let txn = self.doc.transact();
        Self::map_in_txn(&self.options, &txn)
    }

    /// Get one metadata entry.
    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        let txn = self.doc.transact();
        self.metadata
            .get(&txn, key)
            .map(|out| any_to_value(&out.to_json(&txn)))
    }

    /// Set one metadata entry.
    pub fn set_metadata(&self, key: &str, value: &Value) {
        let mut txn = self.doc.transact_mut();
        self.metadata.insert(&mut txn, key, value_to_any(value));
    }

    /// Remove one metadata entry, returning its previous value.
    pub fn remove_metadata(&self, key: &str) -> Option<Value> {
        let mut txn = self.doc.transact_mut();
        let previous = self.metadata.remove(&mut txn, key);
        previous.map(|out| any_to_value(&out.to_json(&txn)))
    }

    /// Snapshot the metadata map as plain values.
    pub fn metadata_to_value(&self) -> IndexMap<String, Value> {
        let txn = self.doc.transact();
        Self::map_in_txn(&self.metadata, &txn)
    }

    fn map_in_txn<T: ReadTxn>(map: &MapRef, txn: &T) -> IndexMap<String, Value> {
        map.iter(txn)
            .map(|(key, out)| (key.to_string(), any_to_value(&out.to_json(txn))))
            .collect()
    }

    // ==================== Snapshot ====================

    /// Snapshot objects, options and metadata under one read transaction.
    ///
    /// A concurrent import committing between reads can therefore never
    /// produce a torn snapshot.
    pub fn snapshot(&self) -> Result<DocContent> {
        let txn = self.doc.transact();
        Ok(DocContent {
            objects: self.objects_in_txn(&txn)?,
            options: Self::map_in_txn(&self.options, &txn),
            metadata: Self::map_in_txn(&self.metadata, &txn),
        })
    }

    // ==================== Transaction-scoped Primitives ====================

    /// Delete `count` records starting at `start` from the objects sequence.
    ///
    /// Fails with [`SyncError::Range`] without touching the sequence when the
    /// range exceeds its bounds.
    pub fn delete_objects_range(
        &self,
        txn: &mut TransactionMut<'_>,
        start: u32,
        count: u32,
    ) -> Result<()> {
        let len = self.objects.len(&*txn);
        if start > len || count > len - start {
            return Err(SyncError::Range { start, count, len });
        }
        if count > 0 {
            self.objects.remove_range(txn, start, count);
        }
        Ok(())
    }

    /// Insert records into the objects sequence at `index`, preserving their
    /// order. Each record becomes a fresh sub-container.
    ///
    /// Fails with [`SyncError::Range`] without touching the sequence when
    /// `index` is past the end.
    pub fn insert_objects_at(
        &self,
        txn: &mut TransactionMut<'_>,
        index: u32,
        objects: &[CadObject],
    ) -> Result<()> {
        let len = self.objects.len(&*txn);
        if index > len {
            return Err(SyncError::Range {
                start: index,
                count: objects.len() as u32,
                len,
            });
        }
        for (offset, object) in objects.iter().enumerate() {
            self.objects
                .insert(txn, index + offset as u32, object.to_prelim());
        }
        Ok(())
    }

    /// Merge entries into the options map: existing keys are overwritten,
    /// keys absent from `entries` are left untouched.
    pub fn merge_options(&self, txn: &mut TransactionMut<'_>, entries: &IndexMap<String, Value>) {
        for (key, value) in entries {
            self.options.insert(txn, key.as_str(), value_to_any(value));
        }
    }

    /// Merge entries into the metadata map, under the same rule as
    /// [`merge_options`](CadDoc::merge_options).
    pub fn merge_metadata(&self, txn: &mut TransactionMut<'_>, entries: &IndexMap<String, Value>) {
        for (key, value) in entries {
            self.metadata.insert(txn, key.as_str(), value_to_any(value));
        }
    }

    // ==================== Replica Plumbing ====================

    /// Encode the current state vector for a sync handshake.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full document state as an update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Apply an update from another replica.
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update).map_err(|err| SyncError::Update {
            reason: err.to_string(),
        })?;

        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded).map_err(|err| SyncError::Update {
            reason: err.to_string(),
        })
    }

    /// Subscribe to raw document updates, e.g. for broadcasting to peers.
    ///
    /// Returns a subscription that unsubscribes when dropped.
    pub fn observe_updates<F>(&self, callback: F) -> yrs::Subscription
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |_txn, event| {
                callback(&event.update);
            })
            .expect("failed to observe document updates")
    }
}

impl Default for CadDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CadDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CadDoc")
            .field("object_count", &self.object_count())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}
