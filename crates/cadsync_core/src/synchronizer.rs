//! Bidirectional synchronization between a shared document and its file form.
//!
//! [`FileSynchronizer`] is the single component that turns replicated state
//! into project-file bytes and back. An import rewrites the document content
//! inside one write transaction: objects are replaced wholesale, options and
//! metadata are merged key by key. Observers therefore see the whole import
//! as one atomic change, and a failed decode leaves the document untouched
//! because no transaction is opened before the codec has accepted the bytes.

use std::sync::Arc;

use crate::codec::FileCodec;
use crate::error::Result;
use crate::shared_doc::CadDoc;

/// Synchronizes one [`CadDoc`] with its project-file representation.
///
/// The codec instance is owned exclusively; sharing one codec between
/// synchronizers for different documents would leak cached state across them.
pub struct FileSynchronizer {
    doc: Arc<CadDoc>,
    codec: Box<dyn FileCodec>,
}

impl FileSynchronizer {
    /// Create a synchronizer for `doc` using `codec` for the file form.
    pub fn new(doc: Arc<CadDoc>, codec: Box<dyn FileCodec>) -> Self {
        Self { doc, codec }
    }

    /// The document this synchronizer operates on.
    pub fn doc(&self) -> &Arc<CadDoc> {
        &self.doc
    }

    /// Encode the current document content into file bytes.
    ///
    /// Reads objects, options and metadata under one read transaction and
    /// hands them to the codec; the document itself is never mutated.
    pub fn export_to_file(&mut self) -> Result<Vec<u8>> {
        let content = self.doc.snapshot()?;
        self.codec.encode(&content)
    }

    /// Replace the document content with the decoded file content.
    ///
    /// Decoding happens before any transaction is opened, so malformed bytes
    /// fail with the document unchanged. The rewrite itself is one
    /// transaction:
    ///
    /// 1. delete every current object record,
    /// 2. insert the decoded records in file order, as fresh sub-containers,
    /// 3. merge decoded options into the options map,
    /// 4. merge decoded metadata into the metadata map.
    ///
    /// Observers see all four steps at once, as one event per affected
    /// container. Note that step 2 gives every record a new container
    /// identity, even for objects the file considers unchanged; anything
    /// tracking objects across imports must key on the record's `name`.
    pub fn import_from_file(&mut self, bytes: &[u8]) -> Result<()> {
        let content = self.codec.decode(bytes)?;

        {
            let mut txn = self.doc.transact_mut();
            let len = self.doc.objects_len(&txn);
            self.doc.delete_objects_range(&mut txn, 0, len)?;
            self.doc.insert_objects_at(&mut txn, 0, &content.objects)?;
            self.doc.merge_options(&mut txn, &content.options);
            self.doc.merge_metadata(&mut txn, &content.metadata);
        }

        log::debug!(
            "imported {} objects, {} options, {} metadata entries",
            content.objects.len(),
            content.options.len(),
            content.metadata.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for FileSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSynchronizer")
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JcadCodec;
    use crate::error::SyncError;
    use crate::observer::{ChangeHub, Channel};
    use crate::types::{CadObject, DocContent};
    use serde_json::json;
    use std::sync::Mutex;

    fn synchronizer() -> FileSynchronizer {
        FileSynchronizer::new(Arc::new(CadDoc::new()), Box::new(JcadCodec::new()))
    }

    fn file_bytes(content: &DocContent) -> Vec<u8> {
        serde_json::to_vec(content).unwrap()
    }

    fn sample_content() -> DocContent {
        DocContent {
            objects: vec![
                CadObject::new("b1", "Part::Box")
                    .with_parameter("Length", json!(10.0))
                    .with_parameter("Placement", json!({ "Position": [0, 0, 0] })),
                CadObject::new("c1", "Part::Cylinder").with_parameter("Radius", json!(2.5)),
            ],
            options: [("grid".to_string(), json!(true))].into_iter().collect(),
            metadata: [("version".to_string(), json!("1.0"))].into_iter().collect(),
        }
    }

    #[test]
    fn test_import_roundtrips_objects() {
        let mut sync = synchronizer();
        let content = sample_content();

        sync.import_from_file(&file_bytes(&content)).unwrap();

        let objects = sync.doc().objects_to_value().unwrap();
        assert_eq!(objects.len(), content.objects.len());
        for (imported, original) in objects.iter().zip(&content.objects) {
            assert_eq!(imported.name, original.name);
            assert_eq!(imported.shape, original.shape);
            assert_eq!(imported.visible, original.visible);
            assert_eq!(imported.parameters, original.parameters);
        }
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut sync = synchronizer();
        sync.doc().add_object(&CadObject::new("b1", "Part::Box"));
        sync.doc().set_option("grid", &json!(true));

        let bytes = sync.export_to_file().unwrap();

        let mut other = synchronizer();
        other.import_from_file(&bytes).unwrap();
        assert_eq!(other.doc().object_names(), vec!["b1"]);
        assert_eq!(other.doc().get_option("grid"), Some(json!(true)));
    }

    #[test]
    fn test_import_replaces_objects_wholesale() {
        let mut sync = synchronizer();
        sync.doc().add_objects(&[
            CadObject::new("old1", "Part::Box"),
            CadObject::new("old2", "Part::Box"),
            CadObject::new("old3", "Part::Box"),
        ]);

        let content = DocContent {
            objects: vec![CadObject::new("new1", "Part::Sphere")],
            ..DocContent::default()
        };
        sync.import_from_file(&file_bytes(&content)).unwrap();

        assert_eq!(sync.doc().object_names(), vec!["new1"]);
    }

    #[test]
    fn test_import_merges_options_and_metadata() {
        let mut sync = synchronizer();
        sync.doc().set_option("a", &json!(1));
        sync.doc().set_option("b", &json!(2));

        let content = DocContent {
            options: [("b".to_string(), json!(3)), ("c".to_string(), json!(4))]
                .into_iter()
                .collect(),
            ..DocContent::default()
        };
        sync.import_from_file(&file_bytes(&content)).unwrap();

        let options = sync.doc().options_to_value();
        assert_eq!(options.get("a"), Some(&json!(1)));
        assert_eq!(options.get("b"), Some(&json!(3)));
        assert_eq!(options.get("c"), Some(&json!(4)));
    }

    #[test]
    fn test_malformed_import_leaves_document_untouched() {
        let mut sync = synchronizer();
        sync.import_from_file(&file_bytes(&sample_content())).unwrap();
        sync.doc().set_source("solid bracket");
        let before = sync.doc().snapshot().unwrap();

        let err = sync.import_from_file(b"{ truncated").unwrap_err();
        assert!(matches!(err, SyncError::Codec { .. }));

        assert_eq!(sync.doc().snapshot().unwrap(), before);
        assert_eq!(sync.doc().get_source(), "solid bracket");
    }

    #[test]
    fn test_export_does_not_mutate_document() {
        let mut sync = synchronizer();
        sync.doc().add_object(&CadObject::new("b1", "Part::Box"));
        let before = sync.doc().snapshot().unwrap();

        sync.export_to_file().unwrap();
        assert_eq!(sync.doc().snapshot().unwrap(), before);
        assert!(!sync.doc().is_dirty());
    }

    #[test]
    fn test_export_reflects_current_state_not_codec_cache() {
        let mut sync = synchronizer();
        sync.import_from_file(&file_bytes(&sample_content())).unwrap();

        // mutate after the codec has cached the imported form
        sync.doc().remove_object_by_name("c1");
        sync.doc().set_option("grid", &json!(false));

        let bytes = sync.export_to_file().unwrap();
        let exported: DocContent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(exported.objects.len(), 1);
        assert_eq!(exported.objects[0].name, "b1");
        assert_eq!(exported.options.get("grid"), Some(&json!(false)));
    }

    #[test]
    fn test_import_notifies_each_channel_once() {
        let mut sync = synchronizer();
        let mut hub = ChangeHub::new(Arc::clone(sync.doc()));

        let channels = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&channels);
        hub.observe(move |change| sink.lock().unwrap().push(change.channel()));

        sync.import_from_file(&file_bytes(&sample_content())).unwrap();

        let seen = channels.lock().unwrap();
        let count = |channel| seen.iter().filter(|c| **c == channel).count();
        assert_eq!(count(Channel::Objects), 1);
        assert_eq!(count(Channel::Options), 1);
        assert_eq!(count(Channel::Meta), 1);
        assert_eq!(count(Channel::Source), 0);
        assert_eq!(count(Channel::State), 0);
    }
}
