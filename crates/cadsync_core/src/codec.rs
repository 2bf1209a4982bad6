//! File codec: converts project-file bytes to and from plain document content.

use std::collections::HashSet;

use crate::error::{Result, SyncError};
use crate::types::DocContent;

/// Converts between project-file bytes and [`DocContent`].
///
/// Implementations may be stateful (the CAD libraries this trait fronts keep
/// the last loaded/saved form around), which is why both operations take
/// `&mut self`. A codec instance belongs to exactly one synchronizer.
pub trait FileCodec {
    /// Decode project-file bytes into plain document content.
    fn decode(&mut self, bytes: &[u8]) -> Result<DocContent>;

    /// Encode plain document content into project-file bytes.
    fn encode(&mut self, content: &DocContent) -> Result<Vec<u8>>;
}

/// Codec for the JSON project format.
///
/// Keeps the last byte form and content it has seen, mirroring the CAD file
/// library it stands in for. The cache is an implementation detail: callers
/// always supply the current logical content and must never assume the cache
/// is fresher.
#[derive(Debug, Default)]
pub struct JcadCodec {
    cache: Option<CodecCache>,
}

#[derive(Debug)]
struct CodecCache {
    bytes: Vec<u8>,
    content: DocContent,
}

impl JcadCodec {
    /// Create a codec with an empty cache.
    pub fn new() -> Self {
        Self { cache: None }
    }

    /// Last byte form seen by the codec, if any.
    pub fn cached_bytes(&self) -> Option<&[u8]> {
        self.cache.as_ref().map(|cache| cache.bytes.as_slice())
    }

    /// Last content seen by the codec, if any.
    pub fn cached_content(&self) -> Option<&DocContent> {
        self.cache.as_ref().map(|cache| &cache.content)
    }
}

fn check_unique_names(content: &DocContent) -> Result<()> {
    let mut seen = HashSet::new();
    for object in &content.objects {
        if !seen.insert(object.name.as_str()) {
            return Err(SyncError::Codec {
                reason: format!("duplicate object name '{}'", object.name),
            });
        }
    }
    Ok(())
}

impl FileCodec for JcadCodec {
    fn decode(&mut self, bytes: &[u8]) -> Result<DocContent> {
        let content: DocContent = serde_json::from_slice(bytes)?;
        check_unique_names(&content)?;
        self.cache = Some(CodecCache {
            bytes: bytes.to_vec(),
            content: content.clone(),
        });
        Ok(content)
    }

    fn encode(&mut self, content: &DocContent) -> Result<Vec<u8>> {
        check_unique_names(content)?;
        let bytes = serde_json::to_vec_pretty(content)?;
        self.cache = Some(CodecCache {
            bytes: bytes.clone(),
            content: content.clone(),
        });
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CadObject;
    use serde_json::json;

    fn sample_content() -> DocContent {
        DocContent {
            objects: vec![
                CadObject::new("b1", "Part::Box").with_parameter("Length", json!(10.0)),
                CadObject::new("c1", "Part::Cylinder").with_parameter("Radius", json!(2.5)),
            ],
            options: [("grid".to_string(), json!(true))].into_iter().collect(),
            metadata: [("version".to_string(), json!("1.0"))].into_iter().collect(),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = JcadCodec::new();
        let content = sample_content();

        let bytes = codec.encode(&content).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_malformed_bytes_fail() {
        let mut codec = JcadCodec::new();
        let err = codec.decode(b"not a project file").unwrap_err();
        assert!(matches!(err, SyncError::Codec { .. }));
        assert!(codec.cached_bytes().is_none());
    }

    #[test]
    fn test_duplicate_object_names_rejected() {
        let mut codec = JcadCodec::new();
        let mut content = sample_content();
        content.objects.push(CadObject::new("b1", "Part::Sphere"));

        let err = codec.encode(&content).unwrap_err();
        assert!(matches!(err, SyncError::Codec { .. }));

        let bytes = serde_json::to_vec(&content).unwrap();
        let err = codec.decode(&bytes).unwrap_err();
        assert!(matches!(err, SyncError::Codec { .. }));
    }

    #[test]
    fn test_missing_sections_default_empty() {
        let mut codec = JcadCodec::new();
        let decoded = codec.decode(br#"{ "objects": [] }"#).unwrap();
        assert!(decoded.options.is_empty());
        assert!(decoded.metadata.is_empty());
    }

    #[test]
    fn test_cache_tracks_last_operation() {
        let mut codec = JcadCodec::new();
        let content = sample_content();

        let bytes = codec.encode(&content).unwrap();
        assert_eq!(codec.cached_bytes(), Some(bytes.as_slice()));
        assert_eq!(codec.cached_content(), Some(&content));

        let trimmed = DocContent {
            objects: vec![CadObject::new("only", "Part::Box")],
            ..DocContent::default()
        };
        let trimmed_bytes = serde_json::to_vec(&trimmed).unwrap();
        codec.decode(&trimmed_bytes).unwrap();
        assert_eq!(codec.cached_content(), Some(&trimmed));
    }
}
