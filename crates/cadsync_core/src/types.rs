//! Plain data types exchanged between the replicated document and the file codec.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use yrs::{Any, MapPrelim};

use crate::error::{Result, SyncError};

fn default_visible() -> bool {
    true
}

/// One CAD object, as stored in the objects sequence of a document.
///
/// `name` doubles as the object's stable identifier and must be unique within
/// a document. `parameters` is shape-kind dependent: a `Part::Box` carries
/// `Length`/`Width`/`Height` and a `Placement`, a `Part::Cylinder` carries
/// `Radius`/`Height`/`Angle`, and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadObject {
    /// Stable identifier, unique within the document.
    pub name: String,

    /// Shape kind, e.g. `"Part::Box"`.
    pub shape: String,

    /// Whether the object is rendered.
    #[serde(default = "default_visible")]
    pub visible: bool,

    /// Shape-kind dependent parameters.
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
}

impl CadObject {
    /// Create a new visible object with no parameters.
    pub fn new(name: impl Into<String>, shape: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            visible: true,
            parameters: IndexMap::new(),
        }
    }

    /// Add one parameter, builder style.
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Convert into a map prelim, so that inserting the record into the
    /// objects sequence creates a native sub-container for it.
    pub(crate) fn to_prelim(&self) -> MapPrelim {
        let parameters: HashMap<String, Any> = self
            .parameters
            .iter()
            .map(|(key, value)| (key.clone(), value_to_any(value)))
            .collect();

        [
            ("name".to_string(), Any::from(self.name.as_str())),
            ("shape".to_string(), Any::from(self.shape.as_str())),
            ("visible".to_string(), Any::Bool(self.visible)),
            ("parameters".to_string(), Any::Map(Arc::new(parameters))),
        ]
        .into_iter()
        .collect()
    }

    /// Parse a record out of a plain container snapshot.
    pub(crate) fn from_any(any: &Any) -> Result<Self> {
        let Any::Map(fields) = any else {
            return Err(record_error("an object record mapping", Some(any)));
        };

        let name = match fields.get("name") {
            Some(Any::String(name)) => name.to_string(),
            other => return Err(record_error("a string 'name' field", other)),
        };
        let shape = match fields.get("shape") {
            Some(Any::String(shape)) => shape.to_string(),
            other => return Err(record_error("a string 'shape' field", other)),
        };
        let visible = match fields.get("visible") {
            Some(Any::Bool(visible)) => *visible,
            None => true,
            other => return Err(record_error("a boolean 'visible' field", other)),
        };
        let parameters = match fields.get("parameters") {
            Some(Any::Map(parameters)) => parameters
                .iter()
                .map(|(key, value)| (key.clone(), any_to_value(value)))
                .collect(),
            None => IndexMap::new(),
            other => return Err(record_error("a 'parameters' mapping", other)),
        };

        Ok(Self {
            name,
            shape,
            visible,
            parameters,
        })
    }
}

fn record_error(expected: &str, found: Option<&Any>) -> SyncError {
    SyncError::Schema {
        container: "objects".to_string(),
        expected: expected.to_string(),
        found: found.map(any_kind).unwrap_or("nothing").to_string(),
    }
}

/// A plain snapshot of the document content, as exchanged with the file codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocContent {
    /// CAD objects in definition order.
    #[serde(default)]
    pub objects: Vec<CadObject>,

    /// Document-level settings.
    #[serde(default)]
    pub options: IndexMap<String, Value>,

    /// Document-level bookkeeping (provenance, versioning).
    #[serde(default)]
    pub metadata: IndexMap<String, Value>,
}

/// Convert a JSON value into a yrs payload.
pub(crate) fn value_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(flag) => Any::Bool(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Any::BigInt(int),
            None => Any::Number(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => Any::from(text.as_str()),
        Value::Array(items) => Any::Array(items.iter().map(value_to_any).collect()),
        Value::Object(fields) => Any::Map(Arc::new(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), value_to_any(value)))
                .collect(),
        )),
    }
}

/// Convert a yrs payload into a JSON value.
pub(crate) fn any_to_value(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(flag) => Value::Bool(*flag),
        Any::Number(number) => serde_json::Number::from_f64(*number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Any::BigInt(int) => Value::from(*int),
        Any::String(text) => Value::String(text.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_value).collect()),
        Any::Map(fields) => {
            let mut object = serde_json::Map::with_capacity(fields.len());
            for (key, value) in fields.iter() {
                object.insert(key.clone(), any_to_value(value));
            }
            Value::Object(object)
        }
    }
}

pub(crate) fn any_kind(any: &Any) -> &'static str {
    match any {
        Any::Null => "null",
        Any::Undefined => "undefined",
        Any::Bool(_) => "a boolean",
        Any::Number(_) | Any::BigInt(_) => "a number",
        Any::String(_) => "a string",
        Any::Buffer(_) => "a binary buffer",
        Any::Array(_) => "a sequence",
        Any::Map(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_any_roundtrip() {
        let value = json!({
            "Radius": 2.5,
            "Height": 10,
            "Placement": { "Position": [0, 0, 0], "Angle": 0.0 },
            "Label": "main",
            "Hidden": false,
        });

        assert_eq!(any_to_value(&value_to_any(&value)), value);
    }

    #[test]
    fn test_integers_survive_roundtrip() {
        let value = json!(42);
        let any = value_to_any(&value);
        assert_eq!(any, Any::BigInt(42));
        assert_eq!(any_to_value(&any), value);
    }

    #[test]
    fn test_object_serde_defaults() {
        let object: CadObject = serde_json::from_str(
            r#"{ "name": "box1", "shape": "Part::Box" }"#,
        )
        .unwrap();

        assert!(object.visible);
        assert!(object.parameters.is_empty());
    }

    #[test]
    fn test_from_any_rejects_non_mapping() {
        let err = CadObject::from_any(&Any::from("not a record")).unwrap_err();
        assert!(matches!(err, SyncError::Schema { .. }));
    }

    #[test]
    fn test_from_any_rejects_missing_name() {
        let fields: HashMap<String, Any> = [("shape".to_string(), Any::from("Part::Box"))]
            .into_iter()
            .collect();
        let err = CadObject::from_any(&Any::Map(Arc::new(fields))).unwrap_err();
        assert!(matches!(err, SyncError::Schema { .. }));
    }

    #[test]
    fn test_prelim_roundtrip_through_doc() {
        use yrs::{Array, Doc, Transact};
        use yrs::types::ToJson;

        let object = CadObject::new("cyl1", "Part::Cylinder")
            .with_parameter("Radius", json!(2.5))
            .with_parameter("Height", json!(10));

        let doc = Doc::new();
        let array = doc.get_or_insert_array("objects");
        {
            let mut txn = doc.transact_mut();
            array.push_back(&mut txn, object.to_prelim());
        }

        let txn = doc.transact();
        let parsed = CadObject::from_any(&array.get(&txn, 0).unwrap().to_json(&txn)).unwrap();
        assert_eq!(parsed.name, object.name);
        assert_eq!(parsed.shape, object.shape);
        assert_eq!(parsed.visible, object.visible);
        assert_eq!(parsed.parameters.get("Radius"), Some(&json!(2.5)));
        assert_eq!(parsed.parameters.get("Height"), Some(&json!(10)));
    }

    #[test]
    fn test_doc_content_decodes_with_missing_sections() {
        let content: DocContent = serde_json::from_str(r#"{ "objects": [] }"#).unwrap();
        assert!(content.objects.is_empty());
        assert!(content.options.is_empty());
        assert!(content.metadata.is_empty());
    }
}
