//! Documents stored under revision control.

use crate::error::{Result, StoreError};
use crate::types::ObjectId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Pseudo-property used in diffs when a document moves to another container.
pub const CONTAINER_PROPERTY: &str = "$container";

/// A schemaless document: a typed id, an optional container and a JSON
/// object of properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_type: String,
    pub id: String,
    pub container: Option<ObjectId>,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            id: id.into(),
            container: None,
            fields: Map::new(),
        }
    }

    /// Build a document from any value that serializes to a JSON object.
    pub fn from_value(
        doc_type: impl Into<String>,
        id: impl Into<String>,
        value: &impl Serialize,
    ) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self {
                doc_type: doc_type.into(),
                id: id.into(),
                container: None,
                fields,
            }),
            other => Err(StoreError::bad_request(format!(
                "document body must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_container(mut self, container: ObjectId) -> Self {
        self.container = Some(container);
        self
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId::new(self.doc_type.clone(), self.id.clone())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Deserialize the properties into a typed value.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    /// Properties as a JSON object, used by query evaluation.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Per-property differences going from `self` to `newer`, ordered by
    /// property name. Empty when both carry the same content.
    pub fn diff(&self, newer: &Document) -> Vec<PropertyDiff> {
        let mut diffs = Vec::new();

        if self.container != newer.container {
            diffs.push(PropertyDiff {
                property: CONTAINER_PROPERTY.to_string(),
                old: self.container.as_ref().map(|c| Value::String(c.to_string())),
                new: newer.container.as_ref().map(|c| Value::String(c.to_string())),
            });
        }

        let names: BTreeSet<&String> = self.fields.keys().chain(newer.fields.keys()).collect();
        for name in names {
            let old = self.fields.get(name);
            let new = newer.fields.get(name);
            if old != new {
                diffs.push(PropertyDiff {
                    property: name.clone(),
                    old: old.cloned(),
                    new: new.cloned(),
                });
            }
        }

        diffs
    }
}

/// A single property change between two versions of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub property: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// A typed value that can be stored as a revisioned document.
pub trait Revisioned: Serialize + DeserializeOwned {
    /// Document type under which values are stored.
    const DOC_TYPE: &'static str;

    fn id(&self) -> String;

    fn container(&self) -> Option<ObjectId> {
        None
    }

    fn to_document(&self) -> Result<Document> {
        let mut doc = Document::from_value(Self::DOC_TYPE, self.id(), self)?;
        doc.container = self.container();
        Ok(doc)
    }

    fn from_document(doc: &Document) -> Result<Self> {
        doc.deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Concept {
        id: String,
        term: String,
        active: bool,
    }

    impl Revisioned for Concept {
        const DOC_TYPE: &'static str = "concept";

        fn id(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn test_typed_roundtrip() {
        let concept = Concept {
            id: "100".into(),
            term: "Heart".into(),
            active: true,
        };

        let doc = concept.to_document().unwrap();
        assert_eq!(doc.doc_type, "concept");
        assert_eq!(doc.id, "100");
        assert_eq!(doc.get("term"), Some(&json!("Heart")));

        let back = Concept::from_document(&doc).unwrap();
        assert_eq!(back, concept);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        let result = Document::from_value("concept", "1", &json!([1, 2, 3]));
        assert!(matches!(result, Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_diff_reports_changed_added_and_removed_properties() {
        let old = Document::new("concept", "1")
            .with_field("term", "Heart")
            .with_field("active", true);
        let new = Document::new("concept", "1")
            .with_field("term", "Cardiac structure")
            .with_field("module", "core");

        let diffs = old.diff(&new);
        assert_eq!(diffs.len(), 3);
        assert_eq!(diffs[0].property, "active");
        assert_eq!(diffs[0].new, None);
        assert_eq!(diffs[1].property, "module");
        assert_eq!(diffs[1].old, None);
        assert_eq!(diffs[2].property, "term");
        assert_eq!(diffs[2].old, Some(json!("Heart")));
        assert_eq!(diffs[2].new, Some(json!("Cardiac structure")));

        assert!(old.diff(&old.clone()).is_empty());
    }

    #[test]
    fn test_diff_tracks_container_moves() {
        let old = Document::new("description", "d1").with_container(ObjectId::new("concept", "1"));
        let new = Document::new("description", "d1").with_container(ObjectId::new("concept", "2"));

        let diffs = old.diff(&new);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].property, CONTAINER_PROPERTY);
        assert_eq!(diffs[0].new, Some(json!("concept:2")));
    }
}
