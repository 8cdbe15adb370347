//! Generic document representation.

use crate::error::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// An ordered mapping from field name to JSON value.
///
/// Field order is preserved from the wire in both directions. No schema is
/// enforced.
pub type Document = serde_json::Map<String, Value>;

/// A document read from the cluster together with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Document ID.
    pub id: String,
    /// Concrete index the document lives in.
    pub index: String,
    /// Relevance score, when the query computes one.
    pub score: Option<f64>,
    /// Routing value.
    pub routing: Option<String>,
    /// Document source.
    pub document: Document,
}

impl Hit {
    /// Drop the metadata and keep the document.
    pub fn into_document(self) -> Document {
        self.document
    }

    /// Parse one entry of a `hits.hits` array.
    pub(crate) fn from_json(hit: &Value) -> std::result::Result<Self, String> {
        let id = hit["_id"]
            .as_str()
            .ok_or_else(|| "hit without _id".to_string())?
            .to_string();
        let index = hit["_index"].as_str().unwrap_or_default().to_string();

        let document = match hit.get("_source") {
            Some(Value::Object(source)) => source.clone(),
            Some(Value::Null) | None => Document::new(),
            Some(other) => return Err(format!("_source of [{}] is not an object: {}", id, other)),
        };

        Ok(Self {
            id,
            index,
            score: hit["_score"].as_f64(),
            routing: hit["_routing"].as_str().map(str::to_string),
            document,
        })
    }
}

/// Convert a serializable record into a document.
///
/// Records that do not serialize to a JSON object are rejected.
pub fn to_document<T: Serialize + ?Sized>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Serialization(serde::ser::Error::custom(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        )))),
    }
}

/// Convert a document into a deserializable record.
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Artist {
        name: String,
        url: String,
        picture: Option<String>,
    }

    #[test]
    fn test_hit_parsing_keeps_field_order() {
        let raw = json!({
            "_index": "radio",
            "_id": "7",
            "_score": 1.0,
            "_source": { "zeta": 1, "alpha": 2, "mid": { "b": 1, "a": 2 } }
        });

        let hit = Hit::from_json(&raw).unwrap();
        assert_eq!(hit.id, "7");
        assert_eq!(hit.index, "radio");
        assert_eq!(hit.score, Some(1.0));
        let keys: Vec<_> = hit.document.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_hit_without_source_is_empty() {
        let hit = Hit::from_json(&json!({ "_index": "i", "_id": "1" })).unwrap();
        assert!(hit.document.is_empty());
        assert!(Hit::from_json(&json!({ "_index": "i" })).is_err());
        assert!(Hit::from_json(&json!({ "_id": "1", "_source": [1] })).is_err());
    }

    #[test]
    fn test_record_conversion() {
        let artist = Artist {
            name: "Led Zeppelin".to_string(),
            url: "http://www.last.fm/music/Led+Zeppelin".to_string(),
            picture: None,
        };

        let document = to_document(&artist).unwrap();
        assert_eq!(document["name"], "Led Zeppelin");
        assert_eq!(from_document::<Artist>(document).unwrap(), artist);

        assert!(to_document(&42).is_err());
    }
}
