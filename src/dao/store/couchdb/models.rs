use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dao::store::StorePath;

pub const ADMIN_DOC_ID: &str = "admin";
pub const TEAM_PREFIX: &str = "team::";

/// CouchDB document id backing a store path.
pub fn doc_id(path: &StorePath) -> String {
    match path {
        StorePath::Admin => ADMIN_DOC_ID.to_string(),
        StorePath::Team(id) => format!("{TEAM_PREFIX}{id}"),
    }
}

/// Drop CouchDB bookkeeping fields so callers only see the stored body.
pub fn strip_metadata(mut document: Map<String, Value>) -> Value {
    document.retain(|key, _| !key.starts_with('_'));
    Value::Object(document)
}

/// Database info returned by `GET /{db}`.
#[derive(Debug, Deserialize)]
pub struct DatabaseInfo {
    pub update_seq: Value,
}

/// Body of a filtered `_changes` request.
#[derive(Debug, Serialize)]
pub struct ChangesFilter<'a> {
    pub doc_ids: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    #[serde(default)]
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Map<String, Value>>,
}

/// Render a sequence token the way the `since` query parameter expects it.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(token) => token.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn team_documents_are_prefixed() {
        assert_eq!(doc_id(&StorePath::Admin), "admin");
        assert_eq!(doc_id(&StorePath::team("T7")), "team::T7");
    }

    #[test]
    fn metadata_is_stripped() {
        let Value::Object(document) = json!({"_id": "team::T1", "_rev": "3-abc", "score": 5})
        else {
            unreachable!()
        };
        assert_eq!(strip_metadata(document), json!({"score": 5}));
    }

    #[test]
    fn numeric_and_opaque_sequences_render() {
        assert_eq!(seq_param(&json!(42)), "42");
        assert_eq!(seq_param(&json!("17-g1AAAA")), "17-g1AAAA");
    }
}
