use mongodb::bson::{Bson, Document, doc};
use serde_json::{Map, Number, Value};

use crate::dao::{models::Fields, store::StorePath};

/// Filter selecting the document backing `path`.
pub fn doc_id(path: &StorePath) -> Document {
    doc! { "_id": path.to_string() }
}

/// Build the `$set` stage merging `fields` into a document.
pub fn set_fields(fields: &Fields) -> Document {
    let mut set = Document::new();
    for (key, value) in fields {
        set.insert(key.clone(), json_to_bson(value));
    }
    doc! { "$set": set }
}

/// Convert a stored document to JSON, dropping the `_id` key.
pub fn document_to_json(document: Document) -> Value {
    let body = document
        .into_iter()
        .filter(|(key, _)| key != "_id")
        .map(|(key, value)| (key, bson_to_json(value)))
        .collect::<Map<_, _>>();
    Value::Object(body)
}

fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => Bson::Int64(integer),
            None => Bson::Double(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => Bson::String(text.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut nested = Document::new();
            for (key, item) in map {
                nested.insert(key.clone(), json_to_bson(item));
            }
            Bson::Document(nested)
        }
    }
}

fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(flag) => Value::Bool(flag),
        Bson::Int32(integer) => Value::from(integer),
        Bson::Int64(integer) => Value::from(integer),
        Bson::Double(float) => Number::from_f64(float).map_or(Value::Null, Value::Number),
        Bson::String(text) => Value::String(text),
        Bson::DateTime(instant) => Value::from(instant.timestamp_millis()),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(nested) => Value::Object(
            nested
                .into_iter()
                .map(|(key, item)| (key, bson_to_json(item)))
                .collect(),
        ),
        other => Value::String(other.to_string()),
    }
}
