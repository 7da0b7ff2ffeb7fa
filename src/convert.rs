//! Document-to-row conversion.
//!
//! Maps schemaless source documents onto the flat column layout of the
//! backup tables. The mapping is lossy by construction: arrays and nested
//! objects survive only as JSON text.

use crate::types::{SqlRow, SqlValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bson::{Bson, Document};

/// Convert one source document into a flat row.
///
/// `_id` becomes the `id` column as a string. The `__v` revision marker is
/// dropped. Every other field keeps its value under a snake_case column
/// name, with arrays and nested objects serialized to JSON text.
pub fn document_to_row(doc: &Document) -> SqlRow {
    let mut row = SqlRow::new();
    for (key, value) in doc {
        if key == "_id" {
            row.set("id", SqlValue::Text(id_string(value)));
        } else if key == "__v" {
            continue;
        } else {
            row.set(snake_case(key), convert_value(value));
        }
    }
    row
}

/// Rewrite a camelCase field name as a snake_case column name.
///
/// Every ASCII uppercase letter gets an underscore prefix and is lowered,
/// so `fullName` becomes `full_name` and a leading capital produces a
/// leading underscore.
pub fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn id_string(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn convert_value(value: &Bson) -> SqlValue {
    match value {
        Bson::Null | Bson::Undefined => SqlValue::Null,
        Bson::Boolean(b) => SqlValue::Bool(*b),
        Bson::Int32(i) => SqlValue::Int(i64::from(*i)),
        Bson::Int64(i) => SqlValue::Int(*i),
        Bson::Double(f) => SqlValue::Float(*f),
        Bson::String(s) => SqlValue::Text(s.clone()),
        Bson::DateTime(dt) => SqlValue::DateTime(dt.to_chrono()),
        // Identifier references point at other documents; store the id text.
        Bson::ObjectId(oid) => SqlValue::Text(oid.to_hex()),
        Bson::Binary(bin) => SqlValue::Bytes(bin.bytes.clone()),
        Bson::Array(_) | Bson::Document(_) => SqlValue::Text(json_text(value)),
        other => SqlValue::Text(json_text(other)),
    }
}

fn json_text(value: &Bson) -> String {
    bson_to_json(value).to_string()
}

/// JSON rendering used for serialized arrays and objects. Identifiers and
/// dates become strings, binary payloads become base64 text, and a NaN or
/// infinite float has no JSON form and becomes null.
fn bson_to_json(value: &Bson) -> serde_json::Value {
    match value {
        Bson::Null | Bson::Undefined => serde_json::Value::Null,
        Bson::Boolean(b) => serde_json::Value::Bool(*b),
        Bson::Int32(i) => serde_json::Value::from(*i),
        Bson::Int64(i) => serde_json::Value::from(*i),
        Bson::Double(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Bson::String(s) => serde_json::Value::String(s.clone()),
        Bson::ObjectId(oid) => serde_json::Value::String(oid.to_hex()),
        Bson::DateTime(dt) => serde_json::Value::String(
            dt.to_chrono()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        ),
        Bson::Binary(bin) => serde_json::Value::String(BASE64.encode(&bin.bytes)),
        Bson::Array(items) => serde_json::Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => serde_json::Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect(),
        ),
        other => other.clone().into_relaxed_extjson(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use bson::{doc, Binary};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_basic_document_conversion() {
        let created = Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 45).unwrap();
        let doc = doc! {
            "_id": "u1",
            "__v": 3,
            "fullName": "Ann",
            "createdAt": bson::DateTime::from_chrono(created),
            "tags": ["a", "b"],
        };

        let row = document_to_row(&doc);

        assert_eq!(row.id(), Some("u1"));
        assert_eq!(row.get("__v"), None);
        assert_eq!(row.get("_v"), None);
        assert_eq!(
            row.get("full_name"),
            Some(&SqlValue::Text("Ann".to_string()))
        );
        assert_eq!(row.get("created_at"), Some(&SqlValue::DateTime(created)));
        assert_eq!(
            row.get("tags"),
            Some(&SqlValue::Text(r#"["a","b"]"#.to_string()))
        );
        assert_eq!(
            row.column_names(),
            vec!["id", "full_name", "created_at", "tags"]
        );
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("fullName"), "full_name");
        assert_eq!(snake_case("profileImageData"), "profile_image_data");
        assert_eq!(snake_case("already_snake"), "already_snake");
        assert_eq!(snake_case("email"), "email");
        assert_eq!(snake_case("ID"), "_i_d");
    }

    #[test]
    fn test_object_id_becomes_hex_string() {
        let oid = ObjectId::new();
        let doc = doc! { "_id": oid, "teacherId": oid };

        let row = document_to_row(&doc);

        assert_eq!(row.id(), Some(oid.to_hex().as_str()));
        assert_eq!(
            row.get("teacher_id"),
            Some(&SqlValue::Text(oid.to_hex()))
        );
    }

    #[test]
    fn test_array_of_references_serializes_to_json() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let doc = doc! { "_id": "s1", "joinedPortals": [a, b] };

        let row = document_to_row(&doc);

        let expected = format!(r#"["{}","{}"]"#, a.to_hex(), b.to_hex());
        assert_eq!(row.get("joined_portals"), Some(&SqlValue::Text(expected)));
    }

    #[test]
    fn test_nested_document_serializes_to_json() {
        let doc = doc! {
            "_id": "q1",
            "questions": [{ "text": "2+2?", "marks": 5 }],
        };

        let row = document_to_row(&doc);

        assert_eq!(
            row.get("questions"),
            Some(&SqlValue::Text(
                r#"[{"text":"2+2?","marks":5}]"#.to_string()
            ))
        );
    }

    #[test]
    fn test_binary_passes_through() {
        let doc = doc! {
            "_id": "t1",
            "profileImageData": Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: vec![0xde, 0xad, 0xbe, 0xef],
            },
        };

        let row = document_to_row(&doc);

        assert_eq!(
            row.get("profile_image_data"),
            Some(&SqlValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]))
        );
    }

    #[test]
    fn test_scalars_and_null() {
        let doc = doc! {
            "_id": "p1",
            "attendance": 7,
            "progress": 99.5_f64,
            "acceptedTerms": true,
            "address": Bson::Null,
        };

        let row = document_to_row(&doc);

        assert_eq!(row.get("attendance"), Some(&SqlValue::Int(7)));
        assert_eq!(row.get("progress"), Some(&SqlValue::Float(99.5)));
        assert_eq!(row.get("accepted_terms"), Some(&SqlValue::Bool(true)));
        assert_eq!(row.get("address"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_json_text_edge_values() {
        let when = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let doc = doc! {
            "_id": "x1",
            "mixed": [f64::NAN, bson::DateTime::from_chrono(when)],
        };

        let row = document_to_row(&doc);

        assert_eq!(
            row.get("mixed"),
            Some(&SqlValue::Text(
                r#"[null,"2024-01-02T03:04:05.000Z"]"#.to_string()
            ))
        );
    }
}
