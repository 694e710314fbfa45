//! GraphQL plumbing: response envelopes, selection sets and the declarative
//! remote → local field mapping used by every response shape.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::BirdWeatherError;

/// One remote field and the local name it is stored under.
///
/// `remote` is a dotted path into the response object. A path segment may carry
/// GraphQL arguments (`counts(period: $period).detections`); the arguments are
/// emitted in the selection set and ignored when reading the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub remote: &'static str,
    pub local: &'static str,
}

impl FieldMapping {
    pub const fn new(remote: &'static str, local: &'static str) -> Self {
        Self { remote, local }
    }
}

/// Standard GraphQL response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub message: Option<String>,
}

impl Envelope {
    /// First error message, or the data payload.
    pub fn into_data(self) -> Result<Value, BirdWeatherError> {
        if let Some(first) = self.errors.into_iter().next() {
            let message = first.message.unwrap_or_else(|| "Unknown GraphQL error".to_string());
            return Err(BirdWeatherError::Remote(message));
        }
        Ok(self.data.unwrap_or(Value::Null))
    }
}

fn segment_key(segment: &str) -> &str {
    segment.split('(').next().unwrap_or(segment).trim()
}

#[derive(Debug)]
struct SelectionNode {
    segment: &'static str,
    children: Vec<SelectionNode>,
}

fn insert_path(nodes: &mut Vec<SelectionNode>, path: &[&'static str]) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    let idx = match nodes.iter().position(|n| segment_key(n.segment) == segment_key(head)) {
        Some(idx) => idx,
        None => {
            nodes.push(SelectionNode {
                segment: *head,
                children: Vec::new(),
            });
            nodes.len() - 1
        }
    };
    insert_path(&mut nodes[idx].children, rest);
}

fn render(nodes: &[SelectionNode], out: &mut Vec<String>) {
    for node in nodes {
        if node.children.is_empty() {
            out.push(node.segment.to_string());
        } else {
            let mut inner = Vec::new();
            render(&node.children, &mut inner);
            out.push(format!("{} {{ {} }}", node.segment, inner.join(" ")));
        }
    }
}

/// Build a selection set (without outer braces) from a mapping table.
pub fn selection(fields: &[FieldMapping]) -> String {
    let mut roots = Vec::new();
    for field in fields {
        let path: Vec<&'static str> = field.remote.split('.').collect();
        insert_path(&mut roots, &path);
    }
    let mut out = Vec::new();
    render(&roots, &mut out);
    out.join(" ")
}

/// Look up a dotted remote path in a response object. Missing keys and
/// explicit nulls both yield `Value::Null`.
static NULL: Value = Value::Null;

fn lookup<'v>(value: &'v Value, remote: &str) -> &'v Value {
    let mut current = value;
    for segment in remote.split('.') {
        match current.get(segment_key(segment)) {
            Some(next) => current = next,
            None => return &NULL,
        }
    }
    current
}

/// Rename a remote object into a local-keyed object using a mapping table.
pub fn remap(value: &Value, fields: &[FieldMapping]) -> Map<String, Value> {
    fields
        .iter()
        .map(|f| (f.local.to_string(), lookup(value, f.remote).clone()))
        .collect()
}

/// Remap and deserialize one response object into a local type.
pub fn decode<T: serde::de::DeserializeOwned>(
    value: &Value,
    fields: &[FieldMapping],
    what: &str,
) -> Result<T, BirdWeatherError> {
    serde_json::from_value(Value::Object(remap(value, fields)))
        .map_err(|e| BirdWeatherError::Decode(format!("{}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use serde_json::json;

    const NESTED: &[FieldMapping] = &[
        FieldMapping::new("score", "score"),
        FieldMapping::new("soundscape.url", "soundscape_url"),
        FieldMapping::new("species.id", "species_id"),
        FieldMapping::new("species.commonName", "common_name"),
        FieldMapping::new("counts(period: $period).detections", "detection_count"),
    ];

    #[test]
    fn test_selection_groups_nested_fields() {
        assert_eq!(
            selection(NESTED),
            "score soundscape { url } species { id commonName } counts(period: $period) { detections }"
        );
    }

    #[test]
    fn test_remap_follows_paths_and_strips_arguments() {
        let remote = json!({
            "score": 7.5,
            "soundscape": {"url": "https://example.com/a.flac"},
            "species": {"id": "42", "commonName": "Carolina Wren"},
            "counts": {"detections": 9}
        });

        let local = remap(&remote, NESTED);
        assert_eq!(local["score"], json!(7.5));
        assert_eq!(local["soundscape_url"], json!("https://example.com/a.flac"));
        assert_eq!(local["species_id"], json!("42"));
        assert_eq!(local["common_name"], json!("Carolina Wren"));
        assert_eq!(local["detection_count"], json!(9));
    }

    #[test]
    fn test_remap_missing_or_null_parent_is_null() {
        let remote = json!({"score": 1.0, "soundscape": null});
        let local = remap(&remote, NESTED);
        assert!(local["soundscape_url"].is_null());
        assert!(local["species_id"].is_null());
    }

    #[test]
    fn test_envelope_errors_take_precedence() {
        let envelope: Envelope = serde_json::from_value(json!({
            "data": null,
            "errors": [{"message": "Station not found"}, {"message": "second"}]
        }))
        .unwrap();

        match envelope.into_data() {
            Err(BirdWeatherError::Remote(msg)) => assert_eq!(msg, "Station not found"),
            other => panic!("expected remote error, got {:?}", other),
        }
    }
}
