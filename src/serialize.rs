//! JSON rendering of a [`LogPayload`] for the New Relic Log API.

use crate::payload::LogPayload;
use serde_json::{Map, Value};

/// Stipulated average size of one serialized log item.
const BYTES_PER_ITEM: usize = 500;

/// Which object keys are rewritten to camelCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCasing {
    /// Keys are sent exactly as built.
    #[default]
    Preserve,
    /// Only the fixed schema keys (`common`, `logs`, `timestamp`, `message`,
    /// `attributes`). User attribute keys are never renamed.
    CamelCaseSchema,
    /// Every object key, user supplied and nested ones included.
    CamelCaseAll,
}

impl KeyCasing {
    /// Casing selected by the `enforce_camel_case` switch.
    pub fn from_enforce_camel_case(enforce: bool) -> Self {
        if enforce {
            KeyCasing::CamelCaseSchema
        } else {
            KeyCasing::Preserve
        }
    }
}

/// Serialize `payload` as the one-element JSON array the Log API expects.
///
/// Null-valued attributes are omitted.
pub fn serialize(payload: &LogPayload, casing: KeyCasing) -> Result<Vec<u8>, serde_json::Error> {
    let mut root = serde_json::to_value(payload)?;
    strip_null_attributes(&mut root);

    match casing {
        // schema keys are already camelCase
        KeyCasing::Preserve | KeyCasing::CamelCaseSchema => {}
        KeyCasing::CamelCaseAll => root = camel_case_keys(root),
    }

    let mut buffer = Vec::with_capacity(payload.logs.len().max(1) * BYTES_PER_ITEM);
    serde_json::to_writer(&mut buffer, &[root])?;
    Ok(buffer)
}

fn strip_null_attributes(payload: &mut Value) {
    if let Some(Value::Object(attributes)) = payload.pointer_mut("/common/attributes") {
        attributes.retain(|_, v| !v.is_null());
    }
    if let Some(Value::Array(logs)) = payload.get_mut("logs") {
        for item in logs {
            if let Some(Value::Object(attributes)) = item.get_mut("attributes") {
                attributes.retain(|_, v| !v.is_null());
            }
        }
    }
}

fn camel_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(to_camel_case(&key), camel_case_keys(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_keys).collect()),
        other => other,
    }
}

/// Lowercase the leading run of capitals: `UserId` -> `userId`,
/// `URLValue` -> `urlValue`, `ID` -> `id`.
pub fn to_camel_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.first().map_or(true, |c| !c.is_uppercase()) {
        return key.to_string();
    }

    let mut out = String::with_capacity(key.len());
    let mut lowering = true;
    for (i, c) in chars.iter().enumerate() {
        if lowering {
            let next_is_lower = chars.get(i + 1).map_or(false, |n| !n.is_uppercase());
            if i == 1 && !c.is_uppercase() {
                lowering = false;
            } else if i > 0 && next_is_lower {
                // keep the capital that starts the next word
                lowering = false;
                if chars.get(i + 1).map_or(false, |n| n.is_whitespace()) {
                    out.extend(c.to_lowercase());
                    continue;
                }
            }
        }
        if lowering {
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::LogItem;
    use serde_json::json;

    fn payload() -> LogPayload {
        let mut payload = LogPayload::new("billing");
        payload.common.attributes.insert("region".into(), Value::Null);
        let mut attributes = Map::new();
        attributes.insert("level".into(), json!("Info"));
        attributes.insert("UserId".into(), json!(42));
        attributes.insert("Missing".into(), Value::Null);
        attributes.insert("Nested".into(), json!({"InnerKey": null}));
        payload.logs.push(LogItem {
            timestamp: 1_700_000_000_000,
            message: "paid".into(),
            attributes,
        });
        payload
    }

    fn parse(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn wraps_payload_in_array_and_drops_null_attributes() {
        let json = parse(&serialize(&payload(), KeyCasing::Preserve).unwrap());

        assert_eq!(
            json,
            json!([{
                "common": {"attributes": {"service": "billing"}},
                "logs": [{
                    "timestamp": 1_700_000_000_000i64,
                    "message": "paid",
                    "attributes": {"level": "Info", "UserId": 42, "Nested": {"InnerKey": null}}
                }]
            }])
        );
    }

    #[test]
    fn schema_casing_leaves_user_keys_alone() {
        let preserved = serialize(&payload(), KeyCasing::Preserve).unwrap();
        let schema = serialize(&payload(), KeyCasing::CamelCaseSchema).unwrap();
        assert_eq!(preserved, schema);
    }

    #[test]
    fn all_casing_renames_user_and_nested_keys() {
        let json = parse(&serialize(&payload(), KeyCasing::CamelCaseAll).unwrap());
        let attributes = &json[0]["logs"][0]["attributes"];
        assert_eq!(attributes["userId"], json!(42));
        assert_eq!(attributes["nested"], json!({"innerKey": null}));
        assert!(attributes.get("UserId").is_none());
    }

    #[test]
    fn empty_payload_is_still_an_array() {
        let json = parse(&serialize(&LogPayload::new("svc"), KeyCasing::Preserve).unwrap());
        assert_eq!(json, json!([{"common": {"attributes": {"service": "svc"}}, "logs": []}]));
    }

    #[test]
    fn camel_case_conversion() {
        assert_eq!(to_camel_case("UserId"), "userId");
        assert_eq!(to_camel_case("URLValue"), "urlValue");
        assert_eq!(to_camel_case("ID"), "id");
        assert_eq!(to_camel_case("already"), "already");
        assert_eq!(to_camel_case("X"), "x");
        assert_eq!(to_camel_case("Ab"), "ab");
        assert_eq!(to_camel_case("trace.id"), "trace.id");
        assert_eq!(to_camel_case(""), "");
    }
}
