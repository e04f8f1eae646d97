//! Conversion of polymorphic property values into plain JSON trees.

use crate::event::{PropertyValue, Scalar};
use chrono::SecondsFormat;
use serde_json::{Map, Number, Value};

/// Attribute under which a structure's type tag is surfaced.
pub const TYPE_TAG_KEY: &str = "$type";

/// Convert a property value into a JSON value New Relic can index.
///
/// Total and side-effect free. Structures become objects, with their type
/// tag (if any) added under [`TYPE_TAG_KEY`].
pub fn simplify(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Scalar(scalar) => simplify_scalar(scalar),
        PropertyValue::Sequence(items) => Value::Array(items.iter().map(simplify).collect()),
        PropertyValue::Mapping(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(scalar_key(key), simplify(value));
            }
            Value::Object(map)
        }
        PropertyValue::Structure { type_tag, fields } => {
            let mut map = Map::with_capacity(fields.len() + 1);
            for (name, value) in fields {
                map.insert(name.clone(), simplify(value));
            }
            if let Some(tag) = type_tag {
                map.insert(TYPE_TAG_KEY.to_string(), Value::String(tag.clone()));
            }
            Value::Object(map)
        }
    }
}

pub fn simplify_scalar(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::I64(i) => Value::from(*i),
        Scalar::U64(u) => Value::from(*u),
        Scalar::F64(f) => match Number::from_f64(*f) {
            Some(n) => Value::Number(n),
            None => Value::String(f.to_string()),
        },
        Scalar::Str(s) => Value::String(s.clone()),
        Scalar::Char(c) => Value::String(c.to_string()),
        Scalar::DateTime(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        Scalar::Text(text) => Value::String(text.clone()),
    }
}

/// Stringify a mapping key without losing information for primitive keys.
pub fn scalar_key(key: &Scalar) -> String {
    match simplify_scalar(key) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;

    fn every_variant() -> Vec<PropertyValue> {
        let ts = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .unwrap();
        vec![
            Scalar::Null.into(),
            Scalar::Bool(true).into(),
            Scalar::I64(-7).into(),
            Scalar::U64(u64::MAX).into(),
            Scalar::F64(2.5).into(),
            Scalar::F64(f64::NAN).into(),
            Scalar::Str("s".into()).into(),
            Scalar::Char('c').into(),
            Scalar::DateTime(ts).into(),
            Scalar::Text("Point(1, 2)".into()).into(),
            PropertyValue::Sequence(vec![1i64.into(), "two".into()]),
            PropertyValue::Sequence(vec![]),
            PropertyValue::Mapping(vec![(Scalar::I64(1), "one".into())]),
            PropertyValue::Structure {
                type_tag: Some("Point".into()),
                fields: vec![("X".into(), 1i64.into()), ("Y".into(), 2i64.into())],
            },
            PropertyValue::Structure {
                type_tag: None,
                fields: vec![],
            },
        ]
    }

    #[test]
    fn every_variant_produces_a_value() {
        let expected = vec![
            json!(null),
            json!(true),
            json!(-7),
            json!(u64::MAX),
            json!(2.5),
            json!("NaN"),
            json!("s"),
            json!("c"),
            json!("2024-05-01T12:00:00+01:00"),
            json!("Point(1, 2)"),
            json!([1, "two"]),
            json!([]),
            json!({"1": "one"}),
            json!({"X": 1, "Y": 2, "$type": "Point"}),
            json!({}),
        ];
        let actual: Vec<Value> = every_variant().iter().map(simplify).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn nested_values_are_simplified_recursively() {
        let value = PropertyValue::Mapping(vec![(
            Scalar::Str("order".into()),
            PropertyValue::Structure {
                type_tag: Some("Order".into()),
                fields: vec![(
                    "Lines".into(),
                    PropertyValue::Sequence(vec![PropertyValue::mapping([("sku", "A-1")])]),
                )],
            },
        )]);

        assert_eq!(
            simplify(&value),
            json!({"order": {"Lines": [{"sku": "A-1"}], "$type": "Order"}})
        );
    }

    #[test]
    fn mapping_keys_are_stringified_losslessly() {
        let value = PropertyValue::Mapping(vec![
            (Scalar::Bool(false), 0i64.into()),
            (Scalar::F64(0.1), 1i64.into()),
            (Scalar::U64(18_446_744_073_709_551_615), 2i64.into()),
            (Scalar::Null, 3i64.into()),
        ]);

        let simplified = simplify(&value);
        let keys: Vec<&String> = simplified.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["false", "0.1", "18446744073709551615", "null"]);
    }

    #[test]
    fn simplify_is_idempotent() {
        for value in every_variant() {
            let once = simplify(&value);
            let twice = simplify(&PropertyValue::from(once.clone()));
            assert_eq!(once, twice, "not idempotent for {:?}", value);
        }
    }

    #[test]
    fn sequence_order_is_preserved() {
        let value: PropertyValue = vec![3i64, 1, 2].into();
        assert_eq!(simplify(&value), json!([3, 1, 2]));
    }
}
