//! MessagePack codec for state and configuration payloads.
//!
//! Terraform moves every config/state argument as an opaque byte blob holding
//! a MessagePack-encoded value. The codec serializes a [`Value`] against a
//! [`Schema`]: traversal is schema-directed, union fields flatten their
//! alternatives into sibling entries, and fields the value does not carry
//! encode as nil.
//!
//! The unknown sentinel travels as MessagePack extension type 0 and is
//! treated as a leaf everywhere: an unknown (or null) value is passed through
//! unchanged without descending into the children its attribute type would
//! otherwise declare.
//!
//! For any value `v` that conforms to a schema `s` and contains no unknowns,
//! `decode_with_schema(&encode_with_schema(&v, &s)?, &s)? == v`.

use std::collections::BTreeMap;

use crate::error::ProviderError;
use crate::schema::{flatten_fields, AttrType, Attribute, Fields, Schema};
use crate::value::Value;

/// The MessagePack extension type tag for the unknown sentinel.
pub(crate) const UNKNOWN_EXT_TYPE: i8 = 0;

/// Encode a value against a schema into its wire payload.
pub fn encode_with_schema(value: &Value, schema: &Schema) -> Result<Vec<u8>, ProviderError> {
    let shaped = shape_object(value, &schema.attributes);
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &to_msgpack(&shaped))
        .map_err(|e| ProviderError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decode a wire payload against a schema.
pub fn decode_with_schema(bytes: &[u8], schema: &Schema) -> Result<Value, ProviderError> {
    let mut reader = bytes;
    let raw = rmpv::decode::read_value(&mut reader)
        .map_err(|e| ProviderError::Codec(e.to_string()))?;
    let value = from_msgpack(raw)?;
    Ok(unshape_object(&value, &schema.attributes))
}

fn shape_object(value: &Value, fields: &Fields) -> Value {
    if value.is_null_or_unknown() {
        return value.clone();
    }
    let mut out = BTreeMap::new();
    flatten_fields(fields, false, &mut |name, attr, _| {
        let field_value = value.get(name).unwrap_or(&Value::Null);
        out.insert(name.to_string(), shape_attribute(field_value, attr));
    });
    Value::Object(out)
}

fn shape_attribute(value: &Value, attr: &Attribute) -> Value {
    if value.is_null_or_unknown() {
        return value.clone();
    }
    match &attr.attr_type {
        AttrType::String
        | AttrType::Number
        | AttrType::Bool
        | AttrType::Array(_)
        | AttrType::Custom(_) => value.clone(),
        AttrType::Any => Value::Array(vec![type_descriptor(value), value.clone()]),
        AttrType::List(fields) => match value {
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| shape_object(item, fields)).collect())
            }
            _ => value.clone(),
        },
        AttrType::Object(fields) => shape_object(value, fields),
    }
}

fn unshape_object(value: &Value, fields: &Fields) -> Value {
    if value.is_null_or_unknown() {
        return value.clone();
    }
    let mut out = BTreeMap::new();
    flatten_fields(fields, false, &mut |name, attr, _| {
        let field_value = value.get(name).unwrap_or(&Value::Null);
        out.insert(name.to_string(), unshape_attribute(field_value, attr));
    });
    Value::Object(out)
}

fn unshape_attribute(value: &Value, attr: &Attribute) -> Value {
    if value.is_null_or_unknown() {
        return value.clone();
    }
    match &attr.attr_type {
        AttrType::String
        | AttrType::Number
        | AttrType::Bool
        | AttrType::Array(_)
        | AttrType::Custom(_) => value.clone(),
        AttrType::Any => match value.as_array() {
            // The descriptor half is only needed by the host; drop it.
            Some([_descriptor, actual]) => actual.clone(),
            _ => value.clone(),
        },
        AttrType::List(fields) => match value {
            Value::Array(items) => Value::Array(
                items.iter().map(|item| unshape_object(item, fields)).collect(),
            ),
            _ => value.clone(),
        },
        AttrType::Object(fields) => unshape_object(value, fields),
    }
}

/// Structural type descriptor paired with dynamically-typed values.
fn type_descriptor(value: &Value) -> Value {
    match value {
        Value::Bool(_) => Value::from("bool"),
        Value::Number(_) => Value::from("number"),
        Value::String(_) => Value::from("string"),
        Value::Array(items) => Value::Array(vec![
            Value::from("list"),
            items
                .first()
                .map(type_descriptor)
                .unwrap_or_else(|| Value::from("dynamic")),
        ]),
        Value::Object(map) => Value::Array(vec![
            Value::from("object"),
            Value::Object(
                map.iter()
                    .map(|(name, field)| (name.clone(), type_descriptor(field)))
                    .collect(),
            ),
        ]),
        Value::Null | Value::Unknown(_) => Value::from("dynamic"),
    }
}

fn to_msgpack(value: &Value) -> rmpv::Value {
    match value {
        Value::Null => rmpv::Value::Nil,
        Value::Bool(b) => rmpv::Value::Boolean(*b),
        Value::Number(n) => {
            if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                rmpv::Value::Integer(rmpv::Integer::from(*n as i64))
            } else {
                rmpv::Value::F64(*n)
            }
        }
        Value::String(s) => rmpv::Value::String(s.as_str().into()),
        Value::Array(items) => rmpv::Value::Array(items.iter().map(to_msgpack).collect()),
        Value::Object(map) => rmpv::Value::Map(
            map.iter()
                .map(|(key, field)| (rmpv::Value::String(key.as_str().into()), to_msgpack(field)))
                .collect(),
        ),
        Value::Unknown(_) => rmpv::Value::Ext(UNKNOWN_EXT_TYPE, unknown_payload()),
    }
}

// The canonical ext payload: the msgpack encoding of an empty array.
fn unknown_payload() -> Vec<u8> {
    vec![0x90]
}

fn from_msgpack(value: rmpv::Value) -> Result<Value, ProviderError> {
    match value {
        rmpv::Value::Nil => Ok(Value::Null),
        rmpv::Value::Boolean(b) => Ok(Value::Bool(b)),
        rmpv::Value::Integer(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Number(i as f64))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::Number(u as f64))
            } else {
                Err(ProviderError::Codec(format!("unrepresentable integer: {}", n)))
            }
        }
        rmpv::Value::F32(f) => Ok(Value::Number(f as f64)),
        rmpv::Value::F64(f) => Ok(Value::Number(f)),
        rmpv::Value::String(s) => match s.into_str() {
            Some(s) => Ok(Value::String(s)),
            None => Err(ProviderError::Codec("string is not valid UTF-8".to_string())),
        },
        rmpv::Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(from_msgpack)
                .collect::<Result<_, _>>()?,
        )),
        rmpv::Value::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, field) in entries {
                let key = match key {
                    rmpv::Value::String(s) => s
                        .into_str()
                        .ok_or_else(|| ProviderError::Codec("map key is not valid UTF-8".to_string()))?,
                    other => {
                        return Err(ProviderError::Codec(format!(
                            "map key is not a string: {}",
                            other
                        )))
                    }
                };
                map.insert(key, from_msgpack(field)?);
            }
            Ok(Value::Object(map))
        }
        rmpv::Value::Ext(tag, data) if tag == UNKNOWN_EXT_TYPE => Ok(Value::Unknown(Some(data))),
        rmpv::Value::Ext(tag, _) => Err(ProviderError::Codec(format!(
            "unsupported extension type: {}",
            tag
        ))),
        rmpv::Value::Binary(_) => {
            Err(ProviderError::Codec("binary values are not supported".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{fields, AttrType, Attribute, Presence, ScalarType, Schema, Union};

    fn record_schema() -> Schema {
        Schema::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("count", Attribute::optional_number())
            .with_attribute("enabled", Attribute::optional_bool())
            .with_attribute(
                "endpoint",
                Attribute::new(
                    AttrType::Object(fields([
                        ("host", Attribute::required_string()),
                        ("port", Attribute::optional_number()),
                    ])),
                    Presence::Optional,
                ),
            )
            .with_attribute(
                "rules",
                Attribute::new(
                    AttrType::List(fields([("port", Attribute::required_number())])),
                    Presence::Optional,
                ),
            )
    }

    fn round_trip(value: &Value, schema: &Schema) -> Value {
        let bytes = encode_with_schema(value, schema).unwrap();
        decode_with_schema(&bytes, schema).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let schema = record_schema();
        let value = Value::object([
            ("name", Value::from("web")),
            ("count", Value::from(3_i64)),
            ("enabled", Value::from(true)),
            (
                "endpoint",
                Value::object([
                    ("host", Value::from("localhost")),
                    ("port", Value::from(8080_i64)),
                ]),
            ),
            (
                "rules",
                Value::array([
                    Value::object([("port", Value::from(80_i64))]),
                    Value::object([("port", Value::from(443_i64))]),
                ]),
            ),
        ]);

        assert_eq!(round_trip(&value, &schema), value);
    }

    #[test]
    fn test_round_trip_null_state() {
        let schema = record_schema();
        assert_eq!(round_trip(&Value::Null, &schema), Value::Null);
    }

    #[test]
    fn test_missing_fields_encode_as_null() {
        let schema = record_schema();
        let value = Value::object([("name", Value::from("web"))]);

        let decoded = round_trip(&value, &schema);
        assert_eq!(decoded.get("name"), Some(&Value::from("web")));
        assert_eq!(decoded.get("count"), Some(&Value::Null));
        assert_eq!(decoded.get("endpoint"), Some(&Value::Null));
    }

    #[test]
    fn test_fields_outside_schema_are_dropped() {
        let schema = Schema::new().with_attribute("name", Attribute::required_string());
        let value = Value::object([
            ("name", Value::from("web")),
            ("stray", Value::from("ignored")),
        ]);

        let decoded = round_trip(&value, &schema);
        assert_eq!(decoded.get("stray"), None);
    }

    #[test]
    fn test_unknown_is_a_leaf_at_every_position() {
        // An unknown object/list value must survive untouched, never being
        // expanded into its schema-declared children.
        let schema = record_schema();
        let value = Value::object([
            ("name", Value::from("web")),
            ("endpoint", Value::unknown()),
            ("rules", Value::unknown()),
        ]);

        let decoded = round_trip(&value, &schema);
        assert!(decoded.get("endpoint").unwrap().is_unknown());
        assert!(decoded.get("rules").unwrap().is_unknown());
    }

    #[test]
    fn test_unknown_at_root() {
        let schema = record_schema();
        let bytes = encode_with_schema(&Value::unknown(), &schema).unwrap();
        // fixext1, type 0, empty-array payload
        assert_eq!(bytes, vec![0xd4, 0x00, 0x90]);

        let decoded = decode_with_schema(&bytes, &schema).unwrap();
        assert!(decoded.is_unknown());
    }

    #[test]
    fn test_integral_numbers_encode_as_integers() {
        let schema = Schema::new().with_attribute("count", Attribute::required_number());
        let bytes =
            encode_with_schema(&Value::object([("count", Value::from(5_i64))]), &schema).unwrap();

        let mut reader = &bytes[..];
        let raw = rmpv::decode::read_value(&mut reader).unwrap();
        let entries = raw.as_map().unwrap();
        assert!(matches!(entries[0].1, rmpv::Value::Integer(_)));
    }

    #[test]
    fn test_any_encodes_as_descriptor_tuple() {
        let schema = Schema::new().with_attribute("metadata", Attribute::required_any());
        let value = Value::object([(
            "metadata",
            Value::object([("region", Value::from("eu")), ("zones", Value::array([Value::from("a")]))]),
        )]);

        let bytes = encode_with_schema(&value, &schema).unwrap();

        // On the wire the field holds [descriptor, value].
        let mut reader = &bytes[..];
        let raw = rmpv::decode::read_value(&mut reader).unwrap();
        let entries = raw.as_map().unwrap();
        let tuple = entries[0].1.as_array().unwrap();
        assert_eq!(tuple.len(), 2);
        let descriptor = tuple[0].as_array().unwrap();
        assert_eq!(descriptor[0].as_str(), Some("object"));

        // Decoding discards the descriptor again.
        let decoded = decode_with_schema(&bytes, &schema).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_any_descriptor_shapes() {
        assert_eq!(type_descriptor(&Value::from(true)), Value::from("bool"));
        assert_eq!(type_descriptor(&Value::from(1.5)), Value::from("number"));
        assert_eq!(type_descriptor(&Value::from("x")), Value::from("string"));
        assert_eq!(type_descriptor(&Value::Null), Value::from("dynamic"));
        assert_eq!(
            type_descriptor(&Value::array([Value::from("a")])),
            Value::array([Value::from("list"), Value::from("string")])
        );
        assert_eq!(
            type_descriptor(&Value::object([("a", Value::from(1_i64))])),
            Value::array([
                Value::from("object"),
                Value::object([("a", Value::from("number"))])
            ])
        );
    }

    #[test]
    fn test_union_fields_flatten_into_siblings() {
        let schema = Schema::new()
            .with_attribute("name", Attribute::required_string())
            .with_union(
                "handle",
                Union::new([
                    fields([("did", Attribute::required_string())]),
                    fields([("alias", Attribute::required_string())]),
                ]),
            );
        let value = Value::object([
            ("name", Value::from("me")),
            ("did", Value::from("did:plc:abc")),
        ]);

        let decoded = round_trip(&value, &schema);
        assert_eq!(decoded.get("did"), Some(&Value::from("did:plc:abc")));
        assert_eq!(decoded.get("alias"), Some(&Value::Null));
        // The union field itself never appears in the payload.
        assert_eq!(decoded.get("handle"), None);
    }

    #[test]
    fn test_array_attribute_round_trip() {
        let schema = Schema::new().with_attribute(
            "tags",
            Attribute::new(AttrType::Array(ScalarType::String), Presence::Optional),
        );
        let value = Value::object([(
            "tags",
            Value::array([Value::from("a"), Value::from("b")]),
        )]);

        assert_eq!(round_trip(&value, &schema), value);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let schema = record_schema();
        assert!(decode_with_schema(&[], &schema).is_err());
        assert!(decode_with_schema(&[0xc1], &schema).is_err());
    }
}
