//! Codec between the wire [`proto::Value`] tagged union and the native
//! [`Value`] handed to handlers.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Number, json};

use crate::proto::{self, ArrayValue, ObjectValue, value::Kind};

/// Variable table used to resolve `variable` references while decoding.
pub type Variables = HashMap<String, proto::Value>;

/// Native dynamic value exchanged with handlers.
///
/// An absent value (`undefined` on the GraphQL side) is modelled as
/// `Option::None` wherever it can occur.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Field lookup on objects; `None` for missing keys and non-objects.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Builds an object from `(key, value)` pairs, skipping absent values.
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<Value>)>,
        K: Into<String>,
    {
        Value::Object(
            entries
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k.into(), v)))
                .collect(),
        )
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::UInt(u) => json!(u),
            Value::Float(f) => Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => json!(s),
            Value::Bytes(bytes) => json!(bytes),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, serde_json::Value::from(v))).collect(),
            ),
        }
    }
}

// -----------------------------------------------------------------------------
// marshal / unmarshal
// -----------------------------------------------------------------------------

/// Encodes a native value as a wire value.
///
/// Floats without a fractional part are sent as `int64`, matching how the
/// engine treats whole numbers coming from dynamically typed runtimes.
pub fn marshal(v: &Value) -> proto::Value {
    let kind = match v {
        Value::Null => Kind::Nil(true),
        Value::Bool(b) => Kind::B(*b),
        Value::Int(i) => Kind::I(*i),
        Value::UInt(u) => Kind::U(*u),
        Value::Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Kind::I(*f as i64)
            } else {
                Kind::F(*f)
            }
        }
        Value::String(s) => Kind::S(s.clone()),
        Value::Bytes(bytes) => Kind::Any(bytes.clone()),
        Value::Array(items) => Kind::A(ArrayValue {
            items: items.iter().map(marshal).collect(),
        }),
        Value::Object(map) => Kind::O(ObjectValue {
            props: map.iter().map(|(k, v)| (k.clone(), marshal(v))).collect(),
        }),
    };
    proto::Value { kind: Some(kind) }
}

/// Encodes an optional native value; absent values become `nil`.
pub fn marshal_opt(v: Option<&Value>) -> proto::Value {
    v.map(marshal).unwrap_or_else(proto::Value::nil)
}

/// Decodes a wire value.
///
/// Returns `None` only for a `variable` reference that cannot be resolved
/// against `variables`. A value with no variant set decodes to `Null`.
/// Resolved variable values are decoded against the same table; a reference
/// back to a variable already being resolved is unresolvable.
pub fn unmarshal(v: &proto::Value, variables: Option<&Variables>) -> Option<Value> {
    decode(v, variables, &mut Vec::new())
}

/// Decodes a wire map, dropping entries whose value is absent.
pub fn unmarshal_map(
    props: &HashMap<String, proto::Value>,
    variables: Option<&Variables>,
) -> BTreeMap<String, Value> {
    decode_map(props, variables, &mut Vec::new())
}

fn decode<'a>(
    v: &'a proto::Value,
    variables: Option<&'a Variables>,
    resolving: &mut Vec<&'a str>,
) -> Option<Value> {
    let Some(kind) = &v.kind else {
        return Some(Value::Null);
    };
    let value = match kind {
        Kind::Nil(_) => Value::Null,
        Kind::I(i) => Value::Int(*i),
        Kind::U(u) => Value::UInt(*u),
        Kind::F(f) => Value::Float(*f),
        Kind::S(s) => Value::String(s.clone()),
        Kind::B(b) => Value::Bool(*b),
        Kind::Any(bytes) => Value::Bytes(bytes.clone()),
        Kind::O(obj) => Value::Object(decode_map(&obj.props, variables, resolving)),
        Kind::A(arr) => Value::Array(
            arr.items
                .iter()
                .map(|item| decode(item, variables, resolving).unwrap_or(Value::Null))
                .collect(),
        ),
        Kind::Variable(name) => {
            if resolving.contains(&name.as_str()) {
                return None;
            }
            let found = variables.and_then(|vars| vars.get(name))?;
            resolving.push(name.as_str());
            let value = decode(found, variables, resolving);
            resolving.pop();
            return value;
        }
    };
    Some(value)
}

fn decode_map<'a>(
    props: &'a HashMap<String, proto::Value>,
    variables: Option<&'a Variables>,
    resolving: &mut Vec<&'a str>,
) -> BTreeMap<String, Value> {
    props
        .iter()
        .filter_map(|(k, v)| decode(v, variables, resolving).map(|v| (k.clone(), v)))
        .collect()
}

/// Decodes an optional wire value, treating a missing message as absent.
pub fn unmarshal_opt(v: Option<&proto::Value>, variables: Option<&Variables>) -> Option<Value> {
    v.and_then(|v| unmarshal(v, variables))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) -> Option<Value> {
        unmarshal(&marshal(&v), None)
    }

    #[test]
    fn roundtrip_preserves_nested_values() {
        let v = Value::Object(BTreeMap::from([
            ("name".to_string(), Value::from("Batman")),
            ("age".to_string(), Value::Int(42)),
            ("big".to_string(), Value::UInt(u64::MAX)),
            ("ratio".to_string(), Value::Float(0.5)),
            ("alive".to_string(), Value::Bool(true)),
            ("blob".to_string(), Value::Bytes(vec![1, 2, 3])),
            ("tags".to_string(), Value::Array(vec![Value::from("a"), Value::Null])),
        ]));
        assert_eq!(roundtrip(v.clone()), Some(v));
    }

    #[test]
    fn whole_floats_are_sent_as_integers() {
        assert_eq!(marshal(&Value::Float(3.0)).kind, Some(Kind::I(3)));
        assert_eq!(marshal(&Value::Float(3.5)).kind, Some(Kind::F(3.5)));
    }

    #[test]
    fn empty_value_is_null() {
        assert_eq!(unmarshal(&proto::Value::default(), None), Some(Value::Null));
    }

    #[test]
    fn variables_resolve_through_the_table() {
        let vars = Variables::from([("v".to_string(), proto::Value::string("x"))]);
        assert_eq!(unmarshal(&proto::Value::variable("v"), Some(&vars)), Some(Value::from("x")));
        assert_eq!(unmarshal(&proto::Value::variable("v"), None), None);
        assert_eq!(unmarshal(&proto::Value::variable("missing"), Some(&vars)), None);
    }

    #[test]
    fn resolved_variables_are_decoded_with_the_table() {
        let vars = Variables::from([
            ("outer".to_string(), proto::Value::object([("inner", proto::Value::variable("inner"))])),
            ("inner".to_string(), proto::Value::string("x")),
            ("loop".to_string(), proto::Value::variable("loop")),
        ]);
        let outer = unmarshal(&proto::Value::variable("outer"), Some(&vars)).unwrap();
        assert_eq!(outer.get("inner"), Some(&Value::from("x")));
        assert_eq!(unmarshal(&proto::Value::variable("loop"), Some(&vars)), None);
    }

    #[test]
    fn variables_resolve_inside_objects_and_arrays() {
        let vars = Variables::from([("name".to_string(), proto::Value::string("Robin"))]);
        let wire = proto::Value::object([
            ("name", proto::Value::variable("name")),
            ("gone", proto::Value::variable("gone")),
            (
                "list",
                proto::Value {
                    kind: Some(Kind::A(ArrayValue { items: vec![proto::Value::variable("name")] })),
                },
            ),
        ]);
        let decoded = unmarshal(&wire, Some(&vars)).unwrap();
        assert_eq!(decoded.get("name"), Some(&Value::from("Robin")));
        assert_eq!(decoded.get("gone"), None);
        assert_eq!(decoded.get("list"), Some(&Value::Array(vec![Value::from("Robin")])));
    }

    #[test]
    fn json_conversion_keeps_structure() {
        let v = Value::from(json!({"a": [1, 2.5, "x", null, true]}));
        assert_eq!(
            v.get("a"),
            Some(&Value::Array(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::from("x"),
                Value::Null,
                Value::Bool(true),
            ]))
        );
        assert_eq!(serde_json::Value::from(v), json!({"a": [1, 2.5, "x", null, true]}));
    }
}
