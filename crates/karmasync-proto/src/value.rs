//! Runtime value types.
//!
//! A [`Value`] is the decoded form of a record. Its shapes mirror the
//! [`Model`](crate::Model) variants one to one, plus [`Value::Placeholder`],
//! which stands for the id of a record that is being created in the same
//! write request.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::{json_kind, WireError};

/// Name of the function parameter that binds late-bound record ids inside a
/// `createMultiple` request.
pub const PLACEHOLDER_SCOPE: &str = "refs";

/// A reference to a record: the collection (model) id and the record id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefId {
    /// Id of the collection the record belongs to.
    pub model: String,
    /// Id of the record.
    pub id: String,
}

impl RefId {
    /// Create a new reference.
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
        }
    }

    /// JSON form: `[model, id]`.
    pub fn to_json(&self) -> Json {
        json!([self.model, self.id])
    }

    /// Parse the `[model, id]` JSON form.
    pub fn from_json(json: &Json) -> Option<Self> {
        match json.as_array().map(Vec::as_slice) {
            Some([Json::String(model), Json::String(id)]) => Some(Self::new(model, id)),
            _ => None,
        }
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.id)
    }
}

/// A decoded runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Enum member or symbol.
    Symbol(String),
    /// Point in time.
    DateTime(DateTime<Utc>),
    /// 64-bit floating point.
    Float(f64),
    /// 8-bit signed integer.
    Int8(i8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 8-bit unsigned integer.
    Uint8(u8),
    /// 16-bit unsigned integer.
    Uint16(u16),
    /// 32-bit unsigned integer.
    Uint32(u32),
    /// 64-bit unsigned integer.
    Uint64(u64),
    /// Reference to another record.
    Ref(RefId),
    /// Fixed-arity heterogeneous sequence.
    Tuple(Vec<Value>),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Set of values, in insertion order.
    Set(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
    /// Struct with named fields.
    Struct(BTreeMap<String, Value>),
    /// Tagged union: case label and payload.
    Union(String, Box<Value>),
    /// Late-bound id of a record created in the same request, by local key.
    Placeholder(String),
}

impl Value {
    /// Build a struct value from field pairs.
    pub fn structure<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a union value.
    pub fn union(case: impl Into<String>, value: Value) -> Self {
        Value::Union(case.into(), Box::new(value))
    }

    /// Build a reference value.
    pub fn reference(model: impl Into<String>, id: impl Into<String>) -> Self {
        Value::Ref(RefId::new(model, id))
    }

    /// Variant tag as used by the wire constructor form.
    pub fn tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::DateTime(_) => "dateTime",
            Value::Float(_) => "float",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Uint8(_) => "uint8",
            Value::Uint16(_) => "uint16",
            Value::Uint32(_) => "uint32",
            Value::Uint64(_) => "uint64",
            Value::Ref(_) => "ref",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Union(..) => "union",
            Value::Placeholder(_) => "expr",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as string or symbol.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as reference.
    pub fn as_ref_id(&self) -> Option<&RefId> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Try to get the elements of a tuple, list, or set.
    pub fn as_elements(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(v) | Value::List(v) | Value::Set(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get the entries of a struct or map.
    pub fn as_entries(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(m) | Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a struct field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Try to get as union case and payload.
    pub fn as_union(&self) -> Option<(&str, &Value)> {
        match self {
            Value::Union(case, value) => Some((case, value)),
            _ => None,
        }
    }

    /// Rewrite the value bottom-up.
    ///
    /// Children are transformed first; `f` then receives each rebuilt node and
    /// returns its replacement.
    pub fn transform<F: FnMut(Value) -> Value>(self, f: &mut F) -> Value {
        let rebuilt = match self {
            Value::Tuple(items) => Value::Tuple(items.into_iter().map(|v| v.transform(f)).collect()),
            Value::List(items) => Value::List(items.into_iter().map(|v| v.transform(f)).collect()),
            Value::Set(items) => Value::Set(items.into_iter().map(|v| v.transform(f)).collect()),
            Value::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.transform(f)))
                    .collect(),
            ),
            Value::Struct(fields) => Value::Struct(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, v.transform(f)))
                    .collect(),
            ),
            Value::Union(case, value) => Value::Union(case, Box::new(value.transform(f))),
            leaf => leaf,
        };
        f(rebuilt)
    }

    /// Visit every node, parents before children.
    pub fn walk<F: FnMut(&Value)>(&self, f: &mut F) {
        f(self);
        match self {
            Value::Tuple(items) | Value::List(items) | Value::Set(items) => {
                items.iter().for_each(|v| v.walk(f))
            }
            Value::Map(entries) | Value::Struct(entries) => entries.values().for_each(|v| v.walk(f)),
            Value::Union(_, value) => value.walk(f),
            _ => {}
        }
    }

    /// Collect every reference contained in the value.
    pub fn references(&self) -> Vec<&RefId> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a RefId>) {
        match self {
            Value::Ref(r) => out.push(r),
            Value::Tuple(items) | Value::List(items) | Value::Set(items) => {
                items.iter().for_each(|v| v.collect_refs(out))
            }
            Value::Map(entries) | Value::Struct(entries) => {
                entries.values().for_each(|v| v.collect_refs(out))
            }
            Value::Union(_, value) => value.collect_refs(out),
            _ => {}
        }
    }

    /// Replace every reference whose record id is in `keys` with a
    /// [`Value::Placeholder`] naming that key.
    pub fn bind_placeholders(self, keys: &BTreeSet<String>) -> Value {
        self.transform(&mut |v| match v {
            Value::Ref(r) if keys.contains(&r.id) => Value::Placeholder(r.id),
            other => other,
        })
    }

    /// Plain JSON form, as accepted by [`Model::decode`](crate::Model::decode).
    ///
    /// Placeholders have no plain form; they are emitted as their late-bound
    /// expression so the output still identifies them.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::String(s) | Value::Symbol(s) => Json::String(s.clone()),
            Value::DateTime(dt) => Json::String(format_datetime(dt)),
            Value::Float(f) => float_json(*f),
            Value::Int8(i) => json!(i),
            Value::Int16(i) => json!(i),
            Value::Int32(i) => json!(i),
            Value::Int64(i) => json!(i),
            Value::Uint8(i) => json!(i),
            Value::Uint16(i) => json!(i),
            Value::Uint32(i) => json!(i),
            Value::Uint64(i) => json!(i),
            Value::Ref(r) => r.to_json(),
            Value::Tuple(items) | Value::List(items) | Value::Set(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) | Value::Struct(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Union(case, value) => {
                let mut obj = JsonMap::new();
                obj.insert(case.clone(), value.to_json());
                Json::Object(obj)
            }
            Value::Placeholder(key) => placeholder_expr(key),
        }
    }

    /// Tagged constructor form understood by the query-expression layer.
    ///
    /// References whose record id is in `placeholders`, and explicit
    /// [`Value::Placeholder`] nodes, become the late-bound expression
    /// `{"expr": {"field": [key, {"scope": "refs"}]}}`.
    pub fn to_wire_constructor(&self, placeholders: &BTreeSet<String>) -> Json {
        let payload = match self {
            Value::Ref(r) if placeholders.contains(&r.id) => return placeholder_expr(&r.id),
            Value::Placeholder(key) => return placeholder_expr(key),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::String(s) | Value::Symbol(s) => Json::String(s.clone()),
            Value::DateTime(dt) => Json::String(format_datetime(dt)),
            Value::Float(f) => float_json(*f),
            Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Uint8(_)
            | Value::Uint16(_)
            | Value::Uint32(_)
            | Value::Uint64(_) => self.to_json(),
            Value::Ref(r) => r.to_json(),
            Value::Tuple(items) | Value::List(items) | Value::Set(items) => Json::Array(
                items
                    .iter()
                    .map(|v| v.to_wire_constructor(placeholders))
                    .collect(),
            ),
            Value::Map(entries) | Value::Struct(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_wire_constructor(placeholders)))
                    .collect(),
            ),
            Value::Union(case, value) => json!([case, value.to_wire_constructor(placeholders)]),
        };
        let mut obj = JsonMap::new();
        obj.insert(self.tag().to_string(), payload);
        Json::Object(obj)
    }

    /// Parse the tagged constructor form produced by
    /// [`to_wire_constructor`](Self::to_wire_constructor).
    pub fn from_wire_constructor(json: &Json) -> Result<Value, WireError> {
        let (tag, payload) = single_entry(json)?;
        let value = match tag {
            "null" => Value::Null,
            "bool" => Value::Bool(
                payload
                    .as_bool()
                    .ok_or_else(|| WireError::payload(tag, "expected boolean"))?,
            ),
            "string" => Value::String(expect_str(tag, payload)?.to_string()),
            "symbol" => Value::Symbol(expect_str(tag, payload)?.to_string()),
            "dateTime" => {
                let raw = expect_str(tag, payload)?;
                Value::DateTime(
                    parse_datetime(raw).map_err(|e| WireError::payload(tag, e.to_string()))?,
                )
            }
            "float" => Value::Float(
                payload
                    .as_f64()
                    .ok_or_else(|| WireError::payload(tag, "expected number"))?,
            ),
            "int8" => Value::Int8(int_payload(tag, payload)?),
            "int16" => Value::Int16(int_payload(tag, payload)?),
            "int32" => Value::Int32(int_payload(tag, payload)?),
            "int64" => Value::Int64(
                payload
                    .as_i64()
                    .ok_or_else(|| WireError::payload(tag, "expected 64-bit integer"))?,
            ),
            "uint8" => Value::Uint8(uint_payload(tag, payload)?),
            "uint16" => Value::Uint16(uint_payload(tag, payload)?),
            "uint32" => Value::Uint32(uint_payload(tag, payload)?),
            "uint64" => Value::Uint64(
                payload
                    .as_u64()
                    .ok_or_else(|| WireError::payload(tag, "expected unsigned integer"))?,
            ),
            "ref" => Value::Ref(
                RefId::from_json(payload)
                    .ok_or_else(|| WireError::payload(tag, "expected [model, id]"))?,
            ),
            "tuple" => Value::Tuple(elements(tag, payload)?),
            "list" => Value::List(elements(tag, payload)?),
            "set" => Value::Set(elements(tag, payload)?),
            "map" => Value::Map(entries(tag, payload)?),
            "struct" => Value::Struct(entries(tag, payload)?),
            "union" => match payload.as_array().map(Vec::as_slice) {
                Some([Json::String(case), inner]) => {
                    Value::union(case.clone(), Value::from_wire_constructor(inner)?)
                }
                _ => return Err(WireError::payload(tag, "expected [case, value]")),
            },
            "expr" => Value::Placeholder(placeholder_key(payload)?),
            other => return Err(WireError::UnknownTag(other.to_string())),
        };
        Ok(value)
    }
}

/// The late-bound expression standing for the id of record `key`.
fn placeholder_expr(key: &str) -> Json {
    json!({ "expr": { "field": [key, { "scope": PLACEHOLDER_SCOPE }] } })
}

fn placeholder_key(payload: &Json) -> Result<String, WireError> {
    let field = payload
        .get("field")
        .and_then(Json::as_array)
        .map(Vec::as_slice);
    match field {
        Some([Json::String(key), scope])
            if scope.get("scope").and_then(Json::as_str) == Some(PLACEHOLDER_SCOPE) =>
        {
            Ok(key.clone())
        }
        _ => Err(WireError::payload(
            "expr",
            "only record placeholders are supported in values",
        )),
    }
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn float_json(f: f64) -> Json {
    serde_json::Number::from_f64(f)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

pub(crate) fn single_entry(json: &Json) -> Result<(&str, &Json), WireError> {
    match json.as_object() {
        Some(obj) if obj.len() == 1 => obj
            .iter()
            .next()
            .map(|(tag, payload)| (tag.as_str(), payload))
            .ok_or_else(|| WireError::NotTagged("object".to_string())),
        _ => Err(WireError::NotTagged(json_kind(json).to_string())),
    }
}

fn expect_str<'a>(tag: &str, payload: &'a Json) -> Result<&'a str, WireError> {
    payload
        .as_str()
        .ok_or_else(|| WireError::payload(tag, "expected string"))
}

fn int_payload<T: TryFrom<i64>>(tag: &str, payload: &Json) -> Result<T, WireError> {
    payload
        .as_i64()
        .and_then(|i| T::try_from(i).ok())
        .ok_or_else(|| WireError::payload(tag, "integer out of range"))
}

fn uint_payload<T: TryFrom<u64>>(tag: &str, payload: &Json) -> Result<T, WireError> {
    payload
        .as_u64()
        .and_then(|i| T::try_from(i).ok())
        .ok_or_else(|| WireError::payload(tag, "integer out of range"))
}

fn elements(tag: &str, payload: &Json) -> Result<Vec<Value>, WireError> {
    payload
        .as_array()
        .ok_or_else(|| WireError::payload(tag, "expected array"))?
        .iter()
        .map(Value::from_wire_constructor)
        .collect()
}

fn entries(tag: &str, payload: &Json) -> Result<BTreeMap<String, Value>, WireError> {
    payload
        .as_object()
        .ok_or_else(|| WireError::payload(tag, "expected object"))?
        .iter()
        .map(|(k, v)| Ok((k.clone(), Value::from_wire_constructor(v)?)))
        .collect()
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire_constructor(&BTreeSet::new())
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Value::from_wire_constructor(&json).map_err(serde::de::Error::custom)
    }
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<RefId> for Value {
    fn from(v: RefId) -> Self {
        Value::Ref(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn post() -> Value {
        Value::structure([
            ("title", Value::from("Hello")),
            ("author", Value::reference("authors", "a1")),
            (
                "tags",
                Value::List(vec![
                    Value::reference("tags", "t1"),
                    Value::reference("tags", "t2"),
                ]),
            ),
        ])
    }

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Symbol("red".into()).as_str(), Some("red"));
        assert_eq!(post().field("title"), Some(&Value::from("Hello")));
        assert_eq!(
            Value::union("draft", Value::Null).as_union(),
            Some(("draft", &Value::Null))
        );
    }

    #[test]
    fn test_value_conversions() {
        let v: Value = 42i32.into();
        assert_eq!(v, Value::Int32(42));

        let v: Value = None::<i32>.into();
        assert_eq!(v, Value::Null);

        let v: Value = RefId::new("m", "r").into();
        assert_eq!(v, Value::reference("m", "r"));
    }

    #[test]
    fn test_transform_is_bottom_up() {
        let mut seen = Vec::new();
        let value = Value::List(vec![Value::Int8(1), Value::Int8(2)]);
        let result = value.transform(&mut |v| {
            seen.push(v.tag());
            match v {
                Value::Int8(i) => Value::Int8(i * 10),
                other => other,
            }
        });
        assert_eq!(result, Value::List(vec![Value::Int8(10), Value::Int8(20)]));
        assert_eq!(seen, vec!["int8", "int8", "list"]);
    }

    #[test]
    fn test_references() {
        let value = post();
        let refs: Vec<String> = value.references().iter().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["authors/a1", "tags/t1", "tags/t2"]);
    }

    #[test]
    fn test_bind_placeholders() {
        let keys: BTreeSet<String> = ["t1".to_string()].into_iter().collect();
        let bound = post().bind_placeholders(&keys);
        assert_eq!(
            bound.field("tags"),
            Some(&Value::List(vec![
                Value::Placeholder("t1".into()),
                Value::reference("tags", "t2"),
            ]))
        );
        assert_eq!(bound.field("author"), Some(&Value::reference("authors", "a1")));
    }

    #[test]
    fn test_wire_constructor_placeholders() {
        let keys: BTreeSet<String> = ["a1".to_string()].into_iter().collect();
        let wire = post().to_wire_constructor(&keys);
        assert_eq!(
            wire["struct"]["author"],
            json!({"expr": {"field": ["a1", {"scope": "refs"}]}})
        );
        assert_eq!(wire["struct"]["tags"]["list"][0], json!({"ref": ["tags", "t1"]}));
        assert_eq!(wire["struct"]["title"], json!({"string": "Hello"}));
    }

    #[test]
    fn test_wire_constructor_parse() {
        let value = Value::structure([
            ("when", Value::DateTime(parse_datetime("2024-01-01T10:00:00Z").unwrap())),
            ("status", Value::union("published", Value::Uint16(7))),
            ("owner", Value::Placeholder("u1".into())),
            ("pair", Value::Tuple(vec![Value::Float(1.5), Value::Symbol("x".into())])),
            ("counts", Value::Map([("a".to_string(), Value::Int64(-3))].into_iter().collect())),
        ]);
        let wire = value.to_wire_constructor(&BTreeSet::new());
        assert_eq!(Value::from_wire_constructor(&wire).unwrap(), value);
    }

    #[test]
    fn test_wire_constructor_rejects_unknown_tag() {
        let err = Value::from_wire_constructor(&json!({"decimal": "1.0"})).unwrap_err();
        assert_eq!(err, WireError::UnknownTag("decimal".into()));

        let err = Value::from_wire_constructor(&json!({"a": 1, "b": 2})).unwrap_err();
        assert!(matches!(err, WireError::NotTagged(_)));
    }

    #[test]
    fn test_plain_json() {
        let json = post().to_json();
        assert_eq!(json["author"], json!(["authors", "a1"]));
        assert_eq!(
            Value::union("ok", Value::Int32(1)).to_json(),
            json!({"ok": 1})
        );
    }

    #[test]
    fn test_serde_uses_wire_constructor() {
        let text = serde_json::to_string(&Value::from("x")).unwrap();
        assert_eq!(text, r#"{"string":"x"}"#);
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, Value::from("x"));
    }
}
