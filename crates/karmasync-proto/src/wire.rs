//! Model wire form.
//!
//! Every model serializes as a single-key JSON object keyed by its variant
//! tag. Scalars carry an empty object (`{"string": {}}`). Recursive models are
//! written with their binders; a binder met again while it is already being
//! written (an unfolded model) is written as `{"recurse": label}`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::WireError;
use crate::model::{BindingId, Model};
use crate::value::single_entry;

impl Model {
    /// Serialize to the tagged wire form.
    pub fn to_wire(&self) -> Json {
        let mut active = HashSet::new();
        self.to_wire_with(&mut active)
    }

    fn to_wire_with(&self, active: &mut HashSet<BindingId>) -> Json {
        let payload = match self {
            Model::Ref(target) => Json::String(target.clone()),
            Model::Tuple(items) => {
                Json::Array(items.iter().map(|m| m.to_wire_with(active)).collect())
            }
            Model::List(m) | Model::Set(m) | Model::Map(m) | Model::Optional(m) | Model::Unique(m) => {
                m.to_wire_with(active)
            }
            Model::Struct(entries) | Model::Union(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, m)| (k.clone(), m.to_wire_with(active)))
                    .collect(),
            ),
            Model::Enum(symbols) => json!(symbols),
            Model::Recurse(label) => Json::String(label.clone()),
            Model::Annotation(text, m) => json!({
                "value": text,
                "model": m.to_wire_with(active),
            }),
            Model::Recursion(rec) => {
                if !active.insert(rec.id()) {
                    return tagged("recurse", Json::String(rec.label.clone()));
                }
                let body = rec.model.to_wire_with(active);
                active.remove(&rec.id());
                json!({ "label": rec.label, "model": body })
            }
            Model::Recursive(bundle) => {
                if !active.insert(bundle.id()) {
                    return tagged("recurse", Json::String(bundle.top.clone()));
                }
                let models: JsonMap<String, Json> = bundle
                    .models
                    .iter()
                    .map(|(k, m)| (k.clone(), m.to_wire_with(active)))
                    .collect();
                active.remove(&bundle.id());
                json!({ "top": bundle.top, "models": models })
            }
            _ => Json::Object(JsonMap::new()),
        };
        tagged(self.tag(), payload)
    }

    /// Parse the tagged wire form.
    pub fn from_wire(json: &Json) -> Result<Model, WireError> {
        let (tag, payload) = single_entry(json)?;

        if let Some(scalar) = Model::scalar_from_tag(tag) {
            return match payload {
                Json::Null => Ok(scalar),
                Json::Object(obj) if obj.is_empty() => Ok(scalar),
                _ => Err(WireError::payload(tag, "scalar payload must be empty")),
            };
        }

        let model = match tag {
            "ref" => Model::Ref(string_payload(tag, payload)?),
            "tuple" => Model::Tuple(
                payload
                    .as_array()
                    .ok_or_else(|| WireError::payload(tag, "expected array"))?
                    .iter()
                    .map(Model::from_wire)
                    .collect::<Result<_, _>>()?,
            ),
            "list" => Model::list(Model::from_wire(payload)?),
            "set" => Model::set(Model::from_wire(payload)?),
            "map" => Model::map(Model::from_wire(payload)?),
            "optional" => Model::optional(Model::from_wire(payload)?),
            "unique" => Model::unique(Model::from_wire(payload)?),
            "struct" => Model::Struct(wire_entries(tag, payload)?),
            "union" => Model::Union(wire_entries(tag, payload)?),
            "enum" => Model::Enum(
                payload
                    .as_array()
                    .ok_or_else(|| WireError::payload(tag, "expected array"))?
                    .iter()
                    .map(|s| string_payload(tag, s))
                    .collect::<Result<_, _>>()?,
            ),
            "recurse" => Model::Recurse(string_payload(tag, payload)?),
            "recursion" => Model::recursion(
                string_payload(tag, member(tag, payload, "label")?)?,
                Model::from_wire(member(tag, payload, "model")?)?,
            ),
            "recursive" => Model::recursive(
                string_payload(tag, member(tag, payload, "top")?)?,
                wire_entries(tag, member(tag, payload, "models")?)?,
            ),
            "annotation" => Model::annotation(
                string_payload(tag, member(tag, payload, "value")?)?,
                Model::from_wire(member(tag, payload, "model")?)?,
            ),
            other => return Err(WireError::UnknownTag(other.to_string())),
        };
        Ok(model)
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Model {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Model::from_wire(&json).map_err(serde::de::Error::custom)
    }
}

fn tagged(tag: &str, payload: Json) -> Json {
    let mut obj = JsonMap::new();
    obj.insert(tag.to_string(), payload);
    Json::Object(obj)
}

fn string_payload(tag: &str, payload: &Json) -> Result<String, WireError> {
    payload
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| WireError::payload(tag, "expected string"))
}

fn member<'j>(tag: &str, payload: &'j Json, name: &str) -> Result<&'j Json, WireError> {
    payload
        .get(name)
        .ok_or_else(|| WireError::payload(tag, format!("missing `{}`", name)))
}

fn wire_entries(tag: &str, payload: &Json) -> Result<BTreeMap<String, Model>, WireError> {
    payload
        .as_object()
        .ok_or_else(|| WireError::payload(tag, "expected object"))?
        .iter()
        .map(|(k, v)| Ok((k.clone(), Model::from_wire(v)?)))
        .collect()
}
