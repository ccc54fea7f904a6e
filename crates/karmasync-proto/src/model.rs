//! Schema descriptors.
//!
//! A [`Model`] describes the shape of a collection's records. Models are
//! trees: recursion is expressed with binder nodes ([`Model::Recursion`],
//! [`Model::Recursive`]) and label back-references ([`Model::Recurse`]), never
//! with shared cycles. Binder nodes carry a [`BindingId`] assigned at
//! construction so that clones of the same binder can be recognised; equality
//! ignores it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value as Json;

use crate::error::{json_kind, DecodeError, WireError};
use crate::value::{parse_datetime, RefId, Value};

/// Label of the single model inside the meta-model bundle.
pub const META_MODEL_LABEL: &str = "model";

/// Identity of a binder node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    /// Allocate a process-unique id.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BindingId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Binds `label` to `model` for the [`Model::Recurse`] nodes inside it.
#[derive(Debug, Clone)]
pub struct Recursion {
    id: BindingId,
    /// Label referenced by `Recurse` nodes.
    pub label: String,
    /// The bound model.
    pub model: Box<Model>,
}

impl Recursion {
    /// Identity of this binder.
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Unfold one level: free `Recurse(label)` nodes in the body are replaced
    /// by this binder. The result keeps this binder's identity.
    pub fn unfold(&self) -> Model {
        let replacement = Model::Recursion(self.clone());
        Model::Recursion(Recursion {
            id: self.id,
            label: self.label.clone(),
            model: Box::new(substitute(&self.model, &self.label, &replacement)),
        })
    }
}

impl PartialEq for Recursion {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.model == other.model
    }
}

/// A bundle of mutually recursive named models with an entry point.
#[derive(Debug, Clone)]
pub struct Recursive {
    id: BindingId,
    /// Label of the entry model.
    pub top: String,
    /// Models bound by label; each may `Recurse` into any other.
    pub models: BTreeMap<String, Model>,
}

impl Recursive {
    /// Identity of this binder.
    pub fn id(&self) -> BindingId {
        self.id
    }
}

impl PartialEq for Recursive {
    fn eq(&self, other: &Self) -> bool {
        self.top == other.top && self.models == other.models
    }
}

/// A schema descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    /// Only `null`.
    Null,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// Free-form symbol.
    Symbol,
    /// RFC 3339 date-time.
    DateTime,
    /// 64-bit float.
    Float,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    Uint8,
    /// 16-bit unsigned integer.
    Uint16,
    /// 32-bit unsigned integer.
    Uint32,
    /// 64-bit unsigned integer.
    Uint64,
    /// Reference to a record of the collection with this id.
    Ref(String),
    /// Fixed-arity sequence.
    Tuple(Vec<Model>),
    /// Homogeneous list.
    List(Box<Model>),
    /// Homogeneous set.
    Set(Box<Model>),
    /// String-keyed map.
    Map(Box<Model>),
    /// Struct with named fields.
    Struct(BTreeMap<String, Model>),
    /// Tagged union of named cases.
    Union(BTreeMap<String, Model>),
    /// One of a fixed set of symbols.
    Enum(BTreeSet<String>),
    /// Label binder.
    Recursion(Recursion),
    /// Back-reference to the innermost enclosing binder of this label.
    Recurse(String),
    /// Bundle of mutually recursive models.
    Recursive(Recursive),
    /// Nullable; also makes a struct field omittable.
    Optional(Box<Model>),
    /// Unique-valued; decoding is unaffected.
    Unique(Box<Model>),
    /// Free-text annotation; decoding is unaffected.
    Annotation(String, Box<Model>),
}

impl Model {
    /// Create a list model.
    pub fn list(model: Model) -> Self {
        Model::List(Box::new(model))
    }

    /// Create a set model.
    pub fn set(model: Model) -> Self {
        Model::Set(Box::new(model))
    }

    /// Create a map model.
    pub fn map(model: Model) -> Self {
        Model::Map(Box::new(model))
    }

    /// Create an optional model.
    pub fn optional(model: Model) -> Self {
        Model::Optional(Box::new(model))
    }

    /// Create a unique model.
    pub fn unique(model: Model) -> Self {
        Model::Unique(Box::new(model))
    }

    /// Create an annotated model.
    pub fn annotation(text: impl Into<String>, model: Model) -> Self {
        Model::Annotation(text.into(), Box::new(model))
    }

    /// Create a reference model.
    pub fn reference(model_id: impl Into<String>) -> Self {
        Model::Ref(model_id.into())
    }

    /// Create a struct model from field pairs.
    pub fn structure<K: Into<String>>(fields: impl IntoIterator<Item = (K, Model)>) -> Self {
        Model::Struct(fields.into_iter().map(|(k, m)| (k.into(), m)).collect())
    }

    /// Create a union model from case pairs.
    pub fn union<K: Into<String>>(cases: impl IntoIterator<Item = (K, Model)>) -> Self {
        Model::Union(cases.into_iter().map(|(k, m)| (k.into(), m)).collect())
    }

    /// Create an enum model.
    pub fn enumeration<S: Into<String>>(symbols: impl IntoIterator<Item = S>) -> Self {
        Model::Enum(symbols.into_iter().map(Into::into).collect())
    }

    /// Create a recursion binder with a fresh identity.
    pub fn recursion(label: impl Into<String>, model: Model) -> Self {
        Model::Recursion(Recursion {
            id: BindingId::fresh(),
            label: label.into(),
            model: Box::new(model),
        })
    }

    /// Create a back-reference.
    pub fn recurse(label: impl Into<String>) -> Self {
        Model::Recurse(label.into())
    }

    /// Create a recursive bundle with a fresh identity.
    pub fn recursive<K: Into<String>>(
        top: impl Into<String>,
        models: impl IntoIterator<Item = (K, Model)>,
    ) -> Self {
        Model::Recursive(Recursive {
            id: BindingId::fresh(),
            top: top.into(),
            models: models.into_iter().map(|(k, m)| (k.into(), m)).collect(),
        })
    }

    /// Variant tag as used by the wire form.
    pub fn tag(&self) -> &'static str {
        match self {
            Model::Null => "null",
            Model::Bool => "bool",
            Model::String => "string",
            Model::Symbol => "symbol",
            Model::DateTime => "dateTime",
            Model::Float => "float",
            Model::Int8 => "int8",
            Model::Int16 => "int16",
            Model::Int32 => "int32",
            Model::Int64 => "int64",
            Model::Uint8 => "uint8",
            Model::Uint16 => "uint16",
            Model::Uint32 => "uint32",
            Model::Uint64 => "uint64",
            Model::Ref(_) => "ref",
            Model::Tuple(_) => "tuple",
            Model::List(_) => "list",
            Model::Set(_) => "set",
            Model::Map(_) => "map",
            Model::Struct(_) => "struct",
            Model::Union(_) => "union",
            Model::Enum(_) => "enum",
            Model::Recursion(_) => "recursion",
            Model::Recurse(_) => "recurse",
            Model::Recursive(_) => "recursive",
            Model::Optional(_) => "optional",
            Model::Unique(_) => "unique",
            Model::Annotation(..) => "annotation",
        }
    }

    /// Scalar model for a payload-free tag.
    pub(crate) fn scalar_from_tag(tag: &str) -> Option<Model> {
        let model = match tag {
            "null" => Model::Null,
            "bool" => Model::Bool,
            "string" => Model::String,
            "symbol" => Model::Symbol,
            "dateTime" => Model::DateTime,
            "float" => Model::Float,
            "int8" => Model::Int8,
            "int16" => Model::Int16,
            "int32" => Model::Int32,
            "int64" => Model::Int64,
            "uint8" => Model::Uint8,
            "uint16" => Model::Uint16,
            "uint32" => Model::Uint32,
            "uint64" => Model::Uint64,
            _ => return None,
        };
        Some(model)
    }

    /// Whether a struct field of this model may be omitted.
    ///
    /// Annotations are looked through; any other wrapper is not.
    pub fn is_optional(&self) -> bool {
        match self {
            Model::Optional(_) => true,
            Model::Annotation(_, inner) => inner.is_optional(),
            _ => false,
        }
    }

    /// Rebuild this node with `g` applied to each direct child.
    /// Binder identities are kept.
    pub fn map_children<G: FnMut(&Model) -> Model>(&self, mut g: G) -> Model {
        match self {
            Model::Tuple(items) => Model::Tuple(items.iter().map(&mut g).collect()),
            Model::List(m) => Model::List(Box::new(g(m))),
            Model::Set(m) => Model::Set(Box::new(g(m))),
            Model::Map(m) => Model::Map(Box::new(g(m))),
            Model::Optional(m) => Model::Optional(Box::new(g(m))),
            Model::Unique(m) => Model::Unique(Box::new(g(m))),
            Model::Annotation(text, m) => Model::Annotation(text.clone(), Box::new(g(m))),
            Model::Struct(fields) => {
                Model::Struct(fields.iter().map(|(k, m)| (k.clone(), g(m))).collect())
            }
            Model::Union(cases) => {
                Model::Union(cases.iter().map(|(k, m)| (k.clone(), g(m))).collect())
            }
            Model::Recursion(rec) => Model::Recursion(Recursion {
                id: rec.id,
                label: rec.label.clone(),
                model: Box::new(g(&rec.model)),
            }),
            Model::Recursive(bundle) => Model::Recursive(Recursive {
                id: bundle.id,
                top: bundle.top.clone(),
                models: bundle
                    .models
                    .iter()
                    .map(|(k, m)| (k.clone(), g(m)))
                    .collect(),
            }),
            leaf => leaf.clone(),
        }
    }

    /// Rewrite the model bottom-up.
    ///
    /// Children are rewritten first and `f` receives each rebuilt node. A
    /// binder reached more than once (clones share their [`BindingId`]) is
    /// rewritten once; a binder reached again while it is still being
    /// rewritten folds back to `Recurse(label)`.
    pub fn transform<F: FnMut(Model) -> Model>(&self, f: &mut F) -> Model {
        let mut in_flight = HashMap::new();
        self.transform_with(f, &mut in_flight)
    }

    fn transform_with<F: FnMut(Model) -> Model>(
        &self,
        f: &mut F,
        seen: &mut HashMap<BindingId, Option<Model>>,
    ) -> Model {
        let binder = match self {
            Model::Recursion(rec) => Some((rec.id, rec.label.as_str())),
            Model::Recursive(bundle) => Some((bundle.id, bundle.top.as_str())),
            _ => None,
        };

        let Some((id, label)) = binder else {
            let rebuilt = self.map_children(|child| child.transform_with(f, seen));
            return f(rebuilt);
        };

        match seen.get(&id) {
            Some(Some(done)) => return done.clone(),
            Some(None) => return f(Model::Recurse(label.to_string())),
            None => {}
        }

        seen.insert(id, None);
        let rebuilt = self.map_children(|child| child.transform_with(f, seen));
        let replaced = f(rebuilt);
        seen.insert(id, Some(replaced.clone()));
        replaced
    }

    /// Decode plain JSON into a [`Value`] of this shape.
    pub fn decode(&self, json: &Json) -> Result<Value, DecodeError> {
        self.decode_at(json, &[], "")
    }

    fn decode_at<'a>(
        &'a self,
        json: &Json,
        env: &[Frame<'a>],
        path: &str,
    ) -> Result<Value, DecodeError> {
        let value = match self {
            Model::Null => match json {
                Json::Null => Value::Null,
                other => return Err(mismatch(path, "null", other)),
            },
            Model::Bool => Value::Bool(json.as_bool().ok_or_else(|| mismatch(path, "boolean", json))?),
            Model::String => Value::String(expect_string(json, path)?.to_string()),
            Model::Symbol => Value::Symbol(expect_string(json, path)?.to_string()),
            Model::Enum(symbols) => {
                let symbol = expect_string(json, path)?;
                if !symbols.contains(symbol) {
                    return Err(DecodeError::UnknownSymbol {
                        path: display_path(path),
                        symbol: symbol.to_string(),
                    });
                }
                Value::Symbol(symbol.to_string())
            }
            Model::DateTime => {
                let raw = expect_string(json, path)?;
                let dt = parse_datetime(raw).map_err(|e| DecodeError::InvalidDateTime {
                    path: display_path(path),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })?;
                Value::DateTime(dt)
            }
            Model::Float => Value::Float(json.as_f64().ok_or_else(|| mismatch(path, "number", json))?),
            Model::Int8 => Value::Int8(signed(json, path, "int8")?),
            Model::Int16 => Value::Int16(signed(json, path, "int16")?),
            Model::Int32 => Value::Int32(signed(json, path, "int32")?),
            Model::Int64 => Value::Int64(signed(json, path, "int64")?),
            Model::Uint8 => Value::Uint8(unsigned(json, path, "uint8")?),
            Model::Uint16 => Value::Uint16(unsigned(json, path, "uint16")?),
            Model::Uint32 => Value::Uint32(unsigned(json, path, "uint32")?),
            Model::Uint64 => Value::Uint64(unsigned(json, path, "uint64")?),
            Model::Ref(_) => {
                Value::Ref(RefId::from_json(json).ok_or_else(|| mismatch(path, "[model, id] pair", json))?)
            }
            Model::Tuple(models) => {
                let items = expect_array(json, path)?;
                if items.len() != models.len() {
                    return Err(DecodeError::TupleArity {
                        path: display_path(path),
                        expected: models.len(),
                        found: items.len(),
                    });
                }
                let decoded = models
                    .iter()
                    .zip(items)
                    .enumerate()
                    .map(|(i, (m, v))| m.decode_at(v, env, &child_path(path, &i.to_string())))
                    .collect::<Result<_, _>>()?;
                Value::Tuple(decoded)
            }
            Model::List(model) => Value::List(decode_elements(model, json, env, path)?),
            Model::Set(model) => Value::Set(decode_elements(model, json, env, path)?),
            Model::Map(model) => {
                let obj = expect_object(json, path)?;
                let entries = obj
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), model.decode_at(v, env, &child_path(path, k))?)))
                    .collect::<Result<_, DecodeError>>()?;
                Value::Map(entries)
            }
            Model::Struct(fields) => {
                let obj = expect_object(json, path)?;
                if let Some(unknown) = obj.keys().find(|k| !fields.contains_key(*k)) {
                    return Err(DecodeError::UnknownField {
                        path: display_path(path),
                        field: unknown.clone(),
                    });
                }
                let mut decoded = BTreeMap::new();
                for (name, model) in fields {
                    let value = match obj.get(name) {
                        Some(v) => model.decode_at(v, env, &child_path(path, name))?,
                        None if model.is_optional() => Value::Null,
                        None => {
                            return Err(DecodeError::MissingField {
                                path: display_path(path),
                                field: name.clone(),
                            })
                        }
                    };
                    decoded.insert(name.clone(), value);
                }
                Value::Struct(decoded)
            }
            Model::Union(cases) => {
                let obj = expect_object(json, path)?;
                if obj.len() != 1 {
                    return Err(DecodeError::UnionArity {
                        path: display_path(path),
                        count: obj.len(),
                    });
                }
                let Some((case, payload)) = obj.iter().next() else {
                    return Err(DecodeError::UnionArity {
                        path: display_path(path),
                        count: 0,
                    });
                };
                let model = cases.get(case).ok_or_else(|| DecodeError::UnknownCase {
                    path: display_path(path),
                    case: case.clone(),
                })?;
                let inner = model.decode_at(payload, env, &child_path(path, case))?;
                Value::union(case.clone(), inner)
            }
            Model::Optional(model) => match json {
                Json::Null => Value::Null,
                other => model.decode_at(other, env, path)?,
            },
            Model::Unique(model) | Model::Annotation(_, model) => model.decode_at(json, env, path)?,
            Model::Recursion(rec) => {
                let mut inner = env.to_vec();
                inner.push(vec![(rec.label.as_str(), rec.model.as_ref())]);
                rec.model.decode_at(json, &inner, path)?
            }
            Model::Recursive(bundle) => {
                let top = bundle.models.get(&bundle.top).ok_or_else(|| {
                    DecodeError::UnresolvedRecursion {
                        path: display_path(path),
                        label: bundle.top.clone(),
                    }
                })?;
                let mut inner = env.to_vec();
                inner.push(bundle.models.iter().map(|(k, m)| (k.as_str(), m)).collect());
                top.decode_at(json, &inner, path)?
            }
            Model::Recurse(label) => {
                let (depth, model) = resolve(env, label).ok_or_else(|| {
                    DecodeError::UnresolvedRecursion {
                        path: display_path(path),
                        label: label.clone(),
                    }
                })?;
                model.decode_at(json, &env[..=depth], path)?
            }
        };
        Ok(value)
    }

    /// Record form of this model under the meta-model of collection
    /// `meta_id` (see [`meta_model`]).
    pub fn to_value(&self, meta_id: &str) -> Value {
        let tag = self.tag();
        let payload = match self {
            Model::Ref(target) => Value::reference(meta_id, target.clone()),
            Model::Tuple(items) => Value::List(items.iter().map(|m| m.to_value(meta_id)).collect()),
            Model::List(m) | Model::Set(m) | Model::Map(m) | Model::Optional(m) | Model::Unique(m) => {
                m.to_value(meta_id)
            }
            Model::Struct(entries) | Model::Union(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, m)| (k.clone(), m.to_value(meta_id)))
                    .collect(),
            ),
            Model::Enum(symbols) => {
                Value::Set(symbols.iter().map(|s| Value::String(s.clone())).collect())
            }
            Model::Recursion(rec) => Value::structure([
                ("label", Value::String(rec.label.clone())),
                ("model", rec.model.to_value(meta_id)),
            ]),
            Model::Recurse(label) => Value::String(label.clone()),
            Model::Recursive(bundle) => Value::structure([
                ("top", Value::String(bundle.top.clone())),
                (
                    "models",
                    Value::Map(
                        bundle
                            .models
                            .iter()
                            .map(|(k, m)| (k.clone(), m.to_value(meta_id)))
                            .collect(),
                    ),
                ),
            ]),
            Model::Annotation(text, m) => Value::structure([
                ("value", Value::String(text.clone())),
                ("model", m.to_value(meta_id)),
            ]),
            _ => Value::Struct(BTreeMap::new()),
        };
        Value::union(tag, payload)
    }

    /// Read a model back from its record form.
    pub fn from_value(value: &Value) -> Result<Model, WireError> {
        let (tag, payload) = value
            .as_union()
            .ok_or_else(|| WireError::NotTagged(value.tag().to_string()))?;

        if let Some(scalar) = Model::scalar_from_tag(tag) {
            return Ok(scalar);
        }

        let model = match tag {
            "ref" => Model::Ref(
                payload
                    .as_ref_id()
                    .ok_or_else(|| WireError::payload(tag, "expected reference"))?
                    .id
                    .clone(),
            ),
            "tuple" => Model::Tuple(
                payload
                    .as_elements()
                    .ok_or_else(|| WireError::payload(tag, "expected list"))?
                    .iter()
                    .map(Model::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            "list" => Model::list(Model::from_value(payload)?),
            "set" => Model::set(Model::from_value(payload)?),
            "map" => Model::map(Model::from_value(payload)?),
            "optional" => Model::optional(Model::from_value(payload)?),
            "unique" => Model::unique(Model::from_value(payload)?),
            "struct" => Model::Struct(model_entries(tag, payload)?),
            "union" => Model::Union(model_entries(tag, payload)?),
            "enum" => Model::Enum(
                payload
                    .as_elements()
                    .ok_or_else(|| WireError::payload(tag, "expected set"))?
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| WireError::payload(tag, "expected string symbols"))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            "recursion" => Model::recursion(
                string_field(tag, payload, "label")?,
                Model::from_value(field(tag, payload, "model")?)?,
            ),
            "recurse" => Model::Recurse(
                payload
                    .as_str()
                    .ok_or_else(|| WireError::payload(tag, "expected label"))?
                    .to_string(),
            ),
            "recursive" => Model::recursive(
                string_field(tag, payload, "top")?,
                model_entries(tag, field(tag, payload, "models")?)?,
            ),
            "annotation" => Model::annotation(
                string_field(tag, payload, "value")?,
                Model::from_value(field(tag, payload, "model")?)?,
            ),
            other => return Err(WireError::UnknownTag(other.to_string())),
        };
        Ok(model)
    }
}

/// The model of the collection whose records are model definitions.
///
/// Its records are the [`Model::to_value`] form of every declared model.
/// `meta_id` is the id of that collection, which `ref` payloads point into.
pub fn meta_model(meta_id: &str) -> Model {
    let node = || Model::recurse(META_MODEL_LABEL);
    let empty = || Model::Struct(BTreeMap::new());

    let mut cases: BTreeMap<String, Model> = [
        "null", "bool", "string", "symbol", "dateTime", "float", "int8", "int16", "int32",
        "int64", "uint8", "uint16", "uint32", "uint64",
    ]
    .into_iter()
    .map(|tag| (tag.to_string(), empty()))
    .collect();

    cases.insert("ref".into(), Model::reference(meta_id));
    cases.insert("tuple".into(), Model::list(node()));
    for tag in ["list", "set", "map", "optional", "unique"] {
        cases.insert(tag.into(), node());
    }
    cases.insert("struct".into(), Model::map(node()));
    cases.insert("union".into(), Model::map(node()));
    cases.insert("enum".into(), Model::set(Model::String));
    cases.insert(
        "recursion".into(),
        Model::structure([("label", Model::String), ("model", node())]),
    );
    cases.insert("recurse".into(), Model::String);
    cases.insert(
        "recursive".into(),
        Model::structure([("top", Model::String), ("models", Model::map(node()))]),
    );
    cases.insert(
        "annotation".into(),
        Model::structure([("value", Model::String), ("model", node())]),
    );

    Model::recursive(META_MODEL_LABEL, [(META_MODEL_LABEL, Model::Union(cases))])
}

/// One binder's worth of label bindings.
type Frame<'a> = Vec<(&'a str, &'a Model)>;

/// Find the innermost binding of `label`: the frame depth and the bound model.
fn resolve<'a>(env: &[Frame<'a>], label: &str) -> Option<(usize, &'a Model)> {
    env.iter().enumerate().rev().find_map(|(depth, frame)| {
        frame
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, model)| (depth, *model))
    })
}

/// Replace free `Recurse(label)` nodes with `replacement`.
fn substitute(model: &Model, label: &str, replacement: &Model) -> Model {
    match model {
        Model::Recurse(l) if l == label => replacement.clone(),
        Model::Recursion(rec) if rec.label == label => model.clone(),
        Model::Recursive(bundle) if bundle.models.contains_key(label) => model.clone(),
        _ => model.map_children(|child| substitute(child, label, replacement)),
    }
}

fn decode_elements<'a>(
    model: &'a Model,
    json: &Json,
    env: &[Frame<'a>],
    path: &str,
) -> Result<Vec<Value>, DecodeError> {
    expect_array(json, path)?
        .iter()
        .enumerate()
        .map(|(i, v)| model.decode_at(v, env, &child_path(path, &i.to_string())))
        .collect()
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn child_path(path: &str, segment: &str) -> String {
    format!("{}/{}", path, segment)
}

fn mismatch(path: &str, expected: &'static str, found: &Json) -> DecodeError {
    DecodeError::TypeMismatch {
        path: display_path(path),
        expected,
        found: json_kind(found),
    }
}

fn expect_string<'j>(json: &'j Json, path: &str) -> Result<&'j str, DecodeError> {
    json.as_str().ok_or_else(|| mismatch(path, "string", json))
}

fn expect_array<'j>(json: &'j Json, path: &str) -> Result<&'j Vec<Json>, DecodeError> {
    json.as_array().ok_or_else(|| mismatch(path, "array", json))
}

fn expect_object<'j>(
    json: &'j Json,
    path: &str,
) -> Result<&'j serde_json::Map<String, Json>, DecodeError> {
    json.as_object().ok_or_else(|| mismatch(path, "object", json))
}

/// Signed integers accept any number and round it to the nearest integer.
fn signed<T: TryFrom<i64>>(json: &Json, path: &str, target: &'static str) -> Result<T, DecodeError> {
    let number = json.as_number().ok_or_else(|| mismatch(path, "number", json))?;
    let rounded = match (number.as_i64(), number.as_f64()) {
        (Some(i), _) => Some(i),
        (None, Some(f)) if number.as_u64().is_none() => {
            let r = f.round();
            (r >= i64::MIN as f64 && r < i64::MAX as f64).then_some(r as i64)
        }
        _ => None,
    };
    rounded
        .and_then(|i| T::try_from(i).ok())
        .ok_or_else(|| out_of_range(path, number, target))
}

/// Unsigned integers accept any number and round it to the nearest integer.
fn unsigned<T: TryFrom<u64>>(
    json: &Json,
    path: &str,
    target: &'static str,
) -> Result<T, DecodeError> {
    let number = json.as_number().ok_or_else(|| mismatch(path, "number", json))?;
    let rounded = match (number.as_u64(), number.as_i64(), number.as_f64()) {
        (Some(u), _, _) => Some(u),
        (None, Some(_), _) => None,
        (None, None, Some(f)) => {
            let r = f.round();
            (r >= 0.0 && r < u64::MAX as f64).then_some(r as u64)
        }
        _ => None,
    };
    rounded
        .and_then(|u| T::try_from(u).ok())
        .ok_or_else(|| out_of_range(path, number, target))
}

fn out_of_range(path: &str, number: &serde_json::Number, target: &'static str) -> DecodeError {
    DecodeError::OutOfRange {
        path: display_path(path),
        value: number.to_string(),
        target,
    }
}

fn field<'v>(tag: &str, value: &'v Value, name: &str) -> Result<&'v Value, WireError> {
    value
        .field(name)
        .ok_or_else(|| WireError::payload(tag, format!("missing `{}`", name)))
}

fn string_field(tag: &str, value: &Value, name: &str) -> Result<String, WireError> {
    field(tag, value, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| WireError::payload(tag, format!("`{}` must be a string", name)))
}

fn model_entries(tag: &str, value: &Value) -> Result<BTreeMap<String, Model>, WireError> {
    value
        .as_entries()
        .ok_or_else(|| WireError::payload(tag, "expected map of models"))?
        .iter()
        .map(|(k, v)| Ok((k.clone(), Model::from_value(v)?)))
        .collect()
}
