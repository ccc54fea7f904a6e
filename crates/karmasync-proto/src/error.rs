//! Protocol error types.

use thiserror::Error;

/// Errors produced while decoding JSON against a [`Model`](crate::Model).
///
/// Every variant carries the path of the offending location, rendered as a
/// slash-separated pointer from the decoded root (`/` is the root itself).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The JSON kind does not match the model.
    #[error("{path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Location of the value.
        path: String,
        /// What the model expects.
        expected: &'static str,
        /// What the JSON contained.
        found: &'static str,
    },

    /// A number does not fit the integer width of the model.
    #[error("{path}: {value} is out of range for {target}")]
    OutOfRange {
        /// Location of the value.
        path: String,
        /// The rejected number, as written.
        value: String,
        /// Target integer type.
        target: &'static str,
    },

    /// An object key is not a declared struct field.
    #[error("{path}: unknown field `{field}`")]
    UnknownField {
        /// Location of the struct.
        path: String,
        /// The undeclared key.
        field: String,
    },

    /// A declared, non-optional struct field is absent.
    #[error("{path}: missing field `{field}`")]
    MissingField {
        /// Location of the struct.
        path: String,
        /// The absent field.
        field: String,
    },

    /// A union key is not a declared case.
    #[error("{path}: unknown union case `{case}`")]
    UnknownCase {
        /// Location of the union.
        path: String,
        /// The undeclared case.
        case: String,
    },

    /// A union object does not have exactly one key.
    #[error("{path}: union must have exactly one case, found {count}")]
    UnionArity {
        /// Location of the union.
        path: String,
        /// Number of keys present.
        count: usize,
    },

    /// A tuple array has the wrong number of elements.
    #[error("{path}: expected tuple of {expected} elements, found {found}")]
    TupleArity {
        /// Location of the tuple.
        path: String,
        /// Declared arity.
        expected: usize,
        /// Elements present.
        found: usize,
    },

    /// A string is not one of the enum's symbols.
    #[error("{path}: `{symbol}` is not a member of the enum")]
    UnknownSymbol {
        /// Location of the value.
        path: String,
        /// The rejected symbol.
        symbol: String,
    },

    /// A date-time string could not be parsed as RFC 3339.
    #[error("{path}: invalid date-time `{value}`: {reason}")]
    InvalidDateTime {
        /// Location of the value.
        path: String,
        /// The rejected string.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A `recurse` node has no enclosing binder with its label.
    #[error("{path}: no active binding for recursion label `{label}`")]
    UnresolvedRecursion {
        /// Location of the value.
        path: String,
        /// The unbound label.
        label: String,
    },
}

impl DecodeError {
    /// Location of the offending value.
    pub fn path(&self) -> &str {
        match self {
            DecodeError::TypeMismatch { path, .. }
            | DecodeError::OutOfRange { path, .. }
            | DecodeError::UnknownField { path, .. }
            | DecodeError::MissingField { path, .. }
            | DecodeError::UnknownCase { path, .. }
            | DecodeError::UnionArity { path, .. }
            | DecodeError::TupleArity { path, .. }
            | DecodeError::UnknownSymbol { path, .. }
            | DecodeError::InvalidDateTime { path, .. }
            | DecodeError::UnresolvedRecursion { path, .. } => path,
        }
    }
}

/// Errors produced while reading tagged wire forms (models, value
/// constructors, and model records).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    /// The JSON is not a single-key object.
    #[error("expected a single-key object, found {0}")]
    NotTagged(String),

    /// The tag is not a known variant.
    #[error("unknown tag `{0}`")]
    UnknownTag(String),

    /// The payload under a known tag is malformed.
    #[error("invalid payload for `{tag}`: {reason}")]
    InvalidPayload {
        /// The variant tag.
        tag: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl WireError {
    pub(crate) fn payload(tag: &str, reason: impl Into<String>) -> Self {
        WireError::InvalidPayload {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

/// Short name of a JSON value's kind, for error messages.
pub(crate) fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
