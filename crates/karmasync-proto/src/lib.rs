//! karmasync schema and value types.
//!
//! This crate defines the two algebras every other karmasync crate works
//! with, and the expression subset used to talk to a database.
//!
//! # Modules
//!
//! - [`value`] - Decoded runtime values and their tagged constructor form
//! - [`model`] - Schema descriptors, JSON decoding, transforms, record form
//! - [`wire`] - Lossless tagged JSON form of models
//! - [`expr`] - Query expressions and their JSON encoding
//! - [`error`] - Decode and wire errors
//!
//! # Decoding
//!
//! ```
//! use karmasync_proto::{Model, Value};
//! use serde_json::json;
//!
//! let model = Model::structure([
//!     ("name", Model::String),
//!     ("age", Model::optional(Model::Uint8)),
//! ]);
//! let value = model.decode(&json!({"name": "Ada"})).unwrap();
//! assert_eq!(value.field("age"), Some(&Value::Null));
//! ```

pub mod error;
pub mod expr;
pub mod model;
pub mod value;
pub mod wire;

pub use error::{DecodeError, WireError};
pub use expr::{Expression, Function, Query};
pub use model::{meta_model, BindingId, Model, Recursion, Recursive, META_MODEL_LABEL};
pub use value::{RefId, Value, PLACEHOLDER_SCOPE};
