//! Built-in collections.
//!
//! Every database carries six built-in collections, found through the tag
//! table rather than by fixed id:
//!
//! | tag | records |
//! |-----|---------|
//! | `_model` | model definitions, keyed by the id of the collection they define |
//! | `_tag` | tag name to collection bindings |
//! | `_expression` | stored expressions |
//! | `_migration` | migration declarations between models |
//! | `_role` | roles and their permission expressions |
//! | `_user` | users and their roles |
//!
//! A fresh database also holds an `admins` role and an `admin` user. Those,
//! the tag records of built-in tags, and the definition records of built-in
//! collections are reserved: they are never exported and never replayed.

use std::collections::{BTreeMap, BTreeSet};

use karmasync_proto::{meta_model, Model, Value};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MODEL_TAG: &str = "_model";
pub const TAG_TAG: &str = "_tag";
pub const ROLE_TAG: &str = "_role";
pub const USER_TAG: &str = "_user";
pub const MIGRATION_TAG: &str = "_migration";
pub const EXPRESSION_TAG: &str = "_expression";

/// Built-in tags in the order their collections are replayed.
pub const REQUIRED_FIRST: [&str; 6] = [
    MODEL_TAG,
    TAG_TAG,
    EXPRESSION_TAG,
    MIGRATION_TAG,
    ROLE_TAG,
    USER_TAG,
];

/// Username of the default administrator.
pub const ADMIN_USERNAME: &str = "admin";

/// Name of the default administrator role.
pub const ADMIN_ROLE_NAME: &str = "admins";

/// Model of `_tag` records.
pub fn tag_model(meta_id: &str) -> Model {
    Model::structure([("tag", Model::String), ("model", Model::reference(meta_id))])
}

/// Model of `_expression` records: the serialized expression.
pub fn expression_model() -> Model {
    Model::String
}

/// Model of `_role` records.
pub fn role_model(expression_id: &str) -> Model {
    let permission = || Model::optional(Model::reference(expression_id));
    Model::structure([
        ("name", Model::unique(Model::String)),
        (
            "permissions",
            Model::structure([
                ("create", permission()),
                ("read", permission()),
                ("update", permission()),
                ("delete", permission()),
            ]),
        ),
    ])
}

/// Model of `_user` records.
pub fn user_model(role_id: &str) -> Model {
    Model::structure([
        ("username", Model::unique(Model::String)),
        ("password", Model::String),
        ("roles", Model::list(Model::reference(role_id))),
    ])
}

/// Model of `_migration` records.
pub fn migration_model(meta_id: &str, expression_id: &str) -> Model {
    Model::structure([
        ("source", Model::reference(meta_id)),
        ("target", Model::reference(meta_id)),
        (
            "expression",
            Model::union([
                ("auto", Model::Struct(BTreeMap::new())),
                ("manual", Model::reference(expression_id)),
            ]),
        ),
    ])
}

/// Tag name to collection id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTable(BTreeMap<String, String>);

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a tag to a collection.
    pub fn insert(&mut self, tag: impl Into<String>, collection: impl Into<String>) {
        self.0.insert(tag.into(), collection.into());
    }

    /// Collection bound to a tag.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.0.get(tag).map(String::as_str)
    }

    /// Collection bound to a built-in tag.
    pub fn require(&self, tag: &str) -> Result<&str, ValidationError> {
        self.get(tag).ok_or_else(|| ValidationError::MissingBuiltin {
            tag: tag.to_string(),
        })
    }

    /// The meta collection.
    pub fn meta_collection(&self) -> Result<&str, ValidationError> {
        self.require(MODEL_TAG)
    }

    /// Whether some tag is bound to this collection.
    pub fn binds(&self, collection: &str) -> bool {
        self.0.values().any(|c| c == collection)
    }

    /// Collections bound to built-in tags.
    pub fn builtin_collections(&self) -> BTreeSet<&str> {
        REQUIRED_FIRST.iter().filter_map(|tag| self.get(tag)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(t, c)| (t.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for TagTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        TagTable(iter.into_iter().collect())
    }
}

/// Models of every built-in collection, by tag.
pub fn builtin_models(tags: &TagTable) -> Result<BTreeMap<&'static str, Model>, ValidationError> {
    let meta = tags.require(MODEL_TAG)?;
    let expression = tags.require(EXPRESSION_TAG)?;
    let role = tags.require(ROLE_TAG)?;
    tags.require(TAG_TAG)?;
    tags.require(USER_TAG)?;
    tags.require(MIGRATION_TAG)?;

    Ok(BTreeMap::from([
        (MODEL_TAG, meta_model(meta)),
        (TAG_TAG, tag_model(meta)),
        (EXPRESSION_TAG, expression_model()),
        (MIGRATION_TAG, migration_model(meta, expression)),
        (ROLE_TAG, role_model(expression)),
        (USER_TAG, user_model(role)),
    ]))
}

/// Ids of the reserved default records of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedIds {
    /// The `admin` user.
    pub admin_user: Option<String>,
    /// The `admins` role.
    pub admin_role: Option<String>,
}

impl ReservedIds {
    /// Whether a record of a collection is reserved.
    pub fn contains(&self, record: &str) -> bool {
        self.admin_user.as_deref() == Some(record) || self.admin_role.as_deref() == Some(record)
    }
}

/// Whether a `_user` value is the default administrator.
pub fn is_admin_user(value: &Value) -> bool {
    value.field("username").and_then(Value::as_str) == Some(ADMIN_USERNAME)
}

/// Whether a `_role` value is the default administrator role.
pub fn is_admin_role(value: &Value) -> bool {
    value.field("name").and_then(Value::as_str) == Some(ADMIN_ROLE_NAME)
}

/// Builds `_migration` records.
///
/// Known discrepancy: the record always declares the `auto` expression, even
/// when a manual expression was supplied. Stored migrations therefore never
/// point at their manual expression.
#[derive(Debug, Clone)]
pub struct MigrationRecordBuilder {
    source: String,
    target: String,
    manual: Option<String>,
}

impl MigrationRecordBuilder {
    /// Declare a migration from one model record to another.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            manual: None,
        }
    }

    /// Supply a manual expression record.
    pub fn manual(mut self, expression: impl Into<String>) -> Self {
        self.manual = Some(expression.into());
        self
    }

    /// The manual expression supplied, if any.
    pub fn manual_expression(&self) -> Option<&str> {
        self.manual.as_deref()
    }

    /// Build the record value.
    pub fn build(&self, meta_id: &str) -> Value {
        Value::structure([
            ("source", Value::reference(meta_id, self.source.clone())),
            ("target", Value::reference(meta_id, self.target.clone())),
            ("expression", Value::union("auto", Value::Struct(BTreeMap::new()))),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tags() -> TagTable {
        REQUIRED_FIRST
            .iter()
            .map(|tag| (tag.to_string(), format!("c{}", tag)))
            .collect()
    }

    #[test]
    fn test_tag_table() {
        let tags = tags();
        assert_eq!(tags.meta_collection().unwrap(), "c_model");
        assert!(tags.binds("c_user"));
        assert!(!tags.binds("posts"));
        assert_eq!(tags.builtin_collections().len(), 6);
        assert_eq!(
            TagTable::new().require(USER_TAG),
            Err(ValidationError::MissingBuiltin {
                tag: USER_TAG.into()
            })
        );
    }

    #[test]
    fn test_builtin_models_validate_records() {
        let models = builtin_models(&tags()).unwrap();
        let user = models[USER_TAG]
            .decode(&serde_json::json!({
                "username": "admin",
                "password": "",
                "roles": [["c_role", "r1"]],
            }))
            .unwrap();
        assert!(is_admin_user(&user));

        let role = models[ROLE_TAG]
            .decode(&serde_json::json!({"name": "admins", "permissions": {}}))
            .unwrap();
        assert!(is_admin_role(&role));
        assert_eq!(
            role.field("permissions").and_then(|p| p.field("read")),
            Some(&Value::Null)
        );
    }

    #[test]
    fn test_migration_record_is_always_auto() {
        let builder = MigrationRecordBuilder::new("m1", "m2").manual("e1");
        assert_eq!(builder.manual_expression(), Some("e1"));
        let record = builder.build("meta");
        assert_eq!(
            record.field("expression"),
            Some(&Value::union("auto", Value::Struct(BTreeMap::new())))
        );
        assert_eq!(record.field("source"), Some(&Value::reference("meta", "m1")));

        let model = migration_model("meta", "exprs");
        assert_eq!(model.decode(&record.to_json()).unwrap(), record);
    }

    #[test]
    fn test_reserved_ids() {
        let reserved = ReservedIds {
            admin_user: Some("u1".into()),
            admin_role: None,
        };
        assert!(reserved.contains("u1"));
        assert!(!reserved.contains("r1"));
    }
}
