//! In-process database.
//!
//! [`MemoryDatabase`] keeps records in ordered maps and implements
//! [`Transport`] by evaluating the expression nodes the migration engine
//! sends. Every write is decoded against its collection's model, so an
//! invalid record is rejected just as a remote database would reject it.
//! The whole store exports to, and imports from, JSON bytes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karmasync_proto::{
    meta_model, Expression, Function, Model, Query, RefId, Value, PLACEHOLDER_SCOPE,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use tracing::{debug, info, warn};

use crate::builtin::{
    expression_model, migration_model, role_model, tag_model, user_model, ADMIN_ROLE_NAME,
    ADMIN_USERNAME, EXPRESSION_TAG, MIGRATION_TAG, MODEL_TAG, REQUIRED_FIRST, ROLE_TAG, TAG_TAG,
    USER_TAG,
};
use crate::error::TransportError;
use crate::state::generate_id;
use crate::transport::{RecordRow, Transport};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    value: Value,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Collection {
    model: Model,
    records: BTreeMap<String, StoredRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Store {
    meta: String,
    tag_collection: String,
    collections: BTreeMap<String, Collection>,
}

type Scope = HashMap<String, Json>;

impl Store {
    /// A fresh store: built-in collections, their definitions and tags, the
    /// admin role and the admin user.
    fn bootstrap() -> Store {
        let ids: BTreeMap<&str, String> = REQUIRED_FIRST
            .iter()
            .map(|tag| (*tag, generate_id()))
            .collect();
        let id = |tag: &str| ids.get(tag).cloned().unwrap_or_default();
        let meta = id(MODEL_TAG);

        let models = [
            (MODEL_TAG, meta_model(&meta)),
            (TAG_TAG, tag_model(&meta)),
            (EXPRESSION_TAG, expression_model()),
            (MIGRATION_TAG, migration_model(&meta, &id(EXPRESSION_TAG))),
            (ROLE_TAG, role_model(&id(EXPRESSION_TAG))),
            (USER_TAG, user_model(&id(ROLE_TAG))),
        ];

        let mut store = Store {
            meta: meta.clone(),
            tag_collection: id(TAG_TAG),
            collections: BTreeMap::new(),
        };

        for (tag, model) in &models {
            store.collections.insert(
                id(*tag),
                Collection {
                    model: model.clone(),
                    records: BTreeMap::new(),
                },
            );
        }
        for (tag, model) in &models {
            let collection = id(*tag);
            store.put(&meta, collection.clone(), model.to_value(&meta));
            store.put(
                &id(TAG_TAG),
                generate_id(),
                Value::structure([
                    ("tag", Value::from(*tag)),
                    ("model", Value::reference(meta.clone(), collection)),
                ]),
            );
        }

        let admin_role = generate_id();
        store.put(
            &id(ROLE_TAG),
            admin_role.clone(),
            Value::structure([
                ("name", Value::from(ADMIN_ROLE_NAME)),
                (
                    "permissions",
                    Value::structure(
                        ["create", "read", "update", "delete"].map(|p| (p, Value::Null)),
                    ),
                ),
            ]),
        );
        store.put(
            &id(USER_TAG),
            generate_id(),
            Value::structure([
                ("username", Value::from(ADMIN_USERNAME)),
                ("password", Value::from("")),
                ("roles", Value::List(vec![Value::reference(id(ROLE_TAG), admin_role)])),
            ]),
        );
        store
    }

    /// Insert without validation; used only while bootstrapping.
    fn put(&mut self, collection: &str, record: String, value: Value) {
        let now = Utc::now();
        if let Some(target) = self.collections.get_mut(collection) {
            target.records.insert(
                record,
                StoredRecord {
                    value,
                    created: now,
                    updated: now,
                },
            );
        }
    }

    fn collection(&self, id: &str) -> Result<&Collection, TransportError> {
        self.collections
            .get(id)
            .ok_or_else(|| TransportError::Server(format!("unknown collection {}", id)))
    }

    /// Decode and insert a batch of new records atomically. New records of
    /// the meta collection also define collections.
    fn create(
        &mut self,
        collection: &str,
        values: Vec<(String, Json)>,
    ) -> Result<(), TransportError> {
        let model = self.collection(collection)?.model.clone();
        let mut decoded = Vec::with_capacity(values.len());
        let mut defined = Vec::new();
        for (id, json) in values {
            let value = model.decode(&json).map_err(|e| {
                TransportError::Server(format!("invalid record for {}: {}", collection, e))
            })?;
            if collection == self.meta {
                let model = Model::from_value(&value)
                    .map_err(|e| TransportError::Server(format!("invalid model: {}", e)))?;
                defined.push((id.clone(), model));
            }
            decoded.push((id, value));
        }

        let now = Utc::now();
        if let Some(target) = self.collections.get_mut(collection) {
            for (id, value) in decoded {
                target.records.insert(
                    id,
                    StoredRecord {
                        value,
                        created: now,
                        updated: now,
                    },
                );
            }
        }
        for (id, model) in defined {
            self.collections.insert(
                id,
                Collection {
                    model,
                    records: BTreeMap::new(),
                },
            );
        }
        Ok(())
    }

    fn run(&mut self, query: &Query) -> Result<Json, TransportError> {
        let scope = Scope::new();
        let mut results = query
            .body()
            .iter()
            .map(|expr| self.eval(expr, &scope))
            .collect::<Result<Vec<_>, _>>()?;
        if results.len() == 1 {
            Ok(results.remove(0))
        } else {
            Ok(Json::Array(results))
        }
    }

    fn call(
        &mut self,
        function: &Function,
        args: Vec<Json>,
        scope: &Scope,
    ) -> Result<Json, TransportError> {
        if function.params.len() != args.len() {
            return Err(TransportError::Server(format!(
                "function expects {} arguments, got {}",
                function.params.len(),
                args.len()
            )));
        }
        let mut inner = scope.clone();
        inner.extend(function.params.iter().cloned().zip(args));
        let mut result = Json::Null;
        for expr in &function.body {
            result = self.eval(expr, &inner)?;
        }
        Ok(result)
    }

    fn eval(&mut self, expr: &Expression, scope: &Scope) -> Result<Json, TransportError> {
        match expr {
            Expression::Data(value) => Ok(bind(value, scope)?.to_json()),
            Expression::Scope(name) => scope
                .get(name)
                .cloned()
                .ok_or_else(|| TransportError::Server(format!("unbound variable {}", name))),
            Expression::Field(name, of) => {
                let target = self.eval(of, scope)?;
                target
                    .get(name)
                    .cloned()
                    .ok_or_else(|| TransportError::Server(format!("no field {}", name)))
            }
            Expression::Tag(name) => {
                let bound = self
                    .collection(&self.tag_collection)?
                    .records
                    .values()
                    .find(|r| r.value.field("tag").and_then(Value::as_str) == Some(name.as_str()))
                    .and_then(|r| r.value.field("model"))
                    .and_then(Value::as_ref_id)
                    .cloned()
                    .ok_or_else(|| TransportError::Server(format!("unknown tag {}", name)))?;
                Ok(bound.to_json())
            }
            Expression::AllReferences(model) => {
                let collection = self.model_ref(model, scope)?;
                let refs = self
                    .collection(&collection)?
                    .records
                    .keys()
                    .map(|id| RefId::new(collection.clone(), id.clone()).to_json())
                    .collect();
                Ok(Json::Array(refs))
            }
            Expression::Slice {
                value,
                offset,
                length,
            } => {
                let items = self.eval(value, scope)?;
                let items = items
                    .as_array()
                    .ok_or_else(|| TransportError::Server("slice of a non-list".to_string()))?;
                let start = (*offset).min(items.len());
                let end = offset.saturating_add(*length).min(items.len());
                Ok(Json::Array(items[start..end].to_vec()))
            }
            Expression::MapList { value, function } => {
                let items = self.eval(value, scope)?;
                let Json::Array(items) = items else {
                    return Err(TransportError::Server("mapList over a non-list".to_string()));
                };
                let mapped = items
                    .into_iter()
                    .map(|item| self.call(function, vec![item], scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Json::Array(mapped))
            }
            Expression::Metarialize(reference) => {
                let target = self.eval(reference, scope)?;
                let target = RefId::from_json(&target).ok_or_else(|| {
                    TransportError::Server("metarialize of a non-reference".to_string())
                })?;
                let record = self
                    .collection(&target.model)?
                    .records
                    .get(&target.id)
                    .ok_or_else(|| TransportError::Server(format!("no record {}", target)))?;
                let row = RecordRow {
                    id: (target.model.clone(), target.id.clone()),
                    model: (self.meta.clone(), target.model.clone()),
                    value: record.value.to_json(),
                    created: record.created,
                    updated: record.updated,
                };
                serde_json::to_value(row).map_err(|e| TransportError::Server(e.to_string()))
            }
            Expression::CreateMultiple { model, values } => {
                let collection = self.model_ref(model, scope)?;
                self.collection(&collection)?;

                let ids: BTreeMap<&String, String> =
                    values.keys().map(|key| (key, generate_id())).collect();
                let refs: JsonMap<String, Json> = ids
                    .iter()
                    .map(|(key, id)| {
                        (key.to_string(), RefId::new(collection.clone(), id.clone()).to_json())
                    })
                    .collect();
                let refs = Json::Object(refs);

                let mut created = Vec::with_capacity(values.len());
                for (key, function) in values {
                    let json = self.call(function, vec![refs.clone()], scope)?;
                    let id = ids.get(key).cloned().unwrap_or_default();
                    created.push((id, json));
                }
                self.create(&collection, created)?;
                debug!(collection = %collection, records = values.len(), "Created records");
                Ok(refs)
            }
        }
    }

    /// Evaluate an expression that must name a collection through its model
    /// record reference.
    fn model_ref(&mut self, expr: &Expression, scope: &Scope) -> Result<String, TransportError> {
        let json = self.eval(expr, scope)?;
        match RefId::from_json(&json) {
            Some(r) if r.model == self.meta => Ok(r.id),
            _ => Err(TransportError::Server(format!(
                "expected a model reference, got {}",
                json
            ))),
        }
    }
}

/// Resolve the placeholders in a literal against the `refs` bound in scope.
fn bind(value: &Value, scope: &Scope) -> Result<Value, TransportError> {
    let mut unresolved = None;
    let bound = value.clone().transform(&mut |v| match v {
        Value::Placeholder(key) => {
            let resolved = scope
                .get(PLACEHOLDER_SCOPE)
                .and_then(|refs| refs.get(&key))
                .and_then(RefId::from_json);
            match resolved {
                Some(r) => Value::Ref(r),
                None => {
                    unresolved.get_or_insert(key.clone());
                    Value::Placeholder(key)
                }
            }
        }
        other => other,
    });
    match unresolved {
        Some(key) => Err(TransportError::Server(format!("unresolved placeholder {}", key))),
        None => Ok(bound),
    }
}

/// An in-process database.
pub struct MemoryDatabase {
    store: Mutex<Store>,
}

impl MemoryDatabase {
    /// Create a database holding only the built-in records.
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::bootstrap()),
        }
    }

    /// Restore a database from bytes produced by [`Transport::export`].
    pub fn from_snapshot(data: &[u8]) -> Result<Self, TransportError> {
        let store: Store = serde_json::from_slice(data)
            .map_err(|e| TransportError::InvalidResponse(format!("snapshot: {}", e)))?;
        Ok(Self {
            store: Mutex::new(store),
        })
    }

    /// Serialize the whole store.
    pub fn snapshot(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec_pretty(&*self.store.lock())
            .map_err(|e| TransportError::Server(e.to_string()))
    }

    /// Id of the meta collection.
    pub fn meta_id(&self) -> String {
        self.store.lock().meta.clone()
    }

    /// Collection bound to a tag.
    pub fn collection_id(&self, tag: &str) -> Option<String> {
        let mut store = self.store.lock();
        let json = store.eval(&Expression::tag(tag), &Scope::new()).ok()?;
        RefId::from_json(&json).map(|r| r.id)
    }

    /// Define a new collection and return its id.
    pub fn define(&self, model: &Model) -> Result<String, TransportError> {
        self.define_with(|_| model.clone())
    }

    /// Define a new collection whose model may mention the collection's own
    /// id.
    pub fn define_with<F>(&self, model: F) -> Result<String, TransportError>
    where
        F: FnOnce(&str) -> Model,
    {
        let mut store = self.store.lock();
        let id = generate_id();
        let meta = store.meta.clone();
        let definition = model(&id).to_value(&meta).to_json();
        store.create(&meta, vec![(id.clone(), definition)])?;
        Ok(id)
    }

    /// Insert a record into a collection and return its id.
    pub fn insert(&self, collection: &str, value: Value) -> Result<String, TransportError> {
        let mut store = self.store.lock();
        let id = generate_id();
        store.create(collection, vec![(id.clone(), value.to_json())])?;
        Ok(id)
    }

    /// Records of a collection, by id.
    pub fn records(&self, collection: &str) -> BTreeMap<String, Value> {
        self.store
            .lock()
            .collections
            .get(collection)
            .map(|c| {
                c.records
                    .iter()
                    .map(|(id, r)| (id.clone(), r.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of every collection.
    pub fn collection_ids(&self) -> Vec<String> {
        self.store.lock().collections.keys().cloned().collect()
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryDatabase {
    async fn execute(&self, query: &Query) -> Result<Json, TransportError> {
        self.store.lock().run(query)
    }

    async fn export(&self) -> Result<Vec<u8>, TransportError> {
        self.snapshot()
    }

    async fn import(&self, data: Vec<u8>) -> Result<bool, TransportError> {
        match serde_json::from_slice::<Store>(&data) {
            Ok(store) => {
                *self.store.lock() = store;
                info!(bytes = data.len(), "Imported snapshot");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Rejected snapshot");
                Ok(false)
            }
        }
    }

    async fn reset_database(&self) -> Result<(), TransportError> {
        *self.store.lock() = Store::bootstrap();
        info!("Reset database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn authors(db: &MemoryDatabase) -> String {
        db.define(&Model::structure([
            ("name", Model::String),
            ("mentor", Model::optional(Model::reference("self"))),
        ]))
        .unwrap()
    }

    #[test]
    fn test_bootstrap_binds_builtin_tags() {
        let db = MemoryDatabase::new();
        for tag in REQUIRED_FIRST {
            assert!(db.collection_id(tag).is_some(), "{} unbound", tag);
        }
        assert_eq!(db.collection_id(MODEL_TAG), Some(db.meta_id()));
        let users = db.records(&db.collection_id(USER_TAG).unwrap());
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_create_multiple_binds_placeholders() {
        let db = MemoryDatabase::new();
        let people = db
            .define(&Model::structure([
                ("name", Model::String),
                ("friend", Model::optional(Model::reference("any"))),
            ]))
            .unwrap();

        let values = [
            (
                "a".to_string(),
                Function::unary(
                    PLACEHOLDER_SCOPE,
                    Expression::data(Value::structure([
                        ("name", Value::from("A")),
                        ("friend", Value::Placeholder("b".into())),
                    ])),
                ),
            ),
            (
                "b".to_string(),
                Function::unary(
                    PLACEHOLDER_SCOPE,
                    Expression::data(Value::structure([
                        ("name", Value::from("B")),
                        ("friend", Value::Null),
                    ])),
                ),
            ),
        ]
        .into_iter()
        .collect();
        let query = Query::single(Expression::create_multiple(
            Expression::data(Value::reference(db.meta_id(), people.clone())),
            values,
        ));

        let response = db.execute(&query).await.unwrap();
        let a = RefId::from_json(&response["a"]).unwrap();
        let b = RefId::from_json(&response["b"]).unwrap();
        assert_eq!(a.model, people);

        let records = db.records(&people);
        assert_eq!(records[&a.id].field("friend"), Some(&Value::Ref(b)));
    }

    #[tokio::test]
    async fn test_invalid_record_rejected_without_partial_write() {
        let db = MemoryDatabase::new();
        let collection = authors(&db);
        let values = [
            (
                "ok".to_string(),
                Function::unary(
                    PLACEHOLDER_SCOPE,
                    Expression::data(Value::structure([("name", Value::from("x"))])),
                ),
            ),
            (
                "bad".to_string(),
                Function::unary(
                    PLACEHOLDER_SCOPE,
                    Expression::data(Value::structure([("age", Value::Int8(1))])),
                ),
            ),
        ]
        .into_iter()
        .collect();
        let query = Query::single(Expression::create_multiple(
            Expression::data(Value::reference(db.meta_id(), collection.clone())),
            values,
        ));
        let err = db.execute(&query).await.unwrap_err();
        assert!(matches!(err, TransportError::Server(_)));
        assert!(db.records(&collection).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_collection_rejected() {
        let db = MemoryDatabase::new();
        let err = db.insert("nope", Value::Null).unwrap_err();
        assert_eq!(err, TransportError::Server("unknown collection nope".into()));

        let query = Query::single(Expression::all_references(Expression::data(
            Value::reference(db.meta_id(), "nope"),
        )));
        assert!(db.execute(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_query_with_several_expressions_returns_array() {
        let db = MemoryDatabase::new();
        let query = Query::new(vec![Expression::tag(MODEL_TAG), Expression::tag(TAG_TAG)]);
        let result = db.execute(&query).await.unwrap();
        assert_eq!(result.as_array().map(Vec::len), Some(2));
        assert_eq!(result[0], json!([db.meta_id(), db.meta_id()]));
    }

    #[tokio::test]
    async fn test_export_import_and_reset() {
        let db = MemoryDatabase::new();
        let collection = authors(&db);
        db.insert(&collection, Value::structure([("name", Value::from("Ada"))]))
            .unwrap();
        let bytes = db.export().await.unwrap();

        let meta = db.meta_id();
        db.reset_database().await.unwrap();
        assert_ne!(db.meta_id(), meta);
        assert!(db.records(&collection).is_empty());

        assert!(db.import(bytes).await.unwrap());
        assert_eq!(db.meta_id(), meta);
        assert_eq!(db.records(&collection).len(), 1);

        assert!(!db.import(b"not json".to_vec()).await.unwrap());
        assert_eq!(db.records(&collection).len(), 1);
    }
}
