//! Reading a database's built-in catalog through a transport.

use std::collections::{BTreeMap, BTreeSet};

use karmasync_proto::{Expression, Function, Model, Query, RefId, Value};
use tracing::debug;

use crate::builtin::{
    is_admin_role, is_admin_user, role_model, tag_model, user_model, ReservedIds, TagTable,
    EXPRESSION_TAG, MODEL_TAG, REQUIRED_FIRST, ROLE_TAG, TAG_TAG, USER_TAG,
};
use crate::error::MigrationError;
use crate::state::MigrationStatus;
use crate::transport::{RecordRow, Transport};

/// The built-in bindings of one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    /// Tag name to collection id.
    pub tags: TagTable,
    /// Ids of the `_tag` records that bind built-in tags.
    pub builtin_tag_records: BTreeSet<String>,
    /// The default admin user and role.
    pub reserved: ReservedIds,
}

impl Catalog {
    /// Read the tag table and reserved records of a database.
    pub async fn read(
        transport: &dyn Transport,
        page_size: usize,
        stage: MigrationStatus,
    ) -> Result<Catalog, MigrationError> {
        let meta = resolve_tag(transport, MODEL_TAG, stage).await?;
        let tag_collection = resolve_tag(transport, TAG_TAG, stage).await?;

        let rows = fetch_collection(transport, &meta, &tag_collection, page_size, stage).await?;
        let tag_records = decode_rows(&rows, &tag_model(&meta), &tag_collection, stage)?;

        let mut tags = TagTable::new();
        let mut builtin_tag_records = BTreeSet::new();
        for (record, value) in &tag_records {
            let (Some(tag), Some(target)) = (
                value.field("tag").and_then(Value::as_str),
                value.field("model").and_then(Value::as_ref_id),
            ) else {
                continue;
            };
            if REQUIRED_FIRST.contains(&tag) {
                builtin_tag_records.insert(record.clone());
            }
            tags.insert(tag, target.id.clone());
        }
        debug!(tags = tags.len(), "Read tag table");

        let role_collection = tags.require(ROLE_TAG)?.to_string();
        let user_collection = tags.require(USER_TAG)?.to_string();
        let expression = tags.require(EXPRESSION_TAG)?.to_string();

        let roles = fetch_collection(transport, &meta, &role_collection, page_size, stage).await?;
        let roles = decode_rows(&roles, &role_model(&expression), &role_collection, stage)?;
        let users = fetch_collection(transport, &meta, &user_collection, page_size, stage).await?;
        let users = decode_rows(&users, &user_model(&role_collection), &user_collection, stage)?;

        let reserved = ReservedIds {
            admin_role: roles
                .iter()
                .find(|(_, v)| is_admin_role(v))
                .map(|(k, _)| k.clone()),
            admin_user: users
                .iter()
                .find(|(_, v)| is_admin_user(v))
                .map(|(k, _)| k.clone()),
        };

        Ok(Catalog {
            tags,
            builtin_tag_records,
            reserved,
        })
    }

    /// The meta collection id.
    pub fn meta_collection(&self) -> Result<&str, MigrationError> {
        Ok(self.tags.meta_collection()?)
    }
}

/// Collection id bound to a tag.
pub async fn resolve_tag(
    transport: &dyn Transport,
    tag: &str,
    stage: MigrationStatus,
) -> Result<String, MigrationError> {
    let json = transport
        .execute(&Query::single(Expression::tag(tag)))
        .await
        .map_err(|e| MigrationError::transport(stage, e))?;
    RefId::from_json(&json)
        .map(|r| r.id)
        .ok_or_else(|| MigrationError::unexpected(stage, format!("tag {} did not resolve to a reference", tag)))
}

/// Page query: records `offset..offset + length` of a collection, materialized.
pub fn page_query(meta: &str, collection: &str, offset: usize, length: usize) -> Query {
    Query::single(Expression::map_list(
        Expression::slice(
            Expression::all_references(Expression::data(Value::reference(meta, collection))),
            offset,
            length,
        ),
        Function::unary("r", Expression::metarialize(Expression::scope("r"))),
    ))
}

/// Fetch every record of a collection, one page at a time, until a short
/// page. `page_size` must be at least 1.
pub async fn fetch_collection(
    transport: &dyn Transport,
    meta: &str,
    collection: &str,
    page_size: usize,
    stage: MigrationStatus,
) -> Result<Vec<RecordRow>, MigrationError> {
    if page_size == 0 {
        return Err(MigrationError::InvalidConfig {
            reason: "page_size must be at least 1".to_string(),
        });
    }

    let mut rows = Vec::new();
    let mut offset = 0;
    loop {
        let json = transport
            .execute(&page_query(meta, collection, offset, page_size))
            .await
            .map_err(|e| MigrationError::transport(stage, e))?;
        let page: Vec<RecordRow> = serde_json::from_value(json).map_err(|e| {
            MigrationError::unexpected(stage, format!("page of {}: {}", collection, e))
        })?;

        let fetched = page.len();
        debug!(collection, offset, records = fetched, "Fetched page");
        rows.extend(page);

        if fetched < page_size {
            break;
        }
        offset += page_size;
    }
    Ok(rows)
}

/// Decode fetched rows against a collection's model, by record id.
pub fn decode_rows(
    rows: &[RecordRow],
    model: &Model,
    collection: &str,
    stage: MigrationStatus,
) -> Result<BTreeMap<String, Value>, MigrationError> {
    rows.iter()
        .map(|row| {
            let value = model.decode(&row.value).map_err(|source| MigrationError::Decode {
                stage,
                collection: collection.to_string(),
                record: Some(row.record_id().to_string()),
                source,
            })?;
            Ok((row.record_id().to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use serde_json::json;

    #[test]
    fn test_page_query_shape() {
        let json = page_query("m", "posts", 200, 100).to_json();
        assert_eq!(json["function"][1][0]["mapList"][0]["slice"][1], json!(200));
        assert_eq!(json["function"][1][0]["mapList"][0]["slice"][2], json!(100));
    }

    #[tokio::test]
    async fn test_read_fresh_catalog() {
        let db = MemoryDatabase::new();
        let catalog = Catalog::read(&db, 1000, MigrationStatus::Exporting)
            .await
            .unwrap();
        assert_eq!(catalog.tags.len(), 6);
        assert_eq!(catalog.builtin_tag_records.len(), 6);
        assert_eq!(catalog.meta_collection().unwrap(), db.meta_id());
        assert!(catalog.reserved.admin_user.is_some());
        assert!(catalog.reserved.admin_role.is_some());
    }

    #[tokio::test]
    async fn test_fetch_pages_until_short_page() {
        let db = MemoryDatabase::new();
        let posts = db
            .define(&Model::structure([("n", Model::Int32)]))
            .unwrap();
        for n in 0..5 {
            db.insert(&posts, Value::structure([("n", Value::Int32(n))]))
                .unwrap();
        }
        let rows = fetch_collection(&db, db.meta_id().as_str(), &posts, 2, MigrationStatus::Exporting)
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
    }

    #[tokio::test]
    async fn test_zero_page_size_is_rejected() {
        let db = MemoryDatabase::new();
        let tags = db.collection_id(TAG_TAG).unwrap();
        let err = fetch_collection(&db, db.meta_id().as_str(), &tags, 0, MigrationStatus::Exporting)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidConfig { .. }));

        let err = Catalog::read(&db, 0, MigrationStatus::Exporting)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidConfig { .. }));
    }

    #[test]
    fn test_decode_failure_names_record() {
        let row = RecordRow {
            id: ("posts".into(), "p1".into()),
            model: ("m".into(), "posts".into()),
            value: json!({"n": "x"}),
            created: chrono::Utc::now(),
            updated: chrono::Utc::now(),
        };
        let err = decode_rows(
            &[row],
            &Model::structure([("n", Model::Int32)]),
            "posts",
            MigrationStatus::Exporting,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Decode { record: Some(ref r), .. } if r == "p1"
        ));
    }
}
