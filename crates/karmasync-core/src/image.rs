//! Record images.
//!
//! A [`RecordImage`] is a complete in-memory snapshot of a database's
//! user-visible records, grouped by collection. It is built once per
//! migration by paging through the source, then rewritten, transformed and
//! replayed.

use std::collections::BTreeMap;

use karmasync_proto::{meta_model, Model, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::builtin::{ReservedIds, TagTable, MODEL_TAG, ROLE_TAG, TAG_TAG, USER_TAG};
use crate::catalog::{decode_rows, fetch_collection, Catalog};
use crate::error::MigrationError;
use crate::state::MigrationStatus;
use crate::transport::Transport;

/// Records by collection id, then record id.
pub type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Snapshot of a source database's records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordImage {
    /// The source's tag table.
    pub tags: TagTable,
    /// The source's reserved default records, excluded from `collections`.
    pub reserved: ReservedIds,
    /// Records by collection.
    pub collections: Collections,
}

impl RecordImage {
    /// Create an empty image for a source with these bindings.
    pub fn new(tags: TagTable, reserved: ReservedIds) -> Self {
        Self {
            tags,
            reserved,
            collections: BTreeMap::new(),
        }
    }

    /// Add an empty collection if it is not present yet.
    pub fn add_collection(&mut self, collection: impl Into<String>) {
        self.collections.entry(collection.into()).or_default();
    }

    /// Insert a record.
    pub fn insert(&mut self, collection: impl Into<String>, record: impl Into<String>, value: Value) {
        self.collections
            .entry(collection.into())
            .or_default()
            .insert(record.into(), value);
    }

    /// Records of a collection.
    pub fn collection(&self, collection: &str) -> Option<&BTreeMap<String, Value>> {
        self.collections.get(collection)
    }

    /// Records of the meta collection: model definitions by collection id.
    pub fn models(&self) -> Option<&BTreeMap<String, Value>> {
        let meta = self.tags.get(MODEL_TAG)?;
        self.collections.get(meta)
    }

    /// Total number of records.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Iterate over collection ids.
    pub fn collection_ids(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}

/// Build the record image of a source database.
///
/// Pages through the meta collection to find every declared collection, then
/// through each collection. Reserved records are left out.
pub async fn build_image(
    source: &dyn Transport,
    page_size: usize,
) -> Result<RecordImage, MigrationError> {
    let stage = MigrationStatus::Exporting;
    let catalog = Catalog::read(source, page_size, stage).await?;
    let meta = catalog.meta_collection()?.to_string();

    let meta_rows = fetch_collection(source, &meta, &meta, page_size, stage).await?;
    let definitions = decode_rows(&meta_rows, &meta_model(&meta), &meta, stage)?;

    let mut models = BTreeMap::new();
    for (collection, record) in &definitions {
        let model = Model::from_value(record).map_err(|source| MigrationError::InvalidModel {
            stage,
            record: collection.clone(),
            source,
        })?;
        models.insert(collection.clone(), model);
    }

    let mut image = RecordImage::new(catalog.tags.clone(), catalog.reserved.clone());
    image.collections.insert(meta.clone(), definitions);

    for (collection, model) in &models {
        if *collection == meta {
            continue;
        }
        let rows = fetch_collection(source, &meta, collection, page_size, stage).await?;
        let records = decode_rows(&rows, model, collection, stage)?;
        debug!(collection = %collection, records = records.len(), "Exported collection");
        image.collections.insert(collection.clone(), records);
    }

    exclude_reserved(&mut image, &catalog);

    info!(
        collections = image.collections.len(),
        records = image.record_count(),
        "Built record image"
    );
    Ok(image)
}

/// Drop the reserved records from an image: built-in collection definitions,
/// built-in tag records, the admin user and the admin role.
fn exclude_reserved(image: &mut RecordImage, catalog: &Catalog) {
    let mut excluded = 0;
    if let Ok(meta) = catalog.tags.meta_collection() {
        if let Some(definitions) = image.collections.get_mut(meta) {
            for collection in catalog.tags.builtin_collections() {
                excluded += usize::from(definitions.remove(collection).is_some());
            }
        }
    }
    if let Some(tags) = catalog.tags.get(TAG_TAG).and_then(|c| image.collections.get_mut(c)) {
        for record in &catalog.builtin_tag_records {
            excluded += usize::from(tags.remove(record).is_some());
        }
    }
    for (tag, reserved) in [
        (USER_TAG, &catalog.reserved.admin_user),
        (ROLE_TAG, &catalog.reserved.admin_role),
    ] {
        let (Some(collection), Some(record)) = (catalog.tags.get(tag), reserved) else {
            continue;
        };
        if let Some(records) = image.collections.get_mut(collection) {
            excluded += usize::from(records.remove(record).is_some());
        }
    }
    debug!(excluded, "Excluded reserved records");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fresh_database_image_is_empty() {
        let db = MemoryDatabase::new();
        let image = build_image(&db, 1000).await.unwrap();
        assert_eq!(image.record_count(), 0);
        assert_eq!(image.collections.len(), 6);
        assert_eq!(image.tags.get(MODEL_TAG), Some(db.meta_id().as_str()));
        assert!(image.reserved.admin_user.is_some());
    }

    #[tokio::test]
    async fn test_zero_page_size_fails_instead_of_looping() {
        let db = MemoryDatabase::new();
        let err = build_image(&db, 0).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_image_holds_user_collections() {
        let db = MemoryDatabase::new();
        let authors = db
            .define(&Model::structure([("name", Model::String)]))
            .unwrap();
        let posts = db
            .define(&Model::structure([
                ("title", Model::String),
                ("author", Model::reference(authors.clone())),
            ]))
            .unwrap();
        let ada = db
            .insert(&authors, Value::structure([("name", Value::from("Ada"))]))
            .unwrap();
        db.insert(
            &posts,
            Value::structure([
                ("title", Value::from("Notes")),
                ("author", Value::reference(authors.clone(), ada.clone())),
            ]),
        )
        .unwrap();

        let image = build_image(&db, 1).await.unwrap();
        assert_eq!(image.models().map(BTreeMap::len), Some(2));
        assert_eq!(image.collection(&authors).map(BTreeMap::len), Some(1));
        let post = image.collection(&posts).and_then(|c| c.values().next()).unwrap();
        assert_eq!(post.field("author"), Some(&Value::reference(authors, ada)));
        assert_eq!(image.record_count(), 4);
    }

    #[test]
    fn test_image_serde() {
        let mut image = RecordImage::default();
        image.tags.insert(MODEL_TAG, "m");
        image.insert("posts", "p1", Value::structure([("n", Value::Uint8(3))]));
        let text = serde_json::to_string(&image).unwrap();
        let back: RecordImage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, image);
    }
}
