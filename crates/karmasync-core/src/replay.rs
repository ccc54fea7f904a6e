//! Replaying a record image into a target database.
//!
//! The target is reset, built-in ids are rewritten to the target's, the
//! caller's transform runs, every collection is checked for a model, and the
//! collections are written in dependency order. Each chunk is one
//! `createMultiple` request; the ids the target assigns are folded into the
//! remap table so later chunks can reference them.

use std::collections::{BTreeMap, BTreeSet};

use karmasync_proto::{Expression, Function, Query, RefId, Value, PLACEHOLDER_SCOPE};
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::builtin::{TagTable, REQUIRED_FIRST};
use crate::catalog::Catalog;
use crate::chunk::{chunk_count, chunk_records};
use crate::config::MigrationConfig;
use crate::error::{MigrationError, ValidationError};
use crate::graph::DependencyGraph;
use crate::image::RecordImage;
use crate::remap::RemapTable;
use crate::schedule::{Schedule, Scheduler};
use crate::state::{CollectionProgress, MigrationState, MigrationStatus};
use crate::transport::Transport;

/// A caller-supplied rewrite of the image, run after built-in ids have been
/// mapped to the target. It receives the source and target tag tables.
pub type ImageTransform = dyn Fn(RecordImage, &TagTable, &TagTable) -> RecordImage + Send + Sync;

/// The transform that leaves the image unchanged.
pub fn identity_transform(image: RecordImage, _old: &TagTable, _new: &TagTable) -> RecordImage {
    image
}

/// Result of a replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    /// Every old id the target replaced.
    pub remap: RemapTable,
    /// The order collections were written in.
    pub schedule: Schedule,
}

/// Replay an image into `target`, advancing `state` from `Exporting` through
/// `Replaying`.
///
/// In dry-run mode the target is neither reset nor written; every other stage
/// runs against its current catalog.
pub async fn replay(
    target: &dyn Transport,
    image: RecordImage,
    transform: &ImageTransform,
    config: &MigrationConfig,
    state: &mut MigrationState,
) -> Result<ReplayOutcome, MigrationError> {
    state.advance(MigrationStatus::Rewriting)?;
    if !config.dry_run {
        target
            .reset_database()
            .await
            .map_err(|e| MigrationError::transport(MigrationStatus::Rewriting, e))?;
        info!(migration_id = %state.migration_id, "Reset target database");
    }
    let catalog = Catalog::read(target, config.page_size, MigrationStatus::Rewriting).await?;
    let old_tags = image.tags.clone();
    let new_tags = catalog.tags.clone();

    let mut remap = seed_remap(&image, &catalog);
    let image = remap.rewrite_image(image);
    debug!(remapped = remap.len(), "Rewrote built-in ids");

    state.advance(MigrationStatus::UserTransforming)?;
    let image = transform(image, &old_tags, &new_tags);

    state.advance(MigrationStatus::Validating)?;
    validate(&image, &new_tags)?;

    state.advance(MigrationStatus::Scheduling)?;
    let graph = DependencyGraph::from_image(&image);
    let required_first: Vec<String> = REQUIRED_FIRST
        .iter()
        .filter_map(|tag| new_tags.get(tag))
        .map(str::to_string)
        .collect();
    let schedule = Scheduler::order(&graph, &required_first)?;
    state.collections = schedule
        .order
        .iter()
        .map(|collection| {
            let records = image.collection(collection).map_or(0, BTreeMap::len);
            let chunks = chunk_count(
                records,
                config.chunk_size,
                schedule.is_self_referential(collection),
            );
            CollectionProgress::new(collection.clone(), records as u64, chunks)
        })
        .collect();
    info!(
        collections = schedule.order.len(),
        self_referential = schedule.self_referential.len(),
        "Scheduled replay"
    );

    state.advance(MigrationStatus::Replaying)?;
    let meta = new_tags.meta_collection()?.to_string();
    for collection in &schedule.order {
        let records = match image.collection(collection) {
            Some(records) if !records.is_empty() && !config.dry_run => records,
            _ => {
                if let Some(progress) = state.collection_mut(collection) {
                    progress.skip();
                }
                continue;
            }
        };
        if let Some(progress) = state.collection_mut(collection) {
            progress.start();
        }

        let destination = remap.resolve(collection).to_string();
        let chunks = chunk_records(
            records,
            config.chunk_size,
            schedule.is_self_referential(collection),
        );
        for chunk in chunks {
            let keys = chunk.keys();
            let values: BTreeMap<String, Function> = chunk
                .records
                .iter()
                .map(|(key, value)| {
                    let bound = remap.bind_chunk((*value).clone(), &keys);
                    (
                        key.to_string(),
                        Function::unary(PLACEHOLDER_SCOPE, Expression::data(bound)),
                    )
                })
                .collect();
            let query = Query::single(Expression::create_multiple(
                Expression::data(Value::reference(meta.clone(), destination.clone())),
                values,
            ));

            let response = match target.execute(&query).await {
                Ok(response) => response,
                Err(source) => {
                    if let Some(progress) = state.collection_mut(collection) {
                        progress.fail(source.to_string());
                    }
                    return Err(MigrationError::Transport {
                        stage: MigrationStatus::Replaying,
                        payload: Some(query.to_json().to_string()),
                        source,
                    });
                }
            };
            merge_response(&mut remap, &keys, &response)?;

            if let Some(progress) = state.collection_mut(collection) {
                progress.chunk_written(chunk.len());
            }
            debug!(
                collection = %collection,
                chunk = chunk.index,
                records = chunk.len(),
                "Wrote chunk"
            );
        }

        if let Some(progress) = state.collection_mut(collection) {
            progress.complete();
        }
        info!(
            collection = %collection,
            destination = %destination,
            records = records.len(),
            "Replayed collection"
        );
    }

    Ok(ReplayOutcome { remap, schedule })
}

/// Initial remap entries: source built-in collections to the target's, and
/// the source's default admin records to the target's.
fn seed_remap(image: &RecordImage, target: &Catalog) -> RemapTable {
    let mut remap = RemapTable::new();
    for (tag, old) in image.tags.iter() {
        if let Some(new) = target.tags.get(tag) {
            remap.insert(old, new);
        }
    }
    for (old, new) in [
        (&image.reserved.admin_user, &target.reserved.admin_user),
        (&image.reserved.admin_role, &target.reserved.admin_role),
    ] {
        if let (Some(old), Some(new)) = (old, new) {
            remap.insert(old.clone(), new.clone());
        }
    }
    remap
}

/// Every image collection must be a target collection or be declared by a
/// record of the image's meta collection.
pub fn validate(image: &RecordImage, tags: &TagTable) -> Result<(), ValidationError> {
    let meta = tags.meta_collection()?;
    let declared: BTreeSet<&str> = image
        .collection(meta)
        .map(|models| models.keys().map(String::as_str).collect())
        .unwrap_or_default();
    match image
        .collection_ids()
        .find(|c| !tags.binds(c) && !declared.contains(c))
    {
        Some(collection) => Err(ValidationError::MissingModel {
            collection: collection.to_string(),
        }),
        None => Ok(()),
    }
}

/// Fold a `createMultiple` response into the remap table.
fn merge_response(
    remap: &mut RemapTable,
    keys: &BTreeSet<String>,
    response: &Json,
) -> Result<(), MigrationError> {
    let created = response.as_object().ok_or_else(|| {
        MigrationError::unexpected(
            MigrationStatus::Replaying,
            format!("createMultiple returned {}", response),
        )
    })?;
    for key in keys {
        let id = created.get(key).and_then(RefId::from_json).ok_or_else(|| {
            MigrationError::unexpected(
                MigrationStatus::Replaying,
                format!("no id returned for record {}", key),
            )
        })?;
        remap.insert(key.clone(), id.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{MODEL_TAG, ROLE_TAG, TAG_TAG};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tags() -> TagTable {
        [(MODEL_TAG, "meta"), (TAG_TAG, "tags"), (ROLE_TAG, "roles")]
            .into_iter()
            .map(|(t, c)| (t.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_validate_accepts_declared_and_builtin() {
        let mut image = RecordImage::default();
        image.insert("meta", "posts", Value::Null);
        image.add_collection("posts");
        image.add_collection("roles");
        assert_eq!(validate(&image, &tags()), Ok(()));
    }

    #[test]
    fn test_validate_rejects_undeclared() {
        let mut image = RecordImage::default();
        image.add_collection("meta");
        image.insert("ghosts", "g1", Value::Null);
        assert_eq!(
            validate(&image, &tags()),
            Err(ValidationError::MissingModel {
                collection: "ghosts".into()
            })
        );
    }

    #[test]
    fn test_seed_remap() {
        let mut image = RecordImage::default();
        image.tags = [(MODEL_TAG, "m-old"), (TAG_TAG, "t-old"), ("custom", "c-old")]
            .into_iter()
            .map(|(t, c)| (t.to_string(), c.to_string()))
            .collect();
        image.reserved.admin_user = Some("u-old".into());
        let catalog = Catalog {
            tags: tags(),
            builtin_tag_records: BTreeSet::new(),
            reserved: crate::builtin::ReservedIds {
                admin_user: Some("u-new".into()),
                admin_role: Some("r-new".into()),
            },
        };
        let remap = seed_remap(&image, &catalog);
        assert_eq!(remap.get("m-old"), Some("meta"));
        assert_eq!(remap.get("t-old"), Some("tags"));
        assert_eq!(remap.get("u-old"), Some("u-new"));
        assert!(!remap.contains("c-old"));
        assert_eq!(remap.len(), 3);
    }

    #[test]
    fn test_merge_response() {
        let mut remap = RemapTable::new();
        let keys: BTreeSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        merge_response(
            &mut remap,
            &keys,
            &json!({"a": ["c", "a2"], "b": ["c", "b2"]}),
        )
        .unwrap();
        assert_eq!(remap.get("a"), Some("a2"));
        assert_eq!(remap.get("b"), Some("b2"));

        let err = merge_response(&mut remap, &keys, &json!({"a": ["c", "a3"]})).unwrap_err();
        assert_eq!(err.stage(), MigrationStatus::Replaying);
        assert!(merge_response(&mut remap, &keys, &json!([1])).is_err());
    }
}
