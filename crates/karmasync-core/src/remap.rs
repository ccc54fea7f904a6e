//! Old-to-new identifier mapping.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use karmasync_proto::{RefId, Value};
use serde::Serialize;
use tracing::warn;

use crate::image::RecordImage;

/// Maps source ids (collections and records) to the ids the target assigned.
///
/// The table only grows during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemapTable {
    ids: HashMap<String, String>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `old` is now `new`.
    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        let old = old.into();
        let new = new.into();
        if let Some(previous) = self.ids.get(&old) {
            if *previous != new {
                warn!(old = %old, previous = %previous, new = %new, "Remapping an id twice");
            }
        }
        self.ids.insert(old, new);
    }

    /// The new id for `old`, if it was remapped.
    pub fn get(&self, old: &str) -> Option<&str> {
        self.ids.get(old).map(String::as_str)
    }

    /// The new id for `old`, or `old` itself.
    pub fn resolve<'a>(&'a self, old: &'a str) -> &'a str {
        self.get(old).unwrap_or(old)
    }

    pub fn contains(&self, old: &str) -> bool {
        self.ids.contains_key(old)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Entries sorted by old id.
    pub fn sorted(&self) -> BTreeMap<&str, &str> {
        self.ids
            .iter()
            .map(|(old, new)| (old.as_str(), new.as_str()))
            .collect()
    }

    /// Resolve both components of a reference.
    pub fn rewrite_ref(&self, r: &RefId) -> RefId {
        RefId::new(self.resolve(&r.model), self.resolve(&r.id))
    }

    /// Resolve every reference inside a value.
    pub fn rewrite_value(&self, value: Value) -> Value {
        value.transform(&mut |v| match v {
            Value::Ref(r) => Value::Ref(self.rewrite_ref(&r)),
            other => other,
        })
    }

    /// Rewrite a whole image: collection keys and reference components that
    /// were remapped are replaced. Record keys are kept.
    pub fn rewrite_image(&self, image: RecordImage) -> RecordImage {
        let collections = image
            .collections
            .into_iter()
            .map(|(collection, records)| {
                let records = records
                    .into_iter()
                    .map(|(record, value)| (record, self.rewrite_value(value)))
                    .collect();
                (self.resolve(&collection).to_string(), records)
            })
            .collect();
        RecordImage {
            tags: image.tags,
            reserved: image.reserved,
            collections,
        }
    }

    /// Prepare a value for a create request in which the records `chunk` are
    /// created together: references to them become placeholders, other
    /// references are resolved.
    pub fn bind_chunk(&self, value: Value, chunk: &BTreeSet<String>) -> Value {
        value.transform(&mut |v| match v {
            Value::Ref(r) if chunk.contains(&r.id) => Value::Placeholder(r.id),
            Value::Ref(r) => Value::Ref(self.rewrite_ref(&r)),
            other => other,
        })
    }
}

impl FromIterator<(String, String)> for RemapTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
