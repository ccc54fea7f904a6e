//! Splitting a collection into create requests.

use std::collections::{BTreeMap, BTreeSet};

use karmasync_proto::Value;

/// Records created by one request, in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<'a> {
    /// Position of the chunk within its collection.
    pub index: usize,
    /// Record keys and values.
    pub records: Vec<(&'a str, &'a Value)>,
}

impl Chunk<'_> {
    /// Keys of the records in this chunk.
    pub fn keys(&self) -> BTreeSet<String> {
        self.records.iter().map(|(k, _)| k.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Split records into chunks of `chunk_size`, in key order.
///
/// A self-referential collection is a single chunk so that every internal
/// reference can be bound within one request. An empty collection has no
/// chunks.
pub fn chunk_records(
    records: &BTreeMap<String, Value>,
    chunk_size: usize,
    self_referential: bool,
) -> Vec<Chunk<'_>> {
    let entries: Vec<(&str, &Value)> = records.iter().map(|(k, v)| (k.as_str(), v)).collect();
    if entries.is_empty() {
        return Vec::new();
    }
    if self_referential {
        return vec![Chunk {
            index: 0,
            records: entries,
        }];
    }
    entries
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(index, records)| Chunk {
            index,
            records: records.to_vec(),
        })
        .collect()
}

/// Number of chunks [`chunk_records`] produces.
pub fn chunk_count(records: usize, chunk_size: usize, self_referential: bool) -> usize {
    match (records, self_referential) {
        (0, _) => 0,
        (_, true) => 1,
        (n, false) => n.div_ceil(chunk_size.max(1)),
    }
}
