//! The seam between the migration engine and a database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karmasync_proto::Query;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::TransportError;

/// A database endpoint that evaluates query expressions.
///
/// Implementations own authentication and routing. The engine never retries
/// a failed call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Evaluate a query. The result is the single result for a one-expression
    /// body, otherwise an array of results.
    async fn execute(&self, query: &Query) -> Result<Json, TransportError>;

    /// Dump the whole database as an opaque blob.
    async fn export(&self) -> Result<Vec<u8>, TransportError>;

    /// Replace the whole database with a blob produced by [`export`](Self::export).
    /// Returns `false` when the endpoint refuses the blob.
    async fn import(&self, data: Vec<u8>) -> Result<bool, TransportError>;

    /// Drop every record and re-create the built-in collections.
    async fn reset_database(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, query: &Query) -> Result<Json, TransportError> {
        (**self).execute(query).await
    }

    async fn export(&self) -> Result<Vec<u8>, TransportError> {
        (**self).export().await
    }

    async fn import(&self, data: Vec<u8>) -> Result<bool, TransportError> {
        (**self).import(data).await
    }

    async fn reset_database(&self) -> Result<(), TransportError> {
        (**self).reset_database().await
    }
}

/// A materialized record, as returned by the `metarialize` expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    /// `[collection, record]`.
    pub id: (String, String),
    /// `[meta collection, collection]`: the record's model.
    pub model: (String, String),
    /// The record value in plain JSON form.
    pub value: Json,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last update time.
    pub updated: DateTime<Utc>,
}

impl RecordRow {
    /// Id of the record.
    pub fn record_id(&self) -> &str {
        &self.id.1
    }

    /// Id of the collection the record belongs to.
    pub fn collection_id(&self) -> &str {
        &self.id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_row_json() {
        let row: RecordRow = serde_json::from_value(json!({
            "id": ["posts", "p1"],
            "model": ["meta", "posts"],
            "value": {"title": "Hello"},
            "created": "2024-01-01T00:00:00Z",
            "updated": "2024-01-02T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(row.record_id(), "p1");
        assert_eq!(row.collection_id(), "posts");
        assert_eq!(row.model.1, "posts");
        assert!(row.updated > row.created);
    }
}
