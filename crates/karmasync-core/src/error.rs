//! Error types for export, scheduling, and replay.

use karmasync_proto::{DecodeError, WireError};
use thiserror::Error;

use crate::state::MigrationStatus;

/// Errors reported by a [`Transport`](crate::Transport).
///
/// `MemoryDatabase` only reports `Server` and `InvalidResponse`; the other
/// kinds are for transports that reach a remote endpoint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint rejected the credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The endpoint failed to evaluate the request.
    #[error("server error: {0}")]
    Server(String),

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request uses an expression the endpoint does not evaluate.
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),
}

/// Errors from dependency scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    /// Collections that depend on each other through references.
    #[error("dependency cycle between collections: {}", .collections.join(", "))]
    Cycle {
        /// The collections left unscheduled, sorted.
        collections: Vec<String>,
    },
}

/// Errors found while validating an image against the target, before any
/// write happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The image holds records for a collection the target does not define
    /// and the image does not declare.
    #[error("no model for collection {collection}")]
    MissingModel {
        /// The collection id.
        collection: String,
    },

    /// A built-in tag is not bound in a database's tag table.
    #[error("built-in tag {tag} is not bound")]
    MissingBuiltin {
        /// The tag name.
        tag: String,
    },
}

/// Errors from backup archives.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Reading or writing the archive file failed.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive is not valid JSON of the expected shape.
    #[error("malformed archive: {0}")]
    Malformed(String),

    /// The archive's payload does not match its recorded checksum.
    #[error("checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch {
        /// Checksum recorded in the manifest.
        expected: String,
        /// Checksum of the payload.
        actual: String,
    },

    /// The database refused the archive.
    #[error("import rejected by target")]
    Rejected,

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Migration errors. Every variant carries or implies the stage it came from.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A record or response did not decode against its model.
    #[error("{stage}: failed to decode {collection}{}: {source}", .record.as_deref().map(|r| format!("/{}", r)).unwrap_or_default())]
    Decode {
        /// Stage in which decoding failed.
        stage: MigrationStatus,
        /// Collection being read.
        collection: String,
        /// Record being read, if the failure is record-specific.
        record: Option<String>,
        /// The decode failure.
        #[source]
        source: DecodeError,
    },

    /// A model record could not be read back as a model.
    #[error("{stage}: invalid model record {record}: {source}")]
    InvalidModel {
        /// Stage in which the record was read.
        stage: MigrationStatus,
        /// Id of the model record.
        record: String,
        /// The wire failure.
        #[source]
        source: WireError,
    },

    /// Scheduling failed.
    #[error("scheduling: {0}")]
    Dependency(#[from] DependencyError),

    /// Validation failed.
    #[error("validating: {0}")]
    Validation(#[from] ValidationError),

    /// A transport call failed.
    #[error("{stage}: transport failure: {source}")]
    Transport {
        /// Stage of the failed call.
        stage: MigrationStatus,
        /// Serialized request, when the request carried data.
        payload: Option<String>,
        /// The transport failure.
        #[source]
        source: TransportError,
    },

    /// A response had an unexpected shape.
    #[error("{stage}: unexpected response: {reason}")]
    UnexpectedResponse {
        /// Stage of the call.
        stage: MigrationStatus,
        /// What was wrong with the response.
        reason: String,
    },

    /// The configuration is unusable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with it.
        reason: String,
    },

    /// A stage was entered out of order.
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current stage.
        from: MigrationStatus,
        /// Requested stage.
        to: MigrationStatus,
    },
}

impl MigrationError {
    /// The stage the error belongs to.
    pub fn stage(&self) -> MigrationStatus {
        match self {
            MigrationError::Decode { stage, .. }
            | MigrationError::InvalidModel { stage, .. }
            | MigrationError::Transport { stage, .. }
            | MigrationError::UnexpectedResponse { stage, .. } => *stage,
            MigrationError::Dependency(_) => MigrationStatus::Scheduling,
            MigrationError::Validation(_) => MigrationStatus::Validating,
            MigrationError::InvalidConfig { .. } => MigrationStatus::Pending,
            MigrationError::InvalidTransition { from, .. } => *from,
        }
    }

    pub(crate) fn transport(stage: MigrationStatus, source: TransportError) -> Self {
        MigrationError::Transport {
            stage,
            payload: None,
            source,
        }
    }

    pub(crate) fn unexpected(stage: MigrationStatus, reason: impl Into<String>) -> Self {
        MigrationError::UnexpectedResponse {
            stage,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = DependencyError::Cycle {
            collections: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle between collections: a, b");
    }

    #[test]
    fn test_error_stage() {
        let err: MigrationError = ValidationError::MissingModel {
            collection: "c1".into(),
        }
        .into();
        assert_eq!(err.stage(), MigrationStatus::Validating);

        let err = MigrationError::transport(
            MigrationStatus::Replaying,
            TransportError::Server("boom".into()),
        );
        assert_eq!(err.stage(), MigrationStatus::Replaying);
        assert!(err.to_string().contains("replaying"));
    }

    #[test]
    fn test_decode_error_display() {
        let err = MigrationError::Decode {
            stage: MigrationStatus::Exporting,
            collection: "posts".into(),
            record: Some("p1".into()),
            source: DecodeError::MissingField {
                path: "/".into(),
                field: "title".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "exporting: failed to decode posts/p1: /: missing field `title`"
        );
    }
}
