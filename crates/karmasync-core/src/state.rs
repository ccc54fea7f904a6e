//! Migration state tracking.
//!
//! Tracks the stage of a migration run and the progress of each collection
//! written during replay, for status reporting.

use serde::Serialize;

use crate::error::MigrationError;

/// Stage of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Created but not started.
    Pending,
    /// Building the record image from the source.
    Exporting,
    /// Resetting the target and rewriting built-in ids.
    Rewriting,
    /// Running the caller's image transform.
    UserTransforming,
    /// Checking every collection has a model in the target.
    Validating,
    /// Ordering collections by dependency.
    Scheduling,
    /// Writing records to the target.
    Replaying,
    /// Finished successfully.
    Done,
    /// Aborted by an error.
    Failed,
}

impl MigrationStatus {
    /// The stage that follows this one in a successful run.
    pub fn next(self) -> Option<MigrationStatus> {
        let next = match self {
            MigrationStatus::Pending => MigrationStatus::Exporting,
            MigrationStatus::Exporting => MigrationStatus::Rewriting,
            MigrationStatus::Rewriting => MigrationStatus::UserTransforming,
            MigrationStatus::UserTransforming => MigrationStatus::Validating,
            MigrationStatus::Validating => MigrationStatus::Scheduling,
            MigrationStatus::Scheduling => MigrationStatus::Replaying,
            MigrationStatus::Replaying => MigrationStatus::Done,
            MigrationStatus::Done | MigrationStatus::Failed => return None,
        };
        Some(next)
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "pending"),
            MigrationStatus::Exporting => write!(f, "exporting"),
            MigrationStatus::Rewriting => write!(f, "rewriting"),
            MigrationStatus::UserTransforming => write!(f, "user_transforming"),
            MigrationStatus::Validating => write!(f, "validating"),
            MigrationStatus::Scheduling => write!(f, "scheduling"),
            MigrationStatus::Replaying => write!(f, "replaying"),
            MigrationStatus::Done => write!(f, "done"),
            MigrationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a single collection during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started.
    Pending,
    /// Chunks are being written.
    InProgress,
    /// Every chunk was written.
    Complete,
    /// A chunk failed.
    Failed,
    /// Nothing to write.
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Complete => write!(f, "complete"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Replay progress of one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionProgress {
    /// Collection id in the rewritten image.
    pub collection: String,
    /// Current status.
    pub status: StepStatus,
    /// Records in the image for this collection.
    pub total_records: u64,
    /// Records written so far.
    pub written_records: u64,
    /// Chunks planned.
    pub total_chunks: usize,
    /// Chunks written so far.
    pub written_chunks: usize,
    /// When writing started (microseconds since epoch).
    pub started_at: Option<u64>,
    /// When writing ended (microseconds since epoch).
    pub completed_at: Option<u64>,
    /// Error message if a chunk failed.
    pub error: Option<String>,
}

impl CollectionProgress {
    /// Create a progress entry for a collection.
    pub fn new(collection: impl Into<String>, total_records: u64, total_chunks: usize) -> Self {
        Self {
            collection: collection.into(),
            status: StepStatus::Pending,
            total_records,
            written_records: 0,
            total_chunks,
            written_chunks: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::InProgress;
        self.started_at = Some(current_timestamp());
    }

    /// Record a written chunk.
    pub fn chunk_written(&mut self, records: usize) {
        self.written_chunks += 1;
        self.written_records += records as u64;
    }

    pub fn complete(&mut self) {
        self.status = StepStatus::Complete;
        self.completed_at = Some(current_timestamp());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error = Some(error.into());
    }

    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(current_timestamp());
    }

    /// Calculate percentage complete.
    pub fn percent_complete(&self) -> f64 {
        if self.total_records == 0 {
            100.0
        } else {
            (self.written_records as f64 / self.total_records as f64) * 100.0
        }
    }
}

/// State of one migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationState {
    /// Unique run id.
    pub migration_id: String,
    /// Current stage.
    pub status: MigrationStatus,
    /// Stage in which the run failed.
    pub failed_stage: Option<MigrationStatus>,
    /// Whether writes are skipped.
    pub dry_run: bool,
    /// When the run started (microseconds since epoch).
    pub started_at: Option<u64>,
    /// When the run ended (microseconds since epoch).
    pub completed_at: Option<u64>,
    /// Error message if the run failed.
    pub error: Option<String>,
    /// Replay progress per collection, in write order.
    pub collections: Vec<CollectionProgress>,
}

impl MigrationState {
    /// Create a pending migration state.
    pub fn new(migration_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            migration_id: migration_id.into(),
            status: MigrationStatus::Pending,
            failed_stage: None,
            dry_run,
            started_at: None,
            completed_at: None,
            error: None,
            collections: Vec::new(),
        }
    }

    /// Move to the next stage. Stages are entered strictly in order.
    pub fn advance(&mut self, to: MigrationStatus) -> Result<(), MigrationError> {
        if self.status.next() != Some(to) {
            return Err(MigrationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        if self.status == MigrationStatus::Pending {
            self.started_at = Some(current_timestamp());
        }
        if to == MigrationStatus::Done {
            self.completed_at = Some(current_timestamp());
        }
        self.status = to;
        Ok(())
    }

    /// Mark the run as failed in its current stage.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.failed_stage = Some(self.status);
        self.status = MigrationStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error = Some(error.into());
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, MigrationStatus::Done | MigrationStatus::Failed)
    }

    /// Progress entry for a collection (mutable).
    pub fn collection_mut(&mut self, collection: &str) -> Option<&mut CollectionProgress> {
        self.collections
            .iter_mut()
            .find(|p| p.collection == collection)
    }

    /// Records written across all collections.
    pub fn written_records(&self) -> u64 {
        self.collections.iter().map(|p| p.written_records).sum()
    }

    /// Chunks written across all collections.
    pub fn written_chunks(&self) -> usize {
        self.collections.iter().map(|p| p.written_chunks).sum()
    }
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Generate a unique id: nanosecond timestamp and a process-wide counter,
/// hex encoded.
pub fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    // Counter to ensure uniqueness even with same timestamp
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    let mut id = [0u8; 16];
    id[..8].copy_from_slice(&now.to_be_bytes());
    id[8..].copy_from_slice(&counter.to_be_bytes());
    hex::encode(id)
}
