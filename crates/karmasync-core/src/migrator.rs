//! Migration orchestration.
//!
//! Coordinates the export, rewrite, transform, validate, schedule and replay
//! stages of one run and keeps the state of the latest run.

use parking_lot::Mutex;
use tracing::{error, info};

use crate::builtin::TagTable;
use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::image::{build_image, RecordImage};
use crate::remap::RemapTable;
use crate::replay::{identity_transform, replay, ImageTransform, ReplayOutcome};
use crate::schedule::Schedule;
use crate::state::{generate_id, MigrationState, MigrationStatus};
use crate::transport::Transport;

/// Result of a successful migration.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// Final state of the run.
    pub state: MigrationState,
    /// Old ids and the ids the target assigned.
    pub remap: RemapTable,
    /// The write order.
    pub schedule: Schedule,
}

/// Runs migrations from one database into another.
pub struct Migrator {
    config: MigrationConfig,
    transform: Box<ImageTransform>,
    last_state: Mutex<Option<MigrationState>>,
}

impl Migrator {
    /// Create a migrator that replays images unchanged.
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            transform: Box::new(identity_transform),
            last_state: Mutex::new(None),
        }
    }

    /// Rewrite every image before it is validated and replayed.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(RecordImage, &TagTable, &TagTable) -> RecordImage + Send + Sync + 'static,
    {
        self.transform = Box::new(transform);
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// State of the latest run, successful or not.
    pub fn last_state(&self) -> Option<MigrationState> {
        self.last_state.lock().clone()
    }

    /// Build the record image of a database.
    pub async fn export(&self, source: &dyn Transport) -> Result<RecordImage, MigrationError> {
        self.config.validate()?;
        build_image(source, self.config.page_size).await
    }

    /// Export `source` and replay it into `target`.
    pub async fn migrate(
        &self,
        source: &dyn Transport,
        target: &dyn Transport,
    ) -> Result<MigrationReport, MigrationError> {
        self.config.validate()?;
        let mut state = MigrationState::new(generate_id(), self.config.dry_run);
        info!(
            migration_id = %state.migration_id,
            dry_run = self.config.dry_run,
            "Starting migration"
        );

        let result = match self.begin(&mut state) {
            Ok(()) => match build_image(source, self.config.page_size).await {
                Ok(image) => self.replay_image(target, image, &mut state).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.finish(state, result)
    }

    /// Replay an image that was exported earlier into `target`.
    pub async fn import(
        &self,
        target: &dyn Transport,
        image: RecordImage,
    ) -> Result<MigrationReport, MigrationError> {
        self.config.validate()?;
        let mut state = MigrationState::new(generate_id(), self.config.dry_run);
        info!(migration_id = %state.migration_id, "Starting import");

        let result = match self.begin(&mut state) {
            Ok(()) => self.replay_image(target, image, &mut state).await,
            Err(e) => Err(e),
        };
        self.finish(state, result)
    }

    fn begin(&self, state: &mut MigrationState) -> Result<(), MigrationError> {
        state.advance(MigrationStatus::Exporting)
    }

    async fn replay_image(
        &self,
        target: &dyn Transport,
        image: RecordImage,
        state: &mut MigrationState,
    ) -> Result<ReplayOutcome, MigrationError> {
        info!(
            collections = image.collections.len(),
            records = image.record_count(),
            "Exported image"
        );
        let outcome = replay(target, image, &*self.transform, &self.config, state).await?;
        state.advance(MigrationStatus::Done)?;
        Ok(outcome)
    }

    fn finish(
        &self,
        mut state: MigrationState,
        result: Result<ReplayOutcome, MigrationError>,
    ) -> Result<MigrationReport, MigrationError> {
        match result {
            Ok(outcome) => {
                info!(
                    migration_id = %state.migration_id,
                    records = state.written_records(),
                    chunks = state.written_chunks(),
                    remapped = outcome.remap.len(),
                    "Migration complete"
                );
                *self.last_state.lock() = Some(state.clone());
                Ok(MigrationReport {
                    state,
                    remap: outcome.remap,
                    schedule: outcome.schedule,
                })
            }
            Err(e) => {
                state.fail(e.to_string());
                error!(
                    migration_id = %state.migration_id,
                    stage = %e.stage(),
                    error = %e,
                    "Migration failed"
                );
                *self.last_state.lock() = Some(state);
                Err(e)
            }
        }
    }
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(MigrationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let migrator = Migrator::new(MigrationConfig::new().with_chunk_size(0));
        let db = MemoryDatabase::new();
        let err = migrator.migrate(&db, &db).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidConfig { .. }));
        assert!(migrator.last_state().is_none());
    }

    #[tokio::test]
    async fn test_empty_migration_completes() {
        let source = MemoryDatabase::new();
        let target = MemoryDatabase::new();
        let migrator = Migrator::default();
        let report = migrator.migrate(&source, &target).await.unwrap();
        assert_eq!(report.state.status, MigrationStatus::Done);
        assert_eq!(report.state.written_records(), 0);
        assert!(report.state.started_at.is_some());
        assert_eq!(
            migrator.last_state().map(|s| s.status),
            Some(MigrationStatus::Done)
        );
    }

    #[tokio::test]
    async fn test_failed_run_keeps_state() {
        let source = MemoryDatabase::new();
        let target = MemoryDatabase::new();
        let migrator = Migrator::default().with_transform(|mut image, _, _| {
            image.insert("undeclared", "r1", karmasync_proto::Value::Null);
            image
        });
        let err = migrator.migrate(&source, &target).await.unwrap_err();
        assert_eq!(err.stage(), MigrationStatus::Validating);

        let state = migrator.last_state().unwrap();
        assert_eq!(state.status, MigrationStatus::Failed);
        assert_eq!(state.failed_stage, Some(MigrationStatus::Validating));
        assert!(state.error.is_some());
    }
}
