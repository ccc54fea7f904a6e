//! karmasync core - export, dependency ordering, and replay of record images.
//!
//! A migration pages every record of a source database into a
//! [`RecordImage`], rewrites built-in ids to the target's, orders collections
//! so that referenced records are written first, and replays them in chunks
//! while mapping old ids to the ids the target assigns.

pub mod backup;
pub mod builtin;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod error;
pub mod graph;
pub mod image;
pub mod memory;
pub mod migrator;
pub mod remap;
pub mod replay;
pub mod schedule;
pub mod state;
pub mod transport;

pub use backup::{BackupArchive, BackupManifest};
pub use builtin::{MigrationRecordBuilder, ReservedIds, TagTable};
pub use catalog::Catalog;
pub use chunk::{chunk_count, chunk_records, Chunk};
pub use config::{MigrationConfig, DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE};
pub use error::{BackupError, DependencyError, MigrationError, TransportError, ValidationError};
pub use graph::DependencyGraph;
pub use image::{build_image, RecordImage};
pub use memory::MemoryDatabase;
pub use migrator::{MigrationReport, Migrator};
pub use remap::RemapTable;
pub use replay::{replay, ImageTransform, ReplayOutcome};
pub use schedule::{Schedule, Scheduler};
pub use state::{CollectionProgress, MigrationState, MigrationStatus, StepStatus};
pub use transport::{RecordRow, Transport};

/// Re-export schema and value types.
pub use karmasync_proto as proto;
