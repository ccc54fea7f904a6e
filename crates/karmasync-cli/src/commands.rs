//! Subcommand handlers.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use karmasync_core::builtin::REQUIRED_FIRST;
use karmasync_core::{
    chunk_count, BackupArchive, DependencyGraph, MemoryDatabase, MigrationConfig, Migrator,
    RecordImage, Schedule, Scheduler,
};
use tracing::info;

use crate::formatter::{create_formatter, Formatter, PlanRow};
use crate::{Args, Command};

pub async fn run(args: Args) -> Result<()> {
    let formatter = create_formatter(args.format);
    let output = match args.command {
        Command::Export {
            snapshot,
            image,
            page_size,
        } => export(&snapshot, &image, page_size, &*formatter).await?,
        Command::Plan { image, chunk_size } => plan(&image, chunk_size, &*formatter)?,
        Command::Migrate {
            source,
            target,
            page_size,
            chunk_size,
            dry_run,
        } => {
            let config = MigrationConfig::new()
                .with_page_size(page_size)
                .with_chunk_size(chunk_size)
                .with_dry_run(dry_run);
            migrate(&source, &target, config, &*formatter).await?
        }
        Command::Backup { snapshot, archive } => backup(&snapshot, &archive, &*formatter).await?,
        Command::Restore { archive, snapshot } => restore(&archive, &snapshot, &*formatter).await?,
    };
    println!("{}", output);
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<MemoryDatabase> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    MemoryDatabase::from_snapshot(&data).with_context(|| format!("loading {}", path.display()))
}

fn save_snapshot(db: &MemoryDatabase, path: &Path) -> Result<()> {
    fs::write(path, db.snapshot()?).with_context(|| format!("writing {}", path.display()))
}

async fn export(
    snapshot: &Path,
    image_path: &Path,
    page_size: usize,
    formatter: &dyn Formatter,
) -> Result<String> {
    let source = load_snapshot(snapshot)?;
    let migrator = Migrator::new(MigrationConfig::new().with_page_size(page_size));
    let image = migrator.export(&source).await?;
    let json = serde_json::to_vec_pretty(&image)?;
    fs::write(image_path, json).with_context(|| format!("writing {}", image_path.display()))?;
    info!(path = %image_path.display(), "Wrote image");
    Ok(formatter.format_message(&format!(
        "Exported {} records in {} collections",
        image.record_count(),
        image.collections.len()
    )))
}

/// Plan rows for an image, in schedule order.
pub fn plan_rows(image: &RecordImage, chunk_size: usize) -> Result<(Schedule, Vec<PlanRow>)> {
    let graph = DependencyGraph::from_image(image);
    let required_first: Vec<String> = REQUIRED_FIRST
        .iter()
        .filter_map(|tag| image.tags.get(tag))
        .map(str::to_string)
        .collect();
    let schedule = Scheduler::order(&graph, &required_first)?;

    let rows = schedule
        .order
        .iter()
        .map(|collection| {
            let records = image.collection(collection).map_or(0, |r| r.len());
            let self_referential = schedule.is_self_referential(collection);
            PlanRow {
                collection: collection.clone(),
                tag: image
                    .tags
                    .iter()
                    .find(|(_, c)| *c == collection.as_str())
                    .map(|(t, _)| t.to_string()),
                records,
                chunks: chunk_count(records, chunk_size, self_referential),
                self_referential,
                depends_on: graph
                    .dependencies(collection)
                    .map(|deps| deps.iter().filter(|d| *d != collection).cloned().collect())
                    .unwrap_or_default(),
            }
        })
        .collect();
    Ok((schedule, rows))
}

fn plan(image_path: &Path, chunk_size: usize, formatter: &dyn Formatter) -> Result<String> {
    let data =
        fs::read(image_path).with_context(|| format!("reading {}", image_path.display()))?;
    let image: RecordImage = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {}", image_path.display()))?;
    MigrationConfig::new().with_chunk_size(chunk_size).validate()?;
    let (_, rows) = plan_rows(&image, chunk_size)?;
    Ok(formatter.format_plan(&rows))
}

async fn migrate(
    source_path: &Path,
    target_path: &Path,
    config: MigrationConfig,
    formatter: &dyn Formatter,
) -> Result<String> {
    let source = load_snapshot(source_path)?;
    let target = MemoryDatabase::new();
    let dry_run = config.dry_run;
    let report = Migrator::new(config).migrate(&source, &target).await?;
    if !dry_run {
        save_snapshot(&target, target_path)?;
        info!(path = %target_path.display(), "Wrote migrated snapshot");
    }
    Ok(formatter.format_report(&report))
}

async fn backup(snapshot: &Path, archive_path: &Path, formatter: &dyn Formatter) -> Result<String> {
    let db = load_snapshot(snapshot)?;
    let archive = BackupArchive::capture(&db).await?;
    archive.write_to(archive_path)?;
    Ok(formatter.format_message(&format!(
        "Wrote {} ({} bytes, sha256 {})",
        archive_path.display(),
        archive.manifest.size,
        archive.manifest.sha256
    )))
}

async fn restore(archive_path: &Path, snapshot: &Path, formatter: &dyn Formatter) -> Result<String> {
    let archive = BackupArchive::read_from(archive_path)?;
    let db = MemoryDatabase::new();
    archive.restore(&db).await?;
    save_snapshot(&db, snapshot)?;
    Ok(formatter.format_message(&format!(
        "Restored backup taken at {} into {}",
        archive.manifest.created_at.to_rfc3339(),
        snapshot.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::OutputFormat;
    use karmasync_core::proto::{Model, Value};

    fn blog_snapshot(dir: &Path) -> std::path::PathBuf {
        let db = MemoryDatabase::new();
        let authors = db.define(&Model::structure([("name", Model::String)])).unwrap();
        let posts = db
            .define(&Model::structure([("author", Model::reference(authors.clone()))]))
            .unwrap();
        let ada = db
            .insert(&authors, Value::structure([("name", Value::from("Ada"))]))
            .unwrap();
        db.insert(
            &posts,
            Value::structure([("author", Value::reference(authors, ada))]),
        )
        .unwrap();
        let path = dir.join("source.json");
        save_snapshot(&db, &path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_export_then_plan() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = blog_snapshot(dir.path());
        let image_path = dir.path().join("image.json");
        let formatter = create_formatter(OutputFormat::Json);

        export(&snapshot, &image_path, 1000, &*formatter).await.unwrap();
        let image: RecordImage =
            serde_json::from_slice(&fs::read(&image_path).unwrap()).unwrap();
        let (schedule, rows) = plan_rows(&image, 100).unwrap();

        assert_eq!(rows.len(), schedule.order.len());
        assert_eq!(rows[0].tag.as_deref(), Some("_model"));
        assert!(rows[0].self_referential);
        let with_deps: Vec<&PlanRow> = rows.iter().filter(|r| !r.depends_on.is_empty()).collect();
        assert_eq!(with_deps.len(), 1);
        assert_eq!(with_deps[0].records, 1);
    }

    #[tokio::test]
    async fn test_migrate_and_backup_round() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = blog_snapshot(dir.path());
        let migrated = dir.path().join("migrated.json");
        let formatter = create_formatter(OutputFormat::Table);

        migrate(&snapshot, &migrated, MigrationConfig::new(), &*formatter)
            .await
            .unwrap();
        let archive = dir.path().join("migrated.backup");
        backup(&migrated, &archive, &*formatter).await.unwrap();
        let restored = dir.path().join("restored.json");
        restore(&archive, &restored, &*formatter).await.unwrap();

        let original = load_snapshot(&migrated).unwrap();
        let copy = load_snapshot(&restored).unwrap();
        assert_eq!(copy.meta_id(), original.meta_id());
        assert_eq!(copy.collection_ids(), original.collection_ids());
    }
}
