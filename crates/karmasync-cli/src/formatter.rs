//! Output formatters for plans and migration reports.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use karmasync_core::MigrationReport;
use serde::Serialize;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// One collection of a replay plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanRow {
    pub collection: String,
    /// Tag bound to the collection, if any.
    pub tag: Option<String>,
    pub records: usize,
    pub chunks: usize,
    pub self_referential: bool,
    /// Other collections referenced by this one's records.
    pub depends_on: Vec<String>,
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a replay plan.
    fn format_plan(&self, rows: &[PlanRow]) -> String;

    /// Format the report of a finished migration.
    fn format_report(&self, report: &MigrationReport) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_plan(&self, rows: &[PlanRow]) -> String {
        if rows.is_empty() {
            return "No collections".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec![
            "#",
            "Collection",
            "Tag",
            "Records",
            "Chunks",
            "Self-ref",
            "Depends on",
        ]);
        for (i, row) in rows.iter().enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(&row.collection),
                Cell::new(row.tag.as_deref().unwrap_or("")),
                Cell::new(row.records),
                Cell::new(row.chunks),
                Cell::new(if row.self_referential { "yes" } else { "" }),
                Cell::new(row.depends_on.join(", ")),
            ]);
        }
        table.to_string()
    }

    fn format_report(&self, report: &MigrationReport) -> String {
        let state = &report.state;
        let mut table = Table::new();
        table.set_header(vec!["Collection", "Status", "Records", "Chunks", "Progress"]);
        for progress in &state.collections {
            table.add_row(vec![
                Cell::new(&progress.collection),
                Cell::new(progress.status),
                Cell::new(format!(
                    "{}/{}",
                    progress.written_records, progress.total_records
                )),
                Cell::new(format!(
                    "{}/{}",
                    progress.written_chunks, progress.total_chunks
                )),
                Cell::new(format!("{:.0}%", progress.percent_complete())),
            ]);
        }

        let mode = if state.dry_run { " (dry run)" } else { "" };
        format!(
            "{}\n\nMigration {} {}{}: {} record(s) in {} chunk(s), {} id(s) remapped",
            table,
            state.migration_id,
            state.status,
            mode,
            state.written_records(),
            state.written_chunks(),
            report.remap.len()
        )
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_plan(&self, rows: &[PlanRow]) -> String {
        serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_report(&self, report: &MigrationReport) -> String {
        serde_json::json!({
            "state": report.state,
            "schedule": report.schedule.order,
            "remap": report.remap.sorted(),
        })
        .to_string()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}
