//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::indexing::{BuildReport, IngestReport};
use crate::projection::ProjectionReport;
use crate::storage::{AlignmentReport, ArtifactRows};
use crate::types::RawRecord;

/// Maximum characters of record data shown in a table cell.
const MAX_DATA_WIDTH: usize = 80;

fn styled_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
        .collect()
}

fn truncate(data: &str) -> String {
    let flat = data.replace(['\n', '\t'], " ");
    if flat.chars().count() <= MAX_DATA_WIDTH {
        flat
    } else {
        let cut: String = flat.chars().take(MAX_DATA_WIDTH - 1).collect();
        format!("{cut}…")
    }
}

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        Self {
            table: styled_table(),
        }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        self.table.set_header(header(&headers));
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Ranked search results or looked-up records.
pub fn create_records_table(records: &[RawRecord]) -> String {
    let mut table = styled_table();
    table.set_header(header(&["#", "Index", "Type", "Data"]));
    for (rank, record) in records.iter().enumerate() {
        table.add_row(vec![
            (rank + 1).to_string(),
            record.ordinal.to_string(),
            record.media_type.to_string(),
            truncate(&record.data),
        ]);
    }
    table.to_string()
}

fn metric_table(rows: Vec<(&str, String)>) -> String {
    let mut table = styled_table();
    table.set_header(header(&["Metric", "Value"]));
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value]);
    }
    table.to_string()
}

pub fn create_build_table(report: &BuildReport) -> String {
    let mut rows = vec![
        ("Vectors", report.rows.to_string()),
        ("Dimension", report.dimension.to_string()),
        ("Training rows", report.training_rows.to_string()),
        ("Coarse cells", report.nlist.to_string()),
        ("Sub-quantizers", report.subquantizers.to_string()),
        ("OPQ rotation", report.opq.to_string()),
        ("Device", report.device.to_string()),
        ("Time", format!("{:.2?}", report.elapsed)),
    ];
    if let Some(path) = &report.index_path {
        rows.push(("Index file", path.display().to_string()));
    }
    metric_table(rows)
}

pub fn create_projection_table(report: &ProjectionReport) -> String {
    let mut rows = vec![
        ("Points", report.rows.to_string()),
        ("Epochs", report.epochs.to_string()),
        ("Clusters", report.clusters.to_string()),
        ("Noise points", report.noise_points.to_string()),
        ("Time", format!("{:.2?}", report.elapsed)),
    ];
    if let Some(path) = &report.points_path {
        rows.push(("Points file", path.display().to_string()));
    }
    metric_table(rows)
}

pub fn create_ingest_table(report: &IngestReport) -> String {
    metric_table(vec![
        ("Media type", report.media_type.to_string()),
        ("Rows", report.rows.to_string()),
        ("Shards", report.shards.to_string()),
        ("Dimension", report.dimension.to_string()),
        ("Time", format!("{:.2?}", report.elapsed)),
    ])
}

/// Row counts per artifact, with mismatches highlighted.
pub fn create_alignment_table(report: &AlignmentReport) -> String {
    let mut table = styled_table();
    table.set_header(header(&["Artifact", "Rows", "Status"]));

    let expected = report.matrix.rows();
    for (name, rows) in [
        ("Embedding matrix", &report.matrix),
        ("Record table", &report.records),
        ("ANN index", &report.index),
        ("Projection points", &report.points),
    ] {
        let (count, status, color) = match rows {
            ArtifactRows::Present(n) if expected.is_none_or(|e| e == *n) => {
                (n.to_string(), "ok".to_string(), Color::Green)
            }
            ArtifactRows::Present(n) => (n.to_string(), "misaligned".to_string(), Color::Red),
            ArtifactRows::Missing => ("-".to_string(), "missing".to_string(), Color::Yellow),
            ArtifactRows::Unreadable(reason) => ("-".to_string(), reason.clone(), Color::Red),
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(count),
            Cell::new(status).fg(color),
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaType, Ordinal};

    #[test]
    fn test_table_builder() {
        let table = TableBuilder::new()
            .set_headers(vec!["Column 1", "Column 2"])
            .add_row(vec!["Value 1".to_string(), "Value 2".to_string()])
            .build();

        assert!(table.contains("Column 1"));
        assert!(table.contains("Value 1"));
    }

    #[test]
    fn test_records_table_truncates_long_data() {
        let records = vec![RawRecord {
            ordinal: Ordinal::new(3),
            data: "x".repeat(200),
            media_type: MediaType::Text,
        }];
        let table = create_records_table(&records);
        assert!(table.contains('…'));
        assert!(!table.contains(&"x".repeat(100)));
    }

    #[test]
    fn test_alignment_table_flags_mismatch() {
        let report = AlignmentReport {
            matrix: ArtifactRows::Present(10),
            records: ArtifactRows::Present(9),
            index: ArtifactRows::Missing,
            points: ArtifactRows::Present(10),
        };
        let table = create_alignment_table(&report);
        assert!(table.contains("misaligned"));
        assert!(table.contains("missing"));
    }
}
