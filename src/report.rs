//! Per-phase migration report.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::compare::ComparisonResult;
use crate::compat::CompatibilityReport;
use crate::copy::CopyReport;

/// What a phase did. Printed at the end of a run, or emitted as JSON.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub phase: u8,
    pub tables_processed: Vec<String>,
    /// Tables left alone because the destination already had them.
    pub tables_skipped: Vec<String>,
    pub rows_copied_per_table: BTreeMap<String, u64>,
    /// Tables copied without the filter because they lack a column it names.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unfiltered_tables: Vec<String>,
    /// Seconds.
    pub elapsed_time_per_table: BTreeMap<String, f64>,
    pub mismatches: Vec<ComparisonResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<CompatibilityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_name: Option<String>,
}

impl MigrationReport {
    pub fn new(phase: u8) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }

    pub fn record_copy(&mut self, copy: &CopyReport) {
        self.tables_processed.push(copy.table.clone());
        self.rows_copied_per_table.insert(copy.table.clone(), copy.rows_copied);
        self.elapsed_time_per_table
            .insert(copy.table.clone(), copy.time_taken.as_secs_f64());
    }

    pub fn total_rows_copied(&self) -> u64 {
        self.rows_copied_per_table.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_record_copy() {
        let mut report = MigrationReport::new(3);
        report.record_copy(&CopyReport {
            table: "session".into(),
            rows_copied: 12,
            orphans_skipped: 0,
            time_taken: Duration::from_millis(1500),
        });
        assert_eq!(report.total_rows_copied(), 12);
        assert_eq!(report.elapsed_time_per_table["session"], 1.5);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rows_copied_per_table"]["session"], 12);
        assert!(json.get("backup_name").is_none());
    }
}
