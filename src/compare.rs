//! Result comparator: diffs one table across two schemas.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::backend::{Backend, RowSelection};
use crate::catalog::ForeignKey;
use crate::error::Result;
use crate::value::{Row, Value, format_key};

/// Discrepancies kept per table; the total is always counted.
pub const MAX_DISCREPANCIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    ColumnMismatch {
        only_in_source: Vec<String>,
        only_in_dest: Vec<String>,
    },
    ForeignKeyMismatch {
        only_in_source: Vec<String>,
        only_in_dest: Vec<String>,
    },
    RowCount {
        source: u64,
        dest: u64,
    },
    MissingInDest {
        key: String,
    },
    ExtraInDest {
        key: String,
    },
    Field {
        key: String,
        field: String,
        source: Value,
        dest: Value,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::ColumnMismatch {
                only_in_source,
                only_in_dest,
            } => write!(
                f,
                "column sets differ (source only: [{}], dest only: [{}])",
                only_in_source.join(", "),
                only_in_dest.join(", ")
            ),
            Discrepancy::ForeignKeyMismatch {
                only_in_source,
                only_in_dest,
            } => write!(
                f,
                "foreign keys differ (source only: [{}], dest only: [{}])",
                only_in_source.join("; "),
                only_in_dest.join("; ")
            ),
            Discrepancy::RowCount { source, dest } => {
                write!(f, "row count {} vs {}", source, dest)
            }
            Discrepancy::MissingInDest { key } => write!(f, "row {} missing in destination", key),
            Discrepancy::ExtraInDest { key } => write!(f, "row {} only in destination", key),
            Discrepancy::Field {
                key,
                field,
                source,
                dest,
            } => write!(f, "row {} field `{}`: {} vs {}", key, field, source, dest),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    #[serde(rename = "table_name")]
    pub table: String,
    #[serde(rename = "match")]
    pub matches: bool,
    /// Rows in the source table.
    pub row_count: u64,
    pub discrepancies: Vec<Discrepancy>,
    pub total_discrepancies: usize,
}

impl ComparisonResult {
    fn new(table: &str, row_count: u64) -> Self {
        Self {
            table: table.to_string(),
            matches: true,
            row_count,
            discrepancies: Vec::new(),
            total_discrepancies: 0,
        }
    }

    fn push(&mut self, d: Discrepancy) {
        self.matches = false;
        self.total_discrepancies += 1;
        if self.discrepancies.len() < MAX_DISCREPANCIES {
            self.discrepancies.push(d);
        }
    }
}

/// Compare `table` in `source_schema` against the same table in `dest_schema`.
///
/// Rows are matched by primary key. Tables without one are sorted on every
/// shared column and compared position by position. Numeric fields are equal
/// when `|a - b| <= tolerance`; everything else must match exactly.
pub async fn compare_query_results<B: Backend + ?Sized>(
    backend: &mut B,
    source_schema: &str,
    dest_schema: &str,
    table: &str,
    tolerance: f64,
) -> Result<ComparisonResult> {
    let source = backend.describe_table(source_schema, table).await?;
    let dest = backend.describe_table(dest_schema, table).await?;
    let mut result = ComparisonResult::new(table, source.row_count);

    let (only_in_source, only_in_dest) = one_sided(&source.column_names(), &dest.column_names());
    if !only_in_source.is_empty() || !only_in_dest.is_empty() {
        result.push(Discrepancy::ColumnMismatch {
            only_in_source,
            only_in_dest,
        });
    }

    let signatures = |fks: &[ForeignKey]| fks.iter().map(ForeignKey::signature).collect::<Vec<_>>();
    let (only_in_source, only_in_dest) = one_sided(
        &signatures(source.foreign_keys.as_slice()),
        &signatures(dest.foreign_keys.as_slice()),
    );
    if !only_in_source.is_empty() || !only_in_dest.is_empty() {
        result.push(Discrepancy::ForeignKeyMismatch {
            only_in_source,
            only_in_dest,
        });
    }

    let columns: Vec<String> = source
        .column_names()
        .into_iter()
        .filter(|c| dest.has_column(c))
        .collect();
    let keyed = !source.primary_key.is_empty();
    if keyed && source.primary_key.iter().any(|k| !dest.has_column(k)) {
        // Rows cannot be paired without the key on both sides.
        return Ok(result);
    }
    if columns.is_empty() {
        return Ok(result);
    }

    if source.row_count != dest.row_count {
        result.push(Discrepancy::RowCount {
            source: source.row_count,
            dest: dest.row_count,
        });
    }

    let selection = RowSelection {
        columns: columns.clone(),
        order_by: if keyed { source.primary_key.clone() } else { columns.clone() },
        filter: None,
        limit: None,
    };
    let source_rows = backend.fetch_rows(source_schema, &source, &selection).await?;
    let dest_rows = backend.fetch_rows(dest_schema, &dest, &selection).await?;

    if keyed {
        let key_idx: Vec<usize> = source
            .primary_key
            .iter()
            .filter_map(|k| columns.iter().position(|c| c == k))
            .collect();
        pair_by_key(&mut result, &columns, &key_idx, &source_rows, &dest_rows, tolerance);
    } else {
        // Row count differences are already reported; compare the overlap.
        for (i, (row, other)) in source_rows.iter().zip(&dest_rows).enumerate() {
            compare_fields(&mut result, &format!("#{}", i + 1), &columns, row, other, tolerance);
        }
    }

    tracing::info!(
        table,
        source_schema,
        dest_schema,
        matches = result.matches,
        discrepancies = result.total_discrepancies,
        "compared table"
    );
    Ok(result)
}

/// Entries of `a` missing from `b`, and of `b` missing from `a`.
fn one_sided(a: &[String], b: &[String]) -> (Vec<String>, Vec<String>) {
    (
        a.iter().filter(|x| !b.contains(x)).cloned().collect(),
        b.iter().filter(|x| !a.contains(x)).cloned().collect(),
    )
}

fn compare_fields(result: &mut ComparisonResult, key: &str, columns: &[String], row: &Row, other: &Row, tolerance: f64) {
    for (i, column) in columns.iter().enumerate() {
        if !row[i].approx_eq(&other[i], tolerance) {
            result.push(Discrepancy::Field {
                key: key.to_string(),
                field: column.clone(),
                source: row[i].clone(),
                dest: other[i].clone(),
            });
        }
    }
}

fn pair_by_key(
    result: &mut ComparisonResult,
    columns: &[String],
    key_idx: &[usize],
    source_rows: &[Row],
    dest_rows: &[Row],
    tolerance: f64,
) {
    let key_of = |row: &Row| format_key(&key_idx.iter().map(|&i| row[i].clone()).collect::<Vec<_>>());

    let mut by_key: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in dest_rows {
        by_key.entry(key_of(row)).or_default().push(row);
    }

    for row in source_rows {
        let k = key_of(row);
        match by_key.get_mut(&k).and_then(|v| v.pop()) {
            Some(other) => compare_fields(result, &k, columns, row, other, tolerance),
            None => result.push(Discrepancy::MissingInDest { key: k }),
        }
    }

    let mut extra: Vec<(String, usize)> = by_key
        .into_iter()
        .filter(|(_, rows)| !rows.is_empty())
        .map(|(k, rows)| (k, rows.len()))
        .collect();
    extra.sort();
    for (k, n) in extra {
        for _ in 0..n {
            result.push(Discrepancy::ExtraInDest { key: k.clone() });
        }
    }
}
