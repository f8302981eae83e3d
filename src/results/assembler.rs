//! Reassembly of per-bundle results into the caller-facing table.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use super::table::{ResultTable, COLUMN_SEPARATOR};
use crate::error::ScoreError;
use crate::input::{ContentKey, Record};

/// Column holding the caller's record id. Always first in the output.
pub const ID_COLUMN: &str = "id";

/// Column the API echoes each item's content key in.
pub const CORRELATION_COLUMN: &str = "request_id";

/// Bookkeeping columns that are never returned to the caller.
pub const INTERNAL_COLUMNS: &[&str] = &["response_id", "language", "version", "error", "custom"];

/// Which frameworks to keep and how to name their columns.
#[derive(Debug, Clone, Default)]
pub struct FrameworkSelection {
    /// Frameworks to keep. Empty keeps every column.
    pub frameworks: Vec<String>,
    /// Keep the `framework.` prefix. `None` keeps it unless exactly one
    /// framework is selected.
    pub keep_prefix: Option<bool>,
}

impl FrameworkSelection {
    fn keeps_prefix(&self) -> bool {
        self.keep_prefix.unwrap_or(self.frameworks.len() != 1)
    }
}

/// Builds the final table from bundle results in submission order.
///
/// Every original record gets one row, in input order, led by its `id`.
/// Records that shared a text share the same result cells.
///
/// # Errors
///
/// - `ScoreError::IncompleteResults` - a transmitted key has no result row
/// - `ScoreError::UnknownFramework` - a requested framework matches no column
pub fn assemble(
    fragments: Vec<ResultTable>,
    records: &[Record],
    keys: &[ContentKey],
    selection: &FrameworkSelection,
) -> Result<ResultTable, ScoreError> {
    let mut combined = ResultTable::concat(fragments);
    drop_internal_columns(&mut combined);

    let mut table = reexpand(&combined, records, keys)?;
    select_frameworks(&mut table, selection)?;

    debug!(
        "[SCORE] Assembled {} rows x {} columns",
        table.len(),
        table.columns().len()
    );
    Ok(table)
}

/// Removes API bookkeeping columns, including nested `custom.*` echoes.
pub fn drop_internal_columns(table: &mut ResultTable) {
    table.retain_columns(|column| {
        !INTERNAL_COLUMNS
            .iter()
            .any(|internal| matches_prefix(column, internal))
    });
}

/// Maps every record to the result row carrying its key.
fn reexpand(
    combined: &ResultTable,
    records: &[Record],
    keys: &[ContentKey],
) -> Result<ResultTable, ScoreError> {
    let mut by_key: HashMap<&str, usize> = HashMap::with_capacity(combined.len());
    if let Some(col) = combined.column_index(CORRELATION_COLUMN) {
        for (row_idx, row) in combined.rows().iter().enumerate() {
            if let Value::String(key) = &row[col] {
                by_key.entry(key.as_str()).or_insert(row_idx);
            }
        }
    }

    let mut order = Vec::with_capacity(keys.len());
    let mut missing: HashSet<&ContentKey> = HashSet::new();
    for key in keys {
        match by_key.get(key.as_str()) {
            Some(&row_idx) => order.push(row_idx),
            None => {
                missing.insert(key);
            }
        }
    }

    if !missing.is_empty() {
        return Err(ScoreError::IncompleteResults {
            missing: missing.len(),
        });
    }

    let mut table = combined.take_rows(&order);
    let ids = records.iter().map(|r| Value::String(r.id.clone())).collect();
    table.push_front_column(ID_COLUMN, ids)?;
    Ok(table)
}

/// Keeps `id`, `request_id` and the selected frameworks' columns, then
/// strips framework prefixes if requested.
pub fn select_frameworks(
    table: &mut ResultTable,
    selection: &FrameworkSelection,
) -> Result<(), ScoreError> {
    let frameworks = &selection.frameworks;

    if !frameworks.is_empty() {
        if let Some(unknown) = frameworks
            .iter()
            .find(|f| !table.columns().iter().any(|c| matches_prefix(c, f)))
        {
            return Err(ScoreError::UnknownFramework(unknown.clone()));
        }

        table.retain_columns(|column| {
            column == ID_COLUMN
                || matches_prefix(column, CORRELATION_COLUMN)
                || frameworks.iter().any(|f| matches_prefix(column, f))
        });
    }

    if !selection.keeps_prefix() {
        strip_prefixes(table);
    }

    Ok(())
}

/// Strips framework prefixes, except where the short name would clash with
/// another column (including `id`). Clashing columns keep their full name.
fn strip_prefixes(table: &mut ResultTable) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for column in table.columns() {
        *counts.entry(short_name(column)).or_default() += 1;
    }
    let clashing: HashSet<String> = counts
        .into_iter()
        .filter(|&(_, n)| n > 1)
        .map(|(name, _)| name.to_string())
        .collect();

    if !clashing.is_empty() {
        warn!(
            "[SCORE] Keeping framework prefix on clashing columns: {:?}",
            clashing
        );
    }

    table.rename_columns(|column| {
        let short = short_name(column);
        if clashing.contains(short) {
            column.to_string()
        } else {
            short.to_string()
        }
    });
}

fn short_name(column: &str) -> &str {
    if column == ID_COLUMN {
        column
    } else {
        strip_framework_prefix(column)
    }
}

/// `column` is `name` itself or `name.<anything>`.
fn matches_prefix(column: &str, name: &str) -> bool {
    column
        .strip_prefix(name)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(COLUMN_SEPARATOR))
}

/// Drops everything up to and including the first separator.
fn strip_framework_prefix(column: &str) -> &str {
    match column.split_once(COLUMN_SEPARATOR) {
        Some((head, rest)) if !head.is_empty() => rest,
        _ => column,
    }
}
