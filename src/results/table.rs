//! Flat, column-ordered result tables.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ScoreError;

/// Separator between a framework name and its measure in column names.
pub const COLUMN_SEPARATOR: char = '.';

/// A table of JSON cells with named columns. Absent cells are `Value::Null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Body of a successful bulk response.
#[derive(Debug, Deserialize)]
struct BulkResponse {
    results: Vec<Value>,
}

impl ResultTable {
    /// Builds a table from column names and rows of matching width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, ScoreError> {
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(ScoreError::Internal(format!(
                "row has {} cells but table has {} columns",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Parses a bulk response body (`{"results": [...]}`) into a table.
    pub fn from_response_body(body: &[u8]) -> Result<Self, ScoreError> {
        let response: BulkResponse = serde_json::from_slice(body).map_err(|e| {
            ScoreError::Internal(format!("Failed to parse bulk response: {}", e))
        })?;
        Ok(Self::from_objects(&response.results))
    }

    /// Flattens JSON objects into one row each.
    ///
    /// Nested objects become `parent.child` columns; arrays and scalars are
    /// kept as-is. Columns appear in order of first occurrence. Non-object
    /// entries produce an all-null row.
    pub fn from_objects(objects: &[Value]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut flat_rows: Vec<Vec<(usize, Value)>> = Vec::with_capacity(objects.len());

        for object in objects {
            let mut cells = Vec::new();
            if let Value::Object(map) = object {
                let mut flat = Vec::new();
                flatten_into(None, map, &mut flat);
                for (name, value) in flat {
                    let idx = *positions.entry(name.clone()).or_insert_with(|| {
                        columns.push(name);
                        columns.len() - 1
                    });
                    cells.push((idx, value));
                }
            }
            flat_rows.push(cells);
        }

        let rows = flat_rows
            .into_iter()
            .map(|cells| {
                let mut row = vec![Value::Null; columns.len()];
                for (idx, value) in cells {
                    row[idx] = value;
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    /// Stacks tables in order, unioning their columns by first appearance.
    pub fn concat(tables: impl IntoIterator<Item = ResultTable>) -> Self {
        let mut out = ResultTable::default();
        for table in tables {
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .map(|name| out.ensure_column(name))
                .collect();
            let width = out.columns.len();
            for row in table.rows {
                let mut aligned = vec![Value::Null; width];
                for (value, &idx) in row.into_iter().zip(&mapping) {
                    aligned[idx] = value;
                }
                out.rows.push(aligned);
            }
        }
        out
    }

    /// Index of `name`, adding an all-null column if it is new.
    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Keeps only the columns for which `keep` returns true, in order.
    pub fn retain_columns(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|&i| keep(&self.columns[i]))
            .collect();
        if kept.len() == self.columns.len() {
            return;
        }
        self.columns = kept.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            let old = std::mem::take(row);
            *row = kept.iter().map(|&i| old[i].clone()).collect();
        }
    }

    /// Renames every column with `rename`.
    pub fn rename_columns(&mut self, mut rename: impl FnMut(&str) -> String) {
        for column in &mut self.columns {
            *column = rename(column);
        }
    }

    /// Inserts a column at the front.
    pub(crate) fn push_front_column(
        &mut self,
        name: &str,
        values: Vec<Value>,
    ) -> Result<(), ScoreError> {
        if values.len() != self.rows.len() {
            return Err(ScoreError::Internal(format!(
                "column `{}` has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        self.columns.insert(0, name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(0, value);
        }
        Ok(())
    }

    /// Builds a new table whose rows are copies of `self.rows[i]` for each
    /// index in `order`.
    pub(crate) fn take_rows(&self, order: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: order.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Flattens a JSON object into `(dotted.name, value)` pairs.
fn flatten_into(prefix: Option<&str>, map: &Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in map {
        let name = match prefix {
            Some(p) => format!("{}{}{}", p, COLUMN_SEPARATOR, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(Some(&name), inner, out),
            other => out.push((name, other.clone())),
        }
    }
}

/// Renders a cell for CSV output.
pub(crate) fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
