//! Row filters: predicates over a row's cells that select the visible rows.

use crate::Grid;
use enrich_core::{CellStatus, ColumnId, RowId};
use serde::{Deserialize, Serialize};

/// Predicate deciding whether a row is visible. Filters never change row
/// order or existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowFilter {
    /// Case-insensitive substring over every ready cell. Empty query matches all.
    Search { query: String },
    ColumnContains { column: ColumnId, needle: String },
    ColumnEquals { column: ColumnId, value: String },
    StatusIs { column: ColumnId, status: CellStatus },
    /// Ready numeric value at least `min`
    MinScore { column: ColumnId, min: f64 },
    All { filters: Vec<RowFilter> },
}

impl RowFilter {
    pub fn search(query: impl Into<String>) -> Self {
        RowFilter::Search {
            query: query.into(),
        }
    }

    pub fn matches(&self, grid: &Grid, row_id: RowId) -> bool {
        match self {
            RowFilter::Search { query } => {
                let query = query.trim().to_lowercase();
                if query.is_empty() {
                    return true;
                }
                grid.columns().iter().any(|column| {
                    grid.ready_value(row_id, column.column_id)
                        .is_some_and(|value| value.display().to_lowercase().contains(&query))
                })
            }
            RowFilter::ColumnContains { column, needle } => {
                let needle = needle.to_lowercase();
                grid.ready_value(row_id, *column)
                    .is_some_and(|value| value.display().to_lowercase().contains(&needle))
            }
            RowFilter::ColumnEquals { column, value } => grid
                .ready_value(row_id, *column)
                .is_some_and(|v| v.display() == *value),
            RowFilter::StatusIs { column, status } => grid
                .cell(row_id, *column)
                .is_ok_and(|cell| cell.status() == *status),
            RowFilter::MinScore { column, min } => grid
                .ready_value(row_id, *column)
                .and_then(|value| value.as_number())
                .is_some_and(|score| score >= *min),
            RowFilter::All { filters } => filters.iter().all(|f| f.matches(grid, row_id)),
        }
    }
}
