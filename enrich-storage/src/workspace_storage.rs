//! Async storage trait for workspace persistence.
//!
//! Every method is individually atomic per entity. No cross-entity
//! transactions are assumed; callers treat the store as eventually
//! consistent with the in-memory grid.

use async_trait::async_trait;
use enrich_core::{Cell, Column, ColumnId, EnrichResult, Row, RowId, Workspace, WorkspaceId};

/// Async storage trait for workspace entities.
#[async_trait]
pub trait WorkspaceStorage: Send + Sync {
    // ========================================================================
    // WORKSPACE OPERATIONS
    // ========================================================================

    /// Insert a new workspace.
    async fn workspace_insert(&self, workspace: &Workspace) -> EnrichResult<()>;

    /// Get a workspace by ID.
    async fn workspace_get(&self, id: WorkspaceId) -> EnrichResult<Option<Workspace>>;

    /// Update an existing workspace.
    async fn workspace_update(&self, workspace: &Workspace) -> EnrichResult<()>;

    // ========================================================================
    // COLUMN OPERATIONS
    // ========================================================================

    /// List columns of a workspace ordered by `order_index`.
    async fn list_columns(&self, workspace_id: WorkspaceId) -> EnrichResult<Vec<Column>>;

    /// Insert or replace a column.
    async fn upsert_column(&self, column: &Column) -> EnrichResult<()>;

    /// Delete a column and every cell keyed by it.
    async fn delete_column(&self, id: ColumnId) -> EnrichResult<()>;

    // ========================================================================
    // ROW OPERATIONS
    // ========================================================================

    /// List rows of a workspace ordered by `order_index`, at most `limit`.
    async fn list_rows(&self, workspace_id: WorkspaceId, limit: usize) -> EnrichResult<Vec<Row>>;

    /// Insert or replace a row.
    async fn upsert_row(&self, row: &Row) -> EnrichResult<()>;

    /// Delete a row and every cell keyed by it.
    async fn delete_row(&self, id: RowId) -> EnrichResult<()>;

    // ========================================================================
    // CELL OPERATIONS
    // ========================================================================

    /// List every cell belonging to a workspace's rows.
    async fn list_cells(&self, workspace_id: WorkspaceId) -> EnrichResult<Vec<Cell>>;

    /// Insert or replace the cell at `(row_id, column_id)`.
    async fn upsert_cell(&self, cell: &Cell) -> EnrichResult<()>;
}
