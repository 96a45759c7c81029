//! ENRICH Storage - Storage Trait and Mock Implementation
//!
//! Defines the persistence seam for workspaces, columns, rows and cells, plus
//! an in-memory implementation used by tests and the CLI.

mod workspace_storage;

pub use workspace_storage::WorkspaceStorage;

use async_trait::async_trait;
use enrich_core::{
    Cell, CellKey, Column, ColumnId, EnrichError, EnrichResult, EntityIdType, EntityType, Row,
    RowId, StorageError, Workspace, WorkspaceId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// MOCK STORAGE
// ============================================================================

/// In-memory storage. Cloning shares the underlying maps.
#[derive(Debug, Default, Clone)]
pub struct MockStorage {
    workspaces: Arc<RwLock<HashMap<WorkspaceId, Workspace>>>,
    columns: Arc<RwLock<HashMap<ColumnId, Column>>>,
    rows: Arc<RwLock<HashMap<RowId, Row>>>,
    cells: Arc<RwLock<HashMap<CellKey, Cell>>>,
    fail_writes: Arc<AtomicBool>,
}

fn read<T>(lock: &RwLock<T>) -> EnrichResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| EnrichError::Storage(StorageError::LockPoisoned))
}

fn write<T>(lock: &RwLock<T>) -> EnrichResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| EnrichError::Storage(StorageError::LockPoisoned))
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `UpdateFailed`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Get count of stored columns.
    pub fn column_count(&self) -> usize {
        self.columns.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Get count of stored rows.
    pub fn row_count(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Get count of stored cells.
    pub fn cell_count(&self) -> usize {
        self.cells.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Fetch a stored cell directly.
    pub fn cell(&self, row_id: RowId, column_id: ColumnId) -> Option<Cell> {
        self.cells
            .read()
            .ok()?
            .get(&CellKey::new(row_id, column_id))
            .cloned()
    }

    fn check_writable(&self, entity_type: EntityType, id: uuid::Uuid) -> EnrichResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EnrichError::Storage(StorageError::UpdateFailed {
                entity_type,
                id,
                reason: "writes disabled".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStorage for MockStorage {
    // === Workspace Operations ===

    async fn workspace_insert(&self, workspace: &Workspace) -> EnrichResult<()> {
        self.check_writable(EntityType::Workspace, workspace.workspace_id.as_uuid())?;
        let mut workspaces = write(&self.workspaces)?;
        if workspaces.contains_key(&workspace.workspace_id) {
            return Err(EnrichError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Workspace,
                reason: "already exists".to_string(),
            }));
        }
        workspaces.insert(workspace.workspace_id, workspace.clone());
        Ok(())
    }

    async fn workspace_get(&self, id: WorkspaceId) -> EnrichResult<Option<Workspace>> {
        Ok(read(&self.workspaces)?.get(&id).cloned())
    }

    async fn workspace_update(&self, workspace: &Workspace) -> EnrichResult<()> {
        self.check_writable(EntityType::Workspace, workspace.workspace_id.as_uuid())?;
        let mut workspaces = write(&self.workspaces)?;
        match workspaces.get_mut(&workspace.workspace_id) {
            Some(existing) => {
                *existing = workspace.clone();
                Ok(())
            }
            None => Err(EnrichError::Storage(StorageError::NotFound {
                entity_type: EntityType::Workspace,
                id: workspace.workspace_id.as_uuid(),
            })),
        }
    }

    // === Column Operations ===

    async fn list_columns(&self, workspace_id: WorkspaceId) -> EnrichResult<Vec<Column>> {
        let mut columns: Vec<Column> = read(&self.columns)?
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect();
        columns.sort_by_key(|c| (c.order_index, c.column_id));
        Ok(columns)
    }

    async fn upsert_column(&self, column: &Column) -> EnrichResult<()> {
        self.check_writable(EntityType::Column, column.column_id.as_uuid())?;
        write(&self.columns)?.insert(column.column_id, column.clone());
        Ok(())
    }

    async fn delete_column(&self, id: ColumnId) -> EnrichResult<()> {
        self.check_writable(EntityType::Column, id.as_uuid())?;
        if write(&self.columns)?.remove(&id).is_none() {
            return Err(EnrichError::Storage(StorageError::NotFound {
                entity_type: EntityType::Column,
                id: id.as_uuid(),
            }));
        }
        write(&self.cells)?.retain(|key, _| key.column_id != id);
        Ok(())
    }

    // === Row Operations ===

    async fn list_rows(&self, workspace_id: WorkspaceId, limit: usize) -> EnrichResult<Vec<Row>> {
        let mut rows: Vec<Row> = read(&self.rows)?
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.order_index, r.row_id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn upsert_row(&self, row: &Row) -> EnrichResult<()> {
        self.check_writable(EntityType::Row, row.row_id.as_uuid())?;
        write(&self.rows)?.insert(row.row_id, row.clone());
        Ok(())
    }

    async fn delete_row(&self, id: RowId) -> EnrichResult<()> {
        self.check_writable(EntityType::Row, id.as_uuid())?;
        if write(&self.rows)?.remove(&id).is_none() {
            return Err(EnrichError::Storage(StorageError::NotFound {
                entity_type: EntityType::Row,
                id: id.as_uuid(),
            }));
        }
        write(&self.cells)?.retain(|key, _| key.row_id != id);
        Ok(())
    }

    // === Cell Operations ===

    async fn list_cells(&self, workspace_id: WorkspaceId) -> EnrichResult<Vec<Cell>> {
        let rows = read(&self.rows)?;
        let cells = read(&self.cells)?;
        Ok(cells
            .values()
            .filter(|c| {
                rows.get(&c.row_id)
                    .is_some_and(|r| r.workspace_id == workspace_id)
            })
            .cloned()
            .collect())
    }

    async fn upsert_cell(&self, cell: &Cell) -> EnrichResult<()> {
        self.check_writable(EntityType::Cell, cell.row_id.as_uuid())?;
        let row_exists = read(&self.rows)?.contains_key(&cell.row_id);
        let column_exists = read(&self.columns)?.contains_key(&cell.column_id);
        if !row_exists || !column_exists {
            return Err(EnrichError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Cell,
                reason: format!("cell {} references a missing row or column", cell.key()),
            }));
        }
        write(&self.cells)?.insert(cell.key(), cell.clone());
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_core::{CellValue, ColumnConfig};

    async fn seeded() -> (MockStorage, Workspace, Column, Row) {
        let storage = MockStorage::new();
        let workspace = Workspace::new("Prospects");
        storage.workspace_insert(&workspace).await.unwrap();
        let column = Column::new(workspace.workspace_id, "Company", ColumnConfig::StaticField, 0);
        storage.upsert_column(&column).await.unwrap();
        let row = Row::new(workspace.workspace_id, 0);
        storage.upsert_row(&row).await.unwrap();
        (storage, workspace, column, row)
    }

    #[tokio::test]
    async fn test_workspace_round_trip() {
        let (storage, workspace, _, _) = seeded().await;
        let fetched = storage.workspace_get(workspace.workspace_id).await.unwrap();
        assert_eq!(fetched, Some(workspace.clone()));
        assert!(storage.workspace_insert(&workspace).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_cell_requires_row_and_column() {
        let (storage, _, column, row) = seeded().await;
        let mut cell = Cell::new(row.row_id, column.column_id);
        cell.set_manual(CellValue::text("Acme"));
        storage.upsert_cell(&cell).await.unwrap();
        assert_eq!(storage.cell_count(), 1);

        let orphan = Cell::new(RowId::now_v7(), column.column_id);
        assert!(matches!(
            storage.upsert_cell(&orphan).await,
            Err(EnrichError::Storage(StorageError::InsertFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_column_cascades() {
        let (storage, workspace, column, row) = seeded().await;
        storage
            .upsert_cell(&Cell::new(row.row_id, column.column_id))
            .await
            .unwrap();
        storage.delete_column(column.column_id).await.unwrap();
        assert_eq!(storage.cell_count(), 0);
        assert!(storage
            .list_columns(workspace.workspace_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_not_found() {
        let storage = MockStorage::new();
        assert!(matches!(
            storage.delete_row(RowId::now_v7()).await,
            Err(EnrichError::Storage(StorageError::NotFound {
                entity_type: EntityType::Row,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let (storage, workspace, _, _) = seeded().await;
        storage.set_fail_writes(true);
        let row = Row::new(workspace.workspace_id, 1);
        assert!(matches!(
            storage.upsert_row(&row).await,
            Err(EnrichError::Storage(StorageError::UpdateFailed { .. }))
        ));
        storage.set_fail_writes(false);
        storage.upsert_row(&row).await.unwrap();
        assert_eq!(storage.row_count(), 2);
    }

    #[tokio::test]
    async fn test_list_rows_respects_limit_and_order() {
        let storage = MockStorage::new();
        let workspace = Workspace::new("Big");
        for i in (0..10).rev() {
            storage
                .upsert_row(&Row::new(workspace.workspace_id, i))
                .await
                .unwrap();
        }
        let rows = storage.list_rows(workspace.workspace_id, 4).await.unwrap();
        let order: Vec<i64> = rows.iter().map(|r| r.order_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
