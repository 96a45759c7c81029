//! Shared async front of a grid.
//!
//! `GridHandle` puts a `Grid` behind a tokio `RwLock`, drives the futures
//! the grid hands out with bounded concurrency, and writes every change
//! through to storage when one is attached. The write lock is only held to
//! start and to land computations, never across a collaborator call.

use crate::dispatcher::Dispatcher;
use crate::export::export_csv;
use crate::filter::RowFilter;
use crate::grid::{Cancellation, CellRun, ColumnRemoval, EditOutcome, Grid};
use crate::insights::WorkspaceInsights;
use enrich_core::{
    interpolate, AiConfig, CampaignId, Cell, CellKey, CellValue, Column, ColumnConfig, ColumnId,
    ColumnKind, EnrichError, EnrichResult, EntityIdType, EntityType, ExportConfig,
    FitScoreConfig, GridConfig, GridError, Row, RowId, SortDirection, StorageError, Transition,
    Workspace, WorkspaceId,
};
use enrich_llm::ModelCatalog;
use enrich_storage::WorkspaceStorage;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, Semaphore};
use tracing::{debug, info, warn};

/// Name of the column added by `find_best_fits`.
pub const FIT_SCORE_COLUMN: &str = "Fit Score";

// ============================================================================
// RUN REPORTING
// ============================================================================

/// Progress of a column run, reported after every landed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    pub completed: usize,
    pub total: usize,
    /// Rounded to the nearest whole percent
    pub percentage: u32,
}

impl RunProgress {
    fn new(completed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u32
        };
        Self {
            completed,
            total,
            percentage,
        }
    }
}

/// Outcome of running a column or a cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Cells that were started
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Results discarded because a newer request or a delete overtook them
    pub stale: usize,
    pub tokens_used: i64,
    /// Estimated spend in USD for model columns
    pub estimated_cost: f64,
}

// ============================================================================
// GRID HANDLE
// ============================================================================

/// Cloneable handle to one workspace's grid.
#[derive(Clone)]
pub struct GridHandle {
    grid: Arc<RwLock<Grid>>,
    dispatcher: Arc<Dispatcher>,
    storage: Option<Arc<dyn WorkspaceStorage>>,
}

impl GridHandle {
    pub fn new(grid: Grid, dispatcher: Dispatcher) -> Self {
        Self {
            grid: Arc::new(RwLock::new(grid)),
            dispatcher: Arc::new(dispatcher),
            storage: None,
        }
    }

    /// Write every change through to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn WorkspaceStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Persist a new workspace and open an empty grid for it.
    pub async fn create(
        storage: Arc<dyn WorkspaceStorage>,
        workspace: Workspace,
        dispatcher: Dispatcher,
        config: GridConfig,
    ) -> EnrichResult<Self> {
        storage.workspace_insert(&workspace).await?;
        info!(workspace_id = %workspace.workspace_id, name = %workspace.name, "workspace created");
        Ok(Self::new(Grid::new(workspace, config), dispatcher).with_storage(storage))
    }

    /// Open a persisted workspace.
    pub async fn load(
        storage: Arc<dyn WorkspaceStorage>,
        workspace_id: WorkspaceId,
        dispatcher: Dispatcher,
        config: GridConfig,
    ) -> EnrichResult<Self> {
        let workspace = storage.workspace_get(workspace_id).await?.ok_or(
            EnrichError::Storage(StorageError::NotFound {
                entity_type: EntityType::Workspace,
                id: workspace_id.as_uuid(),
            }),
        )?;
        let columns = storage.list_columns(workspace_id).await?;
        // one extra so an over-limit workspace is noticed
        let rows = storage
            .list_rows(workspace_id, config.row_limit.saturating_add(1))
            .await?;
        let cells = storage.list_cells(workspace_id).await?;
        info!(
            workspace_id = %workspace_id,
            columns = columns.len(),
            rows = rows.len(),
            cells = cells.len(),
            "workspace loaded"
        );

        let grid = Grid::from_snapshot(workspace, columns, rows, cells, config);
        Ok(Self::new(grid, dispatcher).with_storage(storage))
    }

    /// Read access to the grid. Hold it briefly; runs need the write lock to
    /// land results.
    pub async fn read(&self) -> RwLockReadGuard<'_, Grid> {
        self.grid.read().await
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    // ========================================================================
    // STRUCTURE
    // ========================================================================

    pub async fn add_column(
        &self,
        kind: ColumnKind,
        name: impl Into<String>,
        config: ColumnConfig,
    ) -> EnrichResult<Column> {
        let (column, cells) = {
            let mut grid = self.grid.write().await;
            let column = grid.add_column(kind, name, config)?;
            let cells = column_cells(&grid, column.column_id);
            (column, cells)
        };
        if let Some(storage) = &self.storage {
            storage.upsert_column(&column).await.map_err(write_failed)?;
            for cell in &cells {
                storage.upsert_cell(cell).await.map_err(write_failed)?;
            }
        }
        Ok(column)
    }

    /// Remove a column. Columns that read it are rewired and their cells
    /// recomputed; stale collaborator-backed dependents are re-run when
    /// `auto_rerun_dependents` is on.
    pub async fn remove_column(&self, column_id: ColumnId) -> EnrichResult<ColumnRemoval> {
        let (removal, cells, rerun) = {
            let mut grid = self.grid.write().await;
            let removal = grid.remove_column(column_id)?;
            let cells = keyed_cells(&grid, &removal.outcome.updated);
            (removal, cells, grid.config().auto_rerun_dependents)
        };
        if let Some(storage) = &self.storage {
            storage.delete_column(column_id).await.map_err(write_failed)?;
            for column in &removal.rewired {
                storage.upsert_column(column).await.map_err(write_failed)?;
            }
            for cell in &cells {
                storage.upsert_cell(cell).await.map_err(write_failed)?;
            }
        }
        if rerun {
            self.rerun_stale(&removal.outcome.stale).await?;
        }
        Ok(removal)
    }

    pub async fn reorder_column(&self, column_id: ColumnId, new_index: usize) -> EnrichResult<()> {
        let changed = self
            .grid
            .write()
            .await
            .reorder_column(column_id, new_index)?;
        if let Some(storage) = &self.storage {
            for column in &changed {
                storage.upsert_column(column).await.map_err(write_failed)?;
            }
        }
        Ok(())
    }

    pub async fn rename_column(&self, column_id: ColumnId, name: impl Into<String>) -> EnrichResult<Column> {
        let column = self.grid.write().await.rename_column(column_id, name)?;
        self.store_column(&column).await?;
        Ok(column)
    }

    pub async fn update_column_config(
        &self,
        column_id: ColumnId,
        config: ColumnConfig,
    ) -> EnrichResult<Column> {
        let column = self
            .grid
            .write()
            .await
            .update_column_config(column_id, config)?;
        self.store_column(&column).await?;
        Ok(column)
    }

    pub async fn add_row(&self) -> EnrichResult<Row> {
        let (row, cells) = {
            let mut grid = self.grid.write().await;
            let row = grid.add_row();
            let cells = row_cells(&grid, row.row_id);
            (row, cells)
        };
        if let Some(storage) = &self.storage {
            storage.upsert_row(&row).await.map_err(write_failed)?;
            for cell in &cells {
                storage.upsert_cell(cell).await.map_err(write_failed)?;
            }
        }
        Ok(row)
    }

    pub async fn remove_row(&self, row_id: RowId) -> EnrichResult<Row> {
        let row = self.grid.write().await.remove_row(row_id)?;
        if let Some(storage) = &self.storage {
            storage.delete_row(row_id).await.map_err(write_failed)?;
        }
        Ok(row)
    }

    /// Attach the workspace to a campaign used by fit score columns.
    pub async fn set_campaign(&self, campaign_id: Option<CampaignId>) -> EnrichResult<()> {
        let workspace = {
            let mut grid = self.grid.write().await;
            grid.set_campaign(campaign_id);
            grid.workspace().clone()
        };
        if let Some(storage) = &self.storage {
            storage.workspace_update(&workspace).await.map_err(write_failed)?;
        }
        Ok(())
    }

    // ========================================================================
    // CELLS
    // ========================================================================

    /// Set a static cell. When `auto_rerun_dependents` is on, stale
    /// collaborator-backed dependents are re-run before returning.
    pub async fn edit_cell(
        &self,
        row_id: RowId,
        column_id: ColumnId,
        value: impl Into<CellValue>,
    ) -> EnrichResult<EditOutcome> {
        let (outcome, cells, rerun) = {
            let mut grid = self.grid.write().await;
            let outcome = grid.edit_cell(row_id, column_id, value)?;
            let cells = keyed_cells(&grid, &outcome.updated);
            (outcome, cells, grid.config().auto_rerun_dependents)
        };
        if let Some(storage) = &self.storage {
            for cell in &cells {
                storage.upsert_cell(cell).await.map_err(write_failed)?;
            }
        }

        if rerun {
            self.rerun_stale(&outcome.stale).await?;
        }
        Ok(outcome)
    }

    async fn rerun_stale(&self, stale: &[CellKey]) -> EnrichResult<()> {
        if stale.is_empty() {
            return Ok(());
        }
        let runs = {
            let mut grid = self.grid.write().await;
            let mut runs = Vec::with_capacity(stale.len());
            for key in stale {
                runs.push(grid.begin_cell(&self.dispatcher, key.row_id, key.column_id)?);
            }
            runs
        };
        debug!(count = runs.len(), "re-running stale dependents");
        self.drive(runs, None, |_| {}).await;
        Ok(())
    }

    /// Compute one cell.
    pub async fn run_cell(&self, row_id: RowId, column_id: ColumnId) -> EnrichResult<RunReport> {
        let (run, model_id) = {
            let mut grid = self.grid.write().await;
            let model_id = model_of(grid.column(column_id)?);
            (grid.begin_cell(&self.dispatcher, row_id, column_id)?, model_id)
        };
        Ok(self.drive(vec![run], model_id, |_| {}).await)
    }

    /// Compute a column for every row.
    pub async fn run_column(&self, column_id: ColumnId) -> EnrichResult<RunReport> {
        self.run_column_with_progress(column_id, |_| {}).await
    }

    /// Compute a column for every row, reporting progress as cells land.
    pub async fn run_column_with_progress<F>(
        &self,
        column_id: ColumnId,
        on_progress: F,
    ) -> EnrichResult<RunReport>
    where
        F: FnMut(RunProgress) + Send,
    {
        let (runs, model_id) = {
            let mut grid = self.grid.write().await;
            let column = grid.column(column_id)?;
            info!(column_id = %column_id, kind = %column.kind(), rows = grid.row_count(), "running column");
            let model_id = model_of(column);
            (grid.begin_column(&self.dispatcher, column_id)?, model_id)
        };

        let report = self.drive(runs, model_id, on_progress).await;
        info!(
            column_id = %column_id,
            succeeded = report.succeeded,
            failed = report.failed,
            stale = report.stale,
            tokens = report.tokens_used,
            "column run finished"
        );
        Ok(report)
    }

    /// Fail every pending cell of a column.
    pub async fn cancel_column(&self, column_id: ColumnId) -> EnrichResult<Cancellation> {
        let (cancellation, cells) = {
            let mut grid = self.grid.write().await;
            let cancellation = grid.cancel_column(column_id)?;
            let mut keys = cancellation.cancelled.clone();
            keys.extend(cancellation.outcome.updated.iter().copied());
            let cells = keyed_cells(&grid, &keys);
            (cancellation, cells)
        };
        self.store_cells_best_effort(&cells).await;
        Ok(cancellation)
    }

    /// Score every row against the workspace's campaign, adding a fit score
    /// column first when there is none, then sort best fits first.
    pub async fn find_best_fits(&self) -> EnrichResult<(ColumnId, RunReport)> {
        let existing = {
            let grid = self.grid.read().await;
            grid.columns()
                .iter()
                .find(|c| c.kind() == ColumnKind::FitScore)
                .map(|c| c.column_id)
        };
        let column_id = match existing {
            Some(id) => id,
            None => {
                let campaign_id = self.grid.read().await.workspace().campaign_id;
                self.add_column(
                    ColumnKind::FitScore,
                    FIT_SCORE_COLUMN,
                    ColumnConfig::FitScore(FitScoreConfig { campaign_id }),
                )
                .await?
                .column_id
            }
        };

        let report = self.run_column(column_id).await?;
        self.grid
            .write()
            .await
            .sort_by_column(column_id, SortDirection::Descending)?;
        Ok((column_id, report))
    }

    /// Run an AI configuration against the first visible row without
    /// touching any cell.
    pub async fn test_ai_column(&self, config: &AiConfig) -> EnrichResult<String> {
        let prompt = {
            let grid = self.grid.read().await;
            let first = grid
                .rows()
                .first()
                .map(|r| r.row_id)
                .ok_or(GridError::NoRows)?;
            let ctx = grid.row_context(first)?;
            interpolate(&config.prompt_template, &ctx.values)
        };
        let reply = self.dispatcher.invoke_model(&prompt, &config.model_id).await?;
        Ok(reply.text)
    }

    // ========================================================================
    // VIEWS
    // ========================================================================

    pub async fn sort_by_column(&self, column_id: ColumnId, direction: SortDirection) -> EnrichResult<()> {
        self.grid.write().await.sort_by_column(column_id, direction)
    }

    pub async fn clear_sort(&self) {
        self.grid.write().await.clear_sort();
    }

    pub async fn export(&self, filter: Option<&RowFilter>, config: &ExportConfig) -> EnrichResult<String> {
        let grid = self.grid.read().await;
        export_csv(&grid, filter, config)
    }

    pub async fn insights(&self) -> WorkspaceInsights {
        WorkspaceInsights::compute(&*self.grid.read().await)
    }

    // ========================================================================
    // DRIVING
    // ========================================================================

    /// Await in-flight cells with at most `max_concurrent_computations`
    /// collaborator calls at once, landing each result as it arrives.
    async fn drive<F>(&self, runs: Vec<CellRun>, model_id: Option<String>, mut on_progress: F) -> RunReport
    where
        F: FnMut(RunProgress) + Send,
    {
        let limit = self.grid.read().await.config().max_concurrent_computations.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut report = RunReport::default();
        let mut settled = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        for run in runs {
            match run {
                CellRun::Skipped => {}
                CellRun::Settled { key, ok } => {
                    report.total += 1;
                    if ok {
                        report.succeeded += 1;
                    } else {
                        report.failed += 1;
                    }
                    settled.push(key);
                }
                CellRun::InFlight(flight) => {
                    report.total += 1;
                    let semaphore = semaphore.clone();
                    in_flight.push(async move {
                        let _permit = semaphore.acquire_owned().await;
                        let result = flight.future.await;
                        (flight.key, flight.generation, result)
                    });
                }
            }
        }

        let mut completed = settled.len();
        if !settled.is_empty() {
            let cells = keyed_cells(&*self.grid.read().await, &settled);
            self.store_cells_best_effort(&cells).await;
            on_progress(RunProgress::new(completed, report.total));
        }

        while let Some((key, generation, result)) = in_flight.next().await {
            if let Ok(computed) = &result {
                report.tokens_used += computed.tokens_used;
            }
            let ok = result.is_ok();
            let (completion, cells) = {
                let mut grid = self.grid.write().await;
                let completion = grid.complete(key, generation, result.map(|c| c.value));
                let cells = keyed_cells(&grid, &completion.outcome.updated);
                (completion, cells)
            };
            match completion.transition {
                Transition::Applied if ok => report.succeeded += 1,
                Transition::Applied => report.failed += 1,
                Transition::Stale => report.stale += 1,
            }
            self.store_cells_best_effort(&cells).await;

            completed += 1;
            on_progress(RunProgress::new(completed, report.total));
        }

        if let Some(model_id) = model_id {
            report.estimated_cost = ModelCatalog::estimate_cost(&model_id, report.tokens_used);
        }
        report
    }

    async fn store_column(&self, column: &Column) -> EnrichResult<()> {
        match &self.storage {
            Some(storage) => storage.upsert_column(column).await.map_err(write_failed),
            None => Ok(()),
        }
    }

    /// Cell writes after a computation never fail the run; the in-memory
    /// grid stays authoritative.
    async fn store_cells_best_effort(&self, cells: &[Cell]) {
        let Some(storage) = &self.storage else {
            return;
        };
        for cell in cells {
            if let Err(e) = storage.upsert_cell(cell).await {
                warn!(cell = %cell.key(), error = %e, "failed to persist cell");
            }
        }
    }
}

impl std::fmt::Debug for GridHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridHandle")
            .field("dispatcher", &self.dispatcher)
            .field("has_storage", &self.storage.is_some())
            .finish()
    }
}

fn write_failed(e: EnrichError) -> EnrichError {
    warn!(error = %e, "storage write-through failed");
    e
}

fn model_of(column: &Column) -> Option<String> {
    match column.config() {
        ColumnConfig::AiGenerated(c) => Some(c.model_id.clone()),
        _ => None,
    }
}

fn keyed_cells(grid: &Grid, keys: &[CellKey]) -> Vec<Cell> {
    keys.iter()
        .filter_map(|key| grid.cell_by_key(*key).cloned())
        .collect()
}

fn column_cells(grid: &Grid, column_id: ColumnId) -> Vec<Cell> {
    grid.cells()
        .filter(|c| c.column_id == column_id)
        .cloned()
        .collect()
}

fn row_cells(grid: &Grid, row_id: RowId) -> Vec<Cell> {
    grid.cells().filter(|c| c.row_id == row_id).cloned().collect()
}

// ============================================================================
// TESTS
// ============================================================================
