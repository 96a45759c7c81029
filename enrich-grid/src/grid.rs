//! The grid controller.
//!
//! `Grid` owns one workspace's columns, rows and cells and is the only
//! mutation path for them. It is synchronous: computations that need a
//! collaborator are started here (the cell goes `pending` and a future is
//! handed back) and landed later through `complete`, which discards results
//! whose generation was superseded. `GridHandle` drives those futures.

use crate::authoring::PromptVariable;
use crate::dispatcher::{compute_local, Computation, Dispatcher, PendingFuture, RowContext};
use crate::filter::RowFilter;
use chrono::Utc;
use enrich_core::{
    Cell, CellKey, CellState, CellValue, Column, ColumnConfig, ColumnId, ColumnKind,
    EnrichResult, GridConfig, GridError, Generation, Row, RowId, RowValues, SortDirection,
    Transition, Workspace,
};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Reason recorded on cells whose computation was interrupted by a reload.
pub const INTERRUPTED: &str = "computation interrupted";

/// Reason recorded on cancelled cells.
pub const CANCELLED: &str = "cancelled";

// ============================================================================
// OUTCOMES
// ============================================================================

/// Active row ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub column_id: ColumnId,
    pub direction: SortDirection,
}

/// Cells touched by an edit or a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditOutcome {
    /// Cells whose state changed, the edited cell first
    pub updated: Vec<CellKey>,
    /// Collaborator-backed dependents whose inputs changed; they keep their
    /// value until re-run
    pub stale: Vec<CellKey>,
}

/// Result of landing a deferred computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub transition: Transition,
    /// Local dependents recomputed because this cell settled
    pub outcome: EditOutcome,
}

/// What removing a column changed besides the column itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRemoval {
    pub column: Column,
    /// Columns that listed the removed one as a source and no longer do
    pub rewired: Vec<Column>,
    /// Dependent cells recomputed or left stale on every row
    pub outcome: EditOutcome,
}

/// Cells failed by a cancel and the dependents that followed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cancellation {
    pub cancelled: Vec<CellKey>,
    pub outcome: EditOutcome,
}

/// A cell waiting on its collaborator.
pub struct InFlight {
    pub key: CellKey,
    pub generation: Generation,
    pub future: PendingFuture,
}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

/// How starting one cell went.
#[derive(Debug)]
pub enum CellRun {
    /// Static fields are not computed.
    Skipped,
    /// Local kind, already ready or error.
    Settled { key: CellKey, ok: bool },
    InFlight(InFlight),
}

// ============================================================================
// GRID
// ============================================================================

/// In-memory table for one workspace.
#[derive(Debug, Clone)]
pub struct Grid {
    workspace: Workspace,
    /// Display order; `order_index` strictly increasing
    columns: Vec<Column>,
    /// `order_index` order
    rows: Vec<Row>,
    cells: HashMap<CellKey, Cell>,
    sort: Option<SortSpec>,
    selection: BTreeSet<CellKey>,
    config: GridConfig,
}

impl Grid {
    pub fn new(workspace: Workspace, config: GridConfig) -> Self {
        Self {
            workspace,
            columns: Vec::new(),
            rows: Vec::new(),
            cells: HashMap::new(),
            sort: None,
            selection: BTreeSet::new(),
            config,
        }
    }

    /// Rebuild a grid from persisted entities.
    ///
    /// Orphan cells are dropped, missing cells start `empty`, rows beyond
    /// `row_limit` are not loaded, and cells persisted as `pending` become
    /// errors since nothing is computing them any more.
    pub fn from_snapshot(
        workspace: Workspace,
        mut columns: Vec<Column>,
        mut rows: Vec<Row>,
        cells: Vec<Cell>,
        config: GridConfig,
    ) -> Self {
        columns.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then(a.created_at.cmp(&b.created_at))
        });
        if columns.windows(2).any(|w| w[0].order_index == w[1].order_index) {
            warn!(workspace_id = %workspace.workspace_id, "duplicate column order, renumbering");
            for (index, column) in columns.iter_mut().enumerate() {
                column.order_index = index as i64;
            }
        }

        rows.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then(a.created_at.cmp(&b.created_at))
        });
        if rows.len() > config.row_limit {
            warn!(
                workspace_id = %workspace.workspace_id,
                loaded = config.row_limit,
                total = rows.len(),
                "row limit reached, extra rows not loaded"
            );
            rows.truncate(config.row_limit);
        }

        let column_ids: HashSet<ColumnId> = columns.iter().map(|c| c.column_id).collect();
        let row_ids: HashSet<RowId> = rows.iter().map(|r| r.row_id).collect();

        let mut map = HashMap::new();
        for cell in cells {
            if !row_ids.contains(&cell.row_id) || !column_ids.contains(&cell.column_id) {
                continue;
            }
            let cell = match cell.state() {
                CellState::Pending { previous } => Cell::from_parts(
                    cell.row_id,
                    cell.column_id,
                    CellState::Error {
                        message: INTERRUPTED.to_string(),
                        previous: previous.clone(),
                    },
                    cell.generation(),
                    cell.updated_at,
                ),
                _ => cell,
            };
            map.insert(cell.key(), cell);
        }
        for row in &rows {
            for column in &columns {
                let key = CellKey::new(row.row_id, column.column_id);
                map.entry(key)
                    .or_insert_with(|| Cell::new(row.row_id, column.column_id));
            }
        }

        Self {
            workspace,
            columns,
            rows,
            cells: map,
            sort: None,
            selection: BTreeSet::new(),
            config,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Columns in display order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, column_id: ColumnId) -> EnrichResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.column_id == column_id)
            .ok_or_else(|| GridError::ColumnNotFound { id: column_id }.into())
    }

    /// First column whose name matches, ignoring case.
    pub fn column_named(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Rows in display order: sorted when a sort is active, otherwise by
    /// `order_index`.
    pub fn rows(&self) -> Vec<&Row> {
        let mut rows: Vec<&Row> = self.rows.iter().collect();
        if let Some(sort) = self.sort {
            rows.sort_by(|a, b| self.compare_rows(a.row_id, b.row_id, sort));
        }
        rows
    }

    pub fn row(&self, row_id: RowId) -> EnrichResult<&Row> {
        self.rows
            .iter()
            .find(|r| r.row_id == row_id)
            .ok_or_else(|| GridError::RowNotFound { id: row_id }.into())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn cell(&self, row_id: RowId, column_id: ColumnId) -> EnrichResult<&Cell> {
        self.row(row_id)?;
        self.column(column_id)?;
        let key = CellKey::new(row_id, column_id);
        self.cells
            .get(&key)
            .ok_or_else(|| GridError::CellNotFound { key }.into())
    }

    pub fn cell_by_key(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(&key)
    }

    /// Value of a `ready` cell; `None` for any other state or unknown ids.
    pub fn ready_value(&self, row_id: RowId, column_id: ColumnId) -> Option<&CellValue> {
        self.cells
            .get(&CellKey::new(row_id, column_id))
            .and_then(Cell::value)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn set_campaign(&mut self, campaign_id: Option<enrich_core::CampaignId>) {
        self.workspace.campaign_id = campaign_id;
        self.workspace.updated_at = Utc::now();
    }

    // ========================================================================
    // COLUMN OPERATIONS
    // ========================================================================

    /// Append a column after the last one. Every existing row gets an
    /// `empty` cell.
    pub fn add_column(
        &mut self,
        kind: ColumnKind,
        name: impl Into<String>,
        config: ColumnConfig,
    ) -> EnrichResult<Column> {
        let name = name.into();
        if config.kind() != kind {
            return Err(GridError::KindMismatch {
                expected: kind,
                got: config.kind(),
            }
            .into());
        }
        config.validate(&name)?;
        self.check_references(&name, None, &config)?;

        let order_index = self.columns.last().map(|c| c.order_index + 1).unwrap_or(0);
        let column = Column::new(self.workspace.workspace_id, name, config, order_index);
        for row in &self.rows {
            let key = CellKey::new(row.row_id, column.column_id);
            self.cells.insert(key, Cell::new(row.row_id, column.column_id));
        }
        debug!(column_id = %column.column_id, kind = %kind, name = %column.name, "column added");
        self.columns.push(column.clone());
        Ok(column)
    }

    /// Remove a column and every cell keyed by it. Columns that read it by
    /// id forget it as a source, and every dependent is recomputed on every
    /// row (or reported stale when it needs a collaborator).
    pub fn remove_column(&mut self, column_id: ColumnId) -> EnrichResult<ColumnRemoval> {
        let position = self.column_position(column_id)?;
        let dependents: Vec<ColumnId> = self
            .columns
            .iter()
            .filter(|c| c.depends_on(&self.columns[position]))
            .map(|c| c.column_id)
            .collect();

        let column = self.columns.remove(position);
        self.cells.retain(|key, _| key.column_id != column_id);
        self.selection.retain(|key| key.column_id != column_id);
        if self.sort.is_some_and(|s| s.column_id == column_id) {
            self.sort = None;
        }

        let mut rewired = Vec::new();
        for other in self.columns.iter_mut() {
            if other.forget_source(column_id) {
                rewired.push(other.clone());
            }
        }

        let mut outcome = EditOutcome::default();
        let row_ids: Vec<RowId> = self.rows.iter().map(|r| r.row_id).collect();
        for row_id in row_ids {
            let mut visited = HashSet::new();
            let mut queue = VecDeque::new();
            for dependent in &dependents {
                visited.insert(*dependent);
                if self.refresh(row_id, *dependent, &mut outcome) {
                    queue.push_back(*dependent);
                }
            }
            self.propagate_queue(row_id, visited, queue, &mut outcome);
        }

        debug!(
            column_id = %column_id,
            dependents = dependents.len(),
            rewired = rewired.len(),
            "column removed"
        );
        Ok(ColumnRemoval {
            column,
            rewired,
            outcome,
        })
    }

    /// Move a column to `new_index` in display order. The existing
    /// `order_index` values are reassigned in order, so only the columns
    /// between the old and new position change and no two columns share
    /// an index. Returns the columns whose index changed.
    pub fn reorder_column(&mut self, column_id: ColumnId, new_index: usize) -> EnrichResult<Vec<Column>> {
        let len = self.columns.len();
        let from = self.column_position(column_id)?;
        if new_index >= len {
            return Err(GridError::IndexOutOfRange {
                index: new_index,
                len,
            }
            .into());
        }

        let slots: Vec<i64> = self.columns.iter().map(|c| c.order_index).collect();
        let column = self.columns.remove(from);
        self.columns.insert(new_index, column);

        let now = Utc::now();
        let mut changed = Vec::new();
        for (column, slot) in self.columns.iter_mut().zip(slots) {
            if column.order_index != slot {
                column.order_index = slot;
                column.updated_at = now;
                changed.push(column.clone());
            }
        }
        debug!(column_id = %column_id, from, to = new_index, "column reordered");
        Ok(changed)
    }

    pub fn rename_column(&mut self, column_id: ColumnId, name: impl Into<String>) -> EnrichResult<Column> {
        let position = self.column_position(column_id)?;
        let column = &mut self.columns[position];
        column.name = name.into();
        column.updated_at = Utc::now();
        Ok(column.clone())
    }

    /// Replace a column's configuration. The kind cannot change; cells keep
    /// their values until the column is run again.
    pub fn update_column_config(
        &mut self,
        column_id: ColumnId,
        config: ColumnConfig,
    ) -> EnrichResult<Column> {
        let position = self.column_position(column_id)?;
        let name = self.columns[position].name.clone();
        self.check_references(&name, Some(column_id), &config)?;
        let column = &mut self.columns[position];
        column.replace_config(config)?;
        Ok(column.clone())
    }

    fn column_position(&self, column_id: ColumnId) -> EnrichResult<usize> {
        self.columns
            .iter()
            .position(|c| c.column_id == column_id)
            .ok_or_else(|| GridError::ColumnNotFound { id: column_id }.into())
    }

    fn check_references(
        &self,
        name: &str,
        self_id: Option<ColumnId>,
        config: &ColumnConfig,
    ) -> EnrichResult<()> {
        let invalid = |reason: String| GridError::InvalidColumnConfig {
            column: name.to_string(),
            reason,
        };
        for id in config.references().ids {
            if Some(id) == self_id {
                return Err(invalid("a column cannot reference itself".to_string()).into());
            }
            let source = self
                .columns
                .iter()
                .find(|c| c.column_id == id)
                .ok_or_else(|| invalid(format!("unknown source column {}", id)))?;
            if matches!(config, ColumnConfig::Enrichment(_)) && !source.kind().is_static() {
                return Err(invalid(format!(
                    "enrichment input '{}' is not a static_field column",
                    source.name
                ))
                .into());
            }
        }
        Ok(())
    }

    // ========================================================================
    // ROW OPERATIONS
    // ========================================================================

    /// Append a row with an `empty` cell in every column.
    pub fn add_row(&mut self) -> Row {
        let order_index = self
            .rows
            .iter()
            .map(|r| r.order_index)
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);
        let row = Row::new(self.workspace.workspace_id, order_index);
        for column in &self.columns {
            let key = CellKey::new(row.row_id, column.column_id);
            self.cells.insert(key, Cell::new(row.row_id, column.column_id));
        }
        debug!(row_id = %row.row_id, "row added");
        self.rows.push(row.clone());
        row
    }

    /// Remove a row and every cell keyed by it.
    pub fn remove_row(&mut self, row_id: RowId) -> EnrichResult<Row> {
        let position = self
            .rows
            .iter()
            .position(|r| r.row_id == row_id)
            .ok_or(GridError::RowNotFound { id: row_id })?;
        let row = self.rows.remove(position);
        self.cells.retain(|key, _| key.row_id != row_id);
        self.selection.retain(|key| key.row_id != row_id);
        debug!(row_id = %row_id, "row removed");
        Ok(row)
    }

    // ========================================================================
    // CELL OPERATIONS
    // ========================================================================

    /// Manually set a `static_field` cell. Computed cells are never writable.
    /// Local dependents on the same row are recomputed right away; the
    /// collaborator-backed ones are reported as stale.
    pub fn edit_cell(
        &mut self,
        row_id: RowId,
        column_id: ColumnId,
        value: impl Into<CellValue>,
    ) -> EnrichResult<EditOutcome> {
        self.row(row_id)?;
        let kind = self.column(column_id)?.kind();
        if !kind.is_static() {
            return Err(GridError::CellNotEditable { column_id, kind }.into());
        }

        let key = CellKey::new(row_id, column_id);
        self.cell_mut(key).set_manual(value.into());
        let mut outcome = EditOutcome {
            updated: vec![key],
            stale: Vec::new(),
        };
        self.propagate(key, &mut outcome);
        Ok(outcome)
    }

    /// Start computing one cell. Local kinds settle immediately; collaborator
    /// kinds move to `pending` and return the future to drive. Starting a
    /// cell that is already pending supersedes the earlier request.
    pub fn begin_cell(
        &mut self,
        dispatcher: &Dispatcher,
        row_id: RowId,
        column_id: ColumnId,
    ) -> EnrichResult<CellRun> {
        let column = self.column(column_id)?.clone();
        let ctx = self.row_context(row_id)?;
        let key = CellKey::new(row_id, column_id);

        match dispatcher.compute(&column, &ctx) {
            Computation::Unchanged => Ok(CellRun::Skipped),
            Computation::Immediate(result) => {
                let ok = result.is_ok();
                self.settle_now(key, result);
                Ok(CellRun::Settled { key, ok })
            }
            Computation::Deferred(future) => {
                let generation = self.cell_mut(key).begin();
                Ok(CellRun::InFlight(InFlight {
                    key,
                    generation,
                    future,
                }))
            }
        }
    }

    /// Start computing a column for every row, in display order.
    pub fn begin_column(
        &mut self,
        dispatcher: &Dispatcher,
        column_id: ColumnId,
    ) -> EnrichResult<Vec<CellRun>> {
        self.column(column_id)?;
        let row_ids: Vec<RowId> = self.rows().iter().map(|r| r.row_id).collect();
        row_ids
            .into_iter()
            .map(|row_id| self.begin_cell(dispatcher, row_id, column_id))
            .collect()
    }

    /// Land the result of a deferred computation. Results for a superseded
    /// generation, or for a cell deleted meanwhile, are discarded.
    pub fn complete(
        &mut self,
        key: CellKey,
        generation: Generation,
        result: EnrichResult<CellValue>,
    ) -> Completion {
        let Some(cell) = self.cells.get_mut(&key) else {
            debug!(cell = %key, "result for deleted cell discarded");
            return Completion {
                transition: Transition::Stale,
                outcome: EditOutcome::default(),
            };
        };

        let transition = match result {
            Ok(value) => cell.resolve(generation, value),
            Err(err) => cell.fail(generation, err.to_string()),
        };

        let mut outcome = EditOutcome::default();
        match transition {
            Transition::Stale => debug!(cell = %key, generation, "superseded result discarded"),
            Transition::Applied => {
                outcome.updated.push(key);
                self.propagate(key, &mut outcome);
            }
        }
        Completion {
            transition,
            outcome,
        }
    }

    /// Fail every pending cell of a column. Their in-flight results will be
    /// discarded when they arrive.
    pub fn cancel_column(&mut self, column_id: ColumnId) -> EnrichResult<Cancellation> {
        self.column(column_id)?;
        let mut cancelled = Vec::new();
        for cell in self.cells.values_mut() {
            if cell.column_id == column_id && cell.is_pending() {
                cell.fail(cell.generation(), CANCELLED);
                cancelled.push(cell.key());
            }
        }
        let mut outcome = EditOutcome::default();
        for key in &cancelled {
            self.propagate(*key, &mut outcome);
        }
        debug!(column_id = %column_id, count = cancelled.len(), "column cancelled");
        Ok(Cancellation { cancelled, outcome })
    }

    fn cell_mut(&mut self, key: CellKey) -> &mut Cell {
        self.cells
            .entry(key)
            .or_insert_with(|| Cell::new(key.row_id, key.column_id))
    }

    fn settle_now(&mut self, key: CellKey, result: EnrichResult<CellValue>) {
        let cell = self.cell_mut(key);
        let generation = cell.begin();
        match result {
            Ok(value) => cell.resolve(generation, value),
            Err(err) => cell.fail(generation, err.to_string()),
        };
    }

    /// Recompute everything on the row that reads `changed`, breadth first,
    /// each column at most once.
    fn propagate(&mut self, changed: CellKey, outcome: &mut EditOutcome) {
        let visited = HashSet::from([changed.column_id]);
        let queue = VecDeque::from([changed.column_id]);
        self.propagate_queue(changed.row_id, visited, queue, outcome);
    }

    fn propagate_queue(
        &mut self,
        row_id: RowId,
        mut visited: HashSet<ColumnId>,
        mut queue: VecDeque<ColumnId>,
        outcome: &mut EditOutcome,
    ) {
        while let Some(source_id) = queue.pop_front() {
            let Some(source) = self.columns.iter().find(|c| c.column_id == source_id) else {
                continue;
            };
            let dependents: Vec<ColumnId> = self
                .columns
                .iter()
                .filter(|c| !visited.contains(&c.column_id) && c.depends_on(source))
                .map(|c| c.column_id)
                .collect();

            for dependent in dependents {
                visited.insert(dependent);
                if self.refresh(row_id, dependent, outcome) {
                    queue.push_back(dependent);
                }
            }
        }
    }

    /// Recompute one local cell from the row as it is now, or report it
    /// stale when it needs a collaborator. Returns whether it was recomputed.
    fn refresh(&mut self, row_id: RowId, column_id: ColumnId, outcome: &mut EditOutcome) -> bool {
        let key = CellKey::new(row_id, column_id);
        let Some(column) = self.columns.iter().find(|c| c.column_id == column_id) else {
            return false;
        };
        let Ok(ctx) = self.row_context(row_id) else {
            return false;
        };
        match compute_local(column.config(), &ctx) {
            Some(result) => {
                self.settle_now(key, result);
                outcome.updated.push(key);
                true
            }
            None => {
                outcome.stale.push(key);
                false
            }
        }
    }

    /// Snapshot of what computations on `row_id` can see.
    pub fn row_context(&self, row_id: RowId) -> EnrichResult<RowContext> {
        self.row(row_id)?;
        let mut ctx = RowContext::empty(row_id);
        let mut values = RowValues::new();

        for column in &self.columns {
            let key = column.key();
            let value = self.ready_value(row_id, column.column_id);
            if column.kind().is_static() {
                ctx.static_values
                    .insert(key.clone(), value.map(CellValue::display).unwrap_or_default());
            }
            if let Some(value) = value {
                values.insert(key.clone(), value.display());
                ctx.ready.insert(column.column_id, value.clone());
                if column.kind() == ColumnKind::AiGenerated {
                    ctx.ai_outputs.push(value.display());
                }
            }
            ctx.keys.insert(column.column_id, key);
        }

        ctx.values = values.with_standard_aliases();
        ctx.campaign_id = self.workspace.campaign_id;
        Ok(ctx)
    }

    // ========================================================================
    // VIEW STATE
    // ========================================================================

    /// Order rows by a column's values. Non-ready cells sort after every
    /// ready cell in both directions; ties keep their current order.
    pub fn sort_by_column(&mut self, column_id: ColumnId, direction: SortDirection) -> EnrichResult<()> {
        self.column(column_id)?;
        self.sort = Some(SortSpec {
            column_id,
            direction,
        });
        Ok(())
    }

    pub fn clear_sort(&mut self) {
        self.sort = None;
    }

    pub fn sort(&self) -> Option<SortSpec> {
        self.sort
    }

    fn compare_rows(&self, a: RowId, b: RowId, sort: SortSpec) -> Ordering {
        let va = self.ready_value(a, sort.column_id);
        let vb = self.ready_value(b, sort.column_id);
        match (va, vb) {
            (Some(va), Some(vb)) => {
                let ordering = compare_values(va, vb);
                match sort.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// Visible rows in display order. Never mutates the grid.
    pub fn filter(&self, filter: &RowFilter) -> Vec<&Row> {
        self.rows()
            .into_iter()
            .filter(|row| filter.matches(self, row.row_id))
            .collect()
    }

    pub fn select(&mut self, row_id: RowId, column_id: ColumnId) -> EnrichResult<()> {
        self.cell(row_id, column_id)?;
        self.selection.insert(CellKey::new(row_id, column_id));
        Ok(())
    }

    pub fn deselect(&mut self, row_id: RowId, column_id: ColumnId) -> bool {
        self.selection.remove(&CellKey::new(row_id, column_id))
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> Vec<CellKey> {
        self.selection.iter().copied().collect()
    }

    pub fn is_selected(&self, row_id: RowId, column_id: ColumnId) -> bool {
        self.selection.contains(&CellKey::new(row_id, column_id))
    }

    /// Static field columns offered as `{key}` variables, in display order.
    pub fn prompt_variables(&self) -> Vec<PromptVariable> {
        self.columns
            .iter()
            .filter(|c| c.kind().is_static())
            .map(|c| PromptVariable {
                name: c.name.clone(),
                key: c.key(),
            })
            .collect()
    }
}

/// Numbers before text, numbers numerically, text case-insensitively.
fn compare_values(a: &CellValue, b: &CellValue) -> Ordering {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.display().to_lowercase().cmp(&b.display().to_lowercase()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_core::{
        AiConfig, CellStatus, EnrichError, EntityIdType, FormulaConfig, MergeConfig,
        OutputFormat, WaterfallConfig,
    };
    use enrich_llm::{MockModelInvoker, ProviderRegistry};
    use std::sync::Arc;

    fn grid() -> Grid {
        Grid::new(Workspace::new("Test"), GridConfig::default())
    }

    fn static_column(grid: &mut Grid, name: &str) -> ColumnId {
        grid.add_column(ColumnKind::StaticField, name, ColumnConfig::StaticField)
            .unwrap()
            .column_id
    }

    fn ai_config(template: &str) -> ColumnConfig {
        ColumnConfig::AiGenerated(AiConfig {
            prompt_template: template.to_string(),
            model_id: "m".to_string(),
            output: OutputFormat::Text,
        })
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = ProviderRegistry::new();
        registry.register_model(Arc::new(MockModelInvoker::new()));
        Dispatcher::new(
            registry,
            &GridConfig::default(),
            enrich_core::RetryConfig::disabled(),
        )
    }

    #[test]
    fn test_add_column_creates_empty_cells() {
        let mut g = grid();
        let r1 = g.add_row();
        let r2 = g.add_row();
        let col = static_column(&mut g, "Company");
        assert_eq!(g.cell_count(), 2);
        assert_eq!(g.cell(r1.row_id, col).unwrap().status(), CellStatus::Empty);
        assert_eq!(g.cell(r2.row_id, col).unwrap().status(), CellStatus::Empty);
    }

    #[test]
    fn test_add_column_appends_in_order() {
        let mut g = grid();
        let a = static_column(&mut g, "A");
        let b = static_column(&mut g, "B");
        let ids: Vec<ColumnId> = g.columns().iter().map(|c| c.column_id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(g.columns()[0].order_index < g.columns()[1].order_index);
    }

    #[test]
    fn test_add_column_kind_mismatch_rejected() {
        let mut g = grid();
        let err = g
            .add_column(ColumnKind::Formula, "X", ColumnConfig::StaticField)
            .unwrap_err();
        assert!(matches!(err, EnrichError::Grid(GridError::KindMismatch { .. })));
        assert!(g.columns().is_empty());
    }

    #[test]
    fn test_add_column_unknown_source_rejected() {
        let mut g = grid();
        let err = g
            .add_column(
                ColumnKind::Waterfall,
                "W",
                ColumnConfig::Waterfall(WaterfallConfig {
                    sources: vec![ColumnId::now_v7()],
                }),
            )
            .unwrap_err();
        assert!(matches!(err, EnrichError::Grid(GridError::InvalidColumnConfig { .. })));
    }

    #[test]
    fn test_add_column_bad_formula_rejected() {
        let mut g = grid();
        let err = g
            .add_column(
                ColumnKind::Formula,
                "F",
                ColumnConfig::Formula(FormulaConfig {
                    expression: "1 +".to_string(),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, EnrichError::Grid(GridError::InvalidColumnConfig { .. })));
    }

    #[test]
    fn test_edit_computed_cell_rejected_without_change() {
        let mut g = grid();
        let row = g.add_row();
        let ai = g
            .add_column(ColumnKind::AiGenerated, "Analysis", ai_config("Analyze {company}"))
            .unwrap();
        let before = g.cell(row.row_id, ai.column_id).unwrap().clone();

        let err = g.edit_cell(row.row_id, ai.column_id, "hacked").unwrap_err();
        assert!(matches!(err, EnrichError::Grid(GridError::CellNotEditable { .. })));
        assert_eq!(g.cell(row.row_id, ai.column_id).unwrap(), &before);
    }

    #[test]
    fn test_edit_unknown_ids_rejected() {
        let mut g = grid();
        let col = static_column(&mut g, "Company");
        let err = g.edit_cell(RowId::now_v7(), col, "x").unwrap_err();
        assert!(matches!(err, EnrichError::Grid(GridError::RowNotFound { .. })));
    }

    #[test]
    fn test_edit_recomputes_local_dependents() {
        let mut g = grid();
        let row = g.add_row();
        let revenue = static_column(&mut g, "Revenue");
        let employees = static_column(&mut g, "Employees");
        let per_head = g
            .add_column(
                ColumnKind::Formula,
                "Per Head",
                ColumnConfig::Formula(FormulaConfig {
                    expression: "{revenue} / {employees}".to_string(),
                }),
            )
            .unwrap();
        let label = g
            .add_column(
                ColumnKind::Merge,
                "Label",
                ColumnConfig::Merge(MergeConfig {
                    sources: vec![revenue, per_head.column_id],
                    separator: " / ".to_string(),
                    skip_blank: true,
                }),
            )
            .unwrap();
        let ai = g
            .add_column(ColumnKind::AiGenerated, "Pitch", ai_config("Pitch at {revenue}"))
            .unwrap();

        g.edit_cell(row.row_id, employees, "10").unwrap();
        let outcome = g.edit_cell(row.row_id, revenue, "1000").unwrap();

        assert_eq!(
            g.ready_value(row.row_id, per_head.column_id),
            Some(&CellValue::Number(100.0))
        );
        assert_eq!(
            g.ready_value(row.row_id, label.column_id),
            Some(&CellValue::text("1000 / 100"))
        );
        assert_eq!(outcome.updated[0], CellKey::new(row.row_id, revenue));
        assert!(outcome.updated.contains(&CellKey::new(row.row_id, label.column_id)));
        assert_eq!(outcome.stale, vec![CellKey::new(row.row_id, ai.column_id)]);
        assert_eq!(
            g.cell(row.row_id, ai.column_id).unwrap().status(),
            CellStatus::Empty
        );
    }

    #[test]
    fn test_formula_error_lands_on_cell() {
        let mut g = grid();
        let row = g.add_row();
        let name = static_column(&mut g, "Name");
        let f = g
            .add_column(
                ColumnKind::Formula,
                "Double",
                ColumnConfig::Formula(FormulaConfig {
                    expression: "{name} * 2".to_string(),
                }),
            )
            .unwrap();
        g.edit_cell(row.row_id, name, "Acme").unwrap();
        let cell = g.cell(row.row_id, f.column_id).unwrap();
        assert_eq!(cell.status(), CellStatus::Error);
        assert!(cell.value().is_none());
        assert!(cell.error_message().is_some());
    }

    #[test]
    fn test_remove_column_cascades() {
        let mut g = grid();
        let row = g.add_row();
        let a = static_column(&mut g, "A");
        let b = static_column(&mut g, "B");
        g.select(row.row_id, a).unwrap();
        g.sort_by_column(a, SortDirection::Ascending).unwrap();

        g.remove_column(a).unwrap();
        assert_eq!(g.cell_count(), 1);
        assert!(g.cells().all(|c| c.column_id == b));
        assert!(g.selection().is_empty());
        assert_eq!(g.sort(), None);
        assert!(g.remove_column(a).is_err());
    }

    fn ai_then_fallback(g: &mut Grid) -> (RowId, ColumnId, ColumnId, ColumnId) {
        let row = g.add_row().row_id;
        let ai = g
            .add_column(ColumnKind::AiGenerated, "AI", ai_config("hi"))
            .unwrap()
            .column_id;
        let backup = static_column(g, "Backup");
        let best = g
            .add_column(
                ColumnKind::Waterfall,
                "Best",
                ColumnConfig::Waterfall(WaterfallConfig {
                    sources: vec![ai, backup],
                }),
            )
            .unwrap()
            .column_id;
        g.edit_cell(row, backup, "fallback").unwrap();
        (row, ai, backup, best)
    }

    fn in_flight(run: CellRun) -> InFlight {
        match run {
            CellRun::InFlight(flight) => flight,
            other => panic!("expected in-flight, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_source_recomputes_waterfall() {
        let mut g = grid();
        let d = dispatcher();
        let (row, ai, _, best) = ai_then_fallback(&mut g);

        let first = in_flight(g.begin_cell(&d, row, ai).unwrap());
        g.complete(first.key, first.generation, Ok(CellValue::text("from-ai")));
        assert_eq!(g.ready_value(row, best), Some(&CellValue::text("from-ai")));

        let rerun = in_flight(g.begin_cell(&d, row, ai).unwrap());
        let done = g.complete(
            rerun.key,
            rerun.generation,
            Err(enrich_core::ProviderError::TimedOut {
                provider: "mock".to_string(),
                timeout_ms: 10,
            }
            .into()),
        );
        assert_eq!(g.cell(row, ai).unwrap().status(), CellStatus::Error);
        assert!(done.outcome.updated.contains(&CellKey::new(row, best)));
        assert_eq!(g.ready_value(row, best), Some(&CellValue::text("fallback")));
    }

    #[test]
    fn test_cancel_recomputes_dependents() {
        let mut g = grid();
        let d = dispatcher();
        let (row, ai, _, best) = ai_then_fallback(&mut g);
        let first = in_flight(g.begin_cell(&d, row, ai).unwrap());
        g.complete(first.key, first.generation, Ok(CellValue::text("from-ai")));

        let _rerun = in_flight(g.begin_cell(&d, row, ai).unwrap());
        let cancellation = g.cancel_column(ai).unwrap();
        assert!(cancellation.outcome.updated.contains(&CellKey::new(row, best)));
        assert_eq!(g.ready_value(row, best), Some(&CellValue::text("fallback")));
    }

    #[test]
    fn test_remove_source_column_rewires_and_recomputes() {
        let mut g = grid();
        let (row, _, backup, best) = ai_then_fallback(&mut g);
        let website = static_column(&mut g, "Website");
        let link = g
            .add_column(
                ColumnKind::Formula,
                "Link",
                ColumnConfig::Formula(FormulaConfig {
                    expression: "\"https://\" & {website}".to_string(),
                }),
            )
            .unwrap()
            .column_id;
        let pitch = g
            .add_column(ColumnKind::AiGenerated, "Pitch", ai_config("Visit {website}"))
            .unwrap()
            .column_id;
        g.edit_cell(row, website, "acme.com").unwrap();
        assert_eq!(g.ready_value(row, link), Some(&CellValue::text("https://acme.com")));
        assert_eq!(g.ready_value(row, best), Some(&CellValue::text("fallback")));

        let removal = g.remove_column(backup).unwrap();
        assert_eq!(removal.column.column_id, backup);
        assert_eq!(removal.rewired.len(), 1);
        assert!(!g.column(best).unwrap().config().references().ids.contains(&backup));
        assert_eq!(g.ready_value(row, best), Some(&CellValue::text("")));
        assert!(removal.outcome.updated.contains(&CellKey::new(row, best)));

        let removal = g.remove_column(website).unwrap();
        assert!(removal.rewired.is_empty());
        assert_eq!(g.ready_value(row, link), Some(&CellValue::text("https://")));
        assert_eq!(removal.outcome.stale, vec![CellKey::new(row, pitch)]);
    }

    #[test]
    fn test_missing_cell_reports_its_key() {
        let mut g = grid();
        let row = g.add_row().row_id;
        let col = static_column(&mut g, "A");
        let key = CellKey::new(row, col);
        g.cells.remove(&key);
        let err = g.cell(row, col).unwrap_err();
        assert_eq!(err, EnrichError::Grid(GridError::CellNotFound { key }));
    }

    #[test]
    fn test_remove_row_cascades() {
        let mut g = grid();
        let r1 = g.add_row();
        let r2 = g.add_row();
        let a = static_column(&mut g, "A");
        g.select(r1.row_id, a).unwrap();
        g.remove_row(r1.row_id).unwrap();
        assert_eq!(g.cell_count(), 1);
        assert!(g.cells().all(|c| c.row_id == r2.row_id));
        assert!(g.selection().is_empty());
    }

    #[test]
    fn test_reorder_column_moves_and_keeps_indices_unique() {
        let mut g = grid();
        let a = static_column(&mut g, "A");
        let b = static_column(&mut g, "B");
        let c = static_column(&mut g, "C");
        let d = static_column(&mut g, "D");

        let changed = g.reorder_column(d, 1).unwrap();
        let ids: Vec<ColumnId> = g.columns().iter().map(|c| c.column_id).collect();
        assert_eq!(ids, vec![a, d, b, c]);
        assert_eq!(changed.len(), 3);
        let indices: Vec<i64> = g.columns().iter().map(|c| c.order_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_reorder_out_of_range_rejected() {
        let mut g = grid();
        let a = static_column(&mut g, "A");
        let err = g.reorder_column(a, 1).unwrap_err();
        assert!(matches!(
            err,
            EnrichError::Grid(GridError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_sort_puts_non_ready_last_both_directions() {
        let mut g = grid();
        let col = static_column(&mut g, "Score");
        let rows: Vec<RowId> = (0..4).map(|_| g.add_row().row_id).collect();
        g.edit_cell(rows[0], col, 5.0).unwrap();
        g.edit_cell(rows[2], col, 20.0).unwrap();
        g.edit_cell(rows[3], col, 10.0).unwrap();

        g.sort_by_column(col, SortDirection::Ascending).unwrap();
        let asc: Vec<RowId> = g.rows().iter().map(|r| r.row_id).collect();
        assert_eq!(asc, vec![rows[0], rows[3], rows[2], rows[1]]);

        g.sort_by_column(col, SortDirection::Descending).unwrap();
        let desc: Vec<RowId> = g.rows().iter().map(|r| r.row_id).collect();
        assert_eq!(desc, vec![rows[2], rows[3], rows[0], rows[1]]);

        g.clear_sort();
        let natural: Vec<RowId> = g.rows().iter().map(|r| r.row_id).collect();
        assert_eq!(natural, rows);
    }

    #[test]
    fn test_search_filter() {
        let mut g = grid();
        let col = static_column(&mut g, "Company");
        let acme = g.add_row().row_id;
        let globex = g.add_row().row_id;
        g.edit_cell(acme, col, "Acme Robotics").unwrap();
        g.edit_cell(globex, col, "Globex").unwrap();

        let visible: Vec<RowId> = g
            .filter(&RowFilter::search("robot"))
            .iter()
            .map(|r| r.row_id)
            .collect();
        assert_eq!(visible, vec![acme]);
        assert_eq!(g.filter(&RowFilter::search("")).len(), 2);
        assert_eq!(g.row_count(), 2);
    }

    #[test]
    fn test_status_and_min_score_filters() {
        let mut g = grid();
        let score = static_column(&mut g, "Score");
        let hot = g.add_row().row_id;
        let cold = g.add_row().row_id;
        let blank = g.add_row().row_id;
        g.edit_cell(hot, score, 91.0).unwrap();
        g.edit_cell(cold, score, 12.0).unwrap();

        let min = RowFilter::MinScore {
            column: score,
            min: 80.0,
        };
        assert_eq!(g.filter(&min).len(), 1);
        let empty = RowFilter::StatusIs {
            column: score,
            status: CellStatus::Empty,
        };
        assert_eq!(g.filter(&empty)[0].row_id, blank);
        let both = RowFilter::All {
            filters: vec![min, empty],
        };
        assert!(g.filter(&both).is_empty());
    }

    #[test]
    fn test_select_requires_existing_cell() {
        let mut g = grid();
        let col = static_column(&mut g, "A");
        let row = g.add_row();
        assert!(g.select(RowId::now_v7(), col).is_err());
        g.select(row.row_id, col).unwrap();
        assert!(g.is_selected(row.row_id, col));
        assert!(g.deselect(row.row_id, col));
        assert!(!g.deselect(row.row_id, col));
    }

    #[test]
    fn test_begin_cell_supersedes_and_discards_stale() {
        let mut g = grid();
        let d = dispatcher();
        let row = g.add_row();
        let ai = g
            .add_column(ColumnKind::AiGenerated, "AI", ai_config("hi"))
            .unwrap();

        let first = match g.begin_cell(&d, row.row_id, ai.column_id).unwrap() {
            CellRun::InFlight(flight) => flight,
            other => panic!("expected in-flight, got {:?}", other),
        };
        let second = match g.begin_cell(&d, row.row_id, ai.column_id).unwrap() {
            CellRun::InFlight(flight) => flight,
            other => panic!("expected in-flight, got {:?}", other),
        };

        let done = g.complete(second.key, second.generation, Ok(CellValue::text("new")));
        assert_eq!(done.transition, Transition::Applied);
        let late = g.complete(first.key, first.generation, Ok(CellValue::text("old")));
        assert_eq!(late.transition, Transition::Stale);
        assert_eq!(
            g.ready_value(row.row_id, ai.column_id),
            Some(&CellValue::text("new"))
        );
    }

    #[test]
    fn test_complete_after_row_deleted_is_stale() {
        let mut g = grid();
        let d = dispatcher();
        let row = g.add_row();
        let ai = g
            .add_column(ColumnKind::AiGenerated, "AI", ai_config("hi"))
            .unwrap();
        let CellRun::InFlight(flight) = g.begin_cell(&d, row.row_id, ai.column_id).unwrap() else {
            panic!("expected in-flight");
        };
        g.remove_row(row.row_id).unwrap();
        let done = g.complete(flight.key, flight.generation, Ok(CellValue::text("late")));
        assert_eq!(done.transition, Transition::Stale);
        assert_eq!(g.cell_count(), 0);
    }

    #[test]
    fn test_cancel_column_fails_pending() {
        let mut g = grid();
        let d = dispatcher();
        let row = g.add_row();
        let ai = g
            .add_column(ColumnKind::AiGenerated, "AI", ai_config("hi"))
            .unwrap();
        let CellRun::InFlight(flight) = g.begin_cell(&d, row.row_id, ai.column_id).unwrap() else {
            panic!("expected in-flight");
        };
        let cancellation = g.cancel_column(ai.column_id).unwrap();
        assert_eq!(cancellation.cancelled, vec![flight.key]);
        assert_eq!(
            g.cell(row.row_id, ai.column_id).unwrap().error_message(),
            Some(CANCELLED)
        );
        let done = g.complete(flight.key, flight.generation, Ok(CellValue::text("late")));
        assert_eq!(done.transition, Transition::Stale);
    }

    #[test]
    fn test_row_context_only_sees_ready_values() {
        let mut g = grid();
        let row = g.add_row();
        let company = static_column(&mut g, "Company Name");
        let ai = g
            .add_column(ColumnKind::AiGenerated, "Summary", ai_config("x"))
            .unwrap();
        g.edit_cell(row.row_id, company, "Acme").unwrap();
        let d = dispatcher();
        let _ = g.begin_cell(&d, row.row_id, ai.column_id).unwrap();

        let ctx = g.row_context(row.row_id).unwrap();
        assert_eq!(ctx.values.get("company_name"), Some("Acme"));
        assert_eq!(ctx.values.get("company"), Some("Acme"));
        assert_eq!(ctx.values.get("summary"), None);
        assert!(ctx.ai_outputs.is_empty());
    }

    #[test]
    fn test_from_snapshot_repairs_cells() {
        let workspace = Workspace::new("Loaded");
        let ws = workspace.workspace_id;
        let col = Column::new(ws, "Company", ColumnConfig::StaticField, 0);
        let ai = Column::new(ws, "AI", ai_config("x"), 1);
        let row = Row::new(ws, 0);

        let mut pending = Cell::new(row.row_id, ai.column_id);
        pending.begin();
        let orphan = Cell::new(RowId::now_v7(), col.column_id);

        let g = Grid::from_snapshot(
            workspace,
            vec![ai.clone(), col.clone()],
            vec![row.clone()],
            vec![pending, orphan],
            GridConfig::default(),
        );
        assert_eq!(g.columns()[0].column_id, col.column_id);
        assert_eq!(g.cell_count(), 2);
        assert_eq!(
            g.cell(row.row_id, ai.column_id).unwrap().error_message(),
            Some(INTERRUPTED)
        );
        assert_eq!(
            g.cell(row.row_id, col.column_id).unwrap().status(),
            CellStatus::Empty
        );
    }

    #[test]
    fn test_from_snapshot_applies_row_limit() {
        let workspace = Workspace::new("Big");
        let ws = workspace.workspace_id;
        let rows: Vec<Row> = (0..10).map(|i| Row::new(ws, i)).collect();
        let config = GridConfig {
            row_limit: 3,
            ..GridConfig::default()
        };
        let g = Grid::from_snapshot(workspace, vec![], rows, vec![], config);
        assert_eq!(g.row_count(), 3);
    }

    #[test]
    fn test_prompt_variables_are_static_columns() {
        let mut g = grid();
        static_column(&mut g, "Company Name");
        g.add_column(ColumnKind::AiGenerated, "AI", ai_config("x"))
            .unwrap();
        static_column(&mut g, "Website");
        let vars: Vec<String> = g.prompt_variables().into_iter().map(|v| v.key).collect();
        assert_eq!(vars, vec!["company_name".to_string(), "website".to_string()]);
    }

    #[test]
    fn test_update_config_keeps_kind() {
        let mut g = grid();
        let ai = g
            .add_column(ColumnKind::AiGenerated, "AI", ai_config("x"))
            .unwrap();
        let updated = g.update_column_config(ai.column_id, ai_config("y")).unwrap();
        assert_eq!(updated.kind(), ColumnKind::AiGenerated);
        let err = g
            .update_column_config(ai.column_id, ColumnConfig::StaticField)
            .unwrap_err();
        assert!(matches!(err, EnrichError::Grid(GridError::KindMismatch { .. })));
    }
}
