//! ENRICH Grid - Grid Controller and Column Computation
//!
//! The in-memory research grid for one workspace: structural operations on
//! columns and rows, manual edits with same-row recomputation, per-cell
//! computation through the collaborator registry with stale-result
//! discarding, sort/filter/selection views, insights and flat export.
//!
//! `Grid` is the synchronous core; `GridHandle` shares it across tasks,
//! drives collaborator calls with bounded concurrency and writes changes
//! through to storage.

mod authoring;
mod dispatcher;
mod export;
mod filter;
mod grid;
mod handle;
mod insights;

pub use authoring::{suggested_prompts, PromptVariable};
pub use dispatcher::{
    compute_local, json_to_cell, Computation, Computed, Dispatcher, PendingFuture, RowContext,
};
pub use export::export_csv;
pub use filter::RowFilter;
pub use grid::{
    Cancellation, CellRun, ColumnRemoval, Completion, EditOutcome, Grid, InFlight, SortSpec,
    CANCELLED, INTERRUPTED,
};
pub use handle::{GridHandle, RunProgress, RunReport, FIT_SCORE_COLUMN};
pub use insights::{IndustryCount, Prospect, WorkspaceInsights};
