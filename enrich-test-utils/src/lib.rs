//! ENRICH Test Utilities
//!
//! Shared test infrastructure for the ENRICH crates:
//! - Proptest generators for core types
//! - Fixtures for common workspaces
//! - A model invoker whose replies are released by the test
//! - Assertion helpers for `EnrichResult`

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};

// Re-export core types for convenience
pub use enrich_core::*;
pub use enrich_llm::{
    MockApiCaller, MockEnrichmentProvider, MockFitScorer, MockModelInvoker, ModelInvoker,
    ModelReply, ProviderRegistry,
};
pub use enrich_storage::{MockStorage, WorkspaceStorage};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ENRICH types.

    use super::*;
    use proptest::prelude::*;

    /// Generate an arbitrary ColumnKind.
    pub fn arb_column_kind() -> impl Strategy<Value = ColumnKind> {
        prop_oneof![
            Just(ColumnKind::StaticField),
            Just(ColumnKind::Enrichment),
            Just(ColumnKind::AiGenerated),
            Just(ColumnKind::Formula),
            Just(ColumnKind::Waterfall),
            Just(ColumnKind::ExternalApi),
            Just(ColumnKind::Merge),
            Just(ColumnKind::FitScore),
        ]
    }

    /// Generate an arbitrary CellStatus.
    pub fn arb_cell_status() -> impl Strategy<Value = CellStatus> {
        prop_oneof![
            Just(CellStatus::Empty),
            Just(CellStatus::Pending),
            Just(CellStatus::Ready),
            Just(CellStatus::Error),
        ]
    }

    /// Generate an arbitrary SortDirection.
    pub fn arb_sort_direction() -> impl Strategy<Value = SortDirection> {
        prop_oneof![Just(SortDirection::Ascending), Just(SortDirection::Descending)]
    }

    /// Generate a human-looking column name.
    pub fn arb_column_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,9}( [A-Z][a-z]{2,9})?"
    }

    /// Generate a finite number as a sheet would hold it.
    pub fn arb_number() -> impl Strategy<Value = f64> {
        (-1_000_000i64..1_000_000i64, 0u32..3).prop_map(|(n, scale)| n as f64 / 10f64.powi(scale as i32))
    }

    /// Generate an arbitrary CellValue.
    pub fn arb_cell_value() -> impl Strategy<Value = CellValue> {
        prop_oneof![
            "[a-zA-Z0-9 .,-]{0,24}".prop_map(CellValue::Text),
            arb_number().prop_map(CellValue::Number),
            ("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,12}")
                .prop_map(|(k, v)| {
                    let mut object = serde_json::Map::new();
                    object.insert(k, serde_json::Value::String(v));
                    CellValue::Json(serde_json::Value::Object(object))
                }),
        ]
    }

    /// Generate a prospect company name.
    pub fn arb_company_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{3,10}( (Inc|Labs|Systems|Group))?"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built workspaces and configs for common testing scenarios.

    use super::*;

    /// A workspace with its columns, rows and cells, ready to be turned into
    /// a grid snapshot or seeded into storage.
    #[derive(Debug, Clone)]
    pub struct WorkspaceFixture {
        pub workspace: Workspace,
        pub columns: Vec<Column>,
        pub rows: Vec<Row>,
        pub cells: Vec<Cell>,
    }

    impl WorkspaceFixture {
        /// Look up a column by its exact name.
        pub fn column(&self, name: &str) -> Option<&Column> {
            self.columns.iter().find(|c| c.name == name)
        }

        /// Write the whole fixture into storage.
        pub async fn seed(&self, storage: &dyn WorkspaceStorage) -> EnrichResult<()> {
            storage.workspace_insert(&self.workspace).await?;
            for column in &self.columns {
                storage.upsert_column(column).await?;
            }
            for row in &self.rows {
                storage.upsert_row(row).await?;
            }
            for cell in &self.cells {
                storage.upsert_cell(cell).await?;
            }
            Ok(())
        }
    }

    /// Static columns named by `headers`, one row per record.
    pub fn static_workspace(name: &str, headers: &[&str], records: &[&[&str]]) -> WorkspaceFixture {
        let workspace = Workspace::new(name);
        let columns: Vec<Column> = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                Column::new(workspace.workspace_id, *header, ColumnConfig::StaticField, i as i64)
            })
            .collect();

        let mut rows = Vec::with_capacity(records.len());
        let mut cells = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let row = Row::new(workspace.workspace_id, i as i64);
            for (column, field) in columns.iter().zip(record.iter()) {
                let mut cell = Cell::new(row.row_id, column.column_id);
                if !field.is_empty() {
                    cell.set_manual(CellValue::text(*field));
                }
                cells.push(cell);
            }
            rows.push(row);
        }

        WorkspaceFixture {
            workspace,
            columns,
            rows,
            cells,
        }
    }

    /// "Company Name" and "Website" for Acme, Globex and Initech.
    pub fn three_companies() -> WorkspaceFixture {
        static_workspace(
            "Prospects",
            &["Company Name", "Website"],
            &[
                &["Acme", "acme.com"],
                &["Globex", "globex.com"],
                &["Initech", "initech.com"],
            ],
        )
    }

    /// An AI column config on the given model.
    pub fn ai_config(prompt_template: &str, model_id: &str) -> ColumnConfig {
        ColumnConfig::AiGenerated(AiConfig {
            prompt_template: prompt_template.to_string(),
            model_id: model_id.to_string(),
            output: OutputFormat::Text,
        })
    }

    /// Grid settings for tests: short deadlines, no automatic reruns.
    pub fn fast_grid_config() -> GridConfig {
        GridConfig {
            max_concurrent_computations: 4,
            collaborator_timeout_ms: 5_000,
            auto_rerun_dependents: false,
            row_limit: 100,
        }
    }

    /// A valid EnrichConfig with retries disabled.
    pub fn minimal_config() -> EnrichConfig {
        let mut config = EnrichConfig::default();
        config.grid = fast_grid_config();
        config.retry = RetryConfig::disabled();
        config.cache.enabled = false;
        config
    }
}

// ============================================================================
// GATED MODEL
// ============================================================================

struct Gate {
    prompt: String,
    reply: Option<oneshot::Sender<String>>,
}

/// Model invoker that parks every call until the test releases it, so
/// completion order can be chosen independently of start order.
#[derive(Default)]
pub struct GatedModelInvoker {
    gates: Mutex<Vec<Gate>>,
    arrived: Notify,
}

impl std::fmt::Debug for GatedModelInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatedModelInvoker")
            .field("calls", &self.calls())
            .finish()
    }
}

impl GatedModelInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prompts received so far, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.gates
            .lock()
            .map(|g| g.iter().map(|gate| gate.prompt.clone()).collect())
            .unwrap_or_default()
    }

    /// Wait until at least `n` calls have arrived.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.arrived.notified();
            if self.calls().len() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Answer the `index`-th call with `text`. False if there is no such
    /// call or it was already released.
    pub fn release(&self, index: usize, text: impl Into<String>) -> bool {
        let Ok(mut gates) = self.gates.lock() else {
            return false;
        };
        match gates.get_mut(index).and_then(|gate| gate.reply.take()) {
            Some(reply) => reply.send(text.into()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ModelInvoker for GatedModelInvoker {
    async fn invoke(&self, prompt: &str, _model_id: &str) -> EnrichResult<ModelReply> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut gates) = self.gates.lock() {
            gates.push(Gate {
                prompt: prompt.to_string(),
                reply: Some(tx),
            });
        }
        self.arrived.notify_waiters();

        let text = rx.await.map_err(|_| ProviderError::InvalidResponse {
            provider: "gated".to_string(),
            reason: "gate dropped".to_string(),
        })?;
        Ok(ModelReply {
            text,
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }

    fn provider_name(&self) -> &str {
        "gated"
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for ENRICH results and cells.

    use super::*;

    /// Assert that an EnrichResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &EnrichResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that an EnrichResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &EnrichResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that an EnrichResult is a Grid error.
    #[track_caller]
    pub fn assert_grid_error<T: std::fmt::Debug>(result: &EnrichResult<T>) {
        match result {
            Err(EnrichError::Grid(_)) => {}
            other => panic!("Expected Grid error, got: {:?}", other),
        }
    }

    /// Assert that an EnrichResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &EnrichResult<T>) {
        match result {
            Err(EnrichError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a call failed because no collaborator of `capability`
    /// is registered.
    #[track_caller]
    pub fn assert_provider_not_configured<T: std::fmt::Debug>(
        result: &EnrichResult<T>,
        capability: &str,
    ) {
        match result {
            Err(EnrichError::Provider(ProviderError::ProviderNotConfigured { capability: c })) => {
                assert_eq!(c, capability, "Wrong capability in ProviderNotConfigured");
            }
            other => panic!(
                "Expected ProviderNotConfigured for {}, got: {:?}",
                capability, other
            ),
        }
    }

    /// Assert that a cell is ready with the given display text.
    #[track_caller]
    pub fn assert_ready(cell: &Cell, expected: &str) {
        match cell.value() {
            Some(value) => assert_eq!(value.display(), expected, "Unexpected cell value"),
            None => panic!("Expected ready cell, got {:?}", cell.state()),
        }
    }

    /// Assert that a cell is in error with a message containing `needle`.
    #[track_caller]
    pub fn assert_cell_error(cell: &Cell, needle: &str) {
        match cell.error_message() {
            Some(message) => assert!(
                message.contains(needle),
                "Error message {:?} does not contain {:?}",
                message,
                needle
            ),
            None => panic!("Expected error cell, got {:?}", cell.state()),
        }
    }
}
