//! ENRICH Core - Research Grid Types
//!
//! Pure data structures and pure functions for the research workspace grid:
//! column kinds and their configuration, the per-cell computation lifecycle,
//! `{key}` interpolation and the formula language. No I/O lives here; every
//! other crate depends on this one.

use chrono::{DateTime, Utc};

// ============================================================================
// MODULES
// ============================================================================

mod cell;
mod config;
mod entities;
mod enums;
mod error;
pub mod formula;
mod identity;
mod interpolate;
mod registry;

pub use cell::{format_number, Cell, CellState, CellValue, Generation, Transition};
pub use config::{
    CacheConfig, EnrichConfig, ExportConfig, GridConfig, LoggingConfig, ModelConfig,
    RetryConfig, DEFAULT_SYSTEM_PROMPT,
};
pub use entities::{
    AiConfig, Column, ColumnConfig, ColumnRefs, EnrichmentConfig, ExternalApiConfig,
    FitScoreConfig, FormulaConfig, MergeConfig, Row, WaterfallConfig, Workspace,
};
pub use enums::{
    CellStatus, CellStatusParseError, ColumnKind, ColumnKindParseError, EntityType, HttpMethod,
    LeadTier, OutputFormat, SortDirection,
};
pub use error::{
    ConfigError, EnrichError, EnrichResult, FormulaError, GridError, ProviderError, StorageError,
};
pub use identity::{CampaignId, CellKey, ColumnId, EntityIdType, RowId, WorkspaceId};
pub use interpolate::{
    column_key, interpolate, placeholder_reads, placeholders, RowValues, StandardVariable, STANDARD_VARIABLES,
};
pub use registry::{all_kinds, kind_metadata, KindMetadata};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
