//! Workspace, column and row entities plus per-kind column configuration.

use crate::{
    column_key, formula, placeholder_reads, placeholders, CampaignId, ColumnId, ColumnKind, EntityIdType,
    GridError, HttpMethod, OutputFormat, RowId, Timestamp, WorkspaceId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// WORKSPACE
// ============================================================================

/// A research workspace: the aggregate root owning columns, rows and cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub workspace_id: WorkspaceId,
    pub name: String,
    /// Campaign used by fit scoring and prompt suggestions
    pub campaign_id: Option<CampaignId>,
    /// Product pitched by the campaign, if known
    pub product_name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workspace_id: WorkspaceId::now_v7(),
            name: name.into(),
            campaign_id: None,
            product_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_campaign(mut self, campaign_id: CampaignId, product_name: Option<String>) -> Self {
        self.campaign_id = Some(campaign_id);
        self.product_name = product_name;
        self
    }

    /// File name used for flat exports of this workspace.
    pub fn export_file_name(&self) -> String {
        let base = self.name.trim();
        let base = if base.is_empty() { "research" } else { base };
        format!("{}-export.csv", base)
    }
}

// ============================================================================
// COLUMN CONFIGURATION
// ============================================================================

/// `ai_generated` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiConfig {
    pub prompt_template: String,
    pub model_id: String,
    #[serde(default)]
    pub output: OutputFormat,
}

/// `enrichment` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Provider name understood by the enrichment collaborator
    pub provider: String,
    /// Static columns whose values key the lookup (e.g. domain)
    pub input_columns: Vec<ColumnId>,
    /// Attribute to extract from the provider's record; whole record when absent
    #[serde(default)]
    pub field: Option<String>,
}

/// `formula` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaConfig {
    pub expression: String,
}

/// `waterfall` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterfallConfig {
    /// Source columns tried in order
    pub sources: Vec<ColumnId>,
}

/// `external_api` configuration. URL, headers and body are templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalApiConfig {
    #[serde(default)]
    pub method: HttpMethod,
    pub url_template: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body_template: Option<String>,
    /// JSON pointer selecting the value out of a JSON response body
    #[serde(default)]
    pub response_pointer: Option<String>,
}

/// `merge` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    pub sources: Vec<ColumnId>,
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Leave blank sources out instead of emitting empty segments
    #[serde(default = "default_true")]
    pub skip_blank: bool,
}

fn default_separator() -> String {
    " ".to_string()
}

fn default_true() -> bool {
    true
}

/// `fit_score` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitScoreConfig {
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
}

/// Kind-specific column configuration. The variant is the column's kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnConfig {
    StaticField,
    Enrichment(EnrichmentConfig),
    AiGenerated(AiConfig),
    Formula(FormulaConfig),
    Waterfall(WaterfallConfig),
    ExternalApi(ExternalApiConfig),
    Merge(MergeConfig),
    FitScore(FitScoreConfig),
}

/// What a column reads from the rest of its row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnRefs {
    /// Placeholder keys referenced from templates or expressions
    pub keys: Vec<String>,
    /// Columns referenced directly by id
    pub ids: Vec<ColumnId>,
    /// Reads every static field of the row
    pub all_static: bool,
}

impl ColumnConfig {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnConfig::StaticField => ColumnKind::StaticField,
            ColumnConfig::Enrichment(_) => ColumnKind::Enrichment,
            ColumnConfig::AiGenerated(_) => ColumnKind::AiGenerated,
            ColumnConfig::Formula(_) => ColumnKind::Formula,
            ColumnConfig::Waterfall(_) => ColumnKind::Waterfall,
            ColumnConfig::ExternalApi(_) => ColumnKind::ExternalApi,
            ColumnConfig::Merge(_) => ColumnKind::Merge,
            ColumnConfig::FitScore(_) => ColumnKind::FitScore,
        }
    }

    /// Self-contained shape checks; references to other columns are checked
    /// by the grid, which knows which columns exist.
    pub fn validate(&self, column_name: &str) -> Result<(), GridError> {
        let invalid = |reason: &str| {
            Err(GridError::InvalidColumnConfig {
                column: column_name.to_string(),
                reason: reason.to_string(),
            })
        };
        match self {
            ColumnConfig::StaticField | ColumnConfig::FitScore(_) => Ok(()),
            ColumnConfig::AiGenerated(c) => {
                if c.prompt_template.trim().is_empty() {
                    return invalid("prompt_template must not be empty");
                }
                if c.model_id.trim().is_empty() {
                    return invalid("model_id must not be empty");
                }
                Ok(())
            }
            ColumnConfig::Enrichment(c) => {
                if c.provider.trim().is_empty() {
                    return invalid("provider must not be empty");
                }
                if c.input_columns.is_empty() {
                    return invalid("input_columns must name at least one column");
                }
                Ok(())
            }
            ColumnConfig::Formula(c) => formula::parse(&c.expression)
                .map(|_| ())
                .map_err(|e| GridError::InvalidColumnConfig {
                    column: column_name.to_string(),
                    reason: e.to_string(),
                }),
            ColumnConfig::Waterfall(c) if c.sources.is_empty() => {
                invalid("sources must name at least one column")
            }
            ColumnConfig::Merge(c) if c.sources.is_empty() => {
                invalid("sources must name at least one column")
            }
            ColumnConfig::Waterfall(_) | ColumnConfig::Merge(_) => Ok(()),
            ColumnConfig::ExternalApi(c) => {
                if c.url_template.trim().is_empty() {
                    return invalid("url_template must not be empty");
                }
                Ok(())
            }
        }
    }

    /// Everything this configuration reads from its row.
    pub fn references(&self) -> ColumnRefs {
        match self {
            ColumnConfig::StaticField => ColumnRefs::default(),
            ColumnConfig::AiGenerated(c) => ColumnRefs {
                keys: placeholders(&c.prompt_template),
                ..Default::default()
            },
            ColumnConfig::Formula(c) => ColumnRefs {
                keys: formula::references(&c.expression),
                ..Default::default()
            },
            ColumnConfig::ExternalApi(c) => {
                let mut keys = placeholders(&c.url_template);
                let extra = c
                    .headers
                    .values()
                    .chain(c.body_template.iter())
                    .flat_map(|t| placeholders(t));
                for key in extra {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                ColumnRefs {
                    keys,
                    ..Default::default()
                }
            }
            ColumnConfig::Enrichment(c) => ColumnRefs {
                ids: c.input_columns.clone(),
                ..Default::default()
            },
            ColumnConfig::Waterfall(WaterfallConfig { sources })
            | ColumnConfig::Merge(MergeConfig { sources, .. }) => ColumnRefs {
                ids: sources.clone(),
                ..Default::default()
            },
            ColumnConfig::FitScore(_) => ColumnRefs {
                all_static: true,
                ..Default::default()
            },
        }
    }
}

// ============================================================================
// COLUMN
// ============================================================================

/// A typed, independently computed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub column_id: ColumnId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub order_index: i64,
    config: ColumnConfig,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Column {
    pub fn new(
        workspace_id: WorkspaceId,
        name: impl Into<String>,
        config: ColumnConfig,
        order_index: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            column_id: ColumnId::now_v7(),
            workspace_id,
            name: name.into(),
            order_index,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    /// The kind is fixed by the configuration the column was created with.
    pub fn kind(&self) -> ColumnKind {
        self.config.kind()
    }

    pub fn config(&self) -> &ColumnConfig {
        &self.config
    }

    /// Placeholder key derived from the column name.
    pub fn key(&self) -> String {
        column_key(&self.name)
    }

    /// Swap the configuration, keeping the kind.
    pub fn replace_config(&mut self, config: ColumnConfig) -> Result<(), GridError> {
        if config.kind() != self.kind() {
            return Err(GridError::KindMismatch {
                expected: self.kind(),
                got: config.kind(),
            });
        }
        config.validate(&self.name)?;
        self.config = config;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether this column's cells read `other`'s cells on the same row.
    pub fn depends_on(&self, other: &Column) -> bool {
        if self.column_id == other.column_id {
            return false;
        }
        let refs = self.config.references();
        let other_key = other.key();
        refs.ids.contains(&other.column_id)
            || refs.keys.iter().any(|key| placeholder_reads(key, &other_key))
            || (refs.all_static && other.kind().is_static())
    }

    /// Drop a deleted column from the sources this column reads by id.
    /// Returns whether the configuration changed.
    pub fn forget_source(&mut self, column_id: ColumnId) -> bool {
        let sources = match &mut self.config {
            ColumnConfig::Enrichment(c) => &mut c.input_columns,
            ColumnConfig::Waterfall(c) => &mut c.sources,
            ColumnConfig::Merge(c) => &mut c.sources,
            _ => return false,
        };
        let before = sources.len();
        sources.retain(|id| *id != column_id);
        if sources.len() == before {
            return false;
        }
        self.updated_at = Utc::now();
        true
    }
}

// ============================================================================
// ROW
// ============================================================================

/// One research subject. Its attributes live in `static_field` cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub row_id: RowId,
    pub workspace_id: WorkspaceId,
    pub order_index: i64,
    pub created_at: Timestamp,
}

impl Row {
    pub fn new(workspace_id: WorkspaceId, order_index: i64) -> Self {
        Self {
            row_id: RowId::now_v7(),
            workspace_id,
            order_index,
            created_at: Utc::now(),
        }
    }
}
