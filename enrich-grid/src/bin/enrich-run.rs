//! ENRICH batch runner
//!
//! Loads a prospect list into a fresh workspace (one static column per CSV
//! header, one row per record), adds the computed columns declared in a
//! TOML file, runs each of them for every row and writes the flat export.

use clap::Parser;
use enrich_core::{
    AiConfig, ColumnConfig, ColumnId, ColumnKind, ConfigError, EnrichConfig, EnrichError,
    EnrichResult, EnrichmentConfig, ExternalApiConfig, FitScoreConfig, FormulaConfig,
    HttpMethod, LoggingConfig, MergeConfig, OutputFormat, WaterfallConfig, Workspace,
};
use enrich_grid::{Dispatcher, Grid, GridHandle, WorkspaceInsights};
use enrich_llm::{
    CachedModelInvoker, HeuristicFitScorer, ModelInvoker, OpenAICompatibleModel, PromptCache,
    ProviderRegistry, ReqwestApiCaller,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "enrich-run", about = "Run research grid columns over a prospect CSV")]
struct Cli {
    /// ENRICH configuration file (TOML). Built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prospect list; the header row names the static columns.
    #[arg(long)]
    input: PathBuf,

    /// Where to write the export. Standard output when omitted.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Computed column declarations (TOML, `[[columns]]` tables).
    #[arg(long)]
    columns: Option<PathBuf>,
}

// ============================================================================
// COLUMN DECLARATIONS
// ============================================================================

/// A computed column as written in the columns file. Source columns are
/// named rather than addressed by id.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ColumnDecl {
    AiGenerated {
        name: String,
        prompt_template: String,
        #[serde(default)]
        model_id: Option<String>,
        #[serde(default)]
        output: OutputFormat,
    },
    Enrichment {
        name: String,
        provider: String,
        inputs: Vec<String>,
        #[serde(default)]
        field: Option<String>,
    },
    Formula {
        name: String,
        expression: String,
    },
    Waterfall {
        name: String,
        sources: Vec<String>,
    },
    ExternalApi {
        name: String,
        #[serde(default)]
        method: HttpMethod,
        url_template: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body_template: Option<String>,
        #[serde(default)]
        response_pointer: Option<String>,
    },
    Merge {
        name: String,
        sources: Vec<String>,
        #[serde(default)]
        separator: Option<String>,
        #[serde(default)]
        skip_blank: Option<bool>,
    },
    FitScore {
        name: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ColumnsFile {
    #[serde(default)]
    columns: Vec<ColumnDecl>,
}

impl ColumnsFile {
    fn parse(contents: &str) -> EnrichResult<Self> {
        let file: ColumnsFile = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        file.check_runnable()?;
        Ok(file)
    }

    /// The batch runner registers no enrichment provider, so an enrichment
    /// column could only ever fill with errors.
    fn check_runnable(&self) -> EnrichResult<()> {
        for decl in &self.columns {
            if let ColumnDecl::Enrichment { name, .. } = decl {
                return Err(ConfigError::InvalidValue {
                    field: "columns.kind".to_string(),
                    value: name.clone(),
                    reason: "enrichment columns need an enrichment provider, which enrich-run does not configure".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

impl ColumnDecl {
    /// Resolve source names against the columns added so far.
    fn into_parts(self, grid: &Grid, default_model: &str) -> EnrichResult<(String, ColumnConfig)> {
        let resolve = |names: &[String]| -> EnrichResult<Vec<ColumnId>> {
            names
                .iter()
                .map(|name| {
                    grid.column_named(name)
                        .map(|c| c.column_id)
                        .ok_or_else(|| {
                            EnrichError::from(ConfigError::InvalidValue {
                                field: "columns.sources".to_string(),
                                value: name.clone(),
                                reason: "no column with this name".to_string(),
                            })
                        })
                })
                .collect()
        };

        Ok(match self {
            ColumnDecl::AiGenerated {
                name,
                prompt_template,
                model_id,
                output,
            } => (
                name,
                ColumnConfig::AiGenerated(AiConfig {
                    prompt_template,
                    model_id: model_id.unwrap_or_else(|| default_model.to_string()),
                    output,
                }),
            ),
            ColumnDecl::Enrichment {
                name,
                provider,
                inputs,
                field,
            } => (
                name,
                ColumnConfig::Enrichment(EnrichmentConfig {
                    provider,
                    input_columns: resolve(&inputs)?,
                    field,
                }),
            ),
            ColumnDecl::Formula { name, expression } => {
                (name, ColumnConfig::Formula(FormulaConfig { expression }))
            }
            ColumnDecl::Waterfall { name, sources } => (
                name,
                ColumnConfig::Waterfall(WaterfallConfig {
                    sources: resolve(&sources)?,
                }),
            ),
            ColumnDecl::ExternalApi {
                name,
                method,
                url_template,
                headers,
                body_template,
                response_pointer,
            } => (
                name,
                ColumnConfig::ExternalApi(ExternalApiConfig {
                    method,
                    url_template,
                    headers,
                    body_template,
                    response_pointer,
                }),
            ),
            ColumnDecl::Merge {
                name,
                sources,
                separator,
                skip_blank,
            } => (
                name,
                ColumnConfig::Merge(MergeConfig {
                    sources: resolve(&sources)?,
                    separator: separator.unwrap_or_else(|| " ".to_string()),
                    skip_blank: skip_blank.unwrap_or(true),
                }),
            ),
            ColumnDecl::FitScore { name } => (
                name,
                ColumnConfig::FitScore(FitScoreConfig { campaign_id: None }),
            ),
        })
    }
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> EnrichResult<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EnrichConfig::from_path(path)?,
        None => EnrichConfig::default(),
    };
    init_tracing(&config.logging);

    let declared = match &cli.columns {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
            ColumnsFile::parse(&contents)?
        }
        None => ColumnsFile::default(),
    };

    let handle = build_handle(&config, &cli.input);
    load_prospects(&handle, &cli.input).await?;

    for decl in declared.columns {
        let (name, column_config) = {
            let grid = handle.read().await;
            decl.into_parts(&grid, &config.model.default_model)?
        };
        let kind = column_config.kind();
        handle.add_column(kind, name, column_config).await?;
    }

    let computed: Vec<(ColumnId, String)> = handle
        .read()
        .await
        .columns()
        .iter()
        .filter(|c| !c.kind().is_static())
        .map(|c| (c.column_id, c.name.clone()))
        .collect();

    let mut total_cost = 0.0;
    for (column_id, name) in computed {
        let report = handle
            .run_column_with_progress(column_id, |p| {
                debug!(column = %name, completed = p.completed, total = p.total, percent = p.percentage, "progress");
            })
            .await?;
        if report.failed > 0 {
            warn!(column = %name, failed = report.failed, "some cells failed");
        }
        total_cost += report.estimated_cost;
    }

    let insights = handle.insights().await;
    info!(
        rows = insights.total_rows,
        hot = insights.hot,
        warm = insights.warm,
        cold = insights.cold,
        average_score = insights.average_score,
        estimated_cost = total_cost,
        "run complete"
    );
    log_top_prospects(&insights);

    let exported = handle.export(None, &config.export).await?;
    match &cli.output {
        Some(path) => std::fs::write(path, exported).map_err(|e| io_error(path, e))?,
        None => print!("{}", exported),
    }
    Ok(())
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    // stdout may carry the export
    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_handle(config: &EnrichConfig, input: &Path) -> GridHandle {
    let mut registry = ProviderRegistry::new();
    match std::env::var(&config.model.api_key_env) {
        Ok(key) if !key.trim().is_empty() => {
            let model: Arc<dyn ModelInvoker> =
                Arc::new(OpenAICompatibleModel::from_config(&config.model, key));
            let model: Arc<dyn ModelInvoker> = if config.cache.enabled {
                Arc::new(CachedModelInvoker::new(
                    model,
                    Arc::new(PromptCache::from_config(&config.cache)),
                ))
            } else {
                model
            };
            registry.register_model(model);
        }
        _ => warn!(
            env = %config.model.api_key_env,
            "model API key not set; AI columns will fail"
        ),
    }
    registry.register_external_api(Arc::new(ReqwestApiCaller::new()));
    registry.register_fit_scorer(Arc::new(HeuristicFitScorer::new()));

    let name = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Prospects".to_string());
    let grid = Grid::new(Workspace::new(name), config.grid.clone());
    GridHandle::new(grid, Dispatcher::from_config(registry, config))
}

async fn load_prospects(handle: &GridHandle, input: &Path) -> EnrichResult<()> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input)
        .map_err(|e| io_error(input, e))?;
    let headers = reader.headers().map_err(|e| io_error(input, e))?.clone();

    let mut columns = Vec::with_capacity(headers.len());
    for header in headers.iter() {
        let column = handle
            .add_column(ColumnKind::StaticField, header.trim(), ColumnConfig::StaticField)
            .await?;
        columns.push(column.column_id);
    }

    let row_limit = handle.read().await.config().row_limit;
    let mut loaded = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| io_error(input, e))?;
        if loaded == row_limit {
            warn!(row_limit, "row limit reached; remaining records skipped");
            break;
        }
        let row = handle.add_row().await?;
        for (column_id, field) in columns.iter().zip(record.iter()) {
            if !field.trim().is_empty() {
                handle.edit_cell(row.row_id, *column_id, field.trim()).await?;
            }
        }
        loaded += 1;
    }
    info!(rows = loaded, columns = columns.len(), "prospects loaded");
    Ok(())
}

fn log_top_prospects(insights: &WorkspaceInsights) {
    for prospect in &insights.top_prospects {
        info!(
            company = %prospect.company,
            score = prospect.score,
            tier = prospect.tier.as_str(),
            "top prospect"
        );
    }
}

fn io_error(path: &Path, e: impl std::fmt::Display) -> EnrichError {
    ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_core::GridConfig;

    #[test]
    fn test_columns_file_resolves_sources_by_name() {
        let file = ColumnsFile::parse(
            r#"
            [[columns]]
            kind = "ai_generated"
            name = "Analysis"
            prompt_template = "Analyze {company}"

            [[columns]]
            kind = "merge"
            name = "Label"
            sources = ["company name", "Website"]
            "#,
        )
        .unwrap();
        assert_eq!(file.columns.len(), 2);

        let mut grid = Grid::new(Workspace::new("Cli"), GridConfig::default());
        let company = grid
            .add_column(ColumnKind::StaticField, "Company Name", ColumnConfig::StaticField)
            .unwrap()
            .column_id;
        let website = grid
            .add_column(ColumnKind::StaticField, "Website", ColumnConfig::StaticField)
            .unwrap()
            .column_id;

        let mut decls = file.columns.into_iter();
        let (name, config) = decls.next().unwrap().into_parts(&grid, "kimi-k2").unwrap();
        assert_eq!(name, "Analysis");
        assert!(matches!(config, ColumnConfig::AiGenerated(ref c) if c.model_id == "kimi-k2"));

        let (_, config) = decls.next().unwrap().into_parts(&grid, "kimi-k2").unwrap();
        assert_eq!(config.references().ids, vec![company, website]);
    }

    #[test]
    fn test_columns_file_rejects_enrichment() {
        let err = ColumnsFile::parse(
            r#"
            [[columns]]
            kind = "enrichment"
            name = "Headcount"
            provider = "clearbit"
            inputs = ["Domain"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EnrichError::Config(ConfigError::InvalidValue { ref field, ref value, .. })
                if field == "columns.kind" && value == "Headcount"
        ));
    }

    #[test]
    fn test_unknown_source_name_is_config_error() {
        let file = ColumnsFile::parse(
            r#"
            [[columns]]
            kind = "waterfall"
            name = "Best"
            sources = ["Nowhere"]
            "#,
        )
        .unwrap();
        let grid = Grid::new(Workspace::new("Cli"), GridConfig::default());
        let decl = file.columns.into_iter().next().unwrap();
        assert!(matches!(
            decl.into_parts(&grid, "kimi-k2"),
            Err(EnrichError::Config(ConfigError::InvalidValue { .. }))
        ));
    }
}
