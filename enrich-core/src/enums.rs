//! Enum types for the research grid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// COLUMN KIND
// ============================================================================

/// The tag distinguishing how a column's cells are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Plain user-entered data
    StaticField,
    /// Lookup against an enrichment provider
    Enrichment,
    /// Model-generated analysis from a prompt template
    AiGenerated,
    /// Deterministic expression over other cells of the row
    Formula,
    /// First non-empty value among ordered source columns
    Waterfall,
    /// Configurable HTTP call
    ExternalApi,
    /// Combination of several source columns
    Merge,
    /// Campaign suitability score in 0..=100
    FitScore,
}

impl ColumnKind {
    /// Every kind, in registry order.
    pub const ALL: [ColumnKind; 8] = [
        ColumnKind::StaticField,
        ColumnKind::Enrichment,
        ColumnKind::AiGenerated,
        ColumnKind::Formula,
        ColumnKind::Waterfall,
        ColumnKind::ExternalApi,
        ColumnKind::Merge,
        ColumnKind::FitScore,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ColumnKind::StaticField => "static_field",
            ColumnKind::Enrichment => "enrichment",
            ColumnKind::AiGenerated => "ai_generated",
            ColumnKind::Formula => "formula",
            ColumnKind::Waterfall => "waterfall",
            ColumnKind::ExternalApi => "external_api",
            ColumnKind::Merge => "merge",
            ColumnKind::FitScore => "fit_score",
        }
    }

    /// Parse from database string representation.
    ///
    /// Also accepts the short legacy names stored by older workspaces
    /// (`field`, `ai`, `http_api`).
    pub fn from_db_str(s: &str) -> Result<Self, ColumnKindParseError> {
        match s.trim().to_lowercase().as_str() {
            "static_field" | "field" => Ok(ColumnKind::StaticField),
            "enrichment" => Ok(ColumnKind::Enrichment),
            "ai_generated" | "ai" => Ok(ColumnKind::AiGenerated),
            "formula" => Ok(ColumnKind::Formula),
            "waterfall" => Ok(ColumnKind::Waterfall),
            "external_api" | "http_api" => Ok(ColumnKind::ExternalApi),
            "merge" => Ok(ColumnKind::Merge),
            "fit_score" => Ok(ColumnKind::FitScore),
            _ => Err(ColumnKindParseError(s.to_string())),
        }
    }

    /// Whether cells of this kind are only ever written by users.
    pub fn is_static(&self) -> bool {
        matches!(self, ColumnKind::StaticField)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ColumnKind {
    type Err = ColumnKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid column kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnKindParseError(pub String);

impl fmt::Display for ColumnKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid column kind: {}", self.0)
    }
}

impl std::error::Error for ColumnKindParseError {}

// ============================================================================
// CELL STATUS
// ============================================================================

/// Lifecycle status of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    #[default]
    Empty,
    Pending,
    Ready,
    Error,
}

impl CellStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CellStatus::Empty => "empty",
            CellStatus::Pending => "pending",
            CellStatus::Ready => "ready",
            CellStatus::Error => "error",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, CellStatusParseError> {
        match s.to_lowercase().as_str() {
            "empty" => Ok(CellStatus::Empty),
            "pending" => Ok(CellStatus::Pending),
            "ready" => Ok(CellStatus::Ready),
            "error" => Ok(CellStatus::Error),
            _ => Err(CellStatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for CellStatus {
    type Err = CellStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid cell status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellStatusParseError(pub String);

impl fmt::Display for CellStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid cell status: {}", self.0)
    }
}

impl std::error::Error for CellStatusParseError {}

// ============================================================================
// SMALL CONFIG ENUMS
// ============================================================================

/// How an AI column interprets the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    /// The reply must parse as JSON
    Json,
}

/// HTTP method of an external API column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

/// Sort direction for row ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

// ============================================================================
// LEAD TIER
// ============================================================================

/// Bucket a fit score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadTier {
    Hot,
    Warm,
    Cold,
}

impl LeadTier {
    /// Hot at 80 and above, warm at 50 and above, cold otherwise.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            LeadTier::Hot
        } else if score >= 50.0 {
            LeadTier::Warm
        } else {
            LeadTier::Cold
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadTier::Hot => "hot",
            LeadTier::Warm => "warm",
            LeadTier::Cold => "cold",
        }
    }
}

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Workspace,
    Column,
    Row,
    Cell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_kind_db_round_trip() {
        for kind in ColumnKind::ALL {
            assert_eq!(ColumnKind::from_db_str(kind.as_db_str()), Ok(kind));
        }
    }

    #[test]
    fn test_column_kind_accepts_legacy_names() {
        assert_eq!(ColumnKind::from_db_str("field"), Ok(ColumnKind::StaticField));
        assert_eq!(ColumnKind::from_db_str("ai"), Ok(ColumnKind::AiGenerated));
        assert_eq!(ColumnKind::from_db_str("http_api"), Ok(ColumnKind::ExternalApi));
        assert!(ColumnKind::from_db_str("spreadsheet").is_err());
    }

    #[test]
    fn test_cell_status_parse() {
        assert_eq!("READY".parse::<CellStatus>(), Ok(CellStatus::Ready));
        assert!("done".parse::<CellStatus>().is_err());
        assert_eq!(CellStatus::default(), CellStatus::Empty);
    }

    #[test]
    fn test_lead_tier_thresholds() {
        assert_eq!(LeadTier::from_score(100.0), LeadTier::Hot);
        assert_eq!(LeadTier::from_score(80.0), LeadTier::Hot);
        assert_eq!(LeadTier::from_score(79.9), LeadTier::Warm);
        assert_eq!(LeadTier::from_score(50.0), LeadTier::Warm);
        assert_eq!(LeadTier::from_score(49.0), LeadTier::Cold);
        assert_eq!(LeadTier::from_score(0.0), LeadTier::Cold);
    }

    #[test]
    fn test_column_kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&ColumnKind::AiGenerated).unwrap();
        assert_eq!(json, "\"ai_generated\"");
    }
}
