//! Workspace-level summary of fit scores.

use crate::Grid;
use enrich_core::{Column, ColumnKind, LeadTier, RowId};
use serde::Serialize;
use std::collections::HashMap;

const TOP_INDUSTRIES: usize = 5;
const TOP_PROSPECTS: usize = 10;
const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndustryCount {
    pub industry: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prospect {
    pub row_id: RowId,
    pub company: String,
    pub score: f64,
    pub tier: LeadTier,
}

/// Lead tiers, industries and best prospects of a workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkspaceInsights {
    pub total_rows: usize,
    /// Rows with a ready fit score
    pub scored_rows: usize,
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    /// Rounded mean of the ready fit scores, 0 when none
    pub average_score: f64,
    pub industries: Vec<IndustryCount>,
    pub top_prospects: Vec<Prospect>,
}

impl WorkspaceInsights {
    pub fn compute(grid: &Grid) -> Self {
        let rows = grid.rows();
        let mut insights = Self {
            total_rows: rows.len(),
            ..Self::default()
        };

        let industry = column_containing(grid, "industry");
        let company = column_containing(grid, "company");
        let text_of = |column: Option<&Column>, row_id: RowId| -> String {
            column
                .and_then(|c| grid.ready_value(row_id, c.column_id))
                .map(|v| v.display().trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        if let Some(industry) = industry {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for row in &rows {
                *counts.entry(text_of(Some(industry), row.row_id)).or_default() += 1;
            }
            let mut industries: Vec<IndustryCount> = counts
                .into_iter()
                .map(|(industry, count)| IndustryCount { industry, count })
                .collect();
            industries.sort_by(|a, b| b.count.cmp(&a.count).then(a.industry.cmp(&b.industry)));
            industries.truncate(TOP_INDUSTRIES);
            insights.industries = industries;
        }

        let Some(score_column) = grid
            .columns()
            .iter()
            .find(|c| c.kind() == ColumnKind::FitScore)
        else {
            return insights;
        };

        let mut prospects = Vec::new();
        let mut sum = 0.0;
        for row in &rows {
            let Some(score) = grid
                .ready_value(row.row_id, score_column.column_id)
                .and_then(|v| v.as_number())
            else {
                continue;
            };
            insights.scored_rows += 1;
            sum += score;
            let tier = LeadTier::from_score(score);
            match tier {
                LeadTier::Hot => insights.hot += 1,
                LeadTier::Warm => insights.warm += 1,
                LeadTier::Cold => insights.cold += 1,
            }
            if score > 0.0 {
                prospects.push(Prospect {
                    row_id: row.row_id,
                    company: text_of(company, row.row_id),
                    score,
                    tier,
                });
            }
        }

        if insights.scored_rows > 0 {
            insights.average_score = (sum / insights.scored_rows as f64).round();
        }
        // stable, so ties keep display order
        prospects.sort_by(|a, b| b.score.total_cmp(&a.score));
        prospects.truncate(TOP_PROSPECTS);
        insights.top_prospects = prospects;
        insights
    }
}

fn column_containing<'a>(grid: &'a Grid, needle: &str) -> Option<&'a Column> {
    grid.columns()
        .iter()
        .find(|c| c.name.to_lowercase().contains(needle))
}
