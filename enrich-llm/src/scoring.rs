//! Rule-based fit scorer.
//!
//! Four weighted signals summed and capped at 100:
//! industry match (30), company size match (20), sentiment of the row's AI
//! outputs (30) and completeness of its static fields (20). Campaign
//! targeting comes from a profile directory keyed by `CampaignId`; rows
//! with no campaign, or an unknown one, get partial credit.

use crate::{FitScorer, ScoreRequest};
use async_trait::async_trait;
use enrich_core::{CampaignId, EnrichResult, LeadTier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

const POSITIVE_SIGNALS: &[&str] = &[
    "good fit",
    "strong match",
    "would benefit",
    "ideal",
    "recommend",
    "perfect",
    "excellent",
    "highly relevant",
    "great opportunity",
    "strong candidate",
    "well-suited",
    "high potential",
];

const NEGATIVE_SIGNALS: &[&str] = &[
    "not a fit",
    "poor match",
    "unlikely",
    "not recommended",
    "mismatch",
    "not suitable",
    "low potential",
    "does not align",
    "wrong size",
    "different market",
    "no indication",
];

/// Head-count bands used for campaign targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompanySizeBand {
    #[serde(rename = "1-10")]
    Micro,
    #[serde(rename = "11-50")]
    Small,
    #[serde(rename = "51-200")]
    Medium,
    #[serde(rename = "201-500")]
    MidMarket,
    #[serde(rename = "501-1000")]
    Large,
    #[serde(rename = "1001-5000")]
    Enterprise,
    #[serde(rename = "5000+")]
    Global,
}

impl CompanySizeBand {
    pub const ALL: [CompanySizeBand; 7] = [
        CompanySizeBand::Micro,
        CompanySizeBand::Small,
        CompanySizeBand::Medium,
        CompanySizeBand::MidMarket,
        CompanySizeBand::Large,
        CompanySizeBand::Enterprise,
        CompanySizeBand::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompanySizeBand::Micro => "1-10",
            CompanySizeBand::Small => "11-50",
            CompanySizeBand::Medium => "51-200",
            CompanySizeBand::MidMarket => "201-500",
            CompanySizeBand::Large => "501-1000",
            CompanySizeBand::Enterprise => "1001-5000",
            CompanySizeBand::Global => "5000+",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|band| band.as_str() == s.trim())
    }

    /// Inclusive head-count bounds.
    pub fn bounds(&self) -> (u64, u64) {
        match self {
            CompanySizeBand::Micro => (1, 10),
            CompanySizeBand::Small => (11, 50),
            CompanySizeBand::Medium => (51, 200),
            CompanySizeBand::MidMarket => (201, 500),
            CompanySizeBand::Large => (501, 1000),
            CompanySizeBand::Enterprise => (1001, 5000),
            CompanySizeBand::Global => (5000, u64::MAX),
        }
    }

    pub fn contains(&self, employees: u64) -> bool {
        let (min, max) = self.bounds();
        employees >= min && employees <= max
    }
}

/// Targeting criteria of a campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignProfile {
    #[serde(default)]
    pub target_industries: Vec<String>,
    #[serde(default)]
    pub target_company_sizes: Vec<CompanySizeBand>,
}

/// Per-signal points behind a heuristic score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FitBreakdown {
    pub industry: u32,
    pub company_size: u32,
    pub ai_sentiment: u32,
    pub data_completeness: u32,
    pub total: u32,
}

impl FitBreakdown {
    pub fn tier(&self) -> LeadTier {
        LeadTier::from_score(self.total as f64)
    }
}

/// Heuristic `FitScorer` with an in-memory campaign directory.
#[derive(Debug, Default)]
pub struct HeuristicFitScorer {
    campaigns: RwLock<HashMap<CampaignId, CampaignProfile>>,
}

impl HeuristicFitScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_campaign(self, campaign_id: CampaignId, profile: CampaignProfile) -> Self {
        self.register_campaign(campaign_id, profile);
        self
    }

    pub fn register_campaign(&self, campaign_id: CampaignId, profile: CampaignProfile) {
        if let Ok(mut campaigns) = self.campaigns.write() {
            campaigns.insert(campaign_id, profile);
        }
    }

    fn profile(&self, campaign_id: Option<CampaignId>) -> CampaignProfile {
        let Some(id) = campaign_id else {
            return CampaignProfile::default();
        };
        let found = self
            .campaigns
            .read()
            .ok()
            .and_then(|campaigns| campaigns.get(&id).cloned());
        match found {
            Some(profile) => profile,
            None => {
                tracing::debug!(campaign_id = %id, "unknown campaign, scoring without targeting");
                CampaignProfile::default()
            }
        }
    }

    /// Score a row and report how each signal contributed.
    pub fn breakdown(&self, request: &ScoreRequest) -> FitBreakdown {
        let profile = self.profile(request.campaign_id);
        let industry = industry_points(&profile, request.values.get("industry").unwrap_or_default());
        let employees = request
            .values
            .get("employee_count")
            .or_else(|| request.values.get("employees"))
            .and_then(parse_head_count);
        let company_size = size_points(&profile, employees);
        let ai_sentiment = (sentiment(&request.ai_outputs) * 30.0).round() as u32;
        let data_completeness = (completeness(request) * 20.0).round() as u32;

        let total = (industry + company_size + ai_sentiment + data_completeness).min(100);
        FitBreakdown {
            industry,
            company_size,
            ai_sentiment,
            data_completeness,
            total,
        }
    }
}

fn industry_points(profile: &CampaignProfile, row_industry: &str) -> u32 {
    if profile.target_industries.is_empty() {
        return 15;
    }
    let row_industry = row_industry.trim().to_lowercase();
    if row_industry.is_empty() {
        return 0;
    }
    let matched = profile.target_industries.iter().any(|target| {
        let target = target.trim().to_lowercase();
        !target.is_empty() && (row_industry.contains(&target) || target.contains(&row_industry))
    });
    if matched {
        30
    } else {
        0
    }
}

fn size_points(profile: &CampaignProfile, employees: Option<u64>) -> u32 {
    if profile.target_company_sizes.is_empty() {
        return 10;
    }
    match employees {
        Some(count) if count > 0 => {
            if profile.target_company_sizes.iter().any(|b| b.contains(count)) {
                20
            } else {
                0
            }
        }
        _ => 0,
    }
}

/// Leading digits of a head-count field ("1,200 employees" -> 1200).
fn parse_head_count(raw: &str) -> Option<u64> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Share of positive signals among all signals found, 0.5 when none.
fn sentiment(outputs: &[String]) -> f64 {
    let text = outputs.join(" ").to_lowercase();
    let positive = POSITIVE_SIGNALS.iter().filter(|s| text.contains(*s)).count();
    let negative = NEGATIVE_SIGNALS.iter().filter(|s| text.contains(*s)).count();
    let total = positive + negative;
    if total == 0 {
        0.5
    } else {
        positive as f64 / total as f64
    }
}

fn completeness(request: &ScoreRequest) -> f64 {
    let (filled, total) = request
        .values
        .iter()
        .filter(|(key, _)| *key != "all_data")
        .fold((0usize, 0usize), |(filled, total), (_, value)| {
            let filled = if value.trim().is_empty() { filled } else { filled + 1 };
            (filled, total + 1)
        });
    if total == 0 {
        0.0
    } else {
        filled as f64 / total as f64
    }
}

#[async_trait]
impl FitScorer for HeuristicFitScorer {
    async fn score(&self, request: &ScoreRequest) -> EnrichResult<f64> {
        Ok(self.breakdown(request).total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_core::{EntityIdType, RowValues};

    fn values(pairs: &[(&str, &str)]) -> RowValues {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_no_campaign_gets_partial_credit() {
        let scorer = HeuristicFitScorer::new();
        let request = ScoreRequest {
            values: values(&[("company", "Acme"), ("industry", "")]),
            ai_outputs: vec![],
            campaign_id: None,
        };
        let breakdown = scorer.breakdown(&request);
        assert_eq!(breakdown.industry, 15);
        assert_eq!(breakdown.company_size, 10);
        assert_eq!(breakdown.ai_sentiment, 15);
        assert_eq!(breakdown.data_completeness, 10);
        assert_eq!(breakdown.total, 50);
        assert_eq!(breakdown.tier(), LeadTier::Warm);
    }

    #[test]
    fn test_targeted_campaign_full_match() {
        let campaign = CampaignId::now_v7();
        let scorer = HeuristicFitScorer::new().with_campaign(
            campaign,
            CampaignProfile {
                target_industries: vec!["Software".to_string()],
                target_company_sizes: vec![CompanySizeBand::Medium],
            },
        );
        let request = ScoreRequest {
            values: values(&[
                ("company", "Acme"),
                ("industry", "B2B Software"),
                ("employee_count", "120"),
            ]),
            ai_outputs: vec!["Acme is a strong match and would benefit greatly".to_string()],
            campaign_id: Some(campaign),
        };
        let breakdown = scorer.breakdown(&request);
        assert_eq!(breakdown.industry, 30);
        assert_eq!(breakdown.company_size, 20);
        assert_eq!(breakdown.ai_sentiment, 30);
        assert_eq!(breakdown.data_completeness, 20);
        assert_eq!(breakdown.total, 100);
        assert_eq!(breakdown.tier(), LeadTier::Hot);
    }

    #[test]
    fn test_targeted_campaign_mismatch() {
        let campaign = CampaignId::now_v7();
        let scorer = HeuristicFitScorer::new().with_campaign(
            campaign,
            CampaignProfile {
                target_industries: vec!["Healthcare".to_string()],
                target_company_sizes: vec![CompanySizeBand::Global],
            },
        );
        let request = ScoreRequest {
            values: values(&[("industry", "Retail"), ("employees", "40")]),
            ai_outputs: vec!["Not a fit, different market".to_string()],
            campaign_id: Some(campaign),
        };
        let breakdown = scorer.breakdown(&request);
        assert_eq!(breakdown.industry, 0);
        assert_eq!(breakdown.company_size, 0);
        assert_eq!(breakdown.ai_sentiment, 0);
        assert_eq!(breakdown.total, 20);
        assert_eq!(breakdown.tier(), LeadTier::Cold);
    }

    #[test]
    fn test_size_bands() {
        assert!(CompanySizeBand::Enterprise.contains(5000));
        assert!(CompanySizeBand::Global.contains(5000));
        assert!(!CompanySizeBand::Micro.contains(0));
        assert_eq!(CompanySizeBand::parse(" 51-200 "), Some(CompanySizeBand::Medium));
        assert_eq!(CompanySizeBand::parse("huge"), None);
    }

    #[test]
    fn test_parse_head_count() {
        assert_eq!(parse_head_count("1,200 employees"), Some(1200));
        assert_eq!(parse_head_count("85"), Some(85));
        assert_eq!(parse_head_count("unknown"), None);
    }

    #[test]
    fn test_profile_deserializes_band_labels() {
        let profile: CampaignProfile = serde_json::from_str(
            r#"{"target_industries":["SaaS"],"target_company_sizes":["11-50","5000+"]}"#,
        )
        .unwrap();
        assert_eq!(
            profile.target_company_sizes,
            vec![CompanySizeBand::Small, CompanySizeBand::Global]
        );
    }

    #[tokio::test]
    async fn test_score_is_total() {
        let scorer = HeuristicFitScorer::new();
        let request = ScoreRequest::default();
        let score = scorer.score(&request).await.unwrap();
        assert_eq!(score, 40.0);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Scores always land in 0..=100 whatever the row says.
        #[test]
        fn prop_score_is_bounded(
            industry in ".{0,20}",
            employees in ".{0,10}",
            output in ".{0,60}",
        ) {
            let scorer = HeuristicFitScorer::new();
            let request = ScoreRequest {
                values: [("industry", industry), ("employee_count", employees)]
                    .into_iter()
                    .collect(),
                ai_outputs: vec![output],
                campaign_id: None,
            };
            let breakdown = scorer.breakdown(&request);
            prop_assert!(breakdown.total <= 100);
            prop_assert_eq!(
                breakdown.total,
                (breakdown.industry + breakdown.company_size + breakdown.ai_sentiment + breakdown.data_completeness).min(100)
            );
        }
    }
}
