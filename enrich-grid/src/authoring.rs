//! Prompt authoring helpers for AI columns.

use serde::Serialize;

/// A row variable offered to prompt authors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptVariable {
    /// Column display name
    pub name: String,
    /// Placeholder key, used as `{key}`
    pub key: String,
}

impl PromptVariable {
    pub fn placeholder(&self) -> String {
        format!("{{{}}}", self.key)
    }
}

/// Starter prompts for AI columns, naming the campaign's product when known.
pub fn suggested_prompts(product_name: Option<&str>) -> Vec<String> {
    let product = product_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("our solution");
    vec![
        format!("Analyze if {{company}} would benefit from {}", product),
        "Find pain points and challenges from {company} recent news".to_string(),
        "Score 1-10 how well {company} fits our target market".to_string(),
    ]
}
