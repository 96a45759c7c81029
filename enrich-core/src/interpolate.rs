//! `{key}` placeholder substitution against a row's values.
//!
//! Keys are derived from column names: lower-cased, every run of
//! non-alphanumeric characters collapsed to one underscore, leading and
//! trailing underscores dropped. Unknown keys substitute the empty string.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static NON_ALNUM_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("Invalid key regex"));

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*([A-Za-z0-9_]+)\s*\}").expect("Invalid placeholder regex"));

/// Placeholder key for a column name.
pub fn column_key(name: &str) -> String {
    let lower = name.to_lowercase();
    NON_ALNUM_RUN
        .replace_all(&lower, "_")
        .trim_matches('_')
        .to_string()
}

/// Values visible to a row at interpolation time, by placeholder key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowValues {
    values: BTreeMap<String, String>,
}

impl RowValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under an already-derived key. The first insert for a
    /// key wins, so callers feed columns in display order.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Insert a value under the key derived from a column name.
    pub fn insert_column(&mut self, column_name: &str, value: impl Into<String>) {
        self.insert(column_key(column_name), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = RowValues::new();
        for (k, v) in iter {
            values.insert(k, v);
        }
        values
    }
}

/// A well-known prompt variable and the column keys that can feed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardVariable {
    pub key: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    /// Column keys tried in order when the row has no column named `key`
    pub sources: &'static [&'static str],
}

/// Variables every prompt can use regardless of how columns are named.
/// `all_data` is the whole row rendered as JSON.
pub const STANDARD_VARIABLES: &[StandardVariable] = &[
    StandardVariable {
        key: "company",
        label: "Company Name",
        description: "The prospect company name",
        sources: &["company_name"],
    },
    StandardVariable {
        key: "website",
        label: "Website",
        description: "Company website URL",
        sources: &["domain"],
    },
    StandardVariable {
        key: "industry",
        label: "Industry",
        description: "Company industry",
        sources: &[],
    },
    StandardVariable {
        key: "location",
        label: "Location",
        description: "Company headquarters location",
        sources: &["headquarters"],
    },
    StandardVariable {
        key: "employee_count",
        label: "Employee Count",
        description: "Number of employees",
        sources: &["employees"],
    },
    StandardVariable {
        key: "description",
        label: "Description",
        description: "Company description",
        sources: &["company_description"],
    },
    StandardVariable {
        key: "all_data",
        label: "All Data (JSON)",
        description: "Complete row data as JSON",
        sources: &[],
    },
];

/// Whether `placeholder` is filled from the column keyed `column_key`,
/// either directly or through a standard variable alias.
pub fn placeholder_reads(placeholder: &str, column_key: &str) -> bool {
    placeholder == column_key
        || placeholder == "all_data"
        || STANDARD_VARIABLES
            .iter()
            .any(|var| var.key == placeholder && var.sources.contains(&column_key))
}

impl RowValues {
    /// Fill the standard variables from their alias columns. Existing keys
    /// are never overwritten.
    pub fn with_standard_aliases(mut self) -> Self {
        if !self.values.contains_key("all_data") {
            let object: serde_json::Map<String, serde_json::Value> = self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(object))
                .unwrap_or_default();
            self.values.insert("all_data".to_string(), rendered);
        }
        for var in STANDARD_VARIABLES {
            if self.values.contains_key(var.key) {
                continue;
            }
            let aliased = var
                .sources
                .iter()
                .find_map(|source| self.values.get(*source).filter(|v| !v.trim().is_empty()))
                .cloned();
            if let Some(value) = aliased {
                self.values.insert(var.key.to_string(), value);
            }
        }
        self
    }
}

/// Substitute every `{key}` in `template`. Never fails.
pub fn interpolate(template: &str, row: &RowValues) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = column_key(&caps[1]);
            row.get(&key).unwrap_or_default().to_string()
        })
        .into_owned()
}

/// Keys referenced by `template`, in first-occurrence order, without duplicates.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let key = column_key(&caps[1]);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RowValues {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_column_key_derivation() {
        assert_eq!(column_key("Company"), "company");
        assert_eq!(column_key("Company Name"), "company_name");
        assert_eq!(column_key("  LinkedIn -- URL!! "), "linkedin_url");
        assert_eq!(column_key("Revenue ($M)"), "revenue_m");
        assert_eq!(column_key("a__b"), "a_b");
    }

    #[test]
    fn test_interpolate_known_keys() {
        let values = row(&[("company", "Acme"), ("industry", "Robotics")]);
        assert_eq!(
            interpolate("Analyze {company} in {industry}", &values),
            "Analyze Acme in Robotics"
        );
    }

    #[test]
    fn test_interpolate_missing_key_is_empty() {
        let values = row(&[("company", "Acme")]);
        assert_eq!(interpolate("{company} / {ceo}", &values), "Acme / ");
    }

    #[test]
    fn test_interpolate_normalizes_placeholder_case() {
        let values = row(&[("company", "Acme")]);
        assert_eq!(interpolate("Hello {Company}", &values), "Hello Acme");
        assert_eq!(interpolate("Hello { company }", &values), "Hello Acme");
    }

    #[test]
    fn test_interpolate_leaves_non_placeholder_braces() {
        let values = row(&[("company", "Acme")]);
        let template = r#"Reply as {"name": "{company}"}"#;
        assert_eq!(interpolate(template, &values), r#"Reply as {"name": "Acme"}"#);
    }

    #[test]
    fn test_first_insert_wins() {
        let mut values = RowValues::new();
        values.insert_column("Company", "first");
        values.insert_column("company!", "second");
        assert_eq!(values.get("company"), Some("first"));
    }

    #[test]
    fn test_standard_aliases() {
        let values = row(&[("company_name", "Acme"), ("domain", "acme.io")]).with_standard_aliases();
        assert_eq!(
            interpolate("{company} at {website}", &values),
            "Acme at acme.io"
        );
        assert!(values.get("all_data").unwrap().contains("\"company_name\": \"Acme\""));
    }

    #[test]
    fn test_placeholder_reads_through_aliases() {
        assert!(placeholder_reads("company", "company"));
        assert!(placeholder_reads("company", "company_name"));
        assert!(placeholder_reads("website", "domain"));
        assert!(placeholder_reads("employee_count", "employees"));
        assert!(placeholder_reads("all_data", "anything"));
        assert!(!placeholder_reads("website", "company_name"));
        assert!(!placeholder_reads("industry", "sector"));
    }

    #[test]
    fn test_standard_aliases_do_not_override() {
        let values = row(&[("company", "Real"), ("company_name", "Alias")]).with_standard_aliases();
        assert_eq!(values.get("company"), Some("Real"));
    }

    #[test]
    fn test_placeholders_dedup_in_order() {
        assert_eq!(
            placeholders("{b} {a} {B} {c}"),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Key derivation is idempotent and only yields [a-z0-9_].
        #[test]
        fn prop_column_key_is_stable(name in ".{0,40}") {
            let key = column_key(&name);
            prop_assert_eq!(column_key(&key), key.clone());
            prop_assert!(key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            prop_assert!(!key.contains("__"));
        }

        /// Interpolating with no values removes every placeholder and never panics.
        #[test]
        fn prop_missing_values_resolve_to_empty(
            prefix in "[a-zA-Z ]{0,10}",
            key in "[a-z][a-z0-9_]{0,10}",
            suffix in "[a-zA-Z ]{0,10}",
        ) {
            let template = format!("{}{{{}}}{}", prefix, key, suffix);
            let out = interpolate(&template, &RowValues::new());
            prop_assert_eq!(out, format!("{}{}", prefix, suffix));
        }
    }
}
