//! Column registry: static metadata per column kind.

use crate::ColumnKind;
use serde::Serialize;

/// Presentation and scheduling facts about a column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindMetadata {
    pub kind: ColumnKind,
    pub label: &'static str,
    /// Icon name from the lucide set used by the grid header
    pub icon: &'static str,
    pub color: &'static str,
    pub required_config_fields: &'static [&'static str],
    /// Shown as a run-on-demand column. Waterfall and merge carry the flag
    /// but resolve locally once their sources are ready.
    pub is_asynchronous: bool,
}

/// Metadata for a kind. Pure lookup, total over `ColumnKind`.
pub fn kind_metadata(kind: ColumnKind) -> KindMetadata {
    match kind {
        ColumnKind::StaticField => meta(kind, "Field", "Type", "text-zinc-400", &[], false),
        ColumnKind::Enrichment => meta(
            kind,
            "Enrichment",
            "Database",
            "text-blue-400",
            &["provider", "input_columns"],
            true,
        ),
        ColumnKind::AiGenerated => meta(
            kind,
            "AI Analysis",
            "Brain",
            "text-purple-400",
            &["prompt_template", "model_id"],
            true,
        ),
        ColumnKind::Formula => {
            meta(kind, "Formula", "Calculator", "text-amber-400", &["expression"], false)
        }
        ColumnKind::Waterfall => {
            meta(kind, "Waterfall", "GitMerge", "text-cyan-400", &["sources"], true)
        }
        ColumnKind::ExternalApi => {
            meta(kind, "HTTP API", "Globe", "text-green-400", &["url_template"], true)
        }
        ColumnKind::Merge => meta(kind, "Merge", "GitMerge", "text-pink-400", &["sources"], true),
        ColumnKind::FitScore => meta(kind, "Fit Score", "Star", "text-yellow-400", &[], true),
    }
}

fn meta(
    kind: ColumnKind,
    label: &'static str,
    icon: &'static str,
    color: &'static str,
    required_config_fields: &'static [&'static str],
    is_asynchronous: bool,
) -> KindMetadata {
    KindMetadata {
        kind,
        label,
        icon,
        color,
        required_config_fields,
        is_asynchronous,
    }
}

/// Metadata for every kind, in registry order.
pub fn all_kinds() -> Vec<KindMetadata> {
    ColumnKind::ALL.iter().copied().map(kind_metadata).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_static_and_formula_are_synchronous() {
        for meta in all_kinds() {
            let expected_sync = matches!(meta.kind, ColumnKind::StaticField | ColumnKind::Formula);
            assert_eq!(!meta.is_asynchronous, expected_sync, "{:?}", meta.kind);
        }
    }

    #[test]
    fn test_required_fields() {
        assert_eq!(
            kind_metadata(ColumnKind::AiGenerated).required_config_fields,
            &["prompt_template", "model_id"]
        );
        assert!(kind_metadata(ColumnKind::StaticField)
            .required_config_fields
            .is_empty());
    }

    #[test]
    fn test_registry_covers_every_kind() {
        let kinds: Vec<_> = all_kinds().into_iter().map(|m| m.kind).collect();
        assert_eq!(kinds, ColumnKind::ALL.to_vec());
    }
}
