//! Strongly-typed entity identifiers.
//!
//! Every entity in a workspace is addressed by a UUIDv7 wrapped in its own
//! newtype so a `RowId` can never be passed where a `ColumnId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Common behaviour of all entity id newtypes.
pub trait EntityIdType:
    Copy + Eq + Ord + std::hash::Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Human-readable entity name used in error messages.
    const ENTITY_NAME: &'static str;

    /// Wrap an existing UUID.
    fn new(uuid: Uuid) -> Self;

    /// Access the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a fresh timestamp-sortable id.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// The nil id, useful as a placeholder in fixtures.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident, $entity:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

define_entity_id!(
    /// Identifier of a research workspace (the aggregate root).
    WorkspaceId,
    "workspace"
);
define_entity_id!(
    /// Identifier of a column within a workspace.
    ColumnId,
    "column"
);
define_entity_id!(
    /// Identifier of a row within a workspace.
    RowId,
    "row"
);
define_entity_id!(
    /// Identifier of a campaign used for fit scoring.
    CampaignId,
    "campaign"
);

/// Composite address of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub row_id: RowId,
    pub column_id: ColumnId,
}

impl CellKey {
    pub fn new(row_id: RowId, column_id: ColumnId) -> Self {
        Self { row_id, column_id }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row_id, self.column_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip_through_strings() {
        let id = ColumnId::now_v7();
        let parsed: ColumnId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = RowId::now_v7();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }

    #[test]
    fn test_now_v7_ids_are_distinct() {
        assert_ne!(WorkspaceId::now_v7(), WorkspaceId::now_v7());
    }

    #[test]
    fn test_entity_names() {
        assert_eq!(ColumnId::ENTITY_NAME, "column");
        assert_eq!(RowId::ENTITY_NAME, "row");
    }
}
