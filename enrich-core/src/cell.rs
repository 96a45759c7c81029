//! Cell values and the per-cell computation lifecycle.
//!
//! A cell moves `empty -> pending -> ready | error` and can always be sent
//! back to `pending`. Every `begin` hands out a fresh generation token;
//! results carrying an older token are discarded, so the most recently
//! requested computation is the only one that can land.

use crate::{CellKey, CellStatus, ColumnId, RowId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic per-cell counter identifying one computation request.
pub type Generation = u64;

// ============================================================================
// CELL VALUE
// ============================================================================

/// A value held by a `ready` cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Text(String),
    Number(f64),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// Text shown in the grid and written to exports.
    pub fn display(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Json(serde_json::Value::String(s)) => s.clone(),
            CellValue::Json(serde_json::Value::Null) => String::new(),
            CellValue::Json(v) => v.to_string(),
        }
    }

    /// True for whitespace-only text and JSON null.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
            CellValue::Json(serde_json::Value::Null) => true,
            CellValue::Json(serde_json::Value::String(s)) => s.trim().is_empty(),
            CellValue::Json(_) => false,
        }
    }

    /// Numeric reading of the value, parsing text when it looks like a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_number(s),
            CellValue::Json(serde_json::Value::Number(n)) => n.as_f64(),
            CellValue::Json(serde_json::Value::String(s)) => parse_number(s),
            CellValue::Json(_) => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// Render a number without a trailing `.0` when it is integral.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

// ============================================================================
// CELL STATE
// ============================================================================

/// Lifecycle state of a cell. The variants make the value/error
/// exclusivity structural: only `Ready` exposes a current value and only
/// `Error` carries a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CellState {
    #[default]
    Empty,
    Pending {
        /// Last ready value, kept for display while recomputing
        previous: Option<CellValue>,
    },
    Ready {
        value: CellValue,
    },
    Error {
        message: String,
        /// Last ready value before the failure; never displayed as ready
        previous: Option<CellValue>,
    },
}

impl CellState {
    pub fn status(&self) -> CellStatus {
        match self {
            CellState::Empty => CellStatus::Empty,
            CellState::Pending { .. } => CellStatus::Pending,
            CellState::Ready { .. } => CellStatus::Ready,
            CellState::Error { .. } => CellStatus::Error,
        }
    }

    fn last_value(&self) -> Option<CellValue> {
        match self {
            CellState::Empty => None,
            CellState::Pending { previous } | CellState::Error { previous, .. } => previous.clone(),
            CellState::Ready { value } => Some(value.clone()),
        }
    }
}

/// Whether a completion was applied to the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The token was superseded by a later request; nothing changed.
    Stale,
}

// ============================================================================
// CELL
// ============================================================================

/// The value at the intersection of one row and one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub row_id: RowId,
    pub column_id: ColumnId,
    state: CellState,
    generation: Generation,
    pub updated_at: Timestamp,
}

impl Cell {
    /// A fresh `empty` cell.
    pub fn new(row_id: RowId, column_id: ColumnId) -> Self {
        Self {
            row_id,
            column_id,
            state: CellState::Empty,
            generation: 0,
            updated_at: Utc::now(),
        }
    }

    /// Rebuild a cell from persisted parts.
    pub fn from_parts(
        row_id: RowId,
        column_id: ColumnId,
        state: CellState,
        generation: Generation,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            row_id,
            column_id,
            state,
            generation,
            updated_at,
        }
    }

    pub fn key(&self) -> CellKey {
        CellKey::new(self.row_id, self.column_id)
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    pub fn status(&self) -> CellStatus {
        self.state.status()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The current value; `Some` only when the cell is `ready`.
    pub fn value(&self) -> Option<&CellValue> {
        match &self.state {
            CellState::Ready { value } => Some(value),
            _ => None,
        }
    }

    /// The failure reason; `Some` only when the cell is `error`.
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            CellState::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, CellState::Pending { .. })
    }

    /// Start a computation. Valid from every state; a computation already in
    /// flight is superseded. Returns the token the result must present.
    pub fn begin(&mut self) -> Generation {
        let previous = self.state.last_value();
        self.generation += 1;
        self.state = CellState::Pending { previous };
        self.updated_at = Utc::now();
        self.generation
    }

    /// Land a successful result for `generation`.
    pub fn resolve(&mut self, generation: Generation, value: CellValue) -> Transition {
        if !self.accepts(generation) {
            return Transition::Stale;
        }
        self.state = CellState::Ready { value };
        self.updated_at = Utc::now();
        Transition::Applied
    }

    /// Land a failure for `generation`.
    pub fn fail(&mut self, generation: Generation, message: impl Into<String>) -> Transition {
        if !self.accepts(generation) {
            return Transition::Stale;
        }
        let previous = self.state.last_value();
        self.state = CellState::Error {
            message: message.into(),
            previous,
        };
        self.updated_at = Utc::now();
        Transition::Applied
    }

    /// Manual write: any state goes straight to `ready`. Bumps the generation
    /// so nothing in flight can overwrite the edit.
    pub fn set_manual(&mut self, value: CellValue) {
        self.generation += 1;
        self.state = CellState::Ready { value };
        self.updated_at = Utc::now();
    }

    /// Reset to `empty`, invalidating anything in flight.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.state = CellState::Empty;
        self.updated_at = Utc::now();
    }

    fn accepts(&self, generation: Generation) -> bool {
        generation == self.generation && self.is_pending()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    fn cell() -> Cell {
        Cell::new(RowId::now_v7(), ColumnId::now_v7())
    }

    #[test]
    fn test_new_cell_is_empty() {
        let c = cell();
        assert_eq!(c.status(), CellStatus::Empty);
        assert!(c.value().is_none());
        assert!(c.error_message().is_none());
    }

    #[test]
    fn test_begin_then_resolve() {
        let mut c = cell();
        let token = c.begin();
        assert_eq!(c.status(), CellStatus::Pending);
        assert_eq!(c.resolve(token, "Acme".into()), Transition::Applied);
        assert_eq!(c.value(), Some(&CellValue::text("Acme")));
    }

    #[test]
    fn test_failure_keeps_previous_value_hidden() {
        let mut c = cell();
        let t1 = c.begin();
        c.resolve(t1, "old".into());
        let t2 = c.begin();
        c.fail(t2, "timeout");
        assert_eq!(c.status(), CellStatus::Error);
        assert!(c.value().is_none());
        assert_eq!(c.error_message(), Some("timeout"));
        match c.state() {
            CellState::Error { previous, .. } => {
                assert_eq!(previous.as_ref(), Some(&CellValue::text("old")))
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_superseded_result_is_discarded() {
        let mut c = cell();
        let first = c.begin();
        let second = c.begin();
        assert_eq!(c.resolve(first, "first".into()), Transition::Stale);
        assert_eq!(c.status(), CellStatus::Pending);
        assert_eq!(c.resolve(second, "second".into()), Transition::Applied);
        assert_eq!(c.fail(first, "late failure"), Transition::Stale);
        assert_eq!(c.value(), Some(&CellValue::text("second")));
    }

    #[test]
    fn test_manual_edit_invalidates_in_flight() {
        let mut c = cell();
        let token = c.begin();
        c.set_manual("typed".into());
        assert_eq!(c.resolve(token, "computed".into()), Transition::Stale);
        assert_eq!(c.value(), Some(&CellValue::text("typed")));
    }

    #[test]
    fn test_resolve_twice_with_same_token_is_stale() {
        let mut c = cell();
        let token = c.begin();
        assert_eq!(c.resolve(token, "a".into()), Transition::Applied);
        assert_eq!(c.resolve(token, "b".into()), Transition::Stale);
        assert_eq!(c.value(), Some(&CellValue::text("a")));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(CellValue::Number(42.0).display(), "42");
        assert_eq!(CellValue::Number(2.5).display(), "2.5");
        assert_eq!(CellValue::Json(serde_json::json!({"a": 1})).display(), "{\"a\":1}");
        assert_eq!(CellValue::Json(serde_json::Value::Null).display(), "");
        assert!(CellValue::text("   ").is_blank());
        assert_eq!(CellValue::text(" 12 ").as_number(), Some(12.0));
        assert_eq!(CellValue::text("twelve").as_number(), None);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::EntityIdType;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Begin,
        Resolve(usize, String),
        Fail(usize, String),
        Manual(String),
        Clear,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Begin),
            (0usize..4, "[a-z]{0,8}").prop_map(|(i, s)| Op::Resolve(i, s)),
            (0usize..4, "[a-z]{1,8}").prop_map(|(i, s)| Op::Fail(i, s)),
            "[a-z]{0,8}".prop_map(Op::Manual),
            Just(Op::Clear),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Ready always carries a value and no message; error carries a
        /// message and no current value, whatever the operation sequence.
        #[test]
        fn prop_value_and_error_are_exclusive(ops in prop::collection::vec(arb_op(), 0..40)) {
            let mut c = Cell::new(RowId::now_v7(), ColumnId::now_v7());
            let mut tokens: Vec<Generation> = Vec::new();
            for op in ops {
                match op {
                    Op::Begin => tokens.push(c.begin()),
                    Op::Resolve(i, s) => {
                        if let Some(t) = tokens.get(i) {
                            c.resolve(*t, CellValue::text(s));
                        }
                    }
                    Op::Fail(i, s) => {
                        if let Some(t) = tokens.get(i) {
                            c.fail(*t, s);
                        }
                    }
                    Op::Manual(s) => c.set_manual(CellValue::text(s)),
                    Op::Clear => c.clear(),
                }
                match c.status() {
                    CellStatus::Ready => {
                        prop_assert!(c.value().is_some());
                        prop_assert!(c.error_message().is_none());
                    }
                    CellStatus::Error => {
                        prop_assert!(c.value().is_none());
                        prop_assert!(c.error_message().is_some());
                    }
                    CellStatus::Pending | CellStatus::Empty => {
                        prop_assert!(c.value().is_none());
                        prop_assert!(c.error_message().is_none());
                    }
                }
            }
        }

        /// Only the latest token can land, regardless of arrival order.
        #[test]
        fn prop_last_request_wins(requests in 2usize..8, arrival in prop::collection::vec(any::<prop::sample::Index>(), 8)) {
            let mut c = Cell::new(RowId::now_v7(), ColumnId::now_v7());
            let tokens: Vec<Generation> = (0..requests).map(|_| c.begin()).collect();
            let latest = *tokens.last().unwrap();

            let mut order: Vec<usize> = (0..requests).collect();
            for (i, idx) in arrival.iter().enumerate().take(requests) {
                let j = idx.index(requests);
                order.swap(i, j);
            }

            for i in order {
                let outcome = c.resolve(tokens[i], CellValue::text(format!("r{}", i)));
                if tokens[i] == latest {
                    prop_assert_eq!(outcome, Transition::Applied);
                } else {
                    prop_assert_eq!(outcome, Transition::Stale);
                }
            }
            prop_assert_eq!(c.value(), Some(&CellValue::text(format!("r{}", requests - 1))));
        }
    }
}
