//! Advisory key/value state rows.

use serde::Serialize;
use sqlx::FromRow;

/// A row from the `judge_state` table.
#[derive(Debug, Clone, FromRow, Serialize, PartialEq, Eq)]
pub struct StateEntry {
    pub key: String,
    pub value: Option<String>,
}
