//! Change Envelope Types
//!
//! This module defines the normalized shape of one row-level change
//! (insert/update/delete) delivered over the live subscription, and the
//! static registry of watched tables.

use crate::record::PartialRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TABLE REGISTRY
// ============================================================================

/// Watched entity tables.
///
/// The variant set is the full subscription registry: a session subscribes
/// to every table listed in [`EntityTable::ALL`]. Dispatch on this enum is
/// exhaustive at compile time, so adding a table without wiring a
/// reconciler is a build error rather than a silently dropped event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityTable {
    Plans,
    Entries,
    Summaries,
}

impl EntityTable {
    /// Every table covered by a subscription.
    pub const ALL: [EntityTable; 3] = [
        EntityTable::Plans,
        EntityTable::Entries,
        EntityTable::Summaries,
    ];

    /// Wire/table name as the backend spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityTable::Plans => "plans",
            EntityTable::Entries => "entries",
            EntityTable::Summaries => "summaries",
        }
    }
}

impl fmt::Display for EntityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityTable {
    type Err = UnknownTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plans" => Ok(EntityTable::Plans),
            "entries" => Ok(EntityTable::Entries),
            "summaries" => Ok(EntityTable::Summaries),
            other => Err(UnknownTable {
                table: other.to_string(),
            }),
        }
    }
}

/// A table name outside the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown table: {table}")]
pub struct UnknownTable {
    pub table: String,
}

// ============================================================================
// CHANGE ENVELOPE
// ============================================================================

/// Kind of row change carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Kind as a string for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// A normalized record of one database row change.
///
/// Shape invariants (see [`ChangeEnvelope::validate`]):
/// - `Insert` and `Update` always carry a complete `new_row`.
/// - `Delete` carries `old_row`, which may hold only the primary key; the
///   transport does not guarantee full old-row data on deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    pub table: EntityTable,
    pub kind: ChangeKind,
    pub old_row: Option<PartialRecord>,
    pub new_row: Option<PartialRecord>,
}

impl ChangeEnvelope {
    pub fn insert(table: EntityTable, new_row: PartialRecord) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            old_row: None,
            new_row: Some(new_row),
        }
    }

    pub fn update(table: EntityTable, old_row: Option<PartialRecord>, new_row: PartialRecord) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            old_row,
            new_row: Some(new_row),
        }
    }

    pub fn delete(table: EntityTable, old_row: PartialRecord) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            old_row: Some(old_row),
            new_row: None,
        }
    }

    /// The row that drives reconciliation: `new_row` for inserts/updates,
    /// `old_row` for deletes.
    pub fn row(&self) -> Option<&PartialRecord> {
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => self.new_row.as_ref(),
            ChangeKind::Delete => self.old_row.as_ref(),
        }
    }

    /// Check the envelope shape invariants.
    pub fn validate(&self) -> Result<(), EnvelopeShapeError> {
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                if self.new_row.is_none() {
                    return Err(EnvelopeShapeError::MissingNewRow { kind: self.kind });
                }
            }
            ChangeKind::Delete => {
                if self.old_row.is_none() {
                    return Err(EnvelopeShapeError::MissingOldRow);
                }
            }
        }
        match self.row().and_then(|row| row.id()) {
            Some(_) => Ok(()),
            None => Err(EnvelopeShapeError::MissingPrimaryKey { kind: self.kind }),
        }
    }

    /// Short form for logging, e.g. `entries/update`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.table, self.kind.as_str())
    }
}

/// Envelope shape violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeShapeError {
    #[error("{kind:?} envelope is missing new_row")]
    MissingNewRow { kind: ChangeKind },

    #[error("Delete envelope is missing old_row")]
    MissingOldRow,

    #[error("{kind:?} envelope row carries no primary key")]
    MissingPrimaryKey { kind: ChangeKind },
}
