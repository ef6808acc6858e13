//! Partial row records and record keys.
//!
//! Push payloads are partial: a change may carry any subset of a row's
//! columns (deletes often carry only the primary key). Records are kept as
//! ordered JSON objects with typed accessors for the columns the
//! reconciler cares about.

use crate::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Well-known column names used by reconciliation.
pub mod columns {
    pub const ID: &str = "id";
    pub const TEMP_ID: &str = "temp_id";
    pub const PLAN_ID: &str = "plan_id";
    pub const ENTRY_DATE: &str = "entry_date";
    pub const SUMMARY_DATE: &str = "summary_date";
    pub const STATUS: &str = "status";
    pub const PROGRESS: &str = "progress";
}

// ============================================================================
// RECORD KEY
// ============================================================================

/// A record's identity within a view: either the server-confirmed id or a
/// client-assigned temporary placeholder id awaiting confirmation.
///
/// Within one view, keys are unique; a temp record and its real-id
/// counterpart never coexist once reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Real(EntityId),
    Temp(String),
}

impl RecordKey {
    pub fn is_temp(&self) -> bool {
        matches!(self, RecordKey::Temp(_))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Real(id) => write!(f, "{id}"),
            RecordKey::Temp(tmp) => write!(f, "temp:{tmp}"),
        }
    }
}

// ============================================================================
// STATUS FIELDS
// ============================================================================

/// Lifecycle bucket for an entry; drives which list view holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Archived,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Archived => "archived",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EntryStatus::Active),
            "archived" => Ok(EntryStatus::Archived),
            _ => Err(()),
        }
    }
}

/// Generation progress of a derived summary.
///
/// `Completed` is sticky from the cache's point of view: once a view has
/// observed it for a key, a later `Generating` payload must not revert it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
    Generating,
    Completed,
}

impl Progress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Progress::Generating => "generating",
            Progress::Completed => "completed",
        }
    }
}

impl FromStr for Progress {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generating" => Ok(Progress::Generating),
            "completed" => Ok(Progress::Completed),
            _ => Err(()),
        }
    }
}

// ============================================================================
// PARTIAL RECORD
// ============================================================================

/// An ordered set of `(column, value)` pairs for one row.
///
/// Column order is preserved so serialized records stay byte-stable for
/// snapshot comparisons in tests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialRecord(Map<String, Value>);

/// Attempted to build a record from a non-object JSON value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Record payload must be a JSON object")]
pub struct NotAnObject;

impl PartialRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_value(value: Value) -> Result<Self, NotAnObject> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(NotAnObject),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.0.insert(column.into(), value);
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Server-confirmed primary key, if present.
    pub fn id(&self) -> Option<EntityId> {
        self.uuid_column(columns::ID)
    }

    /// Client-assigned optimistic placeholder id, if present.
    pub fn temp_id(&self) -> Option<&str> {
        self.str_column(columns::TEMP_ID)
    }

    /// Identity within a view: real id wins over a temp id.
    pub fn key(&self) -> Option<RecordKey> {
        if let Some(id) = self.id() {
            return Some(RecordKey::Real(id));
        }
        self.temp_id().map(|tmp| RecordKey::Temp(tmp.to_string()))
    }

    /// Owning parent plan, if present.
    pub fn plan_id(&self) -> Option<EntityId> {
        self.uuid_column(columns::PLAN_ID)
    }

    /// Business date of an entry (ISO `YYYY-MM-DD`), if present.
    pub fn entry_date(&self) -> Option<&str> {
        self.str_column(columns::ENTRY_DATE)
    }

    /// Business date of a summary (ISO `YYYY-MM-DD`), if present.
    pub fn summary_date(&self) -> Option<&str> {
        self.str_column(columns::SUMMARY_DATE)
    }

    pub fn status(&self) -> Option<EntryStatus> {
        self.str_column(columns::STATUS)?.parse().ok()
    }

    pub fn progress(&self) -> Option<Progress> {
        self.str_column(columns::PROGRESS)?.parse().ok()
    }

    /// Lay `incoming`'s columns over this record.
    ///
    /// Columns absent from `incoming` keep their cached values, so a
    /// partial push payload never erases detail fields a richer cached
    /// copy already holds.
    pub fn merge_from(&mut self, incoming: &PartialRecord) {
        for (column, value) in &incoming.0 {
            self.0.insert(column.clone(), value.clone());
        }
    }

    fn str_column(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    fn uuid_column(&self, column: &str) -> Option<EntityId> {
        self.str_column(column).and_then(|s| Uuid::parse_str(s).ok())
    }
}

impl FromIterator<(String, Value)> for PartialRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;
    use serde_json::json;

    #[test]
    fn real_key_wins_over_temp_id() {
        let id = new_entity_id();
        let record = PartialRecord::from_value(json!({
            "id": id,
            "temp_id": "tmp-1",
        }))
        .unwrap();
        assert_eq!(record.key(), Some(RecordKey::Real(id)));
    }

    #[test]
    fn temp_only_record_has_temp_key() {
        let record = PartialRecord::from_value(json!({ "temp_id": "tmp-1" })).unwrap();
        assert_eq!(record.key(), Some(RecordKey::Temp("tmp-1".to_string())));
        assert!(record.key().unwrap().is_temp());
    }

    #[test]
    fn merge_keeps_columns_the_payload_omits() {
        let mut cached = PartialRecord::from_value(json!({
            "id": new_entity_id(),
            "title": "Morning pages",
            "body": "long detail text",
        }))
        .unwrap();
        let incoming = PartialRecord::from_value(json!({ "title": "Evening pages" })).unwrap();

        cached.merge_from(&incoming);

        assert_eq!(cached.get("title"), Some(&json!("Evening pages")));
        assert_eq!(cached.get("body"), Some(&json!("long detail text")));
    }

    #[test]
    fn status_and_progress_parse_from_columns() {
        let record = PartialRecord::from_value(json!({
            "status": "archived",
            "progress": "completed",
        }))
        .unwrap();
        assert_eq!(record.status(), Some(EntryStatus::Archived));
        assert_eq!(record.progress(), Some(Progress::Completed));

        let junk = PartialRecord::from_value(json!({ "status": "paused" })).unwrap();
        assert_eq!(junk.status(), None);
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(PartialRecord::from_value(json!([1, 2, 3])).is_err());
    }
}
