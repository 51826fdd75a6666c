//! Change manifests from the publisher and the change log derived from them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::record::{Record, RecordKey, NAME_FIELD};
use crate::errors::AppError;

/// Reserved `_key` of the manifest line carrying build metadata.
pub const META_KEY: &str = "_meta";

pub const SOURCE_TABLE_FIELD: &str = "_source_table";
pub const STATUS_FIELD: &str = "_status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Changed,
    Removed,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Changed => "changed",
            ChangeStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(ChangeStatus::Added),
            "changed" => Some(ChangeStatus::Changed),
            "removed" => Some(ChangeStatus::Removed),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-table id sets for one build transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeManifestEntry {
    pub table: String,
    pub added: BTreeSet<RecordKey>,
    pub changed: BTreeSet<RecordKey>,
    pub removed: BTreeSet<RecordKey>,
    /// The table is new in this build; every record in it counts as added.
    pub file_added: bool,
}

impl ChangeManifestEntry {
    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        let table = value
            .get("_key")
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AppError::ManifestFormat("entry without a table `_key`".into()))?;

        Ok(Self {
            table: table.to_string(),
            added: id_set(value, "added")?,
            changed: id_set(value, "changed")?,
            removed: id_set(value, "removed")?,
            file_added: value
                .get("fileAdded")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Nothing to record for this table.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty() && !self.file_added
    }

    /// The post-update table file has to be scanned.
    pub fn needs_scan(&self) -> bool {
        !self.added.is_empty() || !self.changed.is_empty() || self.file_added
    }

    /// Status of a post-update record: added, then changed, then implicit
    /// addition for new tables.
    pub fn classify(&self, id: Option<&RecordKey>) -> Option<ChangeStatus> {
        match id {
            Some(id) if self.added.contains(id) => Some(ChangeStatus::Added),
            Some(id) if self.changed.contains(id) => Some(ChangeStatus::Changed),
            _ if self.file_added => Some(ChangeStatus::Added),
            _ => None,
        }
    }
}

fn id_set(value: &Value, field: &str) -> Result<BTreeSet<RecordKey>, AppError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::Array(ids)) => Ok(ids.iter().filter_map(RecordKey::from_value).collect()),
        Some(other) => Err(AppError::ManifestFormat(format!(
            "`{}` must be an array, got {}",
            field, other
        ))),
    }
}

/// One resolved change, as written to and read from a change-log file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub source_table: String,
    pub id: Option<String>,
    pub status: ChangeStatus,
    pub name: Option<String>,
    pub payload: Map<String, Value>,
}

impl ChangeLogEntry {
    /// Placeholder for a record that no longer exists in any snapshot. The
    /// tags precede `name` in its line.
    pub fn removed(table: &str, id: &RecordKey) -> Self {
        let mut payload = Map::new();
        payload.insert("_key".into(), json!(id));
        payload.insert(SOURCE_TABLE_FIELD.into(), Value::String(table.to_string()));
        payload.insert(
            STATUS_FIELD.into(),
            Value::String(ChangeStatus::Removed.as_str().into()),
        );
        payload.insert(NAME_FIELD.into(), json!({"en": "(Item Removed)", "zh": "(条目已删除)"}));

        Self {
            source_table: table.to_string(),
            id: Some(id.to_string()),
            status: ChangeStatus::Removed,
            name: Some("(条目已删除)".to_string()),
            payload,
        }
    }

    /// Entry carrying a post-update record.
    pub fn from_record(table: &str, status: ChangeStatus, record: Record) -> Self {
        Self {
            source_table: table.to_string(),
            id: record.id.as_ref().map(ToString::to_string),
            status,
            name: record.name.display().map(str::to_string),
            payload: record.payload,
        }
    }

    /// Serialize as one change-log line: the payload tagged with its source
    /// table and status. Tags already in the payload keep their position.
    pub fn to_line(&self) -> Result<String, AppError> {
        let mut tagged = self.payload.clone();
        tagged.insert(SOURCE_TABLE_FIELD.into(), Value::String(self.source_table.clone()));
        tagged.insert(STATUS_FIELD.into(), Value::String(self.status.as_str().into()));
        Ok(serde_json::to_string(&tagged)?)
    }

    /// Read back one change-log line. Lines without a status are treated as
    /// `changed`.
    pub fn from_line(line: &str) -> Result<Self, AppError> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(payload) = value else {
            return Err(AppError::RecordParse("change-log line is not a JSON object".into()));
        };

        let source_table = payload
            .get(SOURCE_TABLE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let status = payload
            .get(STATUS_FIELD)
            .and_then(Value::as_str)
            .and_then(ChangeStatus::parse)
            .unwrap_or(ChangeStatus::Changed);
        let id = RecordKey::resolve(&payload).map(|id| id.to_string());
        let name = match payload.get(NAME_FIELD) {
            Some(Value::Object(map)) => ["zh", "en"]
                .iter()
                .filter_map(|locale| map.get(*locale).and_then(Value::as_str))
                .find(|text| !text.is_empty())
                .map(str::to_string)
                .or_else(|| Some(Value::Object(map.clone()).to_string())),
            Some(Value::String(text)) => Some(text.clone()),
            _ => None,
        };

        Ok(Self {
            source_table,
            id,
            status,
            name,
            payload,
        })
    }
}

/// Number of change-log entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
}

impl ChangeCounts {
    pub fn record(&mut self, status: ChangeStatus) {
        match status {
            ChangeStatus::Added => self.added += 1,
            ChangeStatus::Changed => self.changed += 1,
            ChangeStatus::Removed => self.removed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.added + self.changed + self.removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: Value) -> ChangeManifestEntry {
        ChangeManifestEntry::from_value(&value).unwrap()
    }

    #[test]
    fn test_classify_priority() {
        let e = entry(json!({"_key": "types", "added": [1, 2], "changed": [2, 3], "removed": [4]}));

        assert_eq!(e.classify(Some(&RecordKey::Int(1))), Some(ChangeStatus::Added));
        assert_eq!(e.classify(Some(&RecordKey::Int(2))), Some(ChangeStatus::Added));
        assert_eq!(e.classify(Some(&RecordKey::Int(3))), Some(ChangeStatus::Changed));
        assert_eq!(e.classify(Some(&RecordKey::Int(5))), None);
        assert_eq!(e.classify(None), None);
        assert!(e.needs_scan());
    }

    #[test]
    fn test_file_added_marks_everything() {
        let e = entry(json!({"_key": "freelanceJobSchemas", "fileAdded": true}));

        assert!(!e.is_empty());
        assert!(e.needs_scan());
        assert_eq!(e.classify(Some(&RecordKey::Int(99))), Some(ChangeStatus::Added));
        assert_eq!(e.classify(None), Some(ChangeStatus::Added));
    }

    #[test]
    fn test_empty_and_removed_only_entries() {
        assert!(entry(json!({"_key": "types", "added": [], "changed": []})).is_empty());

        let removed_only = entry(json!({"_key": "types", "removed": ["x"]}));
        assert!(!removed_only.is_empty());
        assert!(!removed_only.needs_scan());
    }

    #[test]
    fn test_malformed_entries() {
        assert!(ChangeManifestEntry::from_value(&json!({"added": [1]})).is_err());
        assert!(ChangeManifestEntry::from_value(&json!({"_key": "types", "added": 1})).is_err());
    }

    #[test]
    fn test_removed_placeholder_line() {
        let line = ChangeLogEntry::removed("types", &RecordKey::Int(42)).to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["_key"], 42);
        assert_eq!(value["_source_table"], "types");
        assert_eq!(value["_status"], "removed");
        assert_eq!(value["name"]["en"], "(Item Removed)");
        assert_eq!(
            line,
            r#"{"_key":42,"_source_table":"types","_status":"removed","name":{"en":"(Item Removed)","zh":"(条目已删除)"}}"#
        );
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(ChangeStatus::parse("added"), Some(ChangeStatus::Added));
        assert_eq!(ChangeStatus::parse("removed"), Some(ChangeStatus::Removed));
        assert_eq!(ChangeStatus::parse("Added"), None);
    }

    #[test]
    fn test_read_back_line() {
        let record = Record::parse(r#"{"_key": 34, "name": {"en": "Tritanium", "zh": "三钛合金"}}"#).unwrap();
        let line = ChangeLogEntry::from_record("types", ChangeStatus::Changed, record)
            .to_line()
            .unwrap();
        assert!(line.starts_with(r#"{"_key":34,"name":"#));

        let parsed = ChangeLogEntry::from_line(&line).unwrap();
        assert_eq!(parsed.source_table, "types");
        assert_eq!(parsed.status, ChangeStatus::Changed);
        assert_eq!(parsed.id.as_deref(), Some("34"));
        assert_eq!(parsed.name.as_deref(), Some("三钛合金"));

        let legacy = ChangeLogEntry::from_line(r#"{"id": "x"}"#).unwrap();
        assert_eq!(legacy.status, ChangeStatus::Changed);
        assert_eq!(legacy.source_table, "Unknown");
    }
}
