//! Search results and index rows.

use serde::Serialize;

use super::record::{LocalizedName, Record};

/// One indexable record as stored in the index store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub id: String,
    pub source_table: String,
    pub name_zh: String,
    pub name_en: String,
    pub search_text: String,
    pub json_data: String,
}

impl IndexRow {
    /// Build the row for a parsed record; records without an id are not indexed.
    pub fn from_record(table: &str, record: &Record, raw_line: &str) -> Option<Self> {
        let id = record.id.as_ref()?.to_string();
        let search_text = normalized_search_text(&id, &record.name);

        Some(Self {
            id,
            source_table: table.to_string(),
            name_zh: record.name.zh.clone(),
            name_en: record.name.en.clone(),
            search_text,
            json_data: raw_line.trim().to_string(),
        })
    }
}

/// `lowercase(id + " " + zh + " " + en)`
pub fn normalized_search_text(id: &str, name: &LocalizedName) -> String {
    format!("{} {} {}", id, name.zh, name.en).to_lowercase()
}

/// Which store answered a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchPath {
    Indexed,
    Fallback,
}

/// One matching record, streamed to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub source_table: String,
    pub id: Option<String>,
    pub name_zh: String,
    pub name_en: String,
    /// The record line exactly as stored in the snapshot.
    pub payload: String,
}

impl SearchHit {
    /// Hit for a record read straight from a table file.
    pub fn from_record(table: &str, record: &Record, raw_line: &str) -> Self {
        Self {
            source_table: table.to_string(),
            id: record.id.as_ref().map(|id| id.to_string()),
            name_zh: record.name.zh.clone(),
            name_en: record.name.en.clone(),
            payload: raw_line.trim().to_string(),
        }
    }
}

/// Summary of a finished or cancelled search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub path: SearchPath,
    /// Hits emitted, never more than the limit
    pub returned: usize,
    /// All matches seen; partial when cancelled
    pub total: usize,
    pub cancelled: bool,
}

impl SearchOutcome {
    pub fn empty(path: SearchPath) -> Self {
        Self {
            path,
            returned: 0,
            total: 0,
            cancelled: false,
        }
    }
}
