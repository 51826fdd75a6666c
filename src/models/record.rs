//! Snapshot records and their identifying fields.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::AppError;

/// Fields probed for a record id, highest priority first.
pub const ID_FIELDS: [&str; 3] = ["_key", "id", "typeID"];

/// Field holding the localized display name.
pub const NAME_FIELD: &str = "name";

/// Table-unique record identifier, kept in its JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    /// Interpret a JSON value as an id. Null, empty strings and
    /// non-scalar values are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(
                n.as_i64()
                    .map(RecordKey::Int)
                    .unwrap_or_else(|| RecordKey::Text(n.to_string())),
            ),
            Value::String(s) if !s.is_empty() => Some(RecordKey::Text(s.clone())),
            _ => None,
        }
    }

    /// Resolve the id of a record object using [`ID_FIELDS`] priority.
    pub fn resolve(object: &Map<String, Value>) -> Option<Self> {
        ID_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(RecordKey::from_value))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(n) => write!(f, "{}", n),
            RecordKey::Text(s) => f.write_str(s),
        }
    }
}

/// Shape of the `name` field as published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalizedText {
    Plain(String),
    ByLocale(BTreeMap<String, String>),
}

impl LocalizedText {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(LocalizedText::Plain(s.clone())),
            Value::Object(map) => Some(LocalizedText::ByLocale(
                map.iter()
                    .filter_map(|(locale, text)| {
                        text.as_str().map(|t| (locale.clone(), t.to_string()))
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    /// Collapse into the `{zh, en}` pair used for display and search.
    pub fn resolve(&self) -> LocalizedName {
        match self {
            LocalizedText::Plain(text) => LocalizedName {
                zh: text.clone(),
                en: text.clone(),
            },
            LocalizedText::ByLocale(map) => LocalizedName {
                zh: map.get("zh").cloned().unwrap_or_default(),
                en: map.get("en").cloned().unwrap_or_default(),
            },
        }
    }
}

/// Resolved Chinese and English names; empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalizedName {
    pub zh: String,
    pub en: String,
}

impl LocalizedName {
    /// Preferred display name: `zh`, then `en`.
    pub fn display(&self) -> Option<&str> {
        [self.zh.as_str(), self.en.as_str()]
            .into_iter()
            .find(|name| !name.is_empty())
    }
}

/// One parsed line of a table file.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: Option<RecordKey>,
    pub name: LocalizedName,
    pub payload: Map<String, Value>,
}

impl Record {
    /// Parse one line. Anything but a JSON object is a [`AppError::RecordParse`].
    pub fn parse(line: &str) -> Result<Self, AppError> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(payload) = value else {
            return Err(AppError::RecordParse("record is not a JSON object".into()));
        };

        let id = RecordKey::resolve(&payload);
        let name = payload
            .get(NAME_FIELD)
            .and_then(LocalizedText::from_value)
            .map(|text| text.resolve())
            .unwrap_or_default();

        Ok(Self { id, name, payload })
    }
}

/// True for lines that carry no record at all.
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}
