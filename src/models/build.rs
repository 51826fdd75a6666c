//! Dataset build descriptor.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;

/// One published revision of the dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(rename = "_key")]
    pub key: String,
    pub build_number: i64,
    /// Release timestamp exactly as published (RFC 3339).
    pub release_date: String,
}

impl Build {
    /// Parse a build descriptor, requiring `_key`, `buildNumber` and `releaseDate`.
    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        let key = value
            .get("_key")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ManifestFormat("missing or non-string `_key`".into()))?;

        let build_number = value
            .get("buildNumber")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                AppError::ManifestFormat("missing or non-integer `buildNumber`".into())
            })?;

        let release_date = value
            .get("releaseDate")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ManifestFormat("missing or non-string `releaseDate`".into()))?;

        DateTime::parse_from_rfc3339(release_date).map_err(|e| {
            AppError::ManifestFormat(format!("malformed `releaseDate` {:?}: {}", release_date, e))
        })?;

        Ok(Self {
            key: key.to_string(),
            build_number,
            release_date: release_date.to_string(),
        })
    }

    /// Parse the first line of a line-delimited descriptor.
    pub fn from_jsonl(body: &str) -> Result<Self, AppError> {
        let line = body
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| AppError::ManifestFormat("empty build descriptor".into()))?;

        let value: Value = serde_json::from_str(line)
            .map_err(|e| AppError::ManifestFormat(format!("invalid JSON: {}", e)))?;
        Self::from_value(&value)
    }

    /// Release date with every character other than letters, digits and `-`
    /// replaced by `-`, usable as a file name component.
    pub fn safe_release_date(&self) -> String {
        self.release_date
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_latest_descriptor() {
        let build = Build::from_jsonl(
            "{\"_key\":\"sde\",\"buildNumber\":3031812,\"releaseDate\":\"2025-10-07T11:05:12Z\"}\n",
        )
        .unwrap();

        assert_eq!(build.key, "sde");
        assert_eq!(build.build_number, 3031812);
        assert_eq!(build.safe_release_date(), "2025-10-07T11-05-12Z");
    }

    #[test]
    fn test_missing_fields_are_format_errors() {
        let missing = Build::from_value(&json!({"_key": "sde", "releaseDate": "2025-10-07T11:05:12Z"}));
        assert!(matches!(missing, Err(AppError::ManifestFormat(_))));

        let malformed = Build::from_value(
            &json!({"_key": "sde", "buildNumber": "3031812", "releaseDate": "2025-10-07T11:05:12Z"}),
        );
        assert!(matches!(malformed, Err(AppError::ManifestFormat(_))));

        let bad_date =
            Build::from_value(&json!({"_key": "sde", "buildNumber": 1, "releaseDate": "yesterday"}));
        assert!(matches!(bad_date, Err(AppError::ManifestFormat(_))));

        assert!(matches!(Build::from_jsonl("\n\n"), Err(AppError::ManifestFormat(_))));
    }
}
