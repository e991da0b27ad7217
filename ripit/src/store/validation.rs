//! Schema validation of persisted queue entries.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::MediaFileData;

/// A persisted entry that failed validation, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidRecord {
    /// Position in the stored array, `-1` when the root itself is unusable.
    pub index: i64,
    pub error: String,
    pub raw_record: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validated {
    pub valid: Vec<MediaFileData>,
    pub invalid: Vec<InvalidRecord>,
}

/// Partition `data` into typed copies of the valid entries and the invalid ones.
///
/// A repeated id is invalid on every occurrence after the first.
pub fn validated_clone(data: &Value) -> Validated {
    let Some(items) = data.as_array() else {
        return Validated {
            valid: Vec::new(),
            invalid: vec![InvalidRecord {
                index: -1,
                error: "Root value is not an array".to_string(),
                raw_record: data.clone(),
            }],
        };
    };

    let mut out = Validated::default();
    let mut seen = HashSet::new();

    for (index, entry) in items.iter().enumerate() {
        let invalid = |error: String| InvalidRecord {
            index: index as i64,
            error,
            raw_record: entry.clone(),
        };

        match MediaFileData::deserialize(entry) {
            Ok(file) if seen.contains(&file.id) => {
                out.invalid.push(invalid(format!("id: duplicate id {}", file.id)));
            }
            Ok(file) => {
                seen.insert(file.id.clone());
                out.valid.push(file);
            }
            Err(e) => out.invalid.push(invalid(e.to_string())),
        }
    }

    out
}
