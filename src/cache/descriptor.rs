//! The persisted per-task record

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::types::{ChecksumAlgorithm, Headers, Status, Validation};

/// One task as stored in the descriptor file
///
/// Dates are epoch seconds (0 when unset). The resume token is stored as
/// base64 text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    /// Canonical URL
    pub url: String,
    /// URL after redirects
    pub current_url: String,
    /// File name within the finished-files directory
    pub file_name: String,
    /// Request headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Last start time
    #[serde(default)]
    pub start_date: f64,
    /// Terminal transition time
    #[serde(default)]
    pub end_date: f64,
    /// Expected total bytes
    #[serde(default)]
    pub total_bytes: u64,
    /// Bytes received
    #[serde(default)]
    pub completed_bytes: u64,
    /// Task status
    #[serde(default)]
    pub status: Status,
    /// Expected digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
    /// Digest algorithm ordinal
    #[serde(default)]
    pub verification_type: ChecksumAlgorithm,
    /// Validation outcome ordinal
    #[serde(default)]
    pub validation: Validation,
    /// Opaque resume token
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub resume_token: Option<Vec<u8>>,
    /// Last error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskDescriptor {
    /// A fresh descriptor for `url` stored as `file_name`
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            current_url: url.clone(),
            url,
            file_name: file_name.into(),
            headers: None,
            start_date: 0.0,
            end_date: 0.0,
            total_bytes: 0,
            completed_bytes: 0,
            status: Status::Waiting,
            verification_code: None,
            verification_type: ChecksumAlgorithm::default(),
            validation: Validation::default(),
            resume_token: None,
            error: None,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
