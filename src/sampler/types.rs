//! Activity record types shipped to the collection server.
//!
//! Field names on the wire are camelCase and fixed by the server contract.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Classification constants attached to every record.
pub const CATEGORY: &str = "SYSTEM";
pub const ACTIVITY_TYPE: &str = "PROCESS_MONITORING";
pub const WORKSPACE_TYPE: &str = "LOCAL";
pub const APPLICATION_CATEGORY: &str = "SYSTEM";
pub const IS_PRODUCTIVE_APP: bool = true;

/// A running process as reported by a [`ProcessSource`](super::ProcessSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Title of the process' main visible window, if it has one
    pub window_title: Option<String>,
    /// Executable path, `None` when it could not be read
    pub path: Option<PathBuf>,
}

impl ProcessInfo {
    /// The window title exactly as reported, if present and not blank.
    pub fn visible_title(&self) -> Option<&str> {
        self.window_title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
    }
}

/// One sampled process, as delivered to `/api/logs/batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub user_id: u64,
    pub process_name: String,
    pub window_title: String,
    pub process_id: String,
    pub application_path: String,
    #[serde(with = "local_timestamp")]
    pub start_time: NaiveDateTime,
    #[serde(with = "local_timestamp")]
    pub end_time: NaiveDateTime,
    pub duration_seconds: u64,
    pub category: String,
    pub is_productive_app: bool,
    pub activity_type: String,
    pub description: String,
    pub workspace_type: String,
    pub application_category: String,
}

impl ActivityRecord {
    /// Build a record for `process`, or `None` if it has no visible window title.
    pub fn from_process(
        user_id: u64,
        process: &ProcessInfo,
        now: NaiveDateTime,
        window: Duration,
    ) -> Option<Self> {
        let window_title = process.visible_title()?.to_string();
        let window_secs = window.as_secs();

        Some(Self {
            user_id,
            process_name: process.name.clone(),
            window_title,
            process_id: process.pid.to_string(),
            application_path: process
                .path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            start_time: now,
            end_time: now + chrono::Duration::seconds(window_secs as i64),
            duration_seconds: window_secs,
            category: CATEGORY.to_string(),
            is_productive_app: IS_PRODUCTIVE_APP,
            activity_type: ACTIVITY_TYPE.to_string(),
            description: format!("Process: {}", process.name),
            workspace_type: WORKSPACE_TYPE.to_string(),
            application_category: APPLICATION_CATEGORY.to_string(),
        })
    }
}

/// Local wall-clock timestamps without offset, e.g. `2024-05-01T09:30:00`.
pub mod local_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}
