//! The cached build record and its status vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cache-key prefix for build records.
pub const FLOW_DATA_PREFIX: &str = "flow_data_";

/// Hash field holding the serialized graph description.
pub const GRAPH_DATA_FIELD: &str = "graph_data";

/// Hash field holding the build status.
pub const STATUS_FIELD: &str = "status";

/// Cache key for a flow's build record.
#[must_use]
pub fn flow_data_key(flow_id: &str) -> String {
    format!("{FLOW_DATA_PREFIX}{flow_id}")
}

/// Compilation status of a flow's build record.
///
/// `Success`/`Failure` are re-enterable: a new submission for the same flow
/// id overwrites the record back at `Started`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Started,
    InProgress,
    Success,
    Failure,
}

impl BuildStatus {
    /// Wire form stored in the cache hash.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Started => "STARTED",
            BuildStatus::InProgress => "IN_PROGRESS",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
        }
    }

    /// Parse the wire form; `None` for anything unrecognized.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "STARTED" => Some(BuildStatus::Started),
            "IN_PROGRESS" => Some(BuildStatus::InProgress),
            "SUCCESS" => Some(BuildStatus::Success),
            "FAILURE" => Some(BuildStatus::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `{graph_data, status}` pair tracking one flow's compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildRecord {
    /// Serialized graph description, opaque beyond being compiler input.
    pub graph_data: String,
    pub status: BuildStatus,
}
