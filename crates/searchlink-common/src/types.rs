//! Domain types for the export pipeline
//!
//! A [`Binding`] links a source-of-record row to the search-index document
//! that mirrors it. An [`ExportEvent`] is the ephemeral unit of work handed
//! to the exporter by the job system; it is never persisted here.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CommonError;

/// Wire format for event and sync timestamps.
///
/// Microsecond resolution is required to disambiguate rapid successive
/// updates to the same record; the format carries no timezone and is
/// interpreted as UTC.
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Parse a wire timestamp into a UTC datetime.
pub fn parse_wire_timestamp(value: &str) -> Result<DateTime<Utc>, CommonError> {
    NaiveDateTime::parse_from_str(value, WIRE_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| CommonError::Timestamp {
            value: value.to_string(),
            source,
        })
}

/// Format a UTC datetime in the wire format.
pub fn format_wire_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(WIRE_TIMESTAMP_FORMAT).to_string()
}

/// Truncate a datetime to the microsecond precision of the wire format.
///
/// Timestamps entering the pipeline are truncated once at the boundary so
/// that freshness comparisons never depend on sub-microsecond digits the
/// store cannot hold.
pub fn truncate_to_micros(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(timestamp.timestamp_micros()).unwrap_or(timestamp)
}

/// Kind of mutation to propagate to the search index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A record mutation to be applied to the search index.
///
/// Created by the job system, consumed exactly once by the exporter
/// (modulo retries). `payload` is `None` for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEvent {
    pub operation: Operation,
    pub binding_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Row linking a source-of-record entity to its mirrored index document.
///
/// `last_sync` is the timestamp of the last event successfully applied to
/// the index for this binding. It is non-decreasing under correct operation:
/// any write attempt carrying an older event timestamp is a logged no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    /// Identifier shared with the source-of-record row this binding mirrors
    pub id: Uuid,
    /// Target index in the search backend
    pub index: String,
    /// Target document collection within the index
    pub doc_type: String,
    /// Timestamp of the last applied event, unset until the first export
    pub last_sync: Option<DateTime<Utc>>,
    /// Hosts of the search backend this binding exports to, resolved from
    /// the externally owned backend configuration
    pub hosts: Vec<String>,
}
