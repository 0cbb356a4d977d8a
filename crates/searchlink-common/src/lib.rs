//! Searchlink Common Library
//!
//! Shared types, logging, and error handling for the searchlink workspace.
//!
//! # Overview
//!
//! This crate provides the pieces used by every searchlink component:
//!
//! - **Error Handling**: shared error and result types
//! - **Logging**: tracing subscriber setup driven by environment variables
//! - **Types**: the binding/export-event domain model and the wire timestamp
//!   format
//!
//! # Example
//!
//! ```no_run
//! use searchlink_common::types::{parse_wire_timestamp, ExportEvent, Operation};
//! use uuid::Uuid;
//!
//! let event = ExportEvent {
//!     operation: Operation::Create,
//!     binding_id: Uuid::new_v4(),
//!     timestamp: parse_wire_timestamp("2020-01-01T00:00:00.000000").unwrap(),
//!     payload: Some(serde_json::json!({"a": 1})),
//! };
//! assert_eq!(event.operation, Operation::Create);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
