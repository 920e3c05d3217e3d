//! hb-flatten - Path-table flattening of behavioral interaction telemetry
//!
//! Sign-in forms report mouse, keyboard and button interaction metrics as a
//! nested JSON payload. This crate turns such payloads into single-level
//! records for downstream scoring, driven by a table that maps each flat
//! field name to a nested path, and can rebuild the nested form from a flat
//! record.
//!
//! ## Modules
//!
//! - **Path tables**: flat key to nested path mapping, with the default table
//! - **Schema**: typed payload model and the declared shape used in strict mode
//! - **Flattener**: the `flatten` / `unflatten` pair
//! - **Pipeline**: JSON string entry points and a batch processor

pub mod config;
pub mod error;
pub mod flattener;
pub mod path;
pub mod pipeline;
pub mod schema;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::FlattenerConfig;
pub use error::FlattenError;
pub use flattener::{flatten, unflatten, FlatRecord, FlatValue, PathMappedFlattener};
pub use path::{FieldPath, PathTable, DEFAULT_FIELD_MAPPING};
pub use pipeline::{flatten_json, ndjson_records, unflatten_json, FlattenProcessor, FlattenStats};
pub use schema::{input_schema, InputData};

/// Crate version
pub const FLATTEN_VERSION: &str = env!("CARGO_PKG_VERSION");
