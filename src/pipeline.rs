//! Flattening pipeline orchestration
//!
//! This module provides the public string-in/string-out API. It parses the
//! payload JSON, flattens it against a path table and encodes the flat record
//! back to JSON.

use crate::error::FlattenError;
use crate::flattener::{FlatRecord, PathMappedFlattener};
use crate::path::PathTable;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Flatten a payload JSON string with the default table (stateless, one-shot).
///
/// # Arguments
/// * `input_json` - Nested interaction payload
/// * `validate` - Enforce the declared input schema
///
/// # Returns
/// Flat record JSON; absent fields are omitted
///
/// # Example
/// ```ignore
/// let flat_json = flatten_json(r#"{"user_id": "u-1"}"#, false)?;
/// ```
pub fn flatten_json(input_json: &str, validate: bool) -> Result<String, FlattenError> {
    let record: Value = serde_json::from_str(input_json)?;
    let flat = PathMappedFlattener::default().flatten(&record, validate)?;
    Ok(serde_json::to_string(&flat)?)
}

/// Rebuild a nested payload from a flat record JSON string using the default table.
pub fn unflatten_json(flat_json: &str) -> Result<String, FlattenError> {
    let value: Value = serde_json::from_str(flat_json)?;
    let table = PathTable::default_mapping();
    let flat = FlatRecord::from_json_value(&value, &table)?;
    let nested = crate::flattener::unflatten(&flat, &table)?;
    Ok(serde_json::to_string(&nested)?)
}

/// Parse newline-delimited JSON lazily, one value per non-blank line.
///
/// Parse errors carry the 1-based line number.
pub fn ndjson_records(ndjson: &str) -> impl Iterator<Item = Result<Value, FlattenError>> + '_ {
    ndjson
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_num, line)| {
            serde_json::from_str::<Value>(line.trim()).map_err(|e| {
                FlattenError::Parse(format!("Failed to parse line {}: {}", line_num + 1, e))
            })
        })
}

/// Running counters across processed records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlattenStats {
    /// Records flattened successfully
    pub records_processed: u64,
    /// Per flat key, how many records had no value at its path
    pub absent_fields: BTreeMap<String, u64>,
}

impl FlattenStats {
    fn record(&mut self, flat: &FlatRecord) {
        self.records_processed += 1;
        for key in flat.absent_keys() {
            *self.absent_fields.entry(key.to_string()).or_insert(0) += 1;
        }
    }
}

/// Stateful processor for batches of payloads sharing one table and mode.
pub struct FlattenProcessor {
    flattener: PathMappedFlattener,
    validate: bool,
    stats: FlattenStats,
}

impl Default for FlattenProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FlattenProcessor {
    /// Create a lenient processor with the default table
    pub fn new() -> Self {
        Self::with_table(PathTable::default_mapping(), false)
    }

    /// Create a processor with a specific table and validation mode
    pub fn with_table(table: PathTable, validate: bool) -> Self {
        Self {
            flattener: PathMappedFlattener::new(table),
            validate,
            stats: FlattenStats::default(),
        }
    }

    pub fn flattener(&self) -> &PathMappedFlattener {
        &self.flattener
    }

    /// Flatten an already-decoded payload
    pub fn process_value(&mut self, record: &Value) -> Result<FlatRecord, FlattenError> {
        let flat = self.flattener.flatten(record, self.validate)?;
        self.stats.record(&flat);
        Ok(flat)
    }

    /// Flatten one payload JSON string and return the flat record JSON
    pub fn process(&mut self, input_json: &str) -> Result<String, FlattenError> {
        let record: Value = serde_json::from_str(input_json)?;
        let flat = self.process_value(&record)?;
        Ok(serde_json::to_string(&flat)?)
    }

    /// Flatten newline-delimited payloads, one flat record JSON per input line.
    ///
    /// Blank lines are skipped. Stops at the first failing line.
    pub fn process_ndjson(&mut self, ndjson: &str) -> Result<Vec<String>, FlattenError> {
        let mut outputs = Vec::new();
        for record in ndjson_records(ndjson) {
            let flat = self.process_value(&record?)?;
            outputs.push(serde_json::to_string(&flat)?);
        }
        debug!(records = outputs.len(), "processed ndjson batch");
        Ok(outputs)
    }

    pub fn stats(&self) -> &FlattenStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = FlattenStats::default();
    }
}
