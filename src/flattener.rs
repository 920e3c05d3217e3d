//! Path-mapped flattening
//!
//! `flatten` walks every path of a `PathTable` through a nested record and
//! collects the leaves into a single-level `FlatRecord`. `unflatten` writes a
//! flat record back into nested form, merging shared path prefixes into one
//! subtree. Both are pure: records are taken by reference and leaves are
//! deep-copied.

use crate::error::FlattenError;
use crate::path::{FieldPath, PathTable};
use crate::schema::{input_schema, InputData, ShapeMismatch};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Value of one flat field
#[derive(Debug, Clone, PartialEq)]
pub enum FlatValue {
    /// The path resolved to this value (which may itself be `null`)
    Present(Value),
    /// The path did not exist in the source record
    Absent,
}

impl FlatValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FlatValue::Absent)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FlatValue::Present(v) => Some(v),
            FlatValue::Absent => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            FlatValue::Present(v) => Some(v),
            FlatValue::Absent => None,
        }
    }
}

/// Single-level record keyed by the flat names of a `PathTable`
///
/// Serializes as a JSON object ordered by flat key with absent fields left
/// out; `from_json_value` restores them against the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRecord {
    fields: BTreeMap<String, FlatValue>,
}

impl FlatRecord {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, flat_key: &str) -> Option<&FlatValue> {
        self.fields.get(flat_key)
    }

    pub fn insert(&mut self, flat_key: impl Into<String>, value: FlatValue) {
        self.fields.insert(flat_key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlatValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Flat keys whose path was not found
    pub fn absent_keys(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, v)| v.is_absent())
            .map(|(k, _)| k.as_str())
    }

    /// Rebuild a flat record from its JSON object form
    ///
    /// Every table key missing from the object becomes `Absent`; object keys
    /// the table does not know are ignored.
    pub fn from_json_value(value: &Value, table: &PathTable) -> Result<Self, FlattenError> {
        let object = value.as_object().ok_or_else(|| {
            FlattenError::Parse(format!(
                "flat record must be a JSON object, got {}",
                crate::schema::ValueKind::of(value)
            ))
        })?;

        let fields = table
            .keys()
            .map(|key| {
                let v = match object.get(key) {
                    Some(v) => FlatValue::Present(v.clone()),
                    None => FlatValue::Absent,
                };
                (key.to_string(), v)
            })
            .collect();

        Ok(Self { fields })
    }

    /// JSON object form (absent fields omitted)
    pub fn to_json_value(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|(k, v)| v.as_value().map(|v| (k.clone(), v.clone())))
            .collect();
        Value::Object(map)
    }
}

impl Serialize for FlatRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let present = self.fields.values().filter(|v| !v.is_absent()).count();
        let mut map = serializer.serialize_map(Some(present))?;
        for (key, value) in &self.fields {
            if let FlatValue::Present(v) = value {
                map.serialize_entry(key, v)?;
            }
        }
        map.end()
    }
}

/// Flattener bound to a fixed path table
///
/// Cheap to clone; the table is shared read-only between clones and threads.
#[derive(Debug, Clone)]
pub struct PathMappedFlattener {
    table: Arc<PathTable>,
}

impl Default for PathMappedFlattener {
    fn default() -> Self {
        Self::new(PathTable::default_mapping())
    }
}

impl PathMappedFlattener {
    pub fn new(table: PathTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    pub fn with_shared_table(table: Arc<PathTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PathTable {
        &self.table
    }

    pub fn flatten(&self, record: &Value, validate: bool) -> Result<FlatRecord, FlattenError> {
        flatten(record, &self.table, validate)
    }

    pub fn unflatten(&self, flat: &FlatRecord) -> Result<Value, FlattenError> {
        unflatten(flat, &self.table)
    }
}

/// Flatten `record` into one field per table entry.
///
/// With `validate` off, any path that cannot be walked (missing key, or a
/// non-object node on the way) yields `FlatValue::Absent` and the call never
/// fails. With `validate` on, the record must match the declared input schema
/// and every table path must resolve after default sections are filled in;
/// otherwise `FlattenError::SchemaValidation` is returned.
pub fn flatten(
    record: &Value,
    table: &PathTable,
    validate: bool,
) -> Result<FlatRecord, FlattenError> {
    if validate {
        flatten_strict(record, table)
    } else {
        Ok(flatten_lenient(record, table))
    }
}

fn flatten_lenient(record: &Value, table: &PathTable) -> FlatRecord {
    let mut fields = BTreeMap::new();
    for (key, path) in table.iter() {
        let value = match resolve(record, path) {
            Some(v) => {
                trace!(flat_key = key, path = %path, "resolved");
                FlatValue::Present(v.clone())
            }
            None => {
                debug!(flat_key = key, path = %path, "path not found, recording absent");
                FlatValue::Absent
            }
        };
        fields.insert(key.to_string(), value);
    }
    FlatRecord { fields }
}

fn flatten_strict(record: &Value, table: &PathTable) -> Result<FlatRecord, FlattenError> {
    if let Err(mismatch) = input_schema().check(record) {
        let err = schema_error(&mismatch, table);
        debug!(error = %err, "record rejected by schema");
        return Err(err);
    }

    let normalized = InputData::normalize(record).map_err(|e| FlattenError::SchemaValidation {
        field: "input_data".to_string(),
        path: "$".to_string(),
        expected: "InputData".to_string(),
        actual: e.to_string(),
    })?;

    let mut fields = BTreeMap::new();
    for (key, path) in table.iter() {
        let Some(value) = resolve(&normalized, path) else {
            debug!(flat_key = key, path = %path, "path not found in strict mode");
            return Err(FlattenError::SchemaValidation {
                field: key.to_string(),
                path: path.to_string(),
                expected: "present".to_string(),
                actual: "absent".to_string(),
            });
        };
        trace!(flat_key = key, path = %path, "resolved");
        fields.insert(key.to_string(), FlatValue::Present(value.clone()));
    }
    Ok(FlatRecord { fields })
}

fn schema_error(mismatch: &ShapeMismatch, table: &PathTable) -> FlattenError {
    let location = mismatch.location();
    let field = table
        .key_covering(&mismatch.key_segments())
        .map(str::to_string)
        .unwrap_or_else(|| location.clone());

    FlattenError::SchemaValidation {
        field,
        path: location,
        expected: mismatch.expected.clone(),
        actual: mismatch.actual.clone(),
    }
}

/// Walk `path` from the root; `None` if a node is not an object or a key is missing
fn resolve<'a>(record: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(record, |node, segment| node.as_object()?.get(segment))
}

/// Rebuild a nested record from `flat`.
///
/// Only table entries present in `flat` with a non-absent value are written.
/// Fails with `FlattenError::PathConflict` when one written path is a prefix
/// of, or equal to, another, since the shared node would have to be both a
/// leaf and an object.
pub fn unflatten(flat: &FlatRecord, table: &PathTable) -> Result<Value, FlattenError> {
    let mut written: Vec<(&str, &FieldPath, &Value)> = table
        .iter()
        .filter_map(|(key, path)| {
            let value = flat.get(key)?.as_value()?;
            Some((key, path, value))
        })
        .collect();

    // After sorting by path, any prefix relation shows up between neighbours.
    written.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
    for pair in written.windows(2) {
        let (first, first_path, _) = pair[0];
        let (second, second_path, _) = pair[1];
        if first_path.is_prefix_of(second_path) {
            warn!(first, second, path = %first_path, "conflicting table paths");
            return Err(FlattenError::PathConflict {
                first: first.to_string(),
                second: second.to_string(),
                path: first_path.to_string(),
            });
        }
    }

    let mut root = Map::new();
    for (i, (key, path, value)) in written.iter().enumerate() {
        insert_at(&mut root, &written[..i], key, path, (*value).clone())?;
    }
    Ok(Value::Object(root))
}

/// Write `value` at `path`, creating intermediate objects.
///
/// `earlier` holds the entries already written. Once the neighbour check in
/// `unflatten` has passed, no earlier path is a prefix of `path`, so every
/// intermediate node is an object; should one not be, the earlier entry that
/// wrote it is reported.
fn insert_at(
    root: &mut Map<String, Value>,
    earlier: &[(&str, &FieldPath, &Value)],
    key: &str,
    path: &FieldPath,
    value: Value,
) -> Result<(), FlattenError> {
    let Some((leaf, parents)) = path.segments().split_last() else {
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        node = node
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| {
                let (first, first_path) = earlier
                    .iter()
                    .find(|(_, p, _)| p.is_prefix_of(path))
                    .map(|(k, p, _)| (k.to_string(), p.to_string()))
                    .unwrap_or_else(|| (key.to_string(), path.to_string()));
                FlattenError::PathConflict {
                    first,
                    second: key.to_string(),
                    path: first_path,
                }
            })?;
    }
    node.insert(leaf.clone(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_record() -> Value {
        json!({
            "project_id": "proj-7",
            "user_id": "user-42",
            "metrics": {
                "mouse": {
                    "movements": [
                        { "x": 10.0, "y": 20.0, "timestamp": "2024-01-15T14:00:00.100Z" },
                        { "x": 12.5, "y": 21.0, "timestamp": "2024-01-15T14:00:00.150Z" }
                    ],
                    "clicks": [{ "x": 300, "y": 410, "button": 0 }],
                    "mouseDowns": [{ "button": 0 }],
                    "mouseUps": [{ "button": 0 }]
                },
                "keyboard": {
                    "keypresses": [{ "key": "a" }],
                    "keydowns": [{ "key": "a" }],
                    "keyups": [{ "key": "a" }],
                    "specificKeyEvents": [{ "key": "Tab" }]
                },
                "signInButton": {
                    "hoverToClickTime": 640.0,
                    "mouseLeaveCount": 1.0
                }
            },
            "additional": { "viewport": "1280x800" }
        })
    }

    fn table(entries: &[(&str, &[&str])]) -> PathTable {
        PathTable::from_static(entries).unwrap()
    }

    #[test]
    fn test_flatten_has_exactly_table_keys() {
        let table = PathTable::default_mapping();
        let flat = flatten(&sample_record(), &table, false).unwrap();

        assert_eq!(flat.len(), table.len());
        assert_eq!(flat.keys().collect::<Vec<_>>(), table.keys().collect::<Vec<_>>());
        assert_eq!(
            flat.get("mouse_clicks"),
            Some(&FlatValue::Present(json!([{ "x": 300, "y": 410, "button": 0 }])))
        );
        assert_eq!(
            flat.get("signInButton_hoverToClickTime"),
            Some(&FlatValue::Present(json!(640.0)))
        );
    }

    #[test]
    fn test_empty_record_is_all_absent() {
        let table = PathTable::default_mapping();
        let flat = flatten(&json!({}), &table, false).unwrap();

        assert_eq!(flat.len(), 12);
        assert_eq!(flat.absent_keys().count(), 12);
        assert_eq!(serde_json::to_string(&flat).unwrap(), "{}");
    }

    #[test]
    fn test_present_null_is_not_absent() {
        let table = PathTable::default_mapping();
        let flat = flatten(&json!({ "user_id": null }), &table, false).unwrap();

        assert_eq!(flat.get("user_id"), Some(&FlatValue::Present(Value::Null)));
        assert_eq!(flat.get("project_id"), Some(&FlatValue::Absent));
    }

    #[test]
    fn test_non_object_intermediate_is_absent() {
        let table = PathTable::default_mapping();
        let record = json!({ "metrics": { "mouse": "disabled", "keyboard": [1, 2] } });
        let flat = flatten(&record, &table, false).unwrap();

        assert!(flat.get("mouse_clicks").unwrap().is_absent());
        assert!(flat.get("keyups").unwrap().is_absent());
    }

    #[test]
    fn test_non_object_root_is_all_absent() {
        let table = PathTable::default_mapping();
        let flat = flatten(&json!("nope"), &table, false).unwrap();
        assert_eq!(flat.absent_keys().count(), table.len());
    }

    #[test]
    fn test_flatten_does_not_alias_source() {
        let table = PathTable::default_mapping();
        let record = sample_record();
        let flat = flatten(&record, &table, false).unwrap();

        let mut movements = flat.get("mouse_movements").unwrap().clone().into_value().unwrap();
        movements[0]["x"] = json!(999.0);

        assert_eq!(record["metrics"]["mouse"]["movements"][0]["x"], 10.0);
    }

    #[test]
    fn test_strict_rejects_mistyped_clicks() {
        let table = PathTable::default_mapping();
        let record = json!({ "metrics": { "mouse": { "clicks": "not-a-list" } } });

        match flatten(&record, &table, true) {
            Err(FlattenError::SchemaValidation {
                field,
                path,
                expected,
                actual,
            }) => {
                assert_eq!(field, "mouse_clicks");
                assert_eq!(path, "metrics.mouse.clicks");
                assert_eq!(expected, "array of object");
                assert_eq!(actual, "string");
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_lenient_keeps_mistyped_leaf() {
        let table = PathTable::default_mapping();
        let record = json!({ "metrics": { "mouse": { "clicks": "not-a-list" } } });
        let flat = flatten(&record, &table, false).unwrap();

        assert_eq!(flat.get("mouse_clicks"), Some(&FlatValue::Present(json!("not-a-list"))));
    }

    #[test]
    fn test_strict_fills_defaults() {
        let table = PathTable::default_mapping();
        let flat = flatten(&json!({ "user_id": "u-1" }), &table, true).unwrap();

        assert_eq!(flat.absent_keys().count(), 0);
        assert_eq!(flat.get("user_id"), Some(&FlatValue::Present(json!("u-1"))));
        assert_eq!(flat.get("project_id"), Some(&FlatValue::Present(Value::Null)));
        assert_eq!(flat.get("keyups"), Some(&FlatValue::Present(json!([]))));
        assert_eq!(
            flat.get("signInButton_mouseLeaveCount"),
            Some(&FlatValue::Present(json!(0.0)))
        );
    }

    #[test]
    fn test_strict_movement_error_names_field() {
        let table = PathTable::default_mapping();
        let record = json!({
            "metrics": { "mouse": { "movements": [{ "x": 1.0, "y": "top", "timestamp": "t" }] } }
        });

        let err = flatten(&record, &table, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Schema validation failed for mouse_movements at metrics.mouse.movements[0].y: \
             expected number, got string"
        );
    }

    #[test]
    fn test_strict_mistyped_section_uses_location() {
        let table = PathTable::default_mapping();

        match flatten(&json!({ "metrics": 5 }), &table, true) {
            Err(FlattenError::SchemaValidation {
                field,
                path,
                expected,
                actual,
            }) => {
                assert_eq!(field, "metrics");
                assert_eq!(path, "metrics");
                assert_eq!(expected, "object");
                assert_eq!(actual, "number");
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }

        match flatten(&json!({ "metrics": { "mouse": "x" } }), &table, true) {
            Err(FlattenError::SchemaValidation { field, path, actual, .. }) => {
                assert_eq!(field, "metrics.mouse");
                assert_eq!(path, "metrics.mouse");
                assert_eq!(actual, "string");
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_mistyped_movement_element_names_field() {
        let table = PathTable::default_mapping();
        let record = json!({ "metrics": { "mouse": { "movements": [7] } } });

        match flatten(&record, &table, true) {
            Err(FlattenError::SchemaValidation { field, path, .. }) => {
                assert_eq!(field, "mouse_movements");
                assert_eq!(path, "metrics.mouse.movements[0]");
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_uncovered_mismatch_uses_location() {
        let table = table(&[("uid", &["user_id"])]);
        let record = json!({ "metrics": { "signInButton": { "mouseLeaveCount": "3" } } });

        match flatten(&record, &table, true) {
            Err(FlattenError::SchemaValidation { field, .. }) => {
                assert_eq!(field, "metrics.signInButton.mouseLeaveCount");
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_custom_path_outside_schema() {
        let table = table(&[("locale", &["additional", "locale"])]);

        let flat = flatten(&json!({ "additional": { "locale": "de" } }), &table, true).unwrap();
        assert_eq!(flat.get("locale"), Some(&FlatValue::Present(json!("de"))));

        match flatten(&json!({}), &table, true) {
            Err(FlattenError::SchemaValidation { field, actual, .. }) => {
                assert_eq!(field, "locale");
                assert_eq!(actual, "absent");
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_reproduces_covered_leaves() {
        let table = PathTable::default_mapping();
        let record = sample_record();

        let flat = flatten(&record, &table, false).unwrap();
        let rebuilt = unflatten(&flat, &table).unwrap();

        for (_, path) in table.iter() {
            assert_eq!(resolve(&rebuilt, path), resolve(&record, path), "path {}", path);
        }
        // Not reachable through the table.
        assert!(rebuilt.get("additional").is_none());
    }

    #[test]
    fn test_round_trip_skips_absent() {
        let table = PathTable::default_mapping();
        let record = json!({ "user_id": "u-9", "metrics": { "keyboard": { "keyups": [] } } });

        let flat = flatten(&record, &table, false).unwrap();
        let rebuilt = unflatten(&flat, &table).unwrap();

        assert_eq!(rebuilt, record);
    }

    #[test]
    fn test_unflatten_merges_shared_prefix() {
        let table = table(&[
            ("mouse_clicks", &["metrics", "mouse", "clicks"]),
            ("mouse_mouseDowns", &["metrics", "mouse", "mouseDowns"]),
        ]);
        let mut flat = FlatRecord::default();
        flat.insert("mouse_mouseDowns", FlatValue::Present(json!([{ "button": 2 }])));
        flat.insert("mouse_clicks", FlatValue::Present(json!([{ "button": 0 }])));

        let nested = unflatten(&flat, &table).unwrap();
        assert_eq!(
            nested,
            json!({
                "metrics": { "mouse": {
                    "clicks": [{ "button": 0 }],
                    "mouseDowns": [{ "button": 2 }]
                } }
            })
        );
    }

    #[test]
    fn test_unflatten_leaf_versus_section_conflict() {
        let table = table(&[
            ("mouse", &["metrics", "mouse"]),
            ("mouse_clicks", &["metrics", "mouse", "clicks"]),
        ]);
        let mut flat = FlatRecord::default();
        flat.insert("mouse", FlatValue::Present(json!(3)));
        flat.insert("mouse_clicks", FlatValue::Present(json!([])));

        match unflatten(&flat, &table) {
            Err(FlattenError::PathConflict {
                first,
                second,
                path,
            }) => {
                assert_eq!(first, "mouse");
                assert_eq!(second, "mouse_clicks");
                assert_eq!(path, "metrics.mouse");
            }
            other => panic!("expected path conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_unflatten_identical_paths_conflict() {
        let table = table(&[("a", &["user_id"]), ("b", &["user_id"])]);
        let mut flat = FlatRecord::default();
        flat.insert("a", FlatValue::Present(json!("x")));
        flat.insert("b", FlatValue::Present(json!("y")));

        assert!(matches!(
            unflatten(&flat, &table),
            Err(FlattenError::PathConflict { .. })
        ));
    }

    #[test]
    fn test_unflatten_conflict_ignored_when_one_side_absent() {
        let table = table(&[
            ("mouse", &["metrics", "mouse"]),
            ("mouse_clicks", &["metrics", "mouse", "clicks"]),
        ]);
        let mut flat = FlatRecord::default();
        flat.insert("mouse", FlatValue::Absent);
        flat.insert("mouse_clicks", FlatValue::Present(json!([])));

        let nested = unflatten(&flat, &table).unwrap();
        assert_eq!(nested, json!({ "metrics": { "mouse": { "clicks": [] } } }));
    }

    #[test]
    fn test_insert_at_names_earlier_writer() {
        let section = FieldPath::parse_dotted("metrics.mouse").unwrap();
        let clicks = FieldPath::parse_dotted("metrics.mouse.clicks").unwrap();
        let three = json!(3);
        let mut root = Map::new();
        insert_at(&mut root, &[], "mouse", &section, three.clone()).unwrap();

        let earlier = [("mouse", &section, &three)];
        match insert_at(&mut root, &earlier, "mouse_clicks", &clicks, json!([])) {
            Err(FlattenError::PathConflict {
                first,
                second,
                path,
            }) => {
                assert_eq!(first, "mouse");
                assert_eq!(second, "mouse_clicks");
                assert_eq!(path, "metrics.mouse");
            }
            other => panic!("expected path conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let table = PathTable::default_mapping();
        let record = sample_record();

        let first = serde_json::to_string(&flatten(&record, &table, false).unwrap()).unwrap();
        let second = serde_json::to_string(&flatten(&record, &table, false).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_flat_record_json_form_restores_absent() {
        let table = PathTable::default_mapping();
        let flat = flatten(&json!({ "user_id": "u-3" }), &table, false).unwrap();

        let restored = FlatRecord::from_json_value(&flat.to_json_value(), &table).unwrap();
        assert_eq!(restored, flat);
    }

    #[test]
    fn test_flattener_shared_across_threads() {
        let flattener = PathMappedFlattener::default();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let f = flattener.clone();
                std::thread::spawn(move || {
                    let record = json!({ "user_id": format!("u-{}", i) });
                    f.flatten(&record, false).unwrap()
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let flat = handle.join().unwrap();
            assert_eq!(flat.get("user_id"), Some(&FlatValue::Present(json!(format!("u-{}", i)))));
        }
    }
}
