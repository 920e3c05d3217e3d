//! Declared shape of the input payload
//!
//! Strict flattening checks a record against this tree before normalizing it
//! through `InputData`. The tree mirrors the typed model but reports the
//! exact location, expected shape and actual JSON kind of a mismatch, which
//! serde's own errors do not.

use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::OnceLock;

/// JSON kind of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named field inside a section
#[derive(Debug, Clone)]
pub struct SectionField {
    pub name: &'static str,
    pub shape: FieldShape,
    pub required: bool,
}

impl SectionField {
    fn optional(name: &'static str, shape: FieldShape) -> Self {
        Self {
            name,
            shape,
            required: false,
        }
    }

    fn required(name: &'static str, shape: FieldShape) -> Self {
        Self {
            name,
            shape,
            required: true,
        }
    }
}

/// Expected shape of a value in the input payload
#[derive(Debug, Clone)]
pub enum FieldShape {
    /// Anything, including null
    Any,
    Scalar { kind: ValueKind, nullable: bool },
    /// An object with arbitrary contents
    OpenObject,
    List(Box<FieldShape>),
    /// An object with known fields; unknown fields are ignored
    Section(Vec<SectionField>),
}

/// One step in a location inside a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// Where and how a record diverged from the declared shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub steps: Vec<PathStep>,
    pub expected: String,
    pub actual: String,
}

impl ShapeMismatch {
    /// Object keys along the location, with array indices dropped
    pub fn key_segments(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                PathStep::Key(k) => Some(k.as_str()),
                PathStep::Index(_) => None,
            })
            .collect()
    }

    /// Location in `a.b[0].c` form, `$` for the root
    pub fn location(&self) -> String {
        if self.steps.is_empty() {
            return "$".to_string();
        }
        let mut out = String::new();
        for step in &self.steps {
            match step {
                PathStep::Key(k) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(k);
                }
                PathStep::Index(i) => out.push_str(&format!("[{}]", i)),
            }
        }
        out
    }
}

impl FieldShape {
    fn string_or_null() -> Self {
        FieldShape::Scalar {
            kind: ValueKind::String,
            nullable: true,
        }
    }

    fn number(nullable: bool) -> Self {
        FieldShape::Scalar {
            kind: ValueKind::Number,
            nullable,
        }
    }

    fn events() -> Self {
        FieldShape::List(Box::new(FieldShape::OpenObject))
    }

    /// Human-readable description used in error messages
    pub fn describe(&self) -> String {
        match self {
            FieldShape::Any => "any".to_string(),
            FieldShape::Scalar { kind, nullable } => {
                if *nullable {
                    format!("{} or null", kind)
                } else {
                    kind.to_string()
                }
            }
            FieldShape::OpenObject | FieldShape::Section(_) => "object".to_string(),
            FieldShape::List(inner) => format!("array of {}", inner.describe()),
        }
    }

    /// Check `value` against this shape, returning the first mismatch
    pub fn check(&self, value: &Value) -> Result<(), ShapeMismatch> {
        let mut steps = Vec::new();
        self.check_at(value, &mut steps)
    }

    fn check_at(&self, value: &Value, steps: &mut Vec<PathStep>) -> Result<(), ShapeMismatch> {
        let mismatch = |steps: &[PathStep]| ShapeMismatch {
            steps: steps.to_vec(),
            expected: self.describe(),
            actual: ValueKind::of(value).to_string(),
        };

        match (self, value) {
            (FieldShape::Any, _) => Ok(()),
            (FieldShape::Scalar { nullable: true, .. }, Value::Null) => Ok(()),
            (FieldShape::Scalar { kind, .. }, v) if ValueKind::of(v) == *kind => Ok(()),
            (FieldShape::Scalar { .. }, _) => Err(mismatch(steps)),
            (FieldShape::OpenObject, Value::Object(_)) => Ok(()),
            (FieldShape::OpenObject, _) => Err(mismatch(steps)),
            (FieldShape::List(inner), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    steps.push(PathStep::Index(i));
                    inner.check_at(item, steps)?;
                    steps.pop();
                }
                Ok(())
            }
            (FieldShape::List(_), _) => Err(mismatch(steps)),
            (FieldShape::Section(fields), Value::Object(map)) => {
                for field in fields {
                    steps.push(PathStep::Key(field.name.to_string()));
                    match map.get(field.name) {
                        Some(child) => field.shape.check_at(child, steps)?,
                        None if field.required => {
                            return Err(ShapeMismatch {
                                steps: steps.clone(),
                                expected: field.shape.describe(),
                                actual: "absent".to_string(),
                            });
                        }
                        None => {}
                    }
                    steps.pop();
                }
                Ok(())
            }
            (FieldShape::Section(_), _) => Err(mismatch(steps)),
        }
    }

    /// Render this shape as a JSON Schema fragment
    pub fn to_json_schema(&self) -> Value {
        match self {
            FieldShape::Any => json!({}),
            FieldShape::Scalar { kind, nullable } => {
                if *nullable {
                    json!({ "type": [kind.as_str(), "null"] })
                } else {
                    json!({ "type": kind.as_str() })
                }
            }
            FieldShape::OpenObject => json!({ "type": "object" }),
            FieldShape::List(inner) => json!({ "type": "array", "items": inner.to_json_schema() }),
            FieldShape::Section(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.to_string(), field.shape.to_json_schema());
                    if field.required {
                        required.push(Value::String(field.name.to_string()));
                    }
                }
                let mut schema = json!({ "type": "object", "properties": properties });
                if !required.is_empty() {
                    schema["required"] = Value::Array(required);
                }
                schema
            }
        }
    }
}

/// The declared shape of `InputData`
pub fn input_schema() -> &'static FieldShape {
    static SCHEMA: OnceLock<FieldShape> = OnceLock::new();
    SCHEMA.get_or_init(build_input_schema)
}

fn build_input_schema() -> FieldShape {
    let movement = FieldShape::Section(vec![
        SectionField::required("x", FieldShape::number(false)),
        SectionField::required("y", FieldShape::number(false)),
        SectionField::required(
            "timestamp",
            FieldShape::Scalar {
                kind: ValueKind::String,
                nullable: false,
            },
        ),
    ]);

    let mouse = FieldShape::Section(vec![
        SectionField::optional("movements", FieldShape::List(Box::new(movement))),
        SectionField::optional("clicks", FieldShape::events()),
        SectionField::optional("mouseDowns", FieldShape::events()),
        SectionField::optional("mouseUps", FieldShape::events()),
    ]);

    let keyboard = FieldShape::Section(vec![
        SectionField::optional("keypresses", FieldShape::events()),
        SectionField::optional("keydowns", FieldShape::events()),
        SectionField::optional("keyups", FieldShape::events()),
        SectionField::optional("specificKeyEvents", FieldShape::events()),
    ]);

    let sign_in_button = FieldShape::Section(vec![
        SectionField::optional("hoverToClickTime", FieldShape::number(true)),
        SectionField::optional("mouseLeaveCount", FieldShape::number(false)),
    ]);

    let metrics = FieldShape::Section(vec![
        SectionField::optional("mouse", mouse),
        SectionField::optional("keyboard", keyboard),
        SectionField::optional("signInButton", sign_in_button),
    ]);

    FieldShape::Section(vec![
        SectionField::optional("project_id", FieldShape::string_or_null()),
        SectionField::optional("user_id", FieldShape::string_or_null()),
        SectionField::optional("metrics", metrics),
        SectionField::optional("additional", FieldShape::Any),
    ])
}
