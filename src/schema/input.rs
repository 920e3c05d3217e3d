//! Sign-in interaction payload definition
//!
//! Typed view of the behavioral telemetry collected around a sign-in form:
//! - Mouse activity (movements, clicks, button presses)
//! - Keyboard activity (key presses and selected key events)
//! - Sign-in button interaction timing
//!
//! Every section defaults to empty, so a payload may omit any part of it.

use crate::error::FlattenError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw interaction event (click, key press, ...) kept as an open object
pub type InteractionEvent = Map<String, Value>;

/// A single pointer position sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseMovement {
    /// Horizontal position in pixels
    pub x: f64,
    /// Vertical position in pixels
    pub y: f64,
    /// Producer timestamp, passed through verbatim
    pub timestamp: String,
}

/// Mouse activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseMetrics {
    #[serde(default)]
    pub movements: Vec<MouseMovement>,
    #[serde(default)]
    pub clicks: Vec<InteractionEvent>,
    #[serde(default)]
    pub mouse_downs: Vec<InteractionEvent>,
    #[serde(default)]
    pub mouse_ups: Vec<InteractionEvent>,
}

/// Keyboard activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardMetrics {
    #[serde(default)]
    pub keypresses: Vec<InteractionEvent>,
    #[serde(default)]
    pub keydowns: Vec<InteractionEvent>,
    #[serde(default)]
    pub keyups: Vec<InteractionEvent>,
    /// Events for keys the producer tracks individually (Tab, Enter, ...)
    #[serde(default)]
    pub specific_key_events: Vec<InteractionEvent>,
}

/// Sign-in button interaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInButtonMetrics {
    /// Time from first hover to click; null when the button was never clicked
    #[serde(default)]
    pub hover_to_click_time: Option<f64>,
    /// Number of times the pointer left the button
    #[serde(default)]
    pub mouse_leave_count: f64,
}

/// All interaction metrics for one sign-in attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub mouse: MouseMetrics,
    #[serde(default)]
    pub keyboard: KeyboardMetrics,
    #[serde(default, rename = "signInButton")]
    pub sign_in_button: SignInButtonMetrics,
}

/// Input payload for flattening
///
/// Unknown top-level keys are kept in `extra` and written back out on
/// serialization; unknown keys inside `metrics` are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputData {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metrics: Metrics,
    /// Catch-all for producer data outside the modeled sections
    #[serde(default)]
    pub additional: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputData {
    /// Parse a payload from an already-decoded JSON value
    pub fn from_value(value: &Value) -> Result<Self, FlattenError> {
        Ok(Self::deserialize(value)?)
    }

    /// Dump the payload with every default section filled in
    pub fn to_value(&self) -> Result<Value, FlattenError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Round-trip a raw record through the typed model
    pub fn normalize(value: &Value) -> Result<Value, FlattenError> {
        Self::from_value(value)?.to_value()
    }
}
