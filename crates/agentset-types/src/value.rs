use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The type tag shared by `InputValue::value_type` and
/// `PluginOutput::result_type`. `Plan` and `Error` are the two distinguished
/// values the engine switches on; the rest are ordinary payload shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Plan,
    Error,
    Any,
}

/// A dereferenced, ready-to-use step input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputValue {
    pub input_name: String,
    pub value: serde_json::Value,
    pub value_type: ValueType,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
}

impl InputValue {
    pub fn new(input_name: impl Into<String>, value: serde_json::Value, value_type: ValueType) -> Self {
        Self {
            input_name: input_name.into(),
            value,
            value_type,
            args: HashMap::new(),
        }
    }

    /// True if this value was populated by the auto-mapping fallback rather
    /// than an exact output-name match (see `Step::dereference_inputs`).
    pub fn is_auto_mapped(&self) -> bool {
        self.args.contains_key("auto_mapped_from")
    }

    pub fn auto_mapped_from(&self) -> Option<&str> {
        self.args.get("auto_mapped_from").and_then(|v| v.as_str())
    }

    pub fn with_auto_mapped_from(mut self, source_output: impl Into<String>) -> Self {
        self.args.insert(
            "auto_mapped_from".to_string(),
            serde_json::Value::String(source_output.into()),
        );
        self
    }
}

/// One named result produced by a step's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginOutput {
    pub success: bool,
    pub name: String,
    pub result_type: ValueType,
    pub result_description: String,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginOutput {
    pub fn success(name: impl Into<String>, result_type: ValueType, result: serde_json::Value) -> Self {
        Self {
            success: true,
            name: name.into(),
            result_type,
            result_description: String::new(),
            result,
            mime_type: None,
            file_name: None,
            error: None,
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            name: name.into(),
            result_type: ValueType::Error,
            result_description: message.clone(),
            result: serde_json::Value::String(message.clone()),
            mime_type: None,
            file_name: None,
            error: Some(message),
        }
    }

    pub fn is_plan(&self) -> bool {
        self.result_type == ValueType::Plan
    }

    pub fn is_error(&self) -> bool {
        self.result_type == ValueType::Error || !self.success
    }

    /// A plan output's `result` is an ordered sequence of task descriptors;
    /// this is only meaningful when `is_plan()` is true.
    pub fn plan_tasks(&self) -> Option<&[serde_json::Value]> {
        if !self.is_plan() {
            return None;
        }
        self.result.as_array().map(|v| v.as_slice())
    }

    /// True if this output looks like a user-facing artifact rather than an
    /// interim payload (has a mime type or a file name).
    pub fn is_deliverable(&self) -> bool {
        self.mime_type.is_some() || self.file_name.is_some()
    }
}
