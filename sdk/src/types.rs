//! Ability descriptor, argument and output types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::errors::EngineError;

/// Name of the implicit argument every ability receives.
pub const TASK_ID_ARG: &str = "task_id";

/// One declared parameter of an ability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
}

impl AbilityParameter {
    /// Create a required parameter
    pub fn required(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: kind.into(),
            required: true,
        }
    }

    /// Create an optional parameter
    pub fn optional(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Declared contract of an ability
///
/// Registered once at startup and read-only afterwards. The `name` is the
/// registry key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<AbilityParameter>,
    pub output_type: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "general".to_string()
}

impl AbilityDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            output_type: output_type.into(),
            category: default_category(),
        }
    }

    /// Add a parameter
    pub fn with_parameter(mut self, parameter: AbilityParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Set the catalog category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Look up a declared parameter by name
    pub fn parameter(&self, name: &str) -> Option<&AbilityParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Catalog line: `name(param: type, ...) -> output. Usage: description,`
impl fmt::Display for AbilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.kind))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{}({}) -> {}. Usage: {},",
            self.name, params, self.output_type, self.description
        )
    }
}

/// Arguments passed to an ability
///
/// `task_id` is always present; `params` holds the model-supplied arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbilityArgs {
    pub task_id: String,
    pub params: Map<String, Value>,
}

impl AbilityArgs {
    /// Create arguments for a task with no parameters
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            params: Map::new(),
        }
    }

    /// Create arguments from a model-supplied JSON object
    pub fn from_map(task_id: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            task_id: task_id.into(),
            params,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    ///
    /// Non-string scalars are rendered to text, matching how the model often
    /// sends numbers where a string is declared.
    pub fn param_str(&self, key: &str) -> Result<String, EngineError> {
        match self.params.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Null) | None => Err(EngineError::MissingArgument(key.to_string())),
            Some(other) => Ok(other.to_string()),
        }
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Result<i64, EngineError> {
        let value = self
            .params
            .get(key)
            .ok_or_else(|| EngineError::MissingArgument(key.to_string()))?;
        value
            .as_i64()
            .ok_or_else(|| EngineError::InvalidArgument(format!("{} must be an integer", key)))
    }
}

/// Output from an ability
#[derive(Debug, Clone, PartialEq)]
pub enum AbilityOutput {
    /// Plain text
    Text(String),

    /// Raw bytes, decoded to text before entering the chat context
    Bytes(Vec<u8>),

    /// Structured data
    Json(Value),

    /// No result
    Empty,
}

impl AbilityOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Normalize to the text stored in the chat context
    ///
    /// Bytes are decoded lossily, `Empty` and JSON `null` become the empty string.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Self::Json(Value::Null) | Self::Empty => String::new(),
            Self::Json(Value::String(s)) => s,
            Self::Json(value) => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_file_descriptor() -> AbilityDescriptor {
        AbilityDescriptor::new("write_file", "Write data to a file", "None")
            .with_parameter(AbilityParameter::required(
                "file_name",
                "string",
                "Name of the file",
            ))
            .with_parameter(AbilityParameter::required("data", "bytes", "Data to write"))
            .with_category("file system")
    }

    #[test]
    fn test_descriptor_display() {
        assert_eq!(
            write_file_descriptor().to_string(),
            "write_file(file_name: string, data: bytes) -> None. Usage: Write data to a file,"
        );
    }

    #[test]
    fn test_descriptor_display_without_parameters() {
        let descriptor = AbilityDescriptor::new("ping", "Check liveness", "str");
        assert_eq!(descriptor.to_string(), "ping() -> str. Usage: Check liveness,");
    }

    #[test]
    fn test_descriptor_deserializes_wire_format() {
        let descriptor: AbilityDescriptor = serde_json::from_value(json!({
            "name": "read_file",
            "description": "Read data from a file",
            "parameters": [{"name": "file_path", "type": "string", "required": true}],
            "output_type": "bytes"
        }))
        .unwrap();

        assert_eq!(descriptor.category, "general");
        assert_eq!(descriptor.parameters[0].kind, "string");
        assert!(descriptor.parameter("file_path").is_some());
    }

    #[test]
    fn test_param_str() {
        let args = AbilityArgs::new("task-1")
            .with_param("name", json!("Alice"))
            .with_param("count", json!(3));

        assert_eq!(args.param_str("name").unwrap(), "Alice");
        assert_eq!(args.param_str("count").unwrap(), "3");
        assert!(matches!(
            args.param_str("missing"),
            Err(EngineError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_param_i64() {
        let args = AbilityArgs::new("task-1")
            .with_param("count", json!(42))
            .with_param("name", json!("x"));

        assert_eq!(args.param_i64("count").unwrap(), 42);
        assert!(matches!(
            args.param_i64("name"),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_output_normalization() {
        assert_eq!(AbilityOutput::Bytes(b"hello".to_vec()).into_text(), "hello");
        assert_eq!(AbilityOutput::Empty.into_text(), "");
        assert_eq!(AbilityOutput::Json(Value::Null).into_text(), "");
        assert_eq!(AbilityOutput::Json(json!(["a", "b"])).into_text(), r#"["a","b"]"#);
        assert_eq!(AbilityOutput::text("done").into_text(), "done");
    }
}
