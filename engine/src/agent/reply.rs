//! Model reply normalization
//!
//! The model may answer with a single `ability` object or an `abilities`
//! list. Both are folded into one [`AgentReply`] here; nothing past this
//! module sees the raw shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::extract_json_object;

/// Stand-in for a reply without `thoughts.speak`
pub const DEFAULT_SPEAK: &str = "Nothing to say...";

/// Reasoning part of a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thoughts {
    pub text: Option<String>,
    pub reasoning: Option<String>,
    pub plan: Option<String>,
    pub criticism: Option<String>,
    pub speak: String,
}

/// One requested ability call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityCall {
    pub name: String,
    pub args: Option<Map<String, Value>>,
}

impl AbilityCall {
    /// Calls with an empty or `"None"` name are placeholders and never dispatched
    pub fn is_placeholder(&self) -> bool {
        let name = self.name.trim();
        name.is_empty() || name == "None"
    }
}

/// Normalized model reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub thoughts: Thoughts,
    pub commands: Vec<AbilityCall>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplyError {
    /// The reply holds no parseable JSON object
    #[error("Reply is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Reply is missing '{0}'")]
    MissingKey(&'static str),

    #[error("Reply has both 'ability' and 'abilities'")]
    Ambiguous,

    #[error("Invalid ability entry: {0}")]
    InvalidEntry(String),
}

impl ReplyError {
    /// Schema problems the model can fix by re-reading the format
    pub fn is_schema_error(&self) -> bool {
        !matches!(self, ReplyError::InvalidJson(_))
    }
}

impl AgentReply {
    /// Parse a raw completion into a normalized reply
    pub fn parse(raw: &str) -> Result<Self, ReplyError> {
        let json = extract_json_object(raw)
            .ok_or_else(|| ReplyError::InvalidJson("no JSON object found".to_string()))?;
        let value: Value =
            serde_json::from_str(json).map_err(|e| ReplyError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ReplyError> {
        let object = value
            .as_object()
            .ok_or_else(|| ReplyError::InvalidJson("top level is not an object".to_string()))?;

        let thoughts = object
            .get("thoughts")
            .and_then(Value::as_object)
            .map(parse_thoughts)
            .ok_or(ReplyError::MissingKey("thoughts"))?;

        let commands = match (object.get("ability"), object.get("abilities")) {
            (Some(_), Some(_)) => return Err(ReplyError::Ambiguous),
            (Some(single), None) => vec![parse_call(single)?],
            (None, Some(Value::Array(list))) => {
                list.iter().map(parse_call).collect::<Result<Vec<_>, _>>()?
            }
            // Some models send one object under the plural key
            (None, Some(single @ Value::Object(_))) => vec![parse_call(single)?],
            (None, Some(other)) => {
                return Err(ReplyError::InvalidEntry(format!(
                    "'abilities' must be a list, got {}",
                    other
                )))
            }
            (None, None) => return Err(ReplyError::MissingKey("ability")),
        };

        Ok(Self { thoughts, commands })
    }

    /// Names of the calls that will be dispatched
    pub fn dispatched_names(&self) -> impl Iterator<Item = &str> {
        self.commands
            .iter()
            .filter(|c| !c.is_placeholder())
            .map(|c| c.name.as_str())
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| item.as_str().map(String::from).unwrap_or_else(|| item.to_string()))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        other => Some(other.to_string()),
    }
}

fn parse_thoughts(object: &Map<String, Value>) -> Thoughts {
    Thoughts {
        text: text_field(object, "text"),
        reasoning: text_field(object, "reasoning"),
        plan: text_field(object, "plan"),
        criticism: text_field(object, "criticism"),
        speak: text_field(object, "speak")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SPEAK.to_string()),
    }
}

fn parse_call(value: &Value) -> Result<AbilityCall, ReplyError> {
    let object = value
        .as_object()
        .ok_or_else(|| ReplyError::InvalidEntry(format!("expected an object, got {}", value)))?;

    let name = match object.get("name") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let args = match object.get("args") {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(ReplyError::InvalidEntry(format!(
                "args of '{}' must be an object, got {}",
                name, other
            )))
        }
    };

    Ok(AbilityCall { name, args })
}
