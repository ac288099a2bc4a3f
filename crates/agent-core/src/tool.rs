//! Tool System
//!
//! Typed descriptions of remotely bridged tools. Tool backends publish
//! JSON Schema documents at runtime; those are parsed once into an
//! [`InputSchema`] so arguments can be validated before any dispatch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

use crate::error::{AgentError, Result};

/// Tool call request from the LLM
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    #[serde(alias = "tool")]
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: HashMap<String, Value>,

    /// Optional call ID for tracking
    #[serde(default)]
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: HashMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            id: None,
        }
    }

    /// Arguments as a JSON object
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone().into_iter().collect())
    }
}

/// Result from tool execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Call ID (if provided in request)
    pub id: Option<String>,

    /// Whether execution succeeded
    pub success: bool,

    /// Output (success message or error)
    pub output: String,

    /// Structured data (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: false,
            output: error.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: String::new(),
            required: false,
            default: None,
            enum_values: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn accepts(&self, value: &Value) -> bool {
        let type_ok = match self.param_type.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            "null" => value.is_null(),
            // Untyped or composite schemas are not narrowed further
            _ => true,
        };
        let enum_ok = self
            .enum_values
            .as_ref()
            .is_none_or(|allowed| allowed.contains(value));
        type_ok && enum_ok
    }
}

/// Argument shape of a tool or skill
///
/// Serialized as a JSON Schema object so cards and tool catalogs stay
/// interoperable; held in memory as typed parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", try_from = "Value")]
pub struct InputSchema {
    pub parameters: Vec<ParameterSchema>,
}

impl InputSchema {
    pub fn new(parameters: Vec<ParameterSchema>) -> Self {
        Self { parameters }
    }

    /// Parse a JSON Schema `object` document
    pub fn from_json_schema(schema: &Value) -> std::result::Result<Self, String> {
        if schema.is_null() {
            return Ok(Self::default());
        }
        let obj = schema
            .as_object()
            .ok_or_else(|| "input schema must be a JSON object".to_string())?;

        if let Some(kind) = obj.get("type").and_then(Value::as_str) {
            if kind != "object" {
                return Err(format!("input schema type must be 'object', got '{kind}'"));
            }
        }

        let required: Vec<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut parameters = Vec::new();
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                let param_type = match prop.get("type") {
                    Some(Value::String(t)) => t.clone(),
                    // ["integer", "null"] style unions: first non-null member
                    Some(Value::Array(types)) => types
                        .iter()
                        .filter_map(Value::as_str)
                        .find(|t| *t != "null")
                        .unwrap_or("any")
                        .to_string(),
                    _ => "any".to_string(),
                };
                parameters.push(ParameterSchema {
                    name: name.clone(),
                    param_type,
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    required: required.contains(&name.as_str()),
                    default: prop.get("default").cloned(),
                    enum_values: prop.get("enum").and_then(Value::as_array).cloned(),
                });
            }
        }

        Ok(Self { parameters })
    }

    /// Render back to a JSON Schema `object` document
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            if param.param_type != "any" {
                prop.insert("type".into(), json!(param.param_type));
            }
            if !param.description.is_empty() {
                prop.insert("description".into(), json!(param.description));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate call arguments; failures are `InvalidAction`
    pub fn validate(&self, target: &str, arguments: &HashMap<String, Value>) -> Result<()> {
        for param in &self.parameters {
            match arguments.get(&param.name) {
                None if param.required => {
                    return Err(AgentError::InvalidAction(format!(
                        "'{target}' is missing required parameter '{}'",
                        param.name
                    )));
                }
                Some(value) if !param.accepts(value) => {
                    return Err(AgentError::InvalidAction(format!(
                        "'{target}' parameter '{}' expects {}, got {value}",
                        param.name, param.param_type
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl From<InputSchema> for Value {
    fn from(schema: InputSchema) -> Self {
        schema.to_json_schema()
    }
}

impl TryFrom<Value> for InputSchema {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        Self::from_json_schema(&value)
    }
}

/// Identifier of one tool bridge connection
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeSessionId(String);

impl BridgeSessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BridgeSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BridgeSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tool advertised by one live bridge session
///
/// Never mutated; a changed backend catalog means a new connection and a
/// new listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: InputSchema,
    /// Bridge session that listed this tool
    pub origin: BridgeSessionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_schema() -> InputSchema {
        InputSchema::from_json_schema(&json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer", "description": "Device id"},
                "state": {"type": "string", "enum": ["on", "off"]}
            },
            "required": ["id", "state"]
        }))
        .unwrap()
    }

    fn args(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_json_schema() {
        let schema = device_schema();
        assert_eq!(schema.parameters.len(), 2);
        let id = schema.parameters.iter().find(|p| p.name == "id").unwrap();
        assert!(id.required);
        assert_eq!(id.param_type, "integer");
    }

    #[test]
    fn test_rejects_non_object_schema() {
        assert!(InputSchema::from_json_schema(&json!({"type": "string"})).is_err());
        assert!(InputSchema::from_json_schema(&json!("nope")).is_err());
    }

    #[test]
    fn test_validate_arguments() {
        let schema = device_schema();
        assert!(schema.validate("setDevice", &args(json!({"id": 42, "state": "on"}))).is_ok());

        let missing = schema.validate("setDevice", &args(json!({"id": 42}))).unwrap_err();
        assert_eq!(missing.kind(), "InvalidAction");

        let wrong_type = schema.validate("setDevice", &args(json!({"id": "42", "state": "on"})));
        assert!(wrong_type.is_err());

        let outside_enum = schema.validate("setDevice", &args(json!({"id": 42, "state": "dim"})));
        assert!(outside_enum.is_err());
    }

    #[test]
    fn test_schema_serializes_as_json_schema() {
        let schema = device_schema();
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["state"]["enum"], json!(["on", "off"]));

        let back: InputSchema = serde_json::from_value(value).unwrap();
        assert_eq!(back.parameters.len(), schema.parameters.len());
    }

    #[test]
    fn test_tool_call_accepts_tool_alias() {
        let call: ToolCall =
            serde_json::from_str(r#"{"tool": "setDevice", "arguments": {"id": 42}}"#).unwrap();
        assert_eq!(call.name, "setDevice");
        assert_eq!(call.arguments_value(), json!({"id": 42}));
    }
}
