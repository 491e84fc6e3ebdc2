//! Tool schema catalog advertised to the model: the five fixed tools
//! (`move_north`/`move_south`/`move_east`/`move_west`/`recall`), each with
//! the uniform `{experimentId, reasoning?}` parameter shape (spec §6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::mazerunner_core::client_wrapper::ToolDefinition;

/// Structured result of one tool execution, persisted into the audit row's
/// observation payload and echoed back to the model as a `tool` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Integer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render as a JSON-Schema `parameters` object, the shape each
    /// `ToolDefinition::parameters_schema` carries over the wire.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let type_str = match param.param_type {
                ToolParameterType::String => "string",
                ToolParameterType::Integer => "integer",
            };
            let mut entry = serde_json::json!({ "type": type_str });
            if let Some(description) = &param.description {
                entry["description"] = serde_json::Value::String(description.clone());
            }
            properties.insert(param.name.clone(), entry);
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": serde_json::Value::Object(properties),
            "required": required,
        })
    }

    pub fn to_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.to_json_schema(),
        }
    }
}

fn common_params(name: &str, move_description: &str) -> ToolMetadata {
    ToolMetadata::new(name, move_description)
        .with_parameter(
            ToolParameter::new("experimentId", ToolParameterType::Integer)
                .with_description("The experiment this action belongs to.")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("reasoning", ToolParameterType::String)
                .with_description("Optional free-text rationale for this action."),
        )
}

/// The fixed five-tool catalog advertised to the model on every turn.
pub fn catalog() -> Vec<ToolMetadata> {
    vec![
        common_params("move_north", "Attempt to move one tile north (y-1)."),
        common_params("move_south", "Attempt to move one tile south (y+1)."),
        common_params("move_east", "Attempt to move one tile east (x+1)."),
        common_params("move_west", "Attempt to move one tile west (x-1)."),
        common_params(
            "recall",
            "Return previously observed tiles without moving. Subject to a cooldown.",
        ),
    ]
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    catalog().iter().map(ToolMetadata::to_tool_definition).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_five_tools() {
        assert_eq!(catalog().len(), 5);
    }

    #[test]
    fn every_tool_requires_experiment_id() {
        for tool in catalog() {
            let schema = tool.to_json_schema();
            let required = schema["required"].as_array().unwrap();
            assert!(required.contains(&serde_json::Value::String("experimentId".into())));
            assert!(!required.contains(&serde_json::Value::String("reasoning".into())));
        }
    }
}
