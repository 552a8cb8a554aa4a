//! Tool-call schemas for synthesized functions.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::ruleset::FunctionDefinition;

/// Name, description and JSON-schema parameters of one callable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionSchema {
    pub fn from_definition(definition: &FunctionDefinition) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &definition.parameters {
            let mut property = Map::new();
            property.insert("type".into(), json!(param.param_type.as_str()));
            if !param.description.is_empty() {
                property.insert("description".into(), json!(param.description));
            }
            if let Some(allowed) = &param.allowed {
                property.insert("enum".into(), Value::Array(allowed.clone()));
            }
            if let Some(default) = &param.default {
                property.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(property));

            if param.required {
                required.push(json!(param.name));
            }
        }

        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::{ParamType, ParameterDefinition};

    #[test]
    fn test_schema_shape() {
        let definition = FunctionDefinition {
            id: "select-race".into(),
            name: "select_race".into(),
            description: "Choose a race".into(),
            parameters: vec![
                ParameterDefinition {
                    name: "raceId".into(),
                    param_type: ParamType::String,
                    required: true,
                    description: "Race id".into(),
                    default: None,
                    allowed: Some(vec![json!("human"), json!("elf")]),
                },
                ParameterDefinition {
                    name: "bonus".into(),
                    param_type: ParamType::Number,
                    required: false,
                    description: String::new(),
                    default: Some(json!(0)),
                    allowed: None,
                },
            ],
            rule_validations: vec![],
            effects: vec![],
        };

        let schema = FunctionSchema::from_definition(&definition);
        assert_eq!(schema.name, "select_race");
        assert_eq!(
            schema.parameters,
            json!({
                "type": "object",
                "properties": {
                    "raceId": { "type": "string", "description": "Race id", "enum": ["human", "elf"] },
                    "bonus": { "type": "number", "default": 0 }
                },
                "required": ["raceId"],
                "additionalProperties": false
            })
        );
    }
}
