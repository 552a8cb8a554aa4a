//! Argument binding for synthesized functions.

use serde_json::{Map, Value};

use crate::effects::path::{loosely_equal, type_name};
use crate::error::ArgumentError;
use crate::ruleset::{FunctionDefinition, ParamType};

type TypeCheck = fn(&Value) -> bool;

fn type_check(param_type: ParamType) -> TypeCheck {
    match param_type {
        ParamType::String => Value::is_string,
        ParamType::Number => Value::is_number,
        ParamType::Boolean => Value::is_boolean,
        ParamType::Object => Value::is_object,
        ParamType::Array => Value::is_array,
    }
}

#[derive(Clone)]
struct Slot {
    name: String,
    param_type: ParamType,
    check: TypeCheck,
    required: bool,
    default: Option<Value>,
    allowed: Option<Vec<Value>>,
}

/// Checks and completes an argument map against a function's parameters.
#[derive(Clone)]
pub struct ArgumentBinder {
    slots: Vec<Slot>,
}

impl ArgumentBinder {
    pub fn new(definition: &FunctionDefinition) -> Self {
        let slots = definition
            .parameters
            .iter()
            .map(|p| Slot {
                name: p.name.clone(),
                param_type: p.param_type,
                check: type_check(p.param_type),
                required: p.required,
                default: p.default.clone(),
                allowed: p.allowed.clone(),
            })
            .collect();
        Self { slots }
    }

    /// Bind `args`, returning one value per declared parameter.
    ///
    /// Absent optional parameters take their default, or `null` when none is
    /// declared. Every problem is reported, not just the first.
    pub fn bind(&self, args: &Map<String, Value>) -> Result<Map<String, Value>, Vec<ArgumentError>> {
        let mut errors: Vec<ArgumentError> = args
            .keys()
            .filter(|name| !self.slots.iter().any(|slot| &slot.name == *name))
            .map(|name| ArgumentError::Unknown(name.clone()))
            .collect();

        let mut bound = Map::new();
        for slot in &self.slots {
            let value = match args.get(&slot.name) {
                Some(Value::Null) | None => {
                    if slot.required {
                        errors.push(ArgumentError::Missing(slot.name.clone()));
                        continue;
                    }
                    slot.default.clone().unwrap_or(Value::Null)
                }
                Some(value) => {
                    if !(slot.check)(value) {
                        errors.push(ArgumentError::TypeMismatch {
                            name: slot.name.clone(),
                            expected: slot.param_type,
                            found: type_name(value),
                        });
                        continue;
                    }
                    if let Some(allowed) = &slot.allowed {
                        if !allowed.iter().any(|member| loosely_equal(member, value)) {
                            errors.push(ArgumentError::NotAllowed {
                                name: slot.name.clone(),
                                allowed: Value::Array(allowed.clone()).to_string(),
                            });
                            continue;
                        }
                    }
                    value.clone()
                }
            };
            bound.insert(slot.name.clone(), value);
        }

        if errors.is_empty() {
            Ok(bound)
        } else {
            Err(errors)
        }
    }
}
