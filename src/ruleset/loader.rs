//! Ruleset loading and structural validation.
//!
//! Parsing goes through loosely typed raw structs so that an unknown phase or an
//! unsupported operation is reported alongside every other problem instead of
//! aborting deserialization. No expression is executed here.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::document::{
    EffectOperation, EffectSpec, FunctionDefinition, Metadata, ParamType, ParameterDefinition,
    Phase, RulesetDocument,
};
use super::template::{placeholders, value_placeholders, RESERVED_ROOTS};
use crate::error::StructuralError;

/// Names a parameter may not take because expressions already see them as globals.
pub const CONTEXT_NAMES: [&str; 3] = ["character", "gameState", "gameData"];

/// Roots an effect target may start with.
pub const STATE_ROOTS: [&str; 2] = ["character", "gameState"];

const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Source encoding of a ruleset document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// JSON if the first non-blank byte opens an object, YAML otherwise.
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }

    /// Pick a format from a file extension, falling back to sniffing.
    pub fn for_path(path: &Path, bytes: &[u8]) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => DocumentFormat::Json,
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => Self::sniff(bytes),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    metadata: RawMetadata,
    #[serde(default)]
    functions_by_phase: BTreeMap<String, Vec<RawFunction>>,
    #[serde(default)]
    game_data: BTreeMap<String, Value>,
    #[serde(default)]
    prompt_templates: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: Value,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFunction {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    #[serde(default)]
    rule_validations: Vec<String>,
    #[serde(default)]
    effects: Vec<RawEffect>,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    param_type: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    description: String,
    #[serde(default)]
    default: Option<Value>,
    #[serde(rename = "enum", default)]
    allowed: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawEffect {
    #[serde(default)]
    target: String,
    #[serde(default)]
    operation: String,
    #[serde(default)]
    value: Value,
}

/// Load a document, detecting JSON or YAML from its content.
pub fn load(bytes: &[u8]) -> Result<RulesetDocument, Vec<StructuralError>> {
    load_with_format(bytes, DocumentFormat::sniff(bytes))
}

/// Load a document in a known format.
pub fn load_with_format(
    bytes: &[u8],
    format: DocumentFormat,
) -> Result<RulesetDocument, Vec<StructuralError>> {
    let parsed = match format {
        DocumentFormat::Json => serde_json::from_slice::<RawDocument>(bytes).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::from_slice::<RawDocument>(bytes).map_err(|e| e.to_string()),
    };

    let raw = parsed.map_err(|message| vec![StructuralError::new("document", message)])?;

    let result = validate(raw);
    match &result {
        Ok(document) => debug!(
            ruleset = %document.id(),
            functions = document.function_count(),
            "Ruleset loaded"
        ),
        Err(errors) => {
            for error in errors {
                warn!(location = %error.location, "Ruleset structural error: {}", error.message);
            }
        }
    }
    result
}

/// Collects violations while a raw document is converted.
#[derive(Default)]
struct Violations(Vec<StructuralError>);

impl Violations {
    fn push(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.0.push(StructuralError::new(location, message));
    }
}

fn validate(raw: RawDocument) -> Result<RulesetDocument, Vec<StructuralError>> {
    let mut violations = Violations::default();

    let metadata = validate_metadata(raw.metadata, &mut violations);

    let mut functions_by_phase = BTreeMap::new();
    let mut function_ids: HashSet<String> = HashSet::new();

    for (phase_name, raw_functions) in raw.functions_by_phase {
        let location = format!("functionsByPhase.{}", phase_name);
        let phase = match phase_name.parse::<Phase>() {
            Ok(phase) => Some(phase),
            Err(message) => {
                violations.push(&location, message);
                None
            }
        };

        let mut names: HashSet<String> = HashSet::new();
        let mut functions = Vec::with_capacity(raw_functions.len());

        for (index, raw_function) in raw_functions.into_iter().enumerate() {
            let fn_location = format!("{}[{}]", location, index);

            if !raw_function.id.is_empty() && !function_ids.insert(raw_function.id.clone()) {
                violations.push(
                    &fn_location,
                    format!("duplicate function id '{}'", raw_function.id),
                );
            }
            if !raw_function.name.is_empty() && !names.insert(raw_function.name.clone()) {
                violations.push(
                    &fn_location,
                    format!(
                        "duplicate function name '{}' in phase '{}'",
                        raw_function.name, phase_name
                    ),
                );
            }

            if let Some(function) = validate_function(raw_function, &fn_location, &mut violations) {
                functions.push(function);
            }
        }

        if let Some(phase) = phase {
            if functions_by_phase.insert(phase, functions).is_some() {
                violations.push(&location, format!("phase '{}' is declared twice", phase));
            }
        }
    }

    let mut prompt_templates = BTreeMap::new();
    for (phase_name, template) in raw.prompt_templates {
        match phase_name.parse::<Phase>() {
            Ok(phase) => {
                prompt_templates.insert(phase, template);
            }
            Err(message) => violations.push(format!("promptTemplates.{}", phase_name), message),
        }
    }

    if !violations.0.is_empty() {
        return Err(violations.0);
    }

    Ok(RulesetDocument::new(
        metadata,
        functions_by_phase,
        raw.game_data,
        prompt_templates,
    ))
}

fn validate_metadata(raw: RawMetadata, violations: &mut Violations) -> Metadata {
    if raw.id.trim().is_empty() {
        violations.push("metadata.id", "must not be empty");
    } else if raw.id.contains('@') {
        violations.push("metadata.id", "must not contain '@'");
    }
    if raw.name.trim().is_empty() {
        violations.push("metadata.name", "must not be empty");
    }
    let version = match raw.version {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if version.trim().is_empty() {
        violations.push("metadata.version", "must be a non-empty string or number");
    }

    Metadata {
        id: raw.id,
        name: raw.name,
        version,
        tags: raw.tags,
        description: raw.description,
    }
}

fn validate_function(
    raw: RawFunction,
    location: &str,
    violations: &mut Violations,
) -> Option<FunctionDefinition> {
    let before = violations.0.len();

    if raw.id.trim().is_empty() {
        violations.push(location, "function id must not be empty");
    }
    if !is_callable_name(&raw.name) {
        violations.push(
            location,
            format!(
                "function name '{}' must be 1-{} characters of [A-Za-z0-9_-]",
                raw.name, MAX_FUNCTION_NAME_LEN
            ),
        );
    }

    let mut parameters = Vec::with_capacity(raw.parameters.len());
    let mut seen = HashSet::new();
    for (index, raw_param) in raw.parameters.into_iter().enumerate() {
        let param_location = format!("{}.parameters[{}]", location, index);
        if !seen.insert(raw_param.name.clone()) {
            violations.push(
                &param_location,
                format!("duplicate parameter '{}'", raw_param.name),
            );
        }
        if let Some(param) = validate_parameter(raw_param, &param_location, violations) {
            parameters.push(param);
        }
    }

    let declared: HashSet<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
    let check_placeholders = |names: Vec<&str>, at: &str, violations: &mut Violations| {
        for name in names {
            if !declared.contains(name) && !RESERVED_ROOTS.contains(&name) {
                violations.push(
                    at,
                    format!("placeholder '{{{}}}' does not name a declared parameter", name),
                );
            }
        }
    };

    for (index, expr) in raw.rule_validations.iter().enumerate() {
        let at = format!("{}.ruleValidations[{}]", location, index);
        if expr.trim().is_empty() {
            violations.push(&at, "validation expression must not be empty");
        }
        check_placeholders(placeholders(expr), &at, violations);
    }

    let mut effects = Vec::with_capacity(raw.effects.len());
    for (index, raw_effect) in raw.effects.into_iter().enumerate() {
        let at = format!("{}.effects[{}]", location, index);

        check_target(&raw_effect.target, &format!("{}.target", at), violations);
        check_placeholders(placeholders(&raw_effect.target), &format!("{}.target", at), violations);

        let value_names = value_placeholders(&raw_effect.value);
        check_placeholders(
            value_names.iter().map(String::as_str).collect(),
            &format!("{}.value", at),
            violations,
        );

        match raw_effect.operation.parse::<EffectOperation>() {
            Ok(operation) => effects.push(EffectSpec {
                target: raw_effect.target,
                operation,
                value: raw_effect.value,
            }),
            Err(message) => violations.push(format!("{}.operation", at), message),
        }
    }

    if violations.0.len() > before {
        return None;
    }

    Some(FunctionDefinition {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        parameters,
        rule_validations: raw.rule_validations,
        effects,
    })
}

fn validate_parameter(
    raw: RawParameter,
    location: &str,
    violations: &mut Violations,
) -> Option<ParameterDefinition> {
    let before = violations.0.len();

    if !is_identifier(&raw.name) {
        violations.push(
            location,
            format!("parameter name '{}' is not an identifier", raw.name),
        );
    }
    if CONTEXT_NAMES.contains(&raw.name.as_str()) {
        violations.push(
            location,
            format!("parameter name '{}' shadows a context root", raw.name),
        );
    }

    let param_type = match raw.param_type.parse::<ParamType>() {
        Ok(t) => Some(t),
        Err(message) => {
            violations.push(format!("{}.type", location), message);
            None
        }
    };

    if raw.required && raw.default.is_some() {
        violations.push(
            format!("{}.default", location),
            "required parameters cannot declare a default",
        );
    }

    if let Some(param_type) = param_type {
        if let Some(default) = &raw.default {
            if !param_type.matches(default) {
                violations.push(
                    format!("{}.default", location),
                    format!("default does not match declared type {}", param_type),
                );
            }
        }
        if let Some(allowed) = &raw.allowed {
            if allowed.is_empty() {
                violations.push(format!("{}.enum", location), "enum must not be empty");
            }
            for (i, member) in allowed.iter().enumerate() {
                if !param_type.matches(member) {
                    violations.push(
                        format!("{}.enum[{}]", location, i),
                        format!("enum member does not match declared type {}", param_type),
                    );
                }
            }
            if let Some(default) = &raw.default {
                if !allowed.contains(default) {
                    violations.push(
                        format!("{}.default", location),
                        "default is not one of the enum members",
                    );
                }
            }
        }
    }

    if violations.0.len() > before {
        return None;
    }

    Some(ParameterDefinition {
        name: raw.name,
        param_type: param_type?,
        required: raw.required,
        description: raw.description,
        default: raw.default,
        allowed: raw.allowed,
    })
}

fn check_target(target: &str, location: &str, violations: &mut Violations) {
    let segments: Vec<&str> = target.split('.').collect();
    if target.is_empty() {
        violations.push(location, "effect target must not be empty");
        return;
    }
    if segments.iter().any(|s| s.is_empty() || s.chars().any(char::is_whitespace)) {
        violations.push(
            location,
            format!("effect target '{}' is not a dotted path", target),
        );
        return;
    }
    if segments.len() < 2 {
        violations.push(
            location,
            format!("effect target '{}' must name a field below a root", target),
        );
        return;
    }
    let root = segments[0];
    if !root.contains('{') && !STATE_ROOTS.contains(&root) {
        violations.push(
            location,
            format!(
                "effect target root '{}' is not one of {}",
                root,
                STATE_ROOTS.join(", ")
            ),
        );
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn is_callable_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FUNCTION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
