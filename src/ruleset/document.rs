//! Validated, immutable ruleset documents.
//!
//! Values of these types only come out of [`super::loader`], so every invariant the
//! loader checks holds for the lifetime of the document.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stage of a game session that scopes which functions are callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    CharacterCreation,
    Exploration,
    Dialogue,
    Combat,
    Rest,
    Progression,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Setup,
        Phase::CharacterCreation,
        Phase::Exploration,
        Phase::Dialogue,
        Phase::Combat,
        Phase::Rest,
        Phase::Progression,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::CharacterCreation => "character_creation",
            Phase::Exploration => "exploration",
            Phase::Dialogue => "dialogue",
            Phase::Combat => "combat",
            Phase::Rest => "rest",
            Phase::Progression => "progression",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    /// Accepts `character_creation`, `characterCreation` and `character-creation`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str().replace('_', "") == folded)
            .ok_or_else(|| format!("unknown phase '{}'", s))
    }
}

/// Declared type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    /// Does `value` have this type?
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(ParamType::String),
            "number" | "integer" => Ok(ParamType::Number),
            "boolean" | "bool" => Ok(ParamType::Boolean),
            "object" => Ok(ParamType::Object),
            "array" => Ok(ParamType::Array),
            _ => Err(format!("unknown parameter type '{}'", s)),
        }
    }
}

/// State mutation performed by an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectOperation {
    Set,
    Add,
    Remove,
    Append,
}

impl EffectOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectOperation::Set => "set",
            EffectOperation::Add => "add",
            EffectOperation::Remove => "remove",
            EffectOperation::Append => "append",
        }
    }
}

impl fmt::Display for EffectOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(EffectOperation::Set),
            "add" => Ok(EffectOperation::Add),
            "remove" => Ok(EffectOperation::Remove),
            "append" => Ok(EffectOperation::Append),
            _ => Err(format!(
                "unsupported operation '{}' (expected set, add, remove or append)",
                s
            )),
        }
    }
}

/// Ruleset identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    /// Dotted path, possibly containing placeholders.
    pub target: String,
    pub operation: EffectOperation,
    /// Literal value or template.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    #[serde(default)]
    pub rule_validations: Vec<String>,
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

impl FunctionDefinition {
    pub fn parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// `id@version`, the key a loaded document is stored under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: &str, version: &str) -> Self {
        Self(format!("{}@{}", id, version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before `@`.
    pub fn name(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(id, _)| id)
    }

    pub fn version(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, version)| version)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((id, version)) if !id.is_empty() && !version.is_empty() => {
                Ok(Self::new(id, version))
            }
            _ => Err(format!("document id '{}' is not of the form id@version", s)),
        }
    }
}

/// A loaded ruleset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetDocument {
    pub metadata: Metadata,
    pub functions_by_phase: BTreeMap<Phase, Vec<FunctionDefinition>>,
    pub game_data: BTreeMap<String, Value>,
    pub prompt_templates: BTreeMap<Phase, String>,
    #[serde(skip)]
    fingerprint: String,
}

impl RulesetDocument {
    pub(crate) fn new(
        metadata: Metadata,
        functions_by_phase: BTreeMap<Phase, Vec<FunctionDefinition>>,
        game_data: BTreeMap<String, Value>,
        prompt_templates: BTreeMap<Phase, String>,
    ) -> Self {
        let mut document = Self {
            metadata,
            functions_by_phase,
            game_data,
            prompt_templates,
            fingerprint: String::new(),
        };
        document.fingerprint = document.compute_fingerprint();
        document
    }

    pub fn id(&self) -> DocumentId {
        DocumentId::new(&self.metadata.id, &self.metadata.version)
    }

    /// Hex SHA-256 of the canonical JSON form.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.functions_by_phase.keys().copied()
    }

    pub fn functions(&self, phase: Phase) -> &[FunctionDefinition] {
        self.functions_by_phase
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn function_count(&self) -> usize {
        self.functions_by_phase.values().map(Vec::len).sum()
    }

    pub fn prompt_template(&self, phase: Phase) -> Option<&str> {
        self.prompt_templates.get(&phase).map(String::as_str)
    }

    /// Game data as one JSON object, the shape expressions see as `gameData`.
    pub fn game_data_value(&self) -> Value {
        Value::Object(
            self.game_data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Serialize back to the document format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn compute_fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
