//! Structured outcome of one function invocation.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::effects::AppliedEffect;
use crate::error::ErrorKind;
use crate::ruleset::{EffectOperation, Phase};

/// A rule that evaluated falsy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedValidation {
    pub index: usize,
    /// The expression after placeholder substitution.
    pub expression: String,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl InvocationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub invocation_id: Uuid,
    pub function: String,
    pub phase: Phase,
    pub ruleset: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub effects_applied: Vec<AppliedEffect>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_validations: Vec<FailedValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
    /// One-line narration of what happened.
    pub summary: String,
}

impl InvocationResult {
    fn base(invocation_id: Uuid, function: &str, phase: Phase, ruleset: &str) -> Self {
        Self {
            invocation_id,
            function: function.to_string(),
            phase,
            ruleset: ruleset.to_string(),
            success: false,
            effects_applied: Vec::new(),
            failed_validations: Vec::new(),
            error: None,
            summary: String::new(),
        }
    }

    pub fn succeeded(
        invocation_id: Uuid,
        function: &str,
        phase: Phase,
        ruleset: &str,
        effects_applied: Vec<AppliedEffect>,
    ) -> Self {
        let mut result = Self::base(invocation_id, function, phase, ruleset);
        result.success = true;
        result.summary = success_summary(function, &effects_applied);
        result.effects_applied = effects_applied;
        result
    }

    pub fn rejected(
        invocation_id: Uuid,
        function: &str,
        phase: Phase,
        ruleset: &str,
        total_rules: usize,
        failed_validations: Vec<FailedValidation>,
    ) -> Self {
        let mut result = Self::base(invocation_id, function, phase, ruleset);
        let failed: Vec<&str> = failed_validations
            .iter()
            .map(|f| f.expression.as_str())
            .collect();
        result.summary = format!(
            "{} was not allowed: {} of {} rule(s) failed ({})",
            function,
            failed.len(),
            total_rules,
            failed.join("; ")
        );
        result.failed_validations = failed_validations;
        result
    }

    pub fn failed(
        invocation_id: Uuid,
        function: &str,
        phase: Phase,
        ruleset: &str,
        error: InvocationError,
    ) -> Self {
        let mut result = Self::base(invocation_id, function, phase, ruleset);
        result.summary = format!("{} failed ({}): {}", function, error.kind, error.message);
        result.error = Some(error);
        result
    }

    /// Error category, `None` on success. Failed rules report
    /// [`ErrorKind::ValidationFailure`].
    pub fn kind(&self) -> Option<ErrorKind> {
        if self.success {
            return None;
        }
        match &self.error {
            Some(error) => Some(error.kind),
            None => Some(ErrorKind::ValidationFailure),
        }
    }
}

fn success_summary(function: &str, effects: &[AppliedEffect]) -> String {
    if effects.is_empty() {
        return format!("{} succeeded with no state changes", function);
    }
    let changes: Vec<String> = effects.iter().map(describe_effect).collect();
    format!("{} succeeded: {}", function, changes.join("; "))
}

fn describe_effect(effect: &AppliedEffect) -> String {
    match effect.operation {
        EffectOperation::Set => format!("{} set to {}", effect.target, effect.value),
        EffectOperation::Add => format!(
            "{} changed by {} (now {})",
            effect.target, effect.value, effect.current
        ),
        EffectOperation::Remove if effect.current.is_null() => {
            format!("{} removed", effect.target)
        }
        EffectOperation::Remove => format!("{} removed from {}", effect.value, effect.target),
        EffectOperation::Append => format!("{} added to {}", effect.value, effect.target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn applied(target: &str, operation: EffectOperation, value: Value, current: Value) -> AppliedEffect {
        AppliedEffect {
            target: target.into(),
            operation,
            value,
            previous: Value::Null,
            current,
        }
    }

    #[test]
    fn test_success_summary() {
        let result = InvocationResult::succeeded(
            Uuid::new_v4(),
            "select_race",
            Phase::CharacterCreation,
            "demo@1",
            vec![
                applied("character.race", EffectOperation::Set, json!("elf"), json!("elf")),
                applied("character.gold", EffectOperation::Add, json!(5), json!(15)),
            ],
        );
        assert!(result.success);
        assert_eq!(result.kind(), None);
        assert_eq!(
            result.summary,
            "select_race succeeded: character.race set to \"elf\"; character.gold changed by 5 (now 15)"
        );
    }

    #[test]
    fn test_rejected_kind() {
        let result = InvocationResult::rejected(
            Uuid::new_v4(),
            "select_race",
            Phase::CharacterCreation,
            "demo@1",
            2,
            vec![FailedValidation {
                index: 0,
                expression: "character.race == ''".into(),
                result: json!(false),
            }],
        );
        assert!(!result.success);
        assert!(result.error.is_none());
        assert_eq!(result.kind(), Some(ErrorKind::ValidationFailure));
        assert!(result.summary.contains("1 of 2"));
    }

    #[test]
    fn test_failed_serializes_error() {
        let result = InvocationResult::failed(
            Uuid::new_v4(),
            "attack",
            Phase::Combat,
            "demo@1",
            InvocationError::new(ErrorKind::Argument, "missing required argument 'damage'"),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["error"]["kind"], json!("argument"));
        assert_eq!(value["success"], json!(false));
        assert!(value.get("effectsApplied").is_none());
        assert_eq!(result.kind(), Some(ErrorKind::Argument));
    }
}
