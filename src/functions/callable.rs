//! A synthesized, invocable ruleset function.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::binding::ArgumentBinder;
use super::result::{FailedValidation, InvocationError, InvocationResult};
use super::schema::FunctionSchema;
use crate::effects::{EffectApplicator, ResolvedEffect, StateStore};
use crate::error::{ApplicationError, ErrorKind, SandboxError};
use crate::lua::{check_expression, is_truthy, ExpressionEvaluator};
use crate::ruleset::template::{resolve_value, substitute, substitute_expression, TemplateError};
use crate::ruleset::{FunctionDefinition, Phase, RulesetDocument, STATE_ROOTS};

/// Validations and effects with every placeholder bound.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInvocation {
    pub arguments: Map<String, Value>,
    pub validations: Vec<String>,
    pub effects: Vec<ResolvedEffect>,
}

/// One ruleset function bound to an evaluator and a state store.
#[derive(Clone)]
pub struct Callable {
    definition: Arc<FunctionDefinition>,
    phase: Phase,
    document: Arc<RulesetDocument>,
    game_data: Arc<Value>,
    schema: FunctionSchema,
    binder: ArgumentBinder,
    evaluator: Arc<dyn ExpressionEvaluator>,
    store: Arc<dyn StateStore>,
    timeout: Duration,
}

impl Callable {
    pub(crate) fn new(
        definition: FunctionDefinition,
        phase: Phase,
        document: Arc<RulesetDocument>,
        game_data: Arc<Value>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        store: Arc<dyn StateStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            schema: FunctionSchema::from_definition(&definition),
            binder: ArgumentBinder::new(&definition),
            definition: Arc::new(definition),
            phase,
            document,
            game_data,
            evaluator,
            store,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    pub fn schema(&self) -> &FunctionSchema {
        &self.schema
    }

    pub fn document(&self) -> &Arc<RulesetDocument> {
        &self.document
    }

    /// Bind arguments and substitute them into validations and effects.
    pub fn resolve(&self, args: &Map<String, Value>) -> Result<ResolvedInvocation, InvocationError> {
        let arguments = self.binder.bind(args).map_err(|errors| {
            let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
            InvocationError::new(ErrorKind::Argument, details.join("; ")).with_details(details)
        })?;

        let validations = self
            .definition
            .rule_validations
            .iter()
            .map(|expr| substitute_expression(expr, &arguments))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                let kind = match e {
                    TemplateError::UnsafeArgument { .. } => ErrorKind::Argument,
                    TemplateError::Unresolved(_) => ErrorKind::Structural,
                };
                InvocationError::new(kind, e.to_string())
            })?;

        let mut effects = Vec::with_capacity(self.definition.effects.len());
        for spec in &self.definition.effects {
            let target = substitute(&spec.target, &arguments)
                .map_err(|e| InvocationError::new(ErrorKind::Structural, e.to_string()))?;
            let value = resolve_value(&spec.value, &arguments)
                .map_err(|e| InvocationError::new(ErrorKind::Structural, e.to_string()))?;
            let effect = ResolvedEffect::new(&target, spec.operation, value)
                .map_err(|e| InvocationError::new(ErrorKind::Application, e.to_string()))?;
            if !self.store.has_root(effect.target.root()) {
                let err = ApplicationError::UnknownRoot(effect.target.root().to_string());
                return Err(InvocationError::new(ErrorKind::Application, err.to_string()));
            }
            effects.push(effect);
        }

        Ok(ResolvedInvocation {
            arguments,
            validations,
            effects,
        })
    }

    /// Run the full pipeline: bind, resolve, check, validate, apply.
    ///
    /// Never panics on ruleset or argument problems and never leaves partially
    /// applied state; every outcome is reported through the result.
    #[instrument(
        skip(self, args),
        fields(function = %self.definition.name, phase = %self.phase, ruleset = %self.document.id())
    )]
    pub fn invoke(&self, args: &Map<String, Value>) -> InvocationResult {
        let invocation_id = Uuid::new_v4();
        let ruleset = self.document.id().to_string();
        let name = self.definition.name.as_str();
        let fail = |error: InvocationError| {
            InvocationResult::failed(invocation_id, name, self.phase, &ruleset, error)
        };

        let resolved = match self.resolve(args) {
            Ok(resolved) => resolved,
            Err(error) => {
                debug!(%invocation_id, "Invocation rejected during resolution: {}", error.message);
                return fail(error);
            }
        };

        let violations: Vec<String> = resolved
            .validations
            .iter()
            .enumerate()
            .flat_map(|(index, expr)| {
                check_expression(expr)
                    .violations
                    .into_iter()
                    .map(move |v| format!("ruleValidations[{}]: {}", index, v))
            })
            .collect();
        if !violations.is_empty() {
            warn!(
                %invocation_id,
                violations = violations.len(),
                "Unsafe rule expression refused: {}",
                violations.join("; ")
            );
            let error = InvocationError::new(
                ErrorKind::SecurityViolation,
                format!("{} unsafe construct(s) in rule expressions", violations.len()),
            )
            .with_details(violations);
            return fail(error);
        }

        // Roots only read are copied before any lock is taken; roots about to be
        // written are read through the batch so validation sees what gets mutated.
        let written = EffectApplicator::roots_of(&resolved.effects);
        let mut context = resolved.arguments.clone();
        for root in STATE_ROOTS {
            if written.iter().any(|w| w == root) {
                continue;
            }
            if let Some(value) = self.store.read_root(root) {
                context.insert(root.to_string(), value);
            }
        }
        context.insert("gameData".to_string(), self.game_data.as_ref().clone());

        let mut batch = if written.is_empty() {
            None
        } else {
            match self.store.begin(&written) {
                Ok(batch) => Some(batch),
                Err(err) => return fail(InvocationError::new(ErrorKind::Application, err.to_string())),
            }
        };
        if let Some(batch) = &batch {
            for root in &written {
                if let Some(value) = batch.view(root) {
                    context.insert(root.clone(), value.clone());
                }
            }
        }

        let failed = match self.run_validations(&resolved.validations, &context) {
            Ok(failed) => failed,
            Err((index, err)) => {
                let error = InvocationError::new(
                    ErrorKind::Runtime,
                    format!("ruleValidations[{}]: {}", index, err),
                );
                return fail(error);
            }
        };
        if !failed.is_empty() {
            debug!(%invocation_id, failed = failed.len(), "Rules not satisfied");
            return InvocationResult::rejected(
                invocation_id,
                name,
                self.phase,
                &ruleset,
                resolved.validations.len(),
                failed,
            );
        }

        let applied = match batch.as_mut() {
            None => Vec::new(),
            Some(open) => match EffectApplicator::stage(open.as_mut(), &resolved.effects) {
                Ok(applied) => applied,
                Err(err) => return fail(InvocationError::new(ErrorKind::Application, err.to_string())),
            },
        };
        if let Some(open) = batch.take() {
            open.commit();
        }

        info!(%invocation_id, effects = applied.len(), "Function applied");
        InvocationResult::succeeded(invocation_id, name, self.phase, &ruleset, applied)
    }

    /// Evaluate every rule in order. A runtime failure stops evaluation.
    fn run_validations(
        &self,
        validations: &[String],
        context: &Map<String, Value>,
    ) -> Result<Vec<FailedValidation>, (usize, SandboxError)> {
        let mut failed = Vec::new();
        for (index, expression) in validations.iter().enumerate() {
            let result = self
                .evaluator
                .evaluate(expression, context, self.timeout)
                .map_err(|err| (index, err))?;
            debug!(index, expression = %expression, result = %result, "Evaluated rule");
            if !is_truthy(&result) {
                failed.push(FailedValidation {
                    index,
                    expression: expression.clone(),
                    result,
                });
            }
        }
        Ok(failed)
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.definition.name)
            .field("phase", &self.phase)
            .field("ruleset", &self.document.id())
            .finish()
    }
}
