//! Turns ruleset function definitions into callables.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::callable::Callable;
use crate::effects::StateStore;
use crate::error::StructuralError;
use crate::lua::ExpressionEvaluator;
use crate::ruleset::{Phase, RulesetDocument};

/// Builds [`Callable`]s that share one evaluator and one state store.
#[derive(Clone)]
pub struct FunctionSynthesizer {
    evaluator: Arc<dyn ExpressionEvaluator>,
    store: Arc<dyn StateStore>,
    timeout: Duration,
}

impl FunctionSynthesizer {
    pub fn new(
        evaluator: Arc<dyn ExpressionEvaluator>,
        store: Arc<dyn StateStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            evaluator,
            store,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// One callable per function of `phase`, in declaration order.
    ///
    /// Fails if any effect targets a root the state store does not have.
    pub fn synthesize(
        &self,
        document: &Arc<RulesetDocument>,
        phase: Phase,
    ) -> Result<Vec<Callable>, Vec<StructuralError>> {
        let game_data = Arc::new(document.game_data_value());
        self.synthesize_phase(document, phase, &game_data)
    }

    /// Callables for every phase the document declares.
    pub fn synthesize_all(
        &self,
        document: &Arc<RulesetDocument>,
    ) -> Result<BTreeMap<Phase, Vec<Callable>>, Vec<StructuralError>> {
        let game_data = Arc::new(document.game_data_value());
        let mut phases = BTreeMap::new();
        let mut errors = Vec::new();

        for phase in document.phases() {
            match self.synthesize_phase(document, phase, &game_data) {
                Ok(callables) => {
                    phases.insert(phase, callables);
                }
                Err(mut phase_errors) => errors.append(&mut phase_errors),
            }
        }

        if errors.is_empty() {
            debug!(ruleset = %document.id(), phases = phases.len(), "Synthesized ruleset");
            Ok(phases)
        } else {
            Err(errors)
        }
    }

    fn synthesize_phase(
        &self,
        document: &Arc<RulesetDocument>,
        phase: Phase,
        game_data: &Arc<Value>,
    ) -> Result<Vec<Callable>, Vec<StructuralError>> {
        let roots = self.store.roots();
        let mut errors = Vec::new();

        for (index, definition) in document.functions(phase).iter().enumerate() {
            for (effect_index, effect) in definition.effects.iter().enumerate() {
                let root = effect.target.split('.').next().unwrap_or_default();
                // Placeholder roots are checked once the arguments are known.
                if root.contains('{') || roots.iter().any(|r| r == root) {
                    continue;
                }
                errors.push(StructuralError::new(
                    format!(
                        "functionsByPhase.{}[{}].effects[{}].target",
                        phase, index, effect_index
                    ),
                    format!("state root '{}' is not known to the state store", root),
                ));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(document
            .functions(phase)
            .iter()
            .map(|definition| {
                Callable::new(
                    definition.clone(),
                    phase,
                    Arc::clone(document),
                    Arc::clone(game_data),
                    Arc::clone(&self.evaluator),
                    Arc::clone(&self.store),
                    self.timeout,
                )
            })
            .collect())
    }
}
