//! Applies a resolved effect list as one transaction.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::path::StatePath;
use super::state::{StagedBatch, StateStore};
use crate::error::ApplicationError;
use crate::ruleset::EffectOperation;

/// An effect with every placeholder already substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEffect {
    pub target: StatePath,
    pub operation: EffectOperation,
    pub value: Value,
}

impl ResolvedEffect {
    pub fn new(target: &str, operation: EffectOperation, value: Value) -> Result<Self, ApplicationError> {
        let target = StatePath::parse(target).map_err(|source| ApplicationError::InvalidTarget {
            target: target.to_string(),
            source,
        })?;
        Ok(Self {
            target,
            operation,
            value,
        })
    }
}

/// What one committed effect did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedEffect {
    pub target: String,
    pub operation: EffectOperation,
    pub value: Value,
    pub previous: Value,
    pub current: Value,
}

/// Stages effects in declaration order against a batch.
pub struct EffectApplicator;

impl EffectApplicator {
    /// Distinct roots written by `effects`, sorted.
    pub fn roots_of(effects: &[ResolvedEffect]) -> Vec<String> {
        let mut roots: Vec<String> = effects
            .iter()
            .map(|e| e.target.root().to_string())
            .collect();
        roots.sort();
        roots.dedup();
        roots
    }

    /// Stage every effect. Stops at the first failure; the caller then drops the batch.
    pub fn stage(
        batch: &mut (dyn StagedBatch + '_),
        effects: &[ResolvedEffect],
    ) -> Result<Vec<AppliedEffect>, ApplicationError> {
        let mut applied = Vec::with_capacity(effects.len());

        for (index, effect) in effects.iter().enumerate() {
            let change = batch
                .staged_set(&effect.target, effect.operation, &effect.value)
                .map_err(|err| match err {
                    ApplicationError::InvalidTarget { target, source } => ApplicationError::Rejected {
                        index,
                        target,
                        operation: effect.operation.to_string(),
                        source,
                    },
                    other => other,
                })?;

            debug!(
                token = %batch.token(),
                index,
                target = %effect.target,
                operation = %effect.operation,
                "Staged effect"
            );

            applied.push(AppliedEffect {
                target: effect.target.to_string(),
                operation: effect.operation,
                value: effect.value.clone(),
                previous: change.previous,
                current: change.current,
            });
        }

        Ok(applied)
    }

    /// Lock the touched roots, stage every effect and commit, or change nothing.
    #[instrument(skip_all, fields(effects = effects.len()))]
    pub fn apply(
        store: &dyn StateStore,
        effects: &[ResolvedEffect],
    ) -> Result<Vec<AppliedEffect>, ApplicationError> {
        if effects.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = store.begin(&Self::roots_of(effects))?;
        match Self::stage(batch.as_mut(), effects) {
            Ok(applied) => {
                batch.commit();
                Ok(applied)
            }
            Err(err) => {
                batch.rollback();
                Err(err)
            }
        }
    }
}
