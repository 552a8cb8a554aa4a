//! Active ruleset lifecycle.
//!
//! Documents are loaded into a set keyed by `id@version`; one of them is active at a
//! time. Activation synthesizes every phase up front and then swaps an `Arc` under a
//! write lock held only for the swap. Callers that took a [`RulesetManager::snapshot`]
//! keep invoking against it until they drop it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::effects::StateStore;
use crate::error::{ArgumentError, ErrorKind, ManagerError};
use crate::functions::{Callable, FunctionSchema, FunctionSynthesizer, InvocationError, InvocationResult};
use crate::lua::{ExpressionEvaluator, LuaEvaluator};
use crate::ruleset::{load, load_with_format, DocumentId, Phase, RulesetCatalog, RulesetDocument};

/// A document that passed structural validation.
#[derive(Debug, Clone)]
pub struct LoadedRuleset {
    pub document: Arc<RulesetDocument>,
    pub loaded_at: DateTime<Utc>,
}

/// The ruleset currently answering invocations, with its callables.
#[derive(Debug)]
pub struct ActiveRuleset {
    document: Arc<RulesetDocument>,
    generation: u64,
    activated_at: DateTime<Utc>,
    functions: BTreeMap<Phase, Vec<Callable>>,
}

impl ActiveRuleset {
    pub fn document(&self) -> &Arc<RulesetDocument> {
        &self.document
    }

    pub fn id(&self) -> DocumentId {
        self.document.id()
    }

    /// Increases by one on every activation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    pub fn functions(&self, phase: Phase) -> &[Callable] {
        self.functions.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn function(&self, phase: Phase, name: &str) -> Option<&Callable> {
        self.functions(phase).iter().find(|c| c.name() == name)
    }

    pub fn schemas(&self, phase: Phase) -> Vec<FunctionSchema> {
        self.functions(phase).iter().map(|c| c.schema().clone()).collect()
    }

    pub fn prompt_template(&self, phase: Phase) -> Option<&str> {
        self.document.prompt_template(phase)
    }

    pub fn invoke(&self, phase: Phase, name: &str, args: &Map<String, Value>) -> InvocationResult {
        match self.function(phase, name) {
            Some(callable) => callable.invoke(args),
            None => {
                let err = ArgumentError::UnknownFunction {
                    name: name.to_string(),
                    phase: phase.to_string(),
                };
                debug!(function = name, %phase, "Unknown function requested");
                InvocationResult::failed(
                    Uuid::new_v4(),
                    name,
                    phase,
                    self.document.id().as_str(),
                    InvocationError::new(ErrorKind::Argument, err.to_string()),
                )
            }
        }
    }
}

pub struct RulesetManager {
    synthesizer: FunctionSynthesizer,
    catalog: Option<RulesetCatalog>,
    loaded: RwLock<BTreeMap<DocumentId, LoadedRuleset>>,
    active: RwLock<Option<Arc<ActiveRuleset>>>,
    previous: RwLock<Option<Arc<ActiveRuleset>>>,
    generation: AtomicU64,
    phase: RwLock<Phase>,
}

impl RulesetManager {
    pub fn new(
        evaluator: Arc<dyn ExpressionEvaluator>,
        store: Arc<dyn StateStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            synthesizer: FunctionSynthesizer::new(evaluator, store, timeout),
            catalog: None,
            loaded: RwLock::new(BTreeMap::new()),
            active: RwLock::new(None),
            previous: RwLock::new(None),
            generation: AtomicU64::new(0),
            phase: RwLock::new(Phase::Setup),
        }
    }

    pub fn with_catalog(mut self, catalog: RulesetCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Build a manager with the Lua evaluator and the configured catalog, activating
    /// the configured default ruleset if there is one.
    pub fn from_config(config: &RuntimeConfig, store: Arc<dyn StateStore>) -> anyhow::Result<Self> {
        let evaluator = Arc::new(LuaEvaluator::new(config.evaluation.limits()));
        let mut manager = Self::new(evaluator, store, config.evaluation.timeout());

        if let Some(dir) = &config.rulesets_dir {
            let catalog = RulesetCatalog::scan(dir)
                .with_context(|| format!("Failed to scan rulesets in {}", dir.display()))?;
            info!(dir = %dir.display(), rulesets = catalog.len(), "Ruleset catalog ready");
            manager = manager.with_catalog(catalog);
        }

        if let Some(id) = &config.default_ruleset {
            manager
                .activate(id)
                .with_context(|| format!("Failed to activate default ruleset '{}'", id))?;
        }

        Ok(manager)
    }

    pub fn catalog(&self) -> Option<&RulesetCatalog> {
        self.catalog.as_ref()
    }

    /// Parse and validate a document into the loaded set. The active ruleset is untouched.
    pub fn load_ruleset(&self, bytes: &[u8]) -> Result<DocumentId, ManagerError> {
        let document = load(bytes).map_err(ManagerError::Structural)?;
        Ok(self.insert_loaded(document))
    }

    /// Load a ruleset by id through the catalog.
    pub fn load_ruleset_by_id(&self, id: &str) -> Result<DocumentId, ManagerError> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| ManagerError::NotInCatalog(id.to_string()))?;
        if catalog.get(id).is_none() {
            return Err(ManagerError::NotInCatalog(id.to_string()));
        }
        let (bytes, format) = catalog
            .read_source(id)
            .map_err(|e| ManagerError::Source(format!("{:#}", e)))?;
        let document = load_with_format(&bytes, format).map_err(ManagerError::Structural)?;
        Ok(self.insert_loaded(document))
    }

    /// Add an already validated document to the loaded set.
    pub fn insert_loaded(&self, document: RulesetDocument) -> DocumentId {
        let id = document.id();
        let entry = LoadedRuleset {
            document: Arc::new(document),
            loaded_at: Utc::now(),
        };

        let mut loaded = self.loaded.write();
        if let Some(existing) = loaded.get(&id) {
            if existing.document.fingerprint() != entry.document.fingerprint() {
                warn!(ruleset = %id, "Reloaded ruleset changed content without a version bump");
            }
        }
        info!(ruleset = %id, functions = entry.document.function_count(), "Ruleset loaded");
        loaded.insert(id.clone(), entry);
        id
    }

    pub fn loaded(&self) -> Vec<LoadedRuleset> {
        self.loaded.read().values().cloned().collect()
    }

    pub fn is_loaded(&self, id: &DocumentId) -> bool {
        self.loaded.read().contains_key(id)
    }

    /// Make a loaded document active.
    ///
    /// Every phase is synthesized before the swap; on failure the current active
    /// ruleset stays in place. Game state is never touched.
    #[instrument(skip(self))]
    pub fn set_active(&self, id: &DocumentId) -> Result<Arc<ActiveRuleset>, ManagerError> {
        let document = self
            .loaded
            .read()
            .get(id)
            .map(|entry| Arc::clone(&entry.document))
            .ok_or_else(|| ManagerError::NotLoaded(id.to_string()))?;

        let functions = self.synthesizer.synthesize_all(&document).map_err(|errors| {
            for error in &errors {
                warn!(ruleset = %id, location = %error.location, "Cannot activate ruleset: {}", error.message);
            }
            ManagerError::Structural(errors)
        })?;

        let next = Arc::new(ActiveRuleset {
            document,
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            activated_at: Utc::now(),
            functions,
        });

        let replaced = self.active.write().replace(Arc::clone(&next));
        if let Some(old) = &replaced {
            debug!(ruleset = %old.id(), generation = old.generation(), "Ruleset retired");
        }
        *self.previous.write() = replaced;

        info!(ruleset = %id, generation = next.generation(), "Ruleset activated");
        Ok(next)
    }

    /// Load from the catalog if needed, then activate.
    pub fn activate(&self, id: &str) -> Result<Arc<ActiveRuleset>, ManagerError> {
        let document_id = match id.parse::<DocumentId>() {
            Ok(full) if self.is_loaded(&full) => full,
            _ => self.load_ruleset_by_id(id)?,
        };
        self.set_active(&document_id)
    }

    /// The active ruleset as of now. Holding it pins that version.
    pub fn snapshot(&self) -> Option<Arc<ActiveRuleset>> {
        self.active.read().clone()
    }

    /// The ruleset active before the latest swap.
    pub fn previous(&self) -> Option<Arc<ActiveRuleset>> {
        self.previous.read().clone()
    }

    fn require_active(&self) -> Result<Arc<ActiveRuleset>, ManagerError> {
        self.snapshot().ok_or(ManagerError::NoActiveRuleset)
    }

    pub fn get_phase_functions(&self, phase: Phase) -> Result<Vec<Callable>, ManagerError> {
        Ok(self.require_active()?.functions(phase).to_vec())
    }

    pub fn get_prompt_template(&self, phase: Phase) -> Result<Option<String>, ManagerError> {
        Ok(self.require_active()?.prompt_template(phase).map(str::to_string))
    }

    pub fn list_phase_function_schemas(&self, phase: Phase) -> Result<Vec<FunctionSchema>, ManagerError> {
        Ok(self.require_active()?.schemas(phase))
    }

    pub fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.write();
        let from = *current;
        if from != phase {
            info!(%from, to = %phase, "Phase changed");
            *current = phase;
        }
    }

    pub fn current_phase(&self) -> Phase {
        *self.phase.read()
    }

    /// Invoke a function of the current phase.
    pub fn invoke(&self, name: &str, args: &Map<String, Value>) -> InvocationResult {
        self.invoke_in(self.current_phase(), name, args)
    }

    /// Invoke a function of `phase` against the ruleset active at call time.
    pub fn invoke_in(&self, phase: Phase, name: &str, args: &Map<String, Value>) -> InvocationResult {
        match self.snapshot() {
            Some(active) => active.invoke(phase, name, args),
            None => no_active_result(phase, name),
        }
    }

    /// [`Self::invoke_in`] on the blocking pool. The snapshot is taken before spawning.
    pub async fn invoke_async(
        &self,
        phase: Phase,
        name: String,
        args: Map<String, Value>,
    ) -> InvocationResult {
        let Some(active) = self.snapshot() else {
            return no_active_result(phase, &name);
        };
        let task_name = name.clone();
        let ruleset = active.id().to_string();

        match tokio::task::spawn_blocking(move || active.invoke(phase, &task_name, &args)).await {
            Ok(result) => result,
            Err(err) => InvocationResult::failed(
                Uuid::new_v4(),
                &name,
                phase,
                &ruleset,
                InvocationError::new(ErrorKind::Runtime, format!("invocation task failed: {}", err)),
            ),
        }
    }
}

fn no_active_result(phase: Phase, name: &str) -> InvocationResult {
    InvocationResult::failed(
        Uuid::new_v4(),
        name,
        phase,
        "",
        InvocationError::new(ErrorKind::Structural, ManagerError::NoActiveRuleset.to_string()),
    )
}
