//! Lua engine for rule evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{DeserializeOptions, HookTriggers, Lua, LuaSerdeExt, SerializeOptions, Value, VmState};
use serde_json::{Map, Value as JsonValue};

use super::api::register_api;
use super::dialect::{as_return_chunk, lower};
use super::sandbox::{new_sandboxed_state, Deadline};
use crate::error::SandboxError;

/// Resource ceilings applied to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Wall-clock budget for one expression.
    pub timeout: Duration,
    /// Memory ceiling for the whole interpreter state, in bytes.
    pub memory_limit: usize,
    /// How many VM instructions run between deadline checks.
    pub instruction_interval: u32,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
            memory_limit: 8 * 1024 * 1024,
            instruction_interval: 1_000,
        }
    }
}

/// Evaluates one expression against a read-only context.
///
/// Implementations must not retain state between calls. Callers run
/// [`super::safety::check_expression`] first; evaluators do not repeat it.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expr: &str,
        context: &Map<String, JsonValue>,
        timeout: Duration,
    ) -> Result<JsonValue, SandboxError>;
}

/// A single sandboxed Lua state. Built per evaluation and dropped afterwards.
pub struct LuaEngine {
    lua: Lua,
}

impl LuaEngine {
    /// Create a sandboxed engine with the `rules` helper API registered.
    pub fn new() -> Result<Self, SandboxError> {
        let lua = new_sandboxed_state().map_err(|e| SandboxError::Setup(format!("{e:#}")))?;
        register_api(&lua).map_err(|e| SandboxError::Setup(format!("{e:#}")))?;
        Ok(Self { lua })
    }

    /// Create a sandboxed engine and cap its memory use.
    pub fn with_memory_limit(limit: usize) -> Result<Self, SandboxError> {
        let engine = Self::new()?;
        engine
            .lua
            .set_memory_limit(limit)
            .map_err(|e| SandboxError::Setup(e.to_string()))?;
        Ok(engine)
    }

    /// Create a Lua engine without sandbox (for testing only).
    #[cfg(test)]
    pub fn new_unsandboxed() -> Self {
        Self { lua: Lua::new() }
    }

    /// Abort execution once `deadline` passes. The returned flag records whether it fired.
    pub fn set_deadline(&self, deadline: Instant, instruction_interval: u32) -> Arc<AtomicBool> {
        let fired = Arc::new(AtomicBool::new(false));
        let hook_fired = Arc::clone(&fired);
        let triggers = HookTriggers::new().every_nth_instruction(instruction_interval.max(1));
        self.lua.set_hook(triggers, move |_lua, _debug| {
            if Instant::now() >= deadline {
                hook_fired.store(true, Ordering::SeqCst);
                return Err(mlua::Error::runtime("rule expression timed out"));
            }
            Ok(VmState::Continue)
        });
        self.lua.set_app_data(Deadline {
            at: deadline,
            fired: Arc::clone(&fired),
        });
        fired
    }

    /// Expose every context entry as a global. Values are copies.
    pub fn install_context(&self, context: &Map<String, JsonValue>) -> mlua::Result<()> {
        let globals = self.lua.globals();
        for (name, value) in context {
            let options = SerializeOptions::new()
                .serialize_none_to_null(false)
                .serialize_unit_to_null(false);
            let lua_value = self.lua.to_value_with(value, options)?;
            globals.set(name.as_str(), lua_value)?;
        }
        Ok(())
    }

    /// Evaluate a Lua expression (not a statement) and return its value.
    pub fn eval_expression(&self, expr: &str) -> mlua::Result<Value> {
        self.lua.load(as_return_chunk(expr)).set_name("rule").eval()
    }

    /// Convert an interpreter value into JSON.
    pub fn to_json(&self, value: Value) -> mlua::Result<JsonValue> {
        let options = DeserializeOptions::new().deny_unsupported_types(false);
        self.lua.from_value_with(value, options)
    }

    /// Get a global value.
    pub fn get_global<S: AsRef<str>>(&self, name: S) -> mlua::Result<Value> {
        self.lua.globals().get(name.as_ref())
    }

    /// Get access to the underlying Lua state.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

/// Production evaluator: a fresh [`LuaEngine`] per call.
#[derive(Debug, Clone, Default)]
pub struct LuaEvaluator {
    limits: SandboxLimits,
}

impl LuaEvaluator {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }
}

impl ExpressionEvaluator for LuaEvaluator {
    fn evaluate(
        &self,
        expr: &str,
        context: &Map<String, JsonValue>,
        timeout: Duration,
    ) -> Result<JsonValue, SandboxError> {
        let lowered = lower(expr).map_err(|e| SandboxError::Syntax(e.to_string()))?;
        let engine = LuaEngine::with_memory_limit(self.limits.memory_limit)?;
        let fired = engine.set_deadline(Instant::now() + timeout, self.limits.instruction_interval);

        let outcome = engine
            .install_context(context)
            .and_then(|_| engine.eval_expression(&lowered));

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                return Err(classify(
                    err,
                    fired.load(Ordering::SeqCst),
                    timeout,
                    self.limits.memory_limit,
                ))
            }
        };

        engine
            .to_json(value)
            .map_err(|e| SandboxError::Conversion(e.to_string()))
    }
}

fn classify(err: mlua::Error, timed_out: bool, timeout: Duration, limit: usize) -> SandboxError {
    if timed_out {
        return SandboxError::Timeout(timeout.as_millis() as u64);
    }
    if is_memory_error(&err) {
        return SandboxError::MemoryLimit(limit);
    }
    match err {
        mlua::Error::SyntaxError { message, .. } => SandboxError::Syntax(message),
        other => SandboxError::Script(other.to_string()),
    }
}

fn is_memory_error(err: &mlua::Error) -> bool {
    match err {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::CallbackError { cause, .. } => is_memory_error(cause),
        other => other.to_string().contains("not enough memory"),
    }
}

/// Rule truthiness: `false`, nil, zero, NaN and `""` fail; everything else passes.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}
