//! Lua rules engine module.
//!
//! Expression sandbox for ruleset validations: a static safety filter, a C-style
//! to Lua lowering pass, and a fresh resource-capped interpreter per evaluation.

pub mod api;
pub mod dialect;
pub mod engine;
pub mod lexer;
pub mod safety;
pub mod sandbox;

pub use api::register_api;
pub use engine::{is_truthy, ExpressionEvaluator, LuaEngine, LuaEvaluator, SandboxLimits};
pub use safety::{check_expression, is_safe, SafetyReport, SafetyViolation, ViolationKind};
