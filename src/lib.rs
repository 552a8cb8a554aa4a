//! Ruleweave library - ruleset-driven game mechanics.
//!
//! Game rules are declared as data: phase-scoped functions with typed parameters,
//! validation expressions evaluated in a sandboxed Lua interpreter, and effects
//! applied atomically to named game-state roots.

pub mod cli;
pub mod config;
pub mod effects;
pub mod error;
pub mod functions;
pub mod lua;
pub mod manager;
pub mod ruleset;

pub use config::RuntimeConfig;
pub use effects::{InMemoryState, StateStore};
pub use error::{ErrorKind, ManagerError, StructuralError};
pub use functions::{Callable, FunctionSchema, InvocationResult};
pub use manager::{ActiveRuleset, RulesetManager};
pub use ruleset::{DocumentId, Phase, RulesetDocument};
