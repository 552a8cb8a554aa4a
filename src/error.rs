//! Error types shared across the runtime.
//!
//! Every failure an invocation can hit maps onto one [`ErrorKind`]; none of them
//! leave partially applied state behind.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ruleset::ParamType;

/// Coarse error category reported to the invocation caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or inconsistent ruleset document.
    Structural,
    /// Expression rejected by the static safety filter.
    SecurityViolation,
    /// Missing or mistyped invocation arguments.
    Argument,
    /// One or more rules evaluated false. Not exceptional.
    ValidationFailure,
    /// Expression threw, timed out or ran out of memory.
    Runtime,
    /// Effect batch failed path or type resolution.
    Application,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Structural => "structural",
            ErrorKind::SecurityViolation => "security_violation",
            ErrorKind::Argument => "argument",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Application => "application",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem found while loading or synthesizing a ruleset.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{location}: {message}")]
pub struct StructuralError {
    /// Where in the document, e.g. `functionsByPhase.combat[0].effects[1].target`.
    pub location: String,
    pub message: String,
}

impl StructuralError {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Failure while evaluating an expression inside the sandbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("failed to prepare sandbox: {0}")]
    Setup(String),

    #[error("expression does not compile: {0}")]
    Syntax(String),

    #[error("expression raised an error: {0}")]
    Script(String),

    #[error("expression exceeded its {0} ms time limit")]
    Timeout(u64),

    #[error("expression exceeded its {0} byte memory limit")]
    MemoryLimit(usize),

    #[error("expression result cannot be represented: {0}")]
    Conversion(String),
}

/// Problem with the arguments supplied to a callable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgumentError {
    #[error("missing required argument '{0}'")]
    Missing(String),

    #[error("argument '{name}' must be a {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        found: &'static str,
    },

    #[error("argument '{name}' must be one of {allowed}")]
    NotAllowed { name: String, allowed: String },

    #[error("unknown argument '{0}'")]
    Unknown(String),

    #[error("unknown function '{name}' in phase '{phase}'")]
    UnknownFunction { name: String, phase: String },
}

/// Failure of a single path operation against a state value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path '{0}' has an empty segment")]
    EmptySegment(String),

    #[error("effects cannot replace the whole root '{0}'")]
    RootTarget(String),

    #[error("intermediate segment '{0}' does not exist")]
    MissingSegment(String),

    #[error("'{0}' is not an object or list")]
    NotAContainer(String),

    #[error("key '{0}' does not exist")]
    MissingKey(String),

    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value is not present in the list")]
    ValueNotFound,

    #[error("numeric overflow")]
    Overflow,
}

/// Failure of an effect batch. The batch is rolled back whenever this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("unknown state root '{0}'")]
    UnknownRoot(String),

    #[error("invalid effect target '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: PathError,
    },

    #[error("effect {index} ({operation} {target}) rejected: {source}")]
    Rejected {
        index: usize,
        target: String,
        operation: String,
        #[source]
        source: PathError,
    },

    #[error("state store failure: {0}")]
    Store(String),
}

/// Failure of a ruleset lifecycle operation.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("ruleset '{0}' is not loaded")]
    NotLoaded(String),

    #[error("ruleset '{0}' is not in the catalog")]
    NotInCatalog(String),

    #[error("ruleset failed structural validation with {} error(s)", .0.len())]
    Structural(Vec<StructuralError>),

    #[error("no ruleset is active")]
    NoActiveRuleset,

    #[error("failed to read ruleset source: {0}")]
    Source(String),
}

impl ManagerError {
    /// Structural violations carried by this error, if any.
    pub fn violations(&self) -> &[StructuralError] {
        match self {
            ManagerError::Structural(errors) => errors,
            _ => &[],
        }
    }
}
