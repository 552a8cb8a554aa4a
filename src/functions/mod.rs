//! Function synthesis: ruleset definitions become typed, invocable callables.

pub mod binding;
pub mod callable;
pub mod result;
pub mod schema;
pub mod synthesizer;

pub use binding::ArgumentBinder;
pub use callable::{Callable, ResolvedInvocation};
pub use result::{FailedValidation, InvocationError, InvocationResult};
pub use schema::FunctionSchema;
pub use synthesizer::FunctionSynthesizer;
