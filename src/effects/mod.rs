//! Effect application against named state roots.

pub mod applicator;
pub mod path;
pub mod state;

pub use applicator::{AppliedEffect, EffectApplicator, ResolvedEffect};
pub use path::{Change, StatePath};
pub use state::{InMemoryState, StagedBatch, StateStore};
