//! Ruleset documents: model, loader, placeholder templates and the on-disk catalog.

pub mod catalog;
pub mod document;
pub mod loader;
pub mod template;

pub use catalog::{load_file, CatalogEntry, RulesetCatalog};
pub use document::{
    DocumentId, EffectOperation, EffectSpec, FunctionDefinition, Metadata, ParamType,
    ParameterDefinition, Phase, RulesetDocument,
};
pub use loader::{load, load_with_format, DocumentFormat, CONTEXT_NAMES, STATE_ROOTS};
pub use template::{TemplateError, RESERVED_ROOTS};
