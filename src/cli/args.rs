//! Command-line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::ruleset::Phase;

/// Ruleset-driven game mechanics: validate rulesets and run their functions.
#[derive(Parser, Debug)]
#[command(name = "ruleweave")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the per-user config if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a ruleset document and report every structural problem.
    Validate(ValidateArgs),

    /// Print the tool-call schemas of one phase as JSON.
    Schemas(SchemasArgs),

    /// Invoke one ruleset function against a state file.
    Invoke(InvokeArgs),

    /// Run the static safety filter over an expression.
    Check(CheckArgs),

    /// List rulesets found in the rulesets directory.
    List(ListArgs),
}

/// Arguments for the validate command.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Ruleset file (JSON or YAML).
    pub file: PathBuf,
}

/// Arguments for the schemas command.
#[derive(Parser, Debug)]
pub struct SchemasArgs {
    /// Ruleset file (JSON or YAML).
    pub file: PathBuf,

    /// Phase whose functions to describe.
    #[arg(long)]
    pub phase: Phase,
}

/// Arguments for the invoke command.
#[derive(Parser, Debug)]
pub struct InvokeArgs {
    /// Ruleset file (JSON or YAML).
    pub file: PathBuf,

    /// Phase the function belongs to.
    #[arg(long)]
    pub phase: Phase,

    /// Function name.
    #[arg(long)]
    pub function: String,

    /// Arguments as a JSON object.
    #[arg(long, default_value = "{}")]
    pub args: String,

    /// State file holding `{"character": ..., "gameState": ...}`.
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Write the mutated state back to the state file on success.
    #[arg(long, requires = "state")]
    pub write: bool,
}

/// Arguments for the check command.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Expression to check.
    pub expression: String,
}

/// Arguments for the list command.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Rulesets directory (overrides configuration).
    #[arg(long)]
    pub dir: Option<PathBuf>,
}
