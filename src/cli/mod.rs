//! CLI module for ruleweave.
//!
//! Defines command-line argument parsing for all subcommands.

pub mod args;

pub use args::{Cli, Command};
