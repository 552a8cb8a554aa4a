//! Ruleweave CLI - validate rulesets and run their functions.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ruleweave::cli::args::{CheckArgs, InvokeArgs, ListArgs, SchemasArgs, ValidateArgs};
use ruleweave::cli::{Cli, Command};
use ruleweave::lua::{check_expression, LuaEvaluator};
use ruleweave::ruleset::{load_file, RulesetCatalog, RulesetDocument, STATE_ROOTS};
use ruleweave::{InMemoryState, RulesetManager, RuntimeConfig};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ruleweave=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let outcome = RuntimeConfig::load(cli.config.as_deref()).and_then(|config| match cli.command {
        Command::Validate(args) => run_validate(args),
        Command::Schemas(args) => run_schemas(&config, args),
        Command::Invoke(args) => run_invoke(&config, args),
        Command::Check(args) => run_check(args),
        Command::List(args) => run_list(&config, args),
    });

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_validate(args: ValidateArgs) -> Result<ExitCode> {
    let document = match load_file(&args.file)? {
        Ok(document) => document,
        Err(errors) => {
            println!("{}: {} structural error(s)", args.file.display(), errors.len());
            for error in &errors {
                println!("  {}", error);
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    let unsafe_rules = unsafe_validations(&document);
    if !unsafe_rules.is_empty() {
        println!("{}: {} unsafe rule expression(s)", args.file.display(), unsafe_rules.len());
        for line in &unsafe_rules {
            println!("  {}", line);
        }
        return Ok(ExitCode::FAILURE);
    }

    println!(
        "{}: valid ({} functions across {} phases)",
        document.id(),
        document.function_count(),
        document.phases().count()
    );
    Ok(ExitCode::SUCCESS)
}

fn run_schemas(config: &RuntimeConfig, args: SchemasArgs) -> Result<ExitCode> {
    let store = Arc::new(InMemoryState::with_roots(STATE_ROOTS));
    let manager = activate_file(config, &args.file, store)?;
    let schemas = manager.list_phase_function_schemas(args.phase)?;
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(ExitCode::SUCCESS)
}

fn run_invoke(config: &RuntimeConfig, args: InvokeArgs) -> Result<ExitCode> {
    let arguments: Map<String, Value> =
        serde_json::from_str(&args.args).context("--args must be a JSON object")?;

    let mut state = match &args.state {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read state: {}", path.display()))?;
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse state: {}", path.display()))?;
            InMemoryState::from_json(value)?
        }
        None => InMemoryState::new(),
    };
    let snapshot = state.to_json();
    for root in STATE_ROOTS {
        if snapshot.get(root).is_none() {
            state.insert_root(root, Value::Object(Map::new()));
        }
    }

    let store = Arc::new(state);
    let manager = activate_file(config, &args.file, Arc::clone(&store))?;
    let result = manager.invoke_in(args.phase, &args.function, &arguments);
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        return Ok(ExitCode::FAILURE);
    }

    if let (true, Some(path)) = (args.write, &args.state) {
        let updated = serde_json::to_string_pretty(&store.to_json())?;
        std::fs::write(path, updated)
            .with_context(|| format!("Failed to write state: {}", path.display()))?;
        eprintln!("State written to {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn run_check(args: CheckArgs) -> Result<ExitCode> {
    let report = check_expression(&args.expression);
    if report.is_safe() {
        println!("safe");
        return Ok(ExitCode::SUCCESS);
    }
    println!("unsafe");
    for violation in &report.violations {
        println!("  {}", violation);
    }
    Ok(ExitCode::FAILURE)
}

fn run_list(config: &RuntimeConfig, args: ListArgs) -> Result<ExitCode> {
    let dir = args
        .dir
        .or_else(|| config.rulesets_dir.clone())
        .context("No rulesets directory; pass --dir or set RULEWEAVE_RULESETS_DIR")?;
    let catalog = RulesetCatalog::scan(&dir)?;

    if catalog.is_empty() {
        println!("No rulesets found in {}", dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    for entry in catalog.entries() {
        println!("{}\t{}\t{}", entry.id, entry.name, entry.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

/// Load a ruleset file into a fresh manager and make it active.
fn activate_file(config: &RuntimeConfig, path: &Path, store: Arc<InMemoryState>) -> Result<RulesetManager> {
    let document = match load_file(path)? {
        Ok(document) => document,
        Err(errors) => {
            for error in &errors {
                eprintln!("  {}", error);
            }
            anyhow::bail!("{} has {} structural error(s)", path.display(), errors.len());
        }
    };

    let evaluator = Arc::new(LuaEvaluator::new(config.evaluation.limits()));
    let manager = RulesetManager::new(evaluator, store, config.evaluation.timeout());
    let id = manager.insert_loaded(document);
    manager.set_active(&id).map_err(|e| {
        for violation in e.violations() {
            eprintln!("  {}", violation);
        }
        anyhow::Error::new(e)
    })?;
    Ok(manager)
}

fn unsafe_validations(document: &RulesetDocument) -> Vec<String> {
    let mut found = Vec::new();
    for phase in document.phases() {
        for (index, function) in document.functions(phase).iter().enumerate() {
            for (rule, expr) in function.rule_validations.iter().enumerate() {
                for violation in check_expression(expr).violations {
                    found.push(format!(
                        "functionsByPhase.{}[{}].ruleValidations[{}]: {}",
                        phase, index, rule, violation
                    ));
                }
            }
        }
    }
    found
}
