//! CRUCIBLE CLI
//!
//! Command-line front end for the CRUCIBLE conformance test engine:
//! validate suite definitions, inspect requirement coverage, and execute
//! runs against the built-in stub procedures.

mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::error;

use crucible_core::{
    Engine, FnProcedure, Outcome, ProcedureRegistry, RunnableIndex, SelectedOptions, init_tracing,
    load_suite,
};

#[derive(Parser)]
#[command(name = "crucible")]
#[command(about = "CRUCIBLE: conformance test suite execution engine")]
#[command(version = crucible_core::VERSION)]
#[command(
    long_about = "CRUCIBLE executes hierarchically organized conformance test suites.\n\
\n\
Examples:\n  \
crucible validate suite.json          # Check a suite definition\n  \
crucible coverage suite.json -o ig_version=2\n  \
crucible run suite.json --target smart_launch -o ig_version=2 -i url=https://fhir.example.com"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a suite definition file
    Validate {
        /// Path to the suite definition (JSON)
        definition: PathBuf,
    },

    /// Print the requirement coverage for an option selection
    Coverage {
        definition: PathBuf,

        /// Suite option selection (repeatable, key=value)
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Execute a suite, group, or test using the stub procedures
    Run {
        definition: PathBuf,

        /// Runnable to execute (default: the suite itself)
        #[arg(short, long)]
        target: Option<String>,

        /// Suite option selection (repeatable, key=value)
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Input value (repeatable, key=value)
        #[arg(short = 'i', long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,
    },
}

/// Stub procedures for exercising definitions without a real test kit
fn stub_registry() -> ProcedureRegistry {
    let registry = ProcedureRegistry::new();
    registry.register("always_pass", Arc::new(FnProcedure::new(|_| Outcome::Pass)));
    registry.register(
        "always_fail",
        Arc::new(FnProcedure::new(|_| Outcome::Fail("stub failure".to_string()))),
    );
    registry.register(
        "always_skip",
        Arc::new(FnProcedure::new(|_| Outcome::Skip("stubbed out".to_string()))),
    );
    registry.register("omit", Arc::new(FnProcedure::new(|_| Outcome::Omit)));
    registry
}

fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("expected key=value, got '{pair}'"))
        })
        .collect()
}

fn load_engine(definition: &PathBuf) -> Result<(Engine, String)> {
    let json = std::fs::read_to_string(definition)
        .with_context(|| format!("failed to read {}", definition.display()))?;
    let suite = load_suite(&json, &stub_registry())?;
    let suite_id = suite.id.clone();
    let index = Arc::new(RunnableIndex::new());
    index.register_suite(suite)?;
    Ok((Engine::new(index), suite_id))
}

async fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Validate { definition } => {
            let (_, suite_id) = load_engine(&definition)?;
            println!("ok: suite '{suite_id}' is well-formed");
        }
        Commands::Coverage { definition, options } => {
            let (engine, suite_id) = load_engine(&definition)?;
            let selection: SelectedOptions = parse_pairs(&options)?.into_iter().collect();
            for requirement in engine.coverage(&suite_id, &selection)? {
                println!("{requirement}");
            }
        }
        Commands::Run {
            definition,
            target,
            options,
            inputs,
        } => {
            let (engine, suite_id) = load_engine(&definition)?;
            let selection: SelectedOptions = parse_pairs(&options)?.into_iter().collect();
            let inputs: IndexMap<String, Value> = parse_pairs(&inputs)?
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();

            let session = engine.create_session(&suite_id, &selection)?;
            let target = target.unwrap_or(suite_id);
            let run = engine.run(session.id, &target, inputs).await?;
            let aggregate = engine.aggregate_status(run.id, &target).await?;
            output::print_run(&run, aggregate);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        unsafe { std::env::set_var("RUST_LOG", "crucible=debug") };
    }
    init_tracing();

    if let Err(err) = run_command(cli.command).await {
        error!("{err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
