//! Landeval CLI: evaluate one land listing from the master dataset.
//!
//! Usage:
//!   landeval keys [--store path]
//!   landeval run [--key K] [--store path] [--workspace dir] [--reports dir]
//!   landeval stages
//!   landeval schemas

use clap::{Parser, Subcommand};
use landeval::{
    resolve_selection, CancellationToken, Evaluation, RunConfig, RunError, SubprocessClient,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{warn, Level};

#[derive(Parser)]
#[command(name = "landeval", version, about = "Single-parcel land evaluation engine")]
struct Cli {
    /// Configuration file (default: ./landeval.yaml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the selectable listing keys
    Keys {
        #[command(flatten)]
        paths: PathOverrides,
    },
    /// Evaluate one listing and write its report
    Run {
        /// Listing key; prompts with the key list when absent
        #[arg(long)]
        key: Option<String>,
        #[command(flatten)]
        paths: PathOverrides,
        /// Maximum concurrent capability calls
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print the stage graph in execution order
    Stages,
    /// Print the segment schemas and their columns
    Schemas,
}

#[derive(clap::Args)]
struct PathOverrides {
    /// Master dataset file
    #[arg(long)]
    store: Option<PathBuf>,
    /// Ephemeral workspace directory
    #[arg(long)]
    workspace: Option<PathBuf>,
    /// Report output directory
    #[arg(long)]
    reports: Option<PathBuf>,
}

impl PathOverrides {
    fn apply(self, config: &mut RunConfig) {
        if let Some(store) = self.store {
            config.store_path = store;
        }
        if let Some(workspace) = self.workspace {
            config.workspace_dir = workspace;
        }
        if let Some(reports) = self.reports {
            config.reports_dir = reports;
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<RunConfig, RunError> {
    let config = match path {
        Some(path) => RunConfig::load(&path)?,
        None => RunConfig::discover()?,
    };
    Ok(config)
}

fn evaluation(config: RunConfig) -> Evaluation {
    let client = SubprocessClient::new(config.capability.program.clone(), config.capability.args.clone());
    Evaluation::new(config, Arc::new(client))
}

fn report_failure(err: &RunError) -> i32 {
    println!("failure [{}]: {}", err.kind(), err);
    err.exit_code()
}

fn cmd_keys(config: RunConfig) -> i32 {
    let store = match evaluation(config).load_store() {
        Ok(store) => store,
        Err(e) => return report_failure(&e),
    };
    let keys = store.keys();
    if keys.is_empty() {
        println!("No listings in {}.", store.key_column());
        return 0;
    }
    for (position, key) in keys.iter().enumerate() {
        println!("{:>4}  {}", position + 1, key);
    }
    0
}

/// List the keys and read choices from stdin until one resolves.
fn prompt_for_key(keys: &[&str]) -> Option<String> {
    for (position, key) in keys.iter().enumerate() {
        eprintln!("{:>4}  {}", position + 1, key);
    }
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("Select a listing (number or key): ");
        std::io::stderr().flush().ok();
        let line = lines.next()?.ok()?;
        match resolve_selection(&line, keys) {
            Some(key) => return Some(key.to_string()),
            None => eprintln!("'{}' is not a listed key", line.trim()),
        }
    }
}

fn cmd_run(config: RunConfig, key: Option<String>) -> i32 {
    let evaluation = evaluation(config);
    let store = match evaluation.load_store() {
        Ok(store) => store,
        Err(e) => return report_failure(&e),
    };
    let key = match key {
        Some(key) => key,
        None => match prompt_for_key(&store.keys()) {
            Some(key) => key,
            None => {
                println!("failure [ConfigError]: no listing selected");
                return 2;
            }
        },
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling run");
                on_interrupt.cancel();
            }
        });

        match evaluation.run_with_store(&store, &key, &cancel).await {
            Ok(outcome) => {
                for warning in &outcome.teardown_warnings {
                    eprintln!("Warning: {}", warning);
                }
                println!("success: {}", outcome.artifact.path.display());
                0
            }
            Err(e) => report_failure(&e),
        }
    })
}

fn cmd_stages(config: RunConfig) -> i32 {
    let graph = match evaluation(config).graph() {
        Ok(graph) => graph,
        Err(e) => return report_failure(&e),
    };
    println!("{:<4}  {:<26}  {:<9}  {}", "#", "STAGE", "ROLE", "DEPENDS ON");
    println!("{}", "-".repeat(72));
    for (position, &index) in graph.topological_indices().iter().enumerate() {
        let stage = graph.stage(index);
        let mut inputs: Vec<String> = stage.extract_dependencies().map(str::to_string).collect();
        inputs.extend(stage.stage_dependencies().map(|id| id.to_string()));
        println!(
            "{:<4}  {:<26}  {:<9}  {}",
            position + 1,
            stage.id.as_str(),
            format!("{:?}", graph.role(index)),
            inputs.join(", ")
        );
    }
    0
}

fn cmd_schemas(config: RunConfig) -> i32 {
    let evaluation = evaluation(config);
    for schema in evaluation.schemas().iter() {
        println!("{} ({})", schema.name(), schema.file_name());
        for column in schema.columns() {
            println!("  {}", column);
        }
    }
    0
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => std::process::exit(report_failure(&e)),
    };

    let code = match cli.command {
        Commands::Keys { paths } => {
            paths.apply(&mut config);
            cmd_keys(config)
        }
        Commands::Run { key, paths, concurrency } => {
            paths.apply(&mut config);
            if let Some(limit) = concurrency {
                config.max_concurrency = limit;
            }
            if let Err(e) = config.validate() {
                std::process::exit(report_failure(&RunError::from(e)));
            }
            cmd_run(config, key)
        }
        Commands::Stages => cmd_stages(config),
        Commands::Schemas => cmd_schemas(config),
    };
    std::process::exit(code);
}
