//! simwps - run configured simulators with result caching
//!
//! ## Usage
//!
//! ```sh
//! simwps validate <config.json>
//! simwps hash <config.json> <inputs.json> [--output <id>]...
//! simwps run <config.json> <inputs.json> [--output <id>]... [--runner <name>] [--cache-dir <dir>]
//! simwps read-cache <key> [--output <id>] [--cache-dir <dir>]
//! simwps gc [--cache-dir <dir>]
//! ```
//!
//! `inputs.json` maps input identifiers to a value or a list of values in
//! their tagged form, e.g. `{"times": {"type": "int", "value": 3}}`.
//!
//! ## Runner Selection
//!
//! `SIMWPS_RUNNER` picks the default runner; `--runner` overrides it:
//!
//! - `docker` - one container per run (default)
//! - `local` - host process in a scratch directory

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use serde_json::{Value, json};
use tracing::{Level, debug};
use tracing_subscriber::FmtSubscriber;

use simwps::parse::load_configuration;
use simwps::process::read_cached;
use simwps::{
    CacheKeyGenerator, CachedProcess, Configuration, Data, DockerImageIdLookup,
    DockerVersionHandler, InputValues, NoImageIdLookup, OptionRegistry, RunnerRegistry, Settings,
    StaticVersionHandler,
};

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Validate {
        config: PathBuf,
    },
    Hash {
        config: PathBuf,
        inputs: PathBuf,
        options: Options,
    },
    Run {
        config: PathBuf,
        inputs: PathBuf,
        options: Options,
    },
    ReadCache {
        key: String,
        options: Options,
    },
    Gc {
        options: Options,
    },
    Version,
    Help,
}

#[derive(Debug, Default)]
struct Options {
    outputs: BTreeSet<String>,
    runner: Option<String>,
    cache_dir: Option<PathBuf>,
}

struct Cli {
    command: Command,
    verbose: bool,
}

fn parse_args() -> Result<Cli, String> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose");
    args.retain(|a| a != "--verbose");

    let Some(command) = args.first() else {
        return Ok(Cli {
            command: Command::Help,
            verbose,
        });
    };

    let positional = |index: usize, what: &str| -> Result<String, String> {
        args.get(index)
            .filter(|a| !a.starts_with("--"))
            .cloned()
            .ok_or_else(|| format!("{} requires {}", command, what))
    };

    let command = match command.as_str() {
        "validate" => Command::Validate {
            config: PathBuf::from(positional(1, "<config.json>")?),
        },
        "hash" => Command::Hash {
            config: PathBuf::from(positional(1, "<config.json>")?),
            inputs: PathBuf::from(positional(2, "<inputs.json>")?),
            options: parse_options(&args[3..])?,
        },
        "run" => Command::Run {
            config: PathBuf::from(positional(1, "<config.json>")?),
            inputs: PathBuf::from(positional(2, "<inputs.json>")?),
            options: parse_options(&args[3..])?,
        },
        "read-cache" => {
            let key = positional(1, "<key>")?;
            let options = parse_options(&args[2..])?;
            if options.outputs.len() > 1 {
                return Err("read-cache accepts at most one --output".to_string());
            }
            Command::ReadCache { key, options }
        }
        "gc" => Command::Gc {
            options: parse_options(&args[1..])?,
        },
        "version" | "--version" | "-v" => Command::Version,
        "help" | "--help" | "-h" => Command::Help,
        unknown => return Err(format!("unknown command: {}", unknown)),
    };

    Ok(Cli { command, verbose })
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        let value = || {
            args.get(i + 1)
                .cloned()
                .ok_or_else(|| format!("{} requires a value", args[i]))
        };
        match args[i].as_str() {
            "--output" | "-o" => {
                options.outputs.insert(value()?);
            }
            "--runner" | "-r" => options.runner = Some(value()?),
            "--cache-dir" => options.cache_dir = Some(PathBuf::from(value()?)),
            other => return Err(format!("unexpected argument: {}", other)),
        }
        i += 2;
    }
    Ok(options)
}

// =============================================================================
// Helpers
// =============================================================================

fn settings(options: &Options) -> anyhow::Result<Settings> {
    let mut settings = Settings::from_env()?;
    if let Some(runner) = &options.runner {
        settings.runner = runner.clone();
    }
    if let Some(dir) = &options.cache_dir {
        settings.cache_dir = dir.clone();
    }
    Ok(settings)
}

/// Key generator matching the runner: docker runs fold the resolved image id
/// and the daemon version.
fn key_generator(registry: Arc<OptionRegistry>, runner: &str) -> CacheKeyGenerator {
    let keys = CacheKeyGenerator::new(registry);
    if runner == "docker" {
        keys.with_image_lookup(Arc::new(DockerImageIdLookup::new()))
            .with_version_handler(Arc::new(DockerVersionHandler::new()))
    } else {
        keys.with_image_lookup(Arc::new(NoImageIdLookup))
            .with_version_handler(Arc::new(StaticVersionHandler::crate_version()))
    }
}

fn load_inputs(path: &Path) -> anyhow::Result<InputValues> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read inputs {}", path.display()))?;
    let Value::Object(map) = serde_json::from_str::<Value>(&text)? else {
        bail!("inputs must be a JSON object");
    };
    let mut inputs = InputValues::new();
    for (id, value) in map {
        let values: Vec<Data> = match value {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<Data>, _>>()
                .with_context(|| format!("input '{}'", id))?,
            single => vec![
                serde_json::from_value(single).with_context(|| format!("input '{}'", id))?,
            ],
        };
        inputs.insert(id, values);
    }
    Ok(inputs)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_validate(config: PathBuf) -> anyhow::Result<()> {
    let registry = OptionRegistry::default();
    let config = load_configuration(&config, &registry)?;
    print_summary(&config)?;
    Ok(())
}

fn print_summary(config: &Configuration) -> anyhow::Result<()> {
    println!("process:  {}", config.identifier());
    println!("image:    {}", config.image());
    println!("workdir:  {}", config.working_directory());
    println!("command:  {}", config.command().join(" "));
    for input in config.inputs() {
        println!(
            "input:    {} ({}, {}{})",
            input.identifier(),
            input.binding(),
            input.mechanism()?.discriminator(),
            if input.is_optional() { ", optional" } else { "" }
        );
    }
    for output in config.outputs() {
        println!(
            "output:   {} ({}, {}{})",
            output.identifier(),
            output.binding(),
            output.mechanism()?.discriminator(),
            if output.is_optional() { ", optional" } else { "" }
        );
    }
    Ok(())
}

async fn cmd_hash(config: PathBuf, inputs: PathBuf, options: Options) -> anyhow::Result<()> {
    let settings = settings(&options)?;
    let registry = Arc::new(OptionRegistry::default());
    let config = load_configuration(&config, &registry)?;
    let inputs = load_inputs(&inputs)?;
    let keys = key_generator(registry, &settings.runner);
    let environment = keys.environment(&config).await?;
    let key = keys.hash_for_outputs(&config, &environment, &inputs, &options.outputs)?;
    println!("{}", key);
    Ok(())
}

async fn cmd_run(config: PathBuf, inputs: PathBuf, options: Options) -> anyhow::Result<()> {
    let settings = settings(&options)?;
    let registry = Arc::new(OptionRegistry::default());
    let config = load_configuration(&config, &registry)?;
    let inputs = load_inputs(&inputs)?;

    let runner = RunnerRegistry::new()
        .get(&settings.runner)
        .ok_or_else(|| anyhow!("unknown runner: {}", settings.runner))?;
    if !runner.is_available() {
        bail!("runner '{}' is not available on this host", runner.name());
    }
    debug!(runner = runner.name(), cache = %settings.cache_dir.display(), "starting run");

    let process = CachedProcess::new(
        Arc::new(config),
        key_generator(registry, &settings.runner),
        Arc::new(settings.open_cache()?),
        runner,
    );
    let output = process.run(&inputs, &options.outputs).await?;
    print_json(&json!({
        "cacheKey": output.cache_key,
        "fromCache": output.from_cache,
        "outputs": output.outputs,
    }))
}

fn cmd_read_cache(key: String, options: Options) -> anyhow::Result<()> {
    let cache = settings(&options)?.open_cache()?;
    let output = options.outputs.iter().next().map(String::as_str);
    let outputs = read_cached(&cache, &key, output)?;
    print_json(&json!({ "cacheKey": key, "outputs": outputs }))
}

fn cmd_gc(options: Options) -> anyhow::Result<()> {
    let cache = settings(&options)?.open_cache()?;
    let stats = cache.gc()?;
    println!(
        "removed {} entries, freed {} bytes",
        stats.removed_count, stats.freed_bytes
    );
    Ok(())
}

fn cmd_version() {
    println!("simwps version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"simwps - run configured simulators with result caching

USAGE:
    simwps <command> [options]

COMMANDS:
    validate <config>              Parse a configuration and print a summary
    hash <config> <inputs>         Print the cache key of a request
    run <config> <inputs>          Run a request (or serve it from the cache)
    read-cache <key>               Print cached outputs
    gc                             Remove expired entries and enforce the size limit
    version                        Show version info
    help                           Show this help

OPTIONS:
    --output, -o <id>      Requested output (repeatable; default: all)
    --runner, -r <name>    Runner: docker, local (default: $SIMWPS_RUNNER or docker)
    --cache-dir <dir>      Cache directory (default: $SIMWPS_CACHE_DIR or ~/.simwps/cache)
    --verbose              Debug logging

EXAMPLES:
    simwps validate quakeledger.json
    simwps run quakeledger.json request.json --output selectedRows
    simwps read-cache 3f2a...e9 --output selectedRows
"#
    );
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            return ExitCode::FAILURE;
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    let result = match cli.command {
        Command::Validate { config } => cmd_validate(config),
        Command::Hash {
            config,
            inputs,
            options,
        } => cmd_hash(config, inputs, options).await,
        Command::Run {
            config,
            inputs,
            options,
        } => cmd_run(config, inputs, options).await,
        Command::ReadCache { key, options } => cmd_read_cache(key, options),
        Command::Gc { options } => cmd_gc(options),
        Command::Version => {
            cmd_version();
            Ok(())
        }
        Command::Help => {
            cmd_help();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
