//! Command-line interface for the astrohost runtime.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use astrohost_core::compiler::Compiler;
use astrohost_core::config::RuntimeConfig;
use astrohost_core::discovery::discover_modules;
use astrohost_core::runtime::Runtime;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

/// Astrohost - compile, load and run extension modules at runtime.
#[derive(Parser, Debug)]
#[command(name = "astrohost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Runtime configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a C++ source file into a loadable artifact.
    Compile {
        /// Source file.
        source: PathBuf,
        /// Module name; names the artifact.
        #[arg(long)]
        module: String,
        /// Entry point the module provides.
        #[arg(long)]
        function: String,
    },
    /// Load a native artifact and call a zero-argument entry point.
    Run {
        /// Artifact path.
        artifact: PathBuf,
        /// Entry point to call.
        function: String,
        /// Name of the worker thread.
        #[arg(long, default_value = "main-call")]
        thread: String,
        /// Return type of the entry point.
        #[arg(long, value_enum, default_value_t = Returns::Void)]
        returns: Returns,
    },
    /// Load a script and call one of its functions.
    Script {
        /// Script path.
        path: PathBuf,
        /// Function to call.
        function: String,
        /// Arguments as a JSON array.
        #[arg(long, default_value = "[]")]
        args: String,
    },
    /// List modules found in the module and script directories.
    Modules {
        /// Directory of native artifacts.
        #[arg(long)]
        modules_dir: Option<PathBuf>,
        /// Directory of scripts.
        #[arg(long)]
        scripts_dir: Option<PathBuf>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

/// Return types a native entry point may have on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Returns {
    Void,
    I32,
    I64,
    F64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Compile {
            source,
            module,
            function,
        } => compile(config, &source, &module, &function),
        Command::Run {
            artifact,
            function,
            thread,
            returns,
        } => run(config, &artifact, &function, &thread, returns),
        Command::Script {
            path,
            function,
            args,
        } => script(config, &path, &function, &args),
        Command::Modules {
            modules_dir,
            scripts_dir,
            json,
        } => modules(config, modules_dir, scripts_dir, json),
    }
}

fn init_logging(verbose: bool) {
    // Check if JSON logging is requested (for production/container environments)
    let json_logging = std::env::var("ASTROHOST_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "astrohost=debug" } else { "astrohost=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(default_level)
            .add_directive(tracing::Level::WARN.into())
    });

    // Logs go to stderr so command output on stdout stays parseable.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_names(verbose)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn compile(config: RuntimeConfig, source: &Path, module: &str, function: &str) -> Result<()> {
    let code = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read source {}", source.display()))?;
    let compiler = Compiler::new(config.compiler);
    let artifact = compiler.compile(&code, module, function)?;
    println!("{}", artifact.display());
    Ok(())
}

fn run(config: RuntimeConfig, artifact: &Path, function: &str, thread: &str, returns: Returns) -> Result<()> {
    let name = file_stem(artifact)?;
    let runtime = Runtime::new(config)?;
    let loader = runtime.loader();
    loader.load_module(artifact, &name)?;

    let output = match returns {
        Returns::Void => {
            loader.invoke::<(), ()>(&name, function, thread, ())?.wait()?;
            Value::Null
        }
        Returns::I32 => Value::from(loader.invoke::<i32, ()>(&name, function, thread, ())?.wait()?),
        Returns::I64 => Value::from(loader.invoke::<i64, ()>(&name, function, thread, ())?.wait()?),
        Returns::F64 => Value::from(loader.invoke::<f64, ()>(&name, function, thread, ())?.wait()?),
    };
    runtime.shutdown();

    println!("{}", output);
    Ok(())
}

fn script(config: RuntimeConfig, path: &Path, function: &str, args: &str) -> Result<()> {
    let args: Vec<Value> = serde_json::from_str(args)
        .with_context(|| format!("--args must be a JSON array, got {}", args))?;
    let name = file_stem(path)?;

    let runtime = Runtime::new(config)?;
    runtime.loader().load_script_from_path(path, &name)?;
    let result = runtime.interpreter().call(&name, function, args)?;
    runtime.shutdown();

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn modules(
    config: RuntimeConfig,
    modules_dir: Option<PathBuf>,
    scripts_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let modules_dir = modules_dir.unwrap_or(config.loader.modules_dir);
    let scripts_dir = scripts_dir.unwrap_or(config.loader.scripts_dir);
    let found = discover_modules(&modules_dir, &scripts_dir);

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }
    if found.is_empty() {
        println!(
            "No modules found in {} or {}",
            modules_dir.display(),
            scripts_dir.display()
        );
        return Ok(());
    }
    for module in &found {
        println!("{:<8} {:<24} {}", module.kind, module.name, module.path.display());
    }
    Ok(())
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("Cannot derive a module name from {}", path.display()))
}
