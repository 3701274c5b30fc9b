use bridge_core::trampoline::{self, LoadedHandle};
use bridge_core::{BridgeConfig, BridgeError, Dialect, LoaderOptions, Trampoline, TypeIdMap, Value};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bridge-cli", version)]
struct Cli {
    /// Implementation identifier the operation set is bound to
    implementation: String,

    /// Target handle string supplied by the orchestrator
    target: String,

    /// Bridge.toml to use instead of searching upwards from the working directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve the typed dialect
    #[arg(long, global = true)]
    typed: bool,

    /// Trace every operation call and return
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct PathOptions {
    /// Directory searched before the default module directories
    #[arg(long)]
    prepend: Vec<PathBuf>,

    /// Directory searched after the configured search paths
    #[arg(long)]
    append: Vec<PathBuf>,
}

impl PathOptions {
    fn into_options(self) -> Option<LoaderOptions> {
        if self.prepend.is_empty() && self.append.is_empty() {
            return None;
        }
        Some(LoaderOptions {
            prepend_paths: self.prepend,
            append_paths: self.append,
        })
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the module resolution root
    ExecutionPath,
    /// Load files into one handle and print its signatures
    LoadFile {
        /// Paths to load, resolved against the execution path
        #[arg(long = "path", required = true)]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        options: PathOptions,
    },
    /// Load source text into a handle and print its signatures
    LoadMemory {
        #[arg(long)]
        name: String,
        #[arg(long)]
        source: String,
        #[command(flatten)]
        options: PathOptions,
    },
    /// Load a packaged distribution
    LoadPackage {
        #[arg(long)]
        name: String,
    },
    /// Load source text and call one of its exported functions
    Call {
        #[arg(long)]
        name: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        function: String,
        /// JSON array of arguments
        #[arg(long, default_value = "[]")]
        args: String,
    },
    /// Check that the bridge is reachable
    Test {
        /// Optional JSON value echoed into the log
        #[arg(long)]
        value: Option<String>,
    },
    /// Tear the bridge down
    Destroy,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("Invalid JSON for --{flag}: {source}")]
    InvalidJson {
        flag: &'static str,
        source: serde_json::Error,
    },

    #[error("--args must be a JSON array")]
    ArgsNotArray,

    #[error("Load failed")]
    LoadFailed,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[derive(Debug, Serialize)]
struct LoadReport {
    #[serde(flatten)]
    handle: LoadedHandle,
    discovery: bridge_core::DiscoveryMap,
    #[serde(skip_serializing_if = "TypeIdMap::is_empty")]
    type_ids: TypeIdMap,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn resolve_config(cli: &Cli) -> Result<BridgeConfig, BridgeError> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?.with_env_overrides(),
        None => BridgeConfig::discover(),
    };
    if cli.debug {
        config.debug = true;
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: could not render output: {}", e),
    }
}

fn report_load(trampoline: &Trampoline, handle: Option<bridge_core::HandleRef>) -> Result<(), CliError> {
    let Some(handle) = handle else {
        let diagnostics = trampoline.diagnostics();
        if !diagnostics.is_empty() {
            eprint!("{}", trampoline.formatted_diagnostics());
        }
        if let Some(last) = trampoline.last_error() {
            eprintln!("Error: {}", last.message);
        }
        println!("null");
        return Err(CliError::LoadFailed);
    };
    let report = LoadReport {
        handle: LoadedHandle::from_handle(&handle),
        discovery: trampoline.discover(handle.id()),
        type_ids: trampoline.type_ids(handle.id()),
    };
    print_json(&report);
    Ok(())
}

fn parse_json(flag: &'static str, text: &str) -> Result<serde_json::Value, CliError> {
    serde_json::from_str(text).map_err(|source| CliError::InvalidJson { flag, source })
}

fn run(command: Commands, trampoline: &Trampoline) -> Result<(), CliError> {
    match command {
        Commands::ExecutionPath => println!("{}", trampoline.execution_path()),
        Commands::LoadFile { paths, options } => {
            let options = options.into_options();
            let handle = trampoline.load_from_file(&paths, options.as_ref());
            report_load(trampoline, handle)?;
        }
        Commands::LoadMemory { name, source, options } => {
            let options = options.into_options();
            let handle = trampoline.load_from_memory(&name, &source, options.as_ref());
            report_load(trampoline, handle)?;
        }
        Commands::LoadPackage { name } => {
            let handle = trampoline.load_from_package(&name);
            report_load(trampoline, handle)?;
        }
        Commands::Call {
            name,
            source,
            function,
            args,
        } => {
            let serde_json::Value::Array(items) = parse_json("args", &args)? else {
                return Err(CliError::ArgsNotArray);
            };
            let args: Vec<Value> = items.iter().map(Value::from_json).collect();
            let handle = trampoline.load_from_memory(&name, &source, None);
            let Some(handle) = handle else {
                return report_load(trampoline, None);
            };
            debug!(function = %function, args = items.len(), "Calling export");
            let result = trampoline.bridge().call(handle.id(), &function, &args)?;
            print_json(&result.to_json());
            trampoline.clear(handle.id());
        }
        Commands::Test { value } => {
            let value = value.map(|text| parse_json("value", &text)).transpose()?;
            println!("{}", trampoline.test(value.as_ref()));
        }
        Commands::Destroy => println!("{}", trampoline.destroy()),
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(config.debug);

    let dialect = if cli.typed { Dialect::Typed } else { Dialect::Script };
    let trampoline = match trampoline::register(&cli.implementation, &cli.target, dialect, config) {
        Ok(trampoline) => trampoline,
        Err(e) => {
            error!("Trampoline registration failed: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    info!(implementation = %cli.implementation, dialect = %dialect, "Bridge ready");

    if let Err(e) = run(cli.command, trampoline) {
        if !matches!(e, CliError::LoadFailed) {
            eprintln!("Error: {}", e);
        }
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments() {
        let cli = Cli::try_parse_from([
            "bridge-cli",
            "script",
            "0x10",
            "--typed",
            "load-file",
            "--path",
            "a.ts",
            "--path",
            "b.ts",
            "--append",
            "vendor",
        ])
        .unwrap();
        assert_eq!(cli.implementation, "script");
        assert_eq!(cli.target, "0x10");
        assert!(cli.typed);
        match cli.command {
            Commands::LoadFile { paths, options } => {
                assert_eq!(paths, vec![PathBuf::from("a.ts"), PathBuf::from("b.ts")]);
                let options = options.into_options().unwrap();
                assert_eq!(options.append_paths, vec![PathBuf::from("vendor")]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_missing_target_is_rejected() {
        assert!(Cli::try_parse_from(["bridge-cli", "script", "test"]).is_err());
    }

    #[test]
    fn test_call_runs_export() {
        let trampoline = Trampoline::new("cli", "0x0", Dialect::Script, BridgeConfig::default()).unwrap();
        let command = Commands::Call {
            name: "demo".into(),
            source: "export function add(left, right) { return left + right; }".into(),
            function: "add".into(),
            args: "[2, 3]".into(),
        };
        run(command, &trampoline).unwrap();
        assert_eq!(trampoline.bridge().handle_count(), 0);
    }

    #[test]
    fn test_call_rejects_non_array_args() {
        let trampoline = Trampoline::new("cli", "0x0", Dialect::Script, BridgeConfig::default()).unwrap();
        let command = Commands::Call {
            name: "demo".into(),
            source: "export function f() {}".into(),
            function: "f".into(),
            args: "{}".into(),
        };
        assert!(matches!(run(command, &trampoline), Err(CliError::ArgsNotArray)));
    }

    #[test]
    fn test_load_report_carries_type_ids() {
        let trampoline = Trampoline::new("cli", "0x0", Dialect::Typed, BridgeConfig::default()).unwrap();
        let handle = trampoline.load_from_memory("t.ts", "export function half(n: number): number { return n / 2; }", None);
        let handle = handle.unwrap();
        let report = LoadReport {
            handle: LoadedHandle::from_handle(&handle),
            discovery: trampoline.discover(handle.id()),
            type_ids: trampoline.type_ids(handle.id()),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type_ids"]["half"]["params"], serde_json::json!(["double"]));
        assert_eq!(json["type_ids"]["half"]["ret"], "double");

        let script = Trampoline::new("cli", "0x0", Dialect::Script, BridgeConfig::default()).unwrap();
        let handle = script.load_from_memory("m.js", "export function f(a) {}", None).unwrap();
        let report = LoadReport {
            handle: LoadedHandle::from_handle(&handle),
            discovery: script.discover(handle.id()),
            type_ids: script.type_ids(handle.id()),
        };
        assert!(serde_json::to_value(&report).unwrap().get("type_ids").is_none());
    }
}
