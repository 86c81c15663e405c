//! Dockhand - Entry Point
//!
//! Deploys pushed applications: renders their configuration, reloads
//! the proxy and supervisor, restarts processes and commits the result.
//! Invoked by post-receive hooks and operators alike.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::ExitCode;

use dockhand::app::settings::Settings;
use dockhand::app::{build, initialize, Engine};
use dockhand::deploy::DeployRequest;
use dockhand::errors::EngineError;
use dockhand::logs::{init_logging, LogOptions};
use dockhand::store::WriteOutcome;

use tracing::error;

const DEFAULT_SETTINGS_FILE: &str = "/etc/dockhand/settings.yaml";

const USAGE: &str = "usage: dockhand <init|deploy|preview|identity> \
[--project=<name>] [--cluster=<name>] [--user=<name>] \
[--oldrev=<sha>] [--newrev=<sha>] [--config=<path>]";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut command = None;
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        } else if command.is_none() {
            command = Some(arg.clone());
        }
    }

    if cli_args.contains_key("version") {
        println!("dockhand {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let command = match command {
        Some(command) => command,
        None => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    // Retrieve the settings file
    let settings_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string());
    let settings = match Settings::load(Path::new(&settings_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("dockhand: unable to read settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; logs go to stderr, the transcript to stdout
    let log_options = LogOptions {
        log_level: cli_args
            .get("log-level")
            .and_then(|s| s.parse().ok())
            .or_else(|| settings.log_level.clone())
            .unwrap_or_default(),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if command == "init" {
        return match initialize(&settings).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("dockhand: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let engine = match build(&settings) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to wire the engine: {}", e);
            eprintln!("dockhand: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match command.as_str() {
        "deploy" => deploy(&engine, &settings, &cli_args).await,
        "preview" => preview(&engine, &settings, &cli_args).await,
        "identity" => identity(&engine, &settings, &cli_args).await,
        other => {
            eprintln!("dockhand: unknown command '{}'\n{}", other, USAGE);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // One line on stderr so push hooks relay something readable.
            eprintln!("dockhand: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn required(cli_args: &HashMap<String, String>, key: &str) -> Result<String, EngineError> {
    cli_args
        .get(key)
        .cloned()
        .ok_or_else(|| EngineError::ConfigError(format!("missing required --{}=<value>", key)))
}

fn cluster_arg(
    cli_args: &HashMap<String, String>,
    settings: &Settings,
) -> Result<String, EngineError> {
    cli_args
        .get("cluster")
        .cloned()
        .or_else(|| settings.default_cluster.clone())
        .ok_or_else(|| {
            EngineError::ConfigError(
                "no --cluster given and no default_cluster configured".to_string(),
            )
        })
}

async fn deploy(
    engine: &Engine,
    settings: &Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), EngineError> {
    let request = DeployRequest {
        project: required(cli_args, "project")?,
        cluster: cluster_arg(cli_args, settings)?,
        user: cli_args
            .get("user")
            .cloned()
            .unwrap_or_else(whoami),
        old_rev: cli_args.get("oldrev").cloned(),
        new_rev: cli_args.get("newrev").cloned(),
    };

    let outcome = engine.pipeline.deploy(request).await?;
    match &outcome.write {
        WriteOutcome::Committed { revision } => {
            println!("deployed {} at config revision {}", outcome.project, revision);
        }
        WriteOutcome::Unchanged => {
            println!("deployed {}: no configuration changes", outcome.project);
        }
        other => {
            println!("deployed {}: {:?}", outcome.project, other);
        }
    }
    Ok(())
}

async fn preview(
    engine: &Engine,
    settings: &Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), EngineError> {
    let project = required(cli_args, "project")?;
    let cluster = cluster_arg(cli_args, settings)?;
    let rendered = engine.pipeline.preview(&project, &cluster).await?;
    println!("{}", rendered);
    Ok(())
}

async fn identity(
    engine: &Engine,
    settings: &Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), EngineError> {
    let project = required(cli_args, "project")?;
    let cluster = cluster_arg(cli_args, settings)?;
    let id = engine.identities.allocate(&project, &cluster).await?;
    println!("{} uid={} gid={}", project, id.uid, id.gid);
    Ok(())
}

fn whoami() -> String {
    env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}
