//! deployd - Entry Point
//!
//! Deploys one application to a Dokku host and follows it until it succeeds,
//! fails or times out.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use deployd::app::options::{AppOptions, DeployRequest};
use deployd::app::run::run;
use deployd::app::state::AppState;
use deployd::logs::{init_logging, LogOptions};
use deployd::models::deployment::DEFAULT_GIT_REF;
use deployd::storage::settings::load_settings;
use deployd::utils::{format_duration, version_info};

use tracing::{error, info};

const DEFAULT_SETTINGS_PATH: &str = "/etc/deployd/settings.json";

const USAGE: &str = "Usage: deployd --app=<name> --repo=<git url> [--ref=<git ref>] [--buildpack=<url>] [--config=<settings.json>]
       deployd --app=<name> --history [--config=<settings.json>]";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        return match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => {
                println!("{version}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize version info: {e}");
                ExitCode::FAILURE
            }
        };
    }

    match run_deploy(&cli_args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("deployd: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the deployment succeeded
async fn run_deploy(cli_args: &HashMap<String, String>) -> anyhow::Result<bool> {
    let command = match parse_command(cli_args) {
        Some(command) => command,
        None => bail!("missing --app or --repo\n{}", USAGE),
    };

    let settings_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
    let settings = load_settings(&settings_path)
        .await
        .with_context(|| format!("unable to read settings file {}", settings_path.display()))?;

    // Keep the guard alive so the file writer flushes on exit
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir: settings.log_dir.clone(),
        ..Default::default()
    };
    let _log_guard = init_logging(log_options).context("failed to initialize logging")?;

    let options = AppOptions::from_settings(&settings);

    let request = match command {
        Command::Deploy(request) => request,
        Command::History(app_name) => {
            print_history(&options, &app_name).await?;
            return Ok(true);
        }
    };

    let version = version_info();
    info!("Running deployd with options: {:?}", options);
    let deployment = run(version.version, options, request, await_shutdown_signal())
        .await
        .context("deployment run failed")?;

    info!(
        deployment_id = %deployment.id(),
        status = %deployment.status(),
        duration = %format_duration(deployment.duration()),
        "Deployment run finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&deployment).context("failed to serialize deployment")?
    );

    Ok(deployment.is_successful())
}

/// Print the deployments the platform remembers for an application
async fn print_history(options: &AppOptions, app_name: &str) -> anyhow::Result<()> {
    let state = AppState::with_ssh(options);
    let history = state.service.history(app_name).await;

    info!(app_name = %app_name, deployments = history.len(), "Deployment history read");
    println!(
        "{}",
        serde_json::to_string_pretty(&history).context("failed to serialize history")?
    );
    Ok(())
}

enum Command {
    Deploy(DeployRequest),
    History(String),
}

fn parse_command(cli_args: &HashMap<String, String>) -> Option<Command> {
    if cli_args.contains_key("history") {
        let app_name = cli_args.get("app")?.trim().to_string();
        return Some(Command::History(app_name));
    }
    parse_request(cli_args).map(Command::Deploy)
}

fn parse_request(cli_args: &HashMap<String, String>) -> Option<DeployRequest> {
    let app_name = cli_args.get("app")?.trim().to_string();
    let repo_url = cli_args.get("repo")?.trim().to_string();
    let git_ref = cli_args
        .get("ref")
        .cloned()
        .unwrap_or_else(|| DEFAULT_GIT_REF.to_string());

    let buildpack = cli_args
        .get("buildpack")
        .map(|bp| bp.trim().to_string())
        .filter(|bp| !bp.is_empty());

    Some(DeployRequest {
        app_name,
        repo_url,
        git_ref,
        buildpack,
    })
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
