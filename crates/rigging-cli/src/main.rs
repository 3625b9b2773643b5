mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rigging_scripting_host::{
    ReloadTrigger, RiggingConfig, ScriptHost, ScriptManager, ScriptScanner, ScriptType,
    ScriptingConfig, spawn_reload_signal_listener,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config.toml (default: platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the `*_scripts` roots, overrides `scripting.base_dir`
    #[arg(short, long, global = true)]
    base_dir: Option<PathBuf>,

    /// Also write logs to the data directory
    #[arg(long, global = true)]
    log_file: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover and load scripts once, exiting non-zero if any failed
    Load {
        /// Script types to load (default: all, in startup, server, client order)
        script_types: Vec<ScriptType>,
    },
    /// Load scripts and reload them when files change or SIGUSR2 arrives
    Watch {
        #[arg(default_value = "server")]
        script_type: ScriptType,

        /// Scan interval in milliseconds, overrides `scripting.hot_reload_interval_ms`
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let _log_guard = logging::init_logging("rigging", cli.verbose, cli.log_file)
        .context("Failed to initialize logging")?;

    let config_path = cli.config.unwrap_or_else(RiggingConfig::config_path);
    let mut config = RiggingConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?
        .scripting;
    if let Some(base_dir) = cli.base_dir {
        config.base_dir = Some(base_dir);
    }

    if !config.enabled {
        info!("Scripting is disabled in {}", config_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let host = Arc::new(ScriptHost::new());

    match cli.command {
        Command::Load { script_types } => Ok(load(&config, host, &script_types)),
        Command::Watch {
            script_type,
            interval_ms,
        } => {
            if let Some(interval_ms) = interval_ms {
                config.hot_reload_interval_ms = interval_ms;
            }
            watch(&config, host, script_type).await
        }
    }
}

fn load(config: &ScriptingConfig, host: Arc<ScriptHost>, script_types: &[ScriptType]) -> ExitCode {
    let script_types = if script_types.is_empty() {
        &ScriptType::ALL[..]
    } else {
        script_types
    };

    let mut failed = 0;
    for &script_type in script_types {
        let mut manager = ScriptManager::from_config(script_type, config, host.clone());
        manager.discover();
        manager.load();
        failed += manager.summary().failed();
    }

    if failed > 0 {
        error!("{} script file(s) failed to load", failed);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn scanner_for(manager: &ScriptManager, interval: Duration) -> ScriptScanner {
    let roots = manager
        .packs()
        .iter()
        .map(|pack| pack.root().to_path_buf())
        .collect();
    ScriptScanner::with_interval(roots, manager.engine().file_extension(), interval)
}

async fn watch(
    config: &ScriptingConfig,
    host: Arc<ScriptHost>,
    script_type: ScriptType,
) -> anyhow::Result<ExitCode> {
    let interval = Duration::from_millis(config.hot_reload_interval_ms.max(1));

    let mut manager = ScriptManager::from_config(script_type, config, host);
    manager.discover();
    manager.load();

    let mut scanner = scanner_for(&manager, interval);
    if config.hot_reload {
        info!(
            "Watching {} file(s) under {} every {:?}",
            scanner.tracked_files(),
            manager.directory().display(),
            interval
        );
    } else {
        info!("Hot reload is disabled, reloading on SIGUSR2 only");
    }

    let mut reload_rx = spawn_reload_signal_listener();
    let mut signals_open = true;
    let mut ticker = tokio::time::interval(interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let trigger = tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for ctrl-c")?;
                info!("Stopping");
                break;
            }
            changed = reload_rx.changed(), if signals_open => {
                if changed.is_err() {
                    warn!(target: "scripting", "Reload signal listener stopped");
                    signals_open = false;
                    continue;
                }
                ReloadTrigger::Signal
            }
            _ = ticker.tick(), if config.hot_reload => {
                if !scanner.should_scan() {
                    continue;
                }
                let changes = scanner.scan_changes();
                if !changes.has_changes() {
                    continue;
                }
                info!(
                    target: "scripting",
                    "{} changed, {} added, {} removed",
                    changes.changed.len(),
                    changes.added.len(),
                    changes.removed.len()
                );
                ReloadTrigger::FilesChanged
            }
        };

        info!(target: "scripting", ?trigger, "Reloading {} scripts", script_type);
        manager.reload();
        scanner = scanner_for(&manager, interval);
    }

    manager.unload();
    Ok(if manager.errors().is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
