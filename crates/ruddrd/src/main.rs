// # ruddrd - ruddr daemon
//
// Thin integration layer: all DDNS logic lives in ruddr-core and the plugin
// crates. The daemon
// 1. reads its settings from environment variables,
// 2. loads the JSON configuration file,
// 3. registers the built-in and plugin notifiers/updaters,
// 4. builds and starts the `DdnsManager`,
// 5. handles signals until shutdown.
//
// ## Environment
//
// - `RUDDR_CONFIG_FILE`: path of the JSON configuration
//   (default `/etc/ruddr/ruddr.json`)
// - `RUDDR_LOG_LEVEL`: trace, debug, info, warn or error (default info)
//
// ## Signals
//
// - `SIGUSR1`: check every notifier now
// - `SIGINT`, `SIGTERM`: stop and exit
//
// ## Example
//
// ```bash
// export RUDDR_CONFIG_FILE=/etc/ruddr/ruddr.json
// export RUDDR_LOG_LEVEL=debug
//
// ruddrd
// ```

use anyhow::{Context, Result};
use ruddr_core::{DdnsManager, Registry, RuddrConfig};
use std::env;
#[cfg(unix)]
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_CONFIG_FILE: &str = "/etc/ruddr/ruddr.json";

/// How long stopping all notifiers may take
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuddrExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<RuddrExitCode> for ExitCode {
    fn from(code: RuddrExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon settings from the environment
struct Settings {
    config_file: PathBuf,
    log_level: Level,
}

impl Settings {
    fn from_env() -> Result<Self> {
        let config_file = env::var_os("RUDDR_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let log_level = match env::var("RUDDR_LOG_LEVEL") {
            Ok(level) => parse_log_level(&level)?,
            Err(_) => Level::INFO,
        };
        Ok(Self {
            config_file,
            log_level,
        })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "RUDDR_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

/// Read and validate the configuration file
fn load_config(path: &Path) -> Result<RuddrConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read config file {}", path.display()))?;
    let config: RuddrConfig = serde_json::from_str(&text)
        .with_context(|| format!("Could not parse config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Registry with everything compiled into this binary
fn build_registry() -> Registry {
    let registry = Registry::with_builtins();

    #[cfg(feature = "web")]
    {
        info!("Registering web notifier");
        ruddr_notifier_web::register(&registry);
    }

    #[cfg(feature = "standard")]
    {
        info!("Registering standard updater");
        ruddr_updater_standard::register(&registry);
    }

    registry
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return RuddrExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(settings.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RuddrExitCode::ConfigError.into();
    }

    info!("Starting ruddrd");

    let config = match load_config(&settings.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return RuddrExitCode::ConfigError.into();
        }
    };
    info!(
        "Configuration loaded: {} notifier(s), {} updater(s)",
        config.notifiers.len(),
        config.updaters.len()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RuddrExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config)).into()
}

/// Build, start and run the manager until a shutdown signal
async fn run_daemon(config: RuddrConfig) -> RuddrExitCode {
    let registry = build_registry();

    let manager = match DdnsManager::new(&config, &registry).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("Could not set up notifiers and updaters: {}", e);
            return RuddrExitCode::ConfigError;
        }
    };

    if let Err(e) = manager.start().await {
        error!("Startup failed: {}", e);
        return RuddrExitCode::ConfigError;
    }

    let signal = match wait_for_shutdown(&manager).await {
        Ok(signal) => signal,
        Err(e) => {
            error!("Signal handling failed: {:#}", e);
            stop(&manager).await;
            return RuddrExitCode::RuntimeError;
        }
    };

    info!("Received {}, shutting down", signal);
    if stop(&manager).await {
        RuddrExitCode::CleanShutdown
    } else {
        RuddrExitCode::RuntimeError
    }
}

/// Stop the manager, giving up after [`SHUTDOWN_TIMEOUT`]
async fn stop(manager: &DdnsManager) -> bool {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, manager.stop()).await {
        Ok(()) => true,
        Err(_) => {
            warn!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT);
            false
        }
    }
}

/// Serve SIGUSR1 until SIGTERM or SIGINT arrives
///
/// Returns the name of the terminating signal.
#[cfg(unix)]
async fn wait_for_shutdown(manager: &DdnsManager) -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).context("Failed to setup SIGUSR1 handler")?;

    loop {
        tokio::select! {
            _ = sigusr1.recv() => {
                info!("Received SIGUSR1, checking all notifiers");
                let shutdown = async {
                    tokio::select! {
                        _ = sigterm.recv() => "SIGTERM",
                        _ = sigint.recv() => "SIGINT",
                    }
                };
                if let Some(signal) = unless_shutdown(manager.do_notify(), shutdown).await {
                    break Ok(signal);
                }
            }
            _ = sigterm.recv() => break Ok("SIGTERM"),
            _ = sigint.recv() => break Ok("SIGINT"),
        }
    }
}

/// Run `work` to completion unless `shutdown` finishes first
///
/// Returns the shutdown signal name if `work` was cut short.
#[cfg(unix)]
async fn unless_shutdown(
    work: impl Future<Output = ()>,
    shutdown: impl Future<Output = &'static str>,
) -> Option<&'static str> {
    tokio::select! {
        _ = work => None,
        signal = shutdown => {
            info!("{} during on-demand check, abandoning it", signal);
            Some(signal)
        }
    }
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown(_manager: &DdnsManager) -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level(" WARN ").unwrap(), Level::WARN);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ruddr.json");
        std::fs::write(
            &path,
            r#"{
                "datadir": "/var/lib/ruddr",
                "notifiers": {"s": {"type": "static", "ipv4": "192.0.2.1", "skip_ipv6": true}},
                "updaters": {"u": {"type": "standard", "notifier": "s"}}
            }"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.updaters.len(), 1);

        std::fs::write(&path, r#"{"updaters": {"u": {"type": "standard", "notifier": "x"}}}"#)
            .unwrap();
        assert!(load_config(&path).is_err());

        assert!(load_config(&dir.path().join("missing.json")).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_interrupts_slow_work() {
        let slow = tokio::time::sleep(Duration::from_secs(3600));
        let signal = unless_shutdown(slow, async { "SIGTERM" }).await;
        assert_eq!(signal, Some("SIGTERM"));

        let signal = unless_shutdown(async {}, std::future::pending()).await;
        assert_eq!(signal, None);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RuddrExitCode::CleanShutdown as u8, 0);
        assert_eq!(RuddrExitCode::ConfigError as u8, 1);
        assert_eq!(RuddrExitCode::RuntimeError as u8, 2);
    }
}
