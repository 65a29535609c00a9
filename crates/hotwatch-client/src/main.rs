//! HotWatch client: entry point.
//!
//! Runs the client headless: discovers the HotWatch server, keeps the
//! session alive and logs every change notice with the URL a viewer would
//! reload.  Embedding applications use the library (`spawn_client`) instead.
//!
//! # Usage
//!
//! ```text
//! hotwatch-client [OPTIONS]
//!
//! Options:
//!   --config          <PATH>   Config file [default: platform config dir]
//!   --server-url      <URL>    Connect to this server, skip discovery
//!   --default-host    <HOST>   host:port used when no URL is known
//!   --watch-dir       <DIR>    Local directory mirroring the server's watch root
//!   --source-file     <FILE>   Root source file to load from the server
//!   --discovery-port  <PORT>   UDP port the server answers probes on
//!   --no-forward-logs          Keep log records local
//!   --log-level       <LEVEL>  Console log level when RUST_LOG is unset
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                   | Flag                |
//! |----------------------------|---------------------|
//! | `HOTWATCH_CONFIG`          | `--config`          |
//! | `HOTWATCH_SERVER_URL`      | `--server-url`      |
//! | `HOTWATCH_DEFAULT_HOST`    | `--default-host`    |
//! | `HOTWATCH_WATCH_DIR`       | `--watch-dir`       |
//! | `HOTWATCH_SOURCE_FILE`     | `--source-file`     |
//! | `HOTWATCH_DISCOVERY_PORT`  | `--discovery-port`  |
//! | `HOTWATCH_NO_FORWARD_LOGS` | `--no-forward-logs` |
//! | `HOTWATCH_LOG_LEVEL`       | `--log-level`       |
//!
//! Flags win over environment variables, which win over the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use hotwatch_client::infrastructure::diagnostics::relay;
use hotwatch_client::infrastructure::storage::config::{
    load_config, load_config_from, AppConfig, ConfigError,
};
use hotwatch_client::{spawn_client, CacheInvalidator, ClientEvent, ClientOptions, HotWatchClient};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// HotWatch client.
///
/// Finds the HotWatch server on the LAN and follows its change notices.
#[derive(Debug, Parser)]
#[command(
    name = "hotwatch-client",
    about = "Viewer-side client for a HotWatch live-reload server",
    version
)]
struct Cli {
    /// Config file to read instead of the platform default.
    #[arg(long, env = "HOTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL (`http://host:port/`).  Disables discovery.
    #[arg(long, env = "HOTWATCH_SERVER_URL")]
    server_url: Option<String>,

    /// `host:port` to use when no server URL is known.
    #[arg(long, env = "HOTWATCH_DEFAULT_HOST")]
    default_host: Option<String>,

    /// Local directory that mirrors the server's watch root.
    #[arg(long, env = "HOTWATCH_WATCH_DIR")]
    watch_dir: Option<String>,

    /// Root source file the viewer loads from the server.
    #[arg(long, env = "HOTWATCH_SOURCE_FILE")]
    source_file: Option<String>,

    /// UDP port the server listens for discovery probes on.
    #[arg(long, env = "HOTWATCH_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Do not forward log records to the server.
    #[arg(long, env = "HOTWATCH_NO_FORWARD_LOGS")]
    no_forward_logs: bool,

    /// Console log level used when `RUST_LOG` is not set.
    #[arg(long, env = "HOTWATCH_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Reads the config file and applies the command-line overrides.
    ///
    /// A platform without a config directory runs on the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => match load_config() {
                Ok(config) => config,
                Err(ConfigError::NoPlatformConfigDir) => AppConfig::default(),
                Err(e) => return Err(e).context("failed to load config"),
            },
        };

        if let Some(url) = self.server_url {
            config.session.server_url = url;
        }
        if let Some(host) = self.default_host {
            config.session.default_host = host;
        }
        if let Some(dir) = self.watch_dir {
            config.session.watch_dir = dir;
        }
        if let Some(file) = self.source_file {
            config.session.source_file = file;
        }
        if let Some(port) = self.discovery_port {
            config.discovery.port = port;
        }
        if self.no_forward_logs {
            config.diagnostics.forward = false;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        Ok(config)
    }
}

/// Stands in for a viewer's component cache.
struct LoggingInvalidator;

impl CacheInvalidator for LoggingInvalidator {
    fn invalidate(&self) {
        info!("component cache cleared");
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. Parses the CLI and merges it over the config file.
/// 2. Installs the console `fmt` layer and the diagnostics relay.
/// 3. Spawns the session loop with auto-start, so discovery (or the
///    configured URL/host) kicks in immediately.
/// 4. Logs session events until Ctrl+C, then shuts the loop down.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_app_config()?;
    let min_level = config
        .diagnostics
        .min_level()
        .context("invalid [diagnostics] min_level")?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    let (relay_layer, relay_handle) = relay(min_level);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(relay_layer)
        .init();

    info!(
        "HotWatch client starting: server_url='{}', default_host='{}', watch_dir='{}'",
        config.session.server_url, config.session.default_host, config.session.watch_dir
    );

    let options = ClientOptions {
        settings: config.session_settings(),
        discovery: config.discovery_config(),
        auto_start: true,
    };
    let (client, session_task) = spawn_client(options, Arc::new(LoggingInvalidator));

    // The guard holds a client handle, so it must go before shutdown.
    let relay_guard = config
        .diagnostics
        .forward
        .then(|| relay_handle.attach(Arc::new(client.clone())));

    let mut events = client.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => log_event(&client, &event),
                Err(RecvError::Lagged(missed)) => warn!("missed {missed} session events"),
                Err(RecvError::Closed) => break,
            },
            signal = &mut ctrl_c => {
                match signal {
                    Ok(()) => info!("received Ctrl+C, shutting down"),
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
                break;
            }
        }
    }

    drop(relay_guard);
    client.shutdown();
    session_task.await.context("session loop panicked")?;

    info!("HotWatch client stopped");
    Ok(())
}

fn log_event(client: &HotWatchClient, event: &ClientEvent) {
    match event {
        ClientEvent::ServerUrlChanged(url) if url.is_empty() => info!("server lost"),
        ClientEvent::ServerUrlChanged(url) => info!("server at {url}"),
        ClientEvent::ConnectedChanged(true) => info!("session connected"),
        ClientEvent::ConnectedChanged(false) => info!("session disconnected"),
        ClientEvent::FileChanged(path) => match client.file_url() {
            Some(url) => info!("{path} changed, reload {url}"),
            None => info!("{path} changed"),
        },
        ClientEvent::Error(message) => warn!("{message}"),
        ClientEvent::SourceFileChanged => info!("source file is now '{}'", client.source_file()),
        ClientEvent::DefaultHostChanged => {
            info!("default host is now '{}'", client.default_host())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_with_config(path: PathBuf) -> Cli {
        Cli {
            config: Some(path),
            server_url: None,
            default_host: None,
            watch_dir: None,
            source_file: None,
            discovery_port: None,
            no_forward_logs: false,
            log_level: None,
        }
    }

    fn missing_config_path() -> PathBuf {
        std::env::temp_dir().join("hotwatch-client-test-missing-config.toml")
    }

    #[test]
    fn test_cli_defaults_leave_everything_unset() {
        // Arrange / Act
        let cli = Cli::parse_from(["hotwatch-client"]);

        // Assert
        assert!(cli.server_url.is_none());
        assert!(cli.default_host.is_none());
        assert!(cli.discovery_port.is_none());
        assert!(!cli.no_forward_logs);
    }

    #[test]
    fn test_cli_server_url_override() {
        let cli = Cli::parse_from(["hotwatch-client", "--server-url", "http://10.0.0.5:8080/"]);
        assert_eq!(cli.server_url.as_deref(), Some("http://10.0.0.5:8080/"));
    }

    #[test]
    fn test_cli_discovery_port_override() {
        let cli = Cli::parse_from(["hotwatch-client", "--discovery-port", "50000"]);
        assert_eq!(cli.discovery_port, Some(50000));
    }

    #[test]
    fn test_cli_rejects_non_numeric_port() {
        let result = Cli::try_parse_from(["hotwatch-client", "--discovery-port", "abc"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_into_app_config_missing_file_yields_defaults() {
        // Arrange
        let cli = cli_with_config(missing_config_path());

        // Act
        let config = cli.into_app_config().unwrap();

        // Assert
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_into_app_config_flags_override_file() {
        // Arrange
        let (path, mut file) = temp_config("flags-override");
        writeln!(
            file,
            "[session]\ndefault_host = \"192.168.1.20:8080\"\nwatch_dir = \"/from/file\"\n"
        )
        .unwrap();
        let mut cli = cli_with_config(path.clone());
        cli.watch_dir = Some("/from/flag".to_string());
        cli.no_forward_logs = true;
        cli.log_level = Some("debug".to_string());

        // Act
        let config = cli.into_app_config().unwrap();
        let _ = std::fs::remove_file(&path);

        // Assert
        assert_eq!(config.session.default_host, "192.168.1.20:8080");
        assert_eq!(config.session.watch_dir, "/from/flag");
        assert!(!config.diagnostics.forward);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_into_app_config_malformed_file_returns_error() {
        let (path, mut file) = temp_config("malformed");
        writeln!(file, "[session\nserver_url = ").unwrap();
        let cli = cli_with_config(path.clone());

        let result = cli.into_app_config();
        let _ = std::fs::remove_file(&path);

        assert!(result.is_err());
    }

    fn temp_config(tag: &str) -> (PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!(
            "hotwatch-client-test-{tag}-{}.toml",
            std::process::id()
        ));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
