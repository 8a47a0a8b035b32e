//! connack-probe - Connect to an MQTT broker repeatedly and count missing CONNACKs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use giztoy_connack::{ProbeConfig, ProbeRunner, print_attempt, print_summary};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Connect to an MQTT broker repeatedly and count missing CONNACKs.
#[derive(Parser, Debug)]
#[command(name = "connack-probe")]
#[command(about = "Connect to an MQTT broker repeatedly and count missing CONNACKs")]
struct Args {
    /// Config file (YAML or JSON)
    #[arg(short, long, env = "CONNACK_PROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Broker host
    #[arg(long, env = "CONNACK_PROBE_HOST")]
    host: Option<String>,

    /// Broker port
    #[arg(short, long, env = "CONNACK_PROBE_PORT")]
    port: Option<u16>,

    /// Username sent in CONNECT
    #[arg(short, long, env = "CONNACK_PROBE_USERNAME")]
    username: Option<String>,

    /// Password sent in CONNECT
    #[arg(long, env = "CONNACK_PROBE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Send CONNECT without credentials
    #[arg(long, conflicts_with_all = ["username", "password"])]
    anonymous: bool,

    /// Number of connection attempts
    #[arg(short = 'n', long, env = "CONNACK_PROBE_ATTEMPTS")]
    attempts: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long, env = "CONNACK_PROBE_DELAY_MS")]
    delay_ms: Option<u64>,

    /// Seconds to wait for the CONNACK
    #[arg(long, env = "CONNACK_PROBE_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Keep-alive interval in seconds
    #[arg(long, env = "CONNACK_PROBE_KEEP_ALIVE")]
    keep_alive: Option<u16>,

    /// Fixed client id (default: one generated id per run)
    #[arg(long, env = "CONNACK_PROBE_CLIENT_ID", conflicts_with = "fresh_client_id")]
    client_id: Option<String>,

    /// Generate a new client id for every attempt
    #[arg(long)]
    fresh_client_id: bool,

    /// Connect over TLS
    #[arg(long)]
    tls: bool,

    /// Ask the broker for a persistent session (clean session off)
    #[arg(long)]
    persistent_session: bool,

    /// Retry transport failures within the connect timeout
    #[arg(long)]
    auto_reconnect: bool,

    /// Exit with an error when any attempt received no CONNACK
    #[arg(long)]
    check: bool,

    /// Output JSON report to file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Quiet mode (summary only)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Build the effective config: defaults, then the config file, then flags.
    fn probe_config(&self) -> Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ProbeConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.anonymous {
            config = config.without_credentials();
        }
        if let Some(username) = &self.username {
            config.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(attempts) = self.attempts {
            config = config.with_attempts(attempts);
        }
        if let Some(delay) = self.delay_ms {
            config = config.with_delay(Duration::from_millis(delay));
        }
        if let Some(secs) = self.connect_timeout {
            config = config.with_connect_timeout(secs);
        }
        if let Some(secs) = self.keep_alive {
            config = config.with_keep_alive(secs);
        }
        if let Some(id) = &self.client_id {
            config = config.with_client_id(id.clone());
        }
        if self.fresh_client_id {
            config.client_id = None;
            config = config.with_fresh_client_id(true);
        }
        if self.tls {
            config = config.with_tls(true);
        }
        if self.persistent_session {
            config = config.with_clean_session(false);
        }
        if self.auto_reconnect {
            config = config.with_auto_reconnect(true);
        }

        config.validate()?;
        Ok(config)
    }
}

/// What a Ctrl-C does.
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Stop after the current attempt.
    Stop,
    /// The run was already stopping; leave now.
    Exit,
}

fn on_interrupt(token: &CancellationToken) -> Interrupt {
    if token.is_cancelled() {
        warn!("Interrupted again, exiting");
        return Interrupt::Exit;
    }
    warn!("Interrupted, stopping after the current attempt (Ctrl-C again to exit)");
    token.cancel();
    Interrupt::Stop
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = args.probe_config()?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if on_interrupt(&token) == Interrupt::Exit {
                std::process::exit(130);
            }
        }
    });

    if !args.quiet {
        println!(
            "Probing {} with {} attempts (user={}, timeout={}s)",
            config.broker_addr(),
            config.attempts,
            config.username.as_deref().unwrap_or("<none>"),
            config.connect_timeout_secs
        );
    }

    let mut runner = ProbeRunner::new(config);
    if !args.quiet {
        runner = runner.with_on_attempt(print_attempt);
    }
    let report = runner.run(&cancel).await;

    print_summary(&report);

    if let Some(path) = &args.output {
        report
            .save(path)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!("Report saved to {}", path.display());
        if !args.quiet {
            println!("\nReport saved to: {}", path.display());
        }
    }

    if args.check {
        report.verify()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "connack-probe",
            "--host",
            "broker.local",
            "-p",
            "8883",
            "-n",
            "5",
            "--delay-ms",
            "0",
            "--persistent-session",
            "--fresh-client-id",
        ]);
        let config = args.probe_config().unwrap();

        assert_eq!(config.broker_addr(), "broker.local:8883");
        assert_eq!(config.attempts, 5);
        assert_eq!(config.delay_ms, 0);
        assert!(!config.clean_session);
        assert!(config.fresh_client_id);
        assert_eq!(config.username.as_deref(), Some("none"));
    }

    #[test]
    fn test_second_interrupt_exits() {
        let token = CancellationToken::new();

        assert_eq!(on_interrupt(&token), Interrupt::Stop);
        assert!(token.is_cancelled());
        assert_eq!(on_interrupt(&token), Interrupt::Exit);
        assert_eq!(on_interrupt(&token), Interrupt::Exit);
    }

    #[test]
    fn test_anonymous_clears_credentials() {
        let args = Args::parse_from(["connack-probe", "--anonymous"]);
        let config = args.probe_config().unwrap();
        assert!(config.username.is_none());
        assert!(config.password.is_none());
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        let args = Args::parse_from(["connack-probe", "--connect-timeout", "0"]);
        assert!(args.probe_config().is_err());
    }
}
