//! A minimal demo binary exercising the core end to end: binds a
//! listener, accepts connections, drives each through key exchange, and
//! logs (declining, so the dispatcher's own default replies apply) every
//! post-auth message it sees. Exit codes follow §6: 0 on a clean
//! shutdown, non-zero on a configuration or listener bind failure.

use std::path::PathBuf;

use clap::Parser;
use eyre::{eyre, Context, Result};
use serde::Deserialize;
use ssh_connection::{CallbackResult, Message, MessageDispatcher};
use ssh_keys::KeyAlgorithm;
use ssh_server_tokio::ServerListener;
use ssh_transport::listener::HostKeyPath;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Demo SSH2 server exercising the ssh-transport/ssh-connection core")]
struct Args {
    /// Path to a TOML configuration file (§3.1).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Overrides the configured port.
    #[arg(long)]
    port: Option<u16>,
}

/// The `Config` record of §3.1: bind address/port, host key paths, banner
/// override, and log verbosity, loaded from TOML plus CLI overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    bind_address: String,
    port: u16,
    rsa_host_key: Option<PathBuf>,
    dsa_host_key: Option<PathBuf>,
    banner: String,
    log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 22,
            rsa_host_key: None,
            dsa_host_key: None,
            banner: "SSH-2.0-sshd-demo_0.1".to_string(),
            log: "info".to_string(),
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&text).wrap_err("parsing config file")?
        }
        None => Config::default(),
    };
    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err:#}");
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            warn!(error = %err, "server exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let mut host_key_paths = Vec::new();
    if let Some(path) = &config.rsa_host_key {
        host_key_paths.push(HostKeyPath {
            algorithm: KeyAlgorithm::Rsa,
            path: path.clone(),
        });
    }
    if let Some(path) = &config.dsa_host_key {
        host_key_paths.push(HostKeyPath {
            algorithm: KeyAlgorithm::Dsa,
            path: path.clone(),
        });
    }
    if host_key_paths.is_empty() {
        return Err(eyre!(
            "no host keys configured (set rsa_host_key and/or dsa_host_key)"
        ));
    }

    // Resolved with tokio's own address-family-agnostic `ToSocketAddrs`
    // (hostnames and IPv6 literals both work here), matching the
    // resolver `ssh_transport::listener::Listener::bind` uses (§9: no
    // `gethostbyname`-style IPv4-only lookup).
    let bind_addr = format!("{}:{}", config.bind_address, config.port);

    let banner = format!("{}\r\n", config.banner);
    let listener = ServerListener::bind(bind_addr.clone(), &host_key_paths, banner.into_bytes())
        .await
        .wrap_err("binding listener")?;
    info!(%bind_addr, "listening");

    loop {
        let mut connection = match listener.accept().await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        tokio::spawn(async move {
            let peer = connection.peer_addr();
            info!(%peer, "accepted connection");
            if let Err(err) = serve(&mut connection).await {
                debug!(%peer, error = %err, "connection ended");
            }
        });
    }
}

async fn serve(connection: &mut ssh_server_tokio::ServerConnection) -> Result<()> {
    connection.drive_to_authenticated().await?;
    info!(peer = %connection.peer_addr(), "key exchange complete");

    let mut callback = LoggingCallback;
    loop {
        connection.progress(&mut callback).await?;
    }
}

/// The demo's embedder policy: log every dispatched message and decline
/// it, letting the dispatcher's own default replies (§4.5) apply. A real
/// embedder would authenticate users and approve channel opens here.
struct LoggingCallback;

impl ssh_connection::MessageCallback for LoggingCallback {
    fn on_message(
        &mut self,
        _dispatcher: &mut MessageDispatcher,
        _connection: &mut ssh_transport::server::ServerConnection,
        message: &Message,
    ) -> CallbackResult {
        debug!(?message, "dispatched message, declining to default reply");
        CallbackResult::Declined
    }
}
