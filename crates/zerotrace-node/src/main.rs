//! ZeroTrace node daemon.
//!
//! Unlocks (or creates) the local identity, assembles the node, joins
//! the directory through any bootstrap peers, and serves the HTTP
//! surface until interrupted. The i2pd process itself is supervised
//! externally; this binary only consumes the overlay's destination
//! string and proxy endpoint.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use zerotrace_dht::NodeAddr;
use zerotrace_identity::{Keystore, IdentityError, DEFAULT_KEYSTORE_FILE};
use zerotrace_net::{Node, NodeConfig, OverlayInfo};

/// Interactive password attempts before giving up.
const PASSWORD_ATTEMPTS: usize = 3;

/// ZeroTrace node
///
/// Decentralized, post-quantum, store-and-forward messaging over the
/// I2P overlay.
#[derive(Parser, Debug)]
#[command(name = "zerotrace")]
#[command(version, about, long_about = None)]
struct Args {
    /// Loopback host to bind the HTTP server on
    #[arg(long, env = "ZEROTRACE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the HTTP server on
    #[arg(long, env = "ZEROTRACE_PORT", default_value = "8625")]
    port: u16,

    /// Data directory (keystore and databases)
    #[arg(long, env = "ZEROTRACE_DATA_DIR", default_value = ".zerotrace")]
    data_dir: PathBuf,

    /// Run as a relay/directory node only (no self-publication)
    #[arg(long, default_value = "false")]
    server_only: bool,

    /// Developer mode: plain loopback HTTP, no overlay proxy
    #[arg(long, default_value = "false")]
    no_i2p: bool,

    /// Path to the i2pd binary (supervised externally; accepted for
    /// compatibility with launcher scripts)
    #[arg(long, env = "ZEROTRACE_I2PD_PATH")]
    i2pd_path: Option<PathBuf>,

    /// Path to the i2pd tunnels configuration (supervised externally)
    #[arg(long, env = "ZEROTRACE_TUNNELS_CONF")]
    tunnels_conf: Option<PathBuf>,

    /// This node's overlay destination (something.b32.i2p); read from
    /// <data-dir>/destination.txt when omitted
    #[arg(long, env = "ZEROTRACE_LOCAL_DEST")]
    local_dest: Option<String>,

    /// Overlay HTTP proxy endpoint
    #[arg(long, env = "ZEROTRACE_HTTP_PROXY", default_value = zerotrace_net::overlay::DEFAULT_HTTP_PROXY)]
    http_proxy: String,

    /// Bootstrap peers, comma-separated host:port pairs
    #[arg(long, env = "ZEROTRACE_BOOTSTRAP")]
    bootstrap: Option<String>,

    /// Keystore password (prompted interactively when omitted)
    #[arg(long, env = "ZEROTRACE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ZEROTRACE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (plain, json)
    #[arg(long, env = "ZEROTRACE_LOG_FORMAT", default_value = "plain")]
    log_format: String,
}

fn setup_logging(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower_http=info".parse()?);

    match log_format.to_lowercase().as_str() {
        "json" => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set subscriber")?;
        }
        _ => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set subscriber")?;
        }
    }
    Ok(())
}

/// Resolve the overlay values: developer mode binds everything to
/// loopback; otherwise the destination comes from the flag or the
/// overlay manager's drop file.
fn resolve_overlay(args: &Args) -> Result<OverlayInfo> {
    if args.no_i2p {
        return Ok(OverlayInfo::direct(format!("{}:{}", args.host, args.port)));
    }
    let dest = match &args.local_dest {
        Some(dest) => dest.clone(),
        None => {
            let path = args.data_dir.join("destination.txt");
            std::fs::read_to_string(&path)
                .with_context(|| {
                    format!(
                        "no --local-dest and no destination file at {}; is the overlay tunnel up?",
                        path.display()
                    )
                })?
                .trim()
                .to_string()
        }
    };
    if !dest.to_ascii_lowercase().contains(".i2p") {
        bail!("local destination {dest:?} does not look like an overlay address");
    }
    Ok(OverlayInfo::proxied(dest, args.http_proxy.clone()))
}

/// Unlock the keystore, creating it on first run. Interactive retries
/// are capped; a wrong password after the cap is a startup failure.
fn unlock_identity(args: &Args) -> Result<zerotrace_identity::Identity> {
    let keystore = Keystore::at(args.data_dir.join(DEFAULT_KEYSTORE_FILE));

    if let Some(password) = &args.password {
        return if keystore.exists() {
            Ok(keystore.open(password)?)
        } else {
            info!("creating new identity");
            Ok(keystore.create(password)?)
        };
    }

    let stdin = std::io::stdin();
    let mut line = String::new();
    if !keystore.exists() {
        print!("New keystore password: ");
        std::io::stdout().flush()?;
        stdin.lock().read_line(&mut line)?;
        let password = line.trim_end_matches(['\r', '\n']);
        if password.is_empty() {
            bail!("empty password");
        }
        info!("creating new identity");
        return Ok(keystore.create(password)?);
    }

    for attempt in 1..=PASSWORD_ATTEMPTS {
        line.clear();
        print!("Keystore password: ");
        std::io::stdout().flush()?;
        stdin.lock().read_line(&mut line)?;
        let password = line.trim_end_matches(['\r', '\n']);
        match keystore.open(password) {
            Ok(identity) => return Ok(identity),
            Err(IdentityError::WrongPassword) if attempt < PASSWORD_ATTEMPTS => {
                warn!(attempt, "wrong password");
            }
            Err(e) => return Err(e.into()),
        }
    }
    bail!("wrong password after {PASSWORD_ATTEMPTS} attempts")
}

fn parse_bootstrap(list: &str) -> Vec<NodeAddr> {
    list.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let (host, port) = zerotrace_net::overlay::split_host_port(entry);
            Some(NodeAddr::new(host, port))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level, &args.log_format)?;

    if args.i2pd_path.is_some() || args.tunnels_conf.is_some() {
        info!("i2pd supervision is external; --i2pd-path/--tunnels-conf noted for the launcher");
    }

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create data dir {}", args.data_dir.display()))?;

    let overlay = resolve_overlay(&args)?;
    let identity = unlock_identity(&args).context("failed to unlock keystore")?;

    info!(
        identifier = %identity.identifier(),
        addr = %overlay.local_addr,
        "identity unlocked"
    );

    let config = NodeConfig::new(args.data_dir.clone())
        .with_host(args.host.clone())
        .with_port(args.port)
        .with_overlay(overlay)
        .with_server_only(args.server_only);

    let node = Node::new(config, identity)
        .await
        .context("failed to initialize node")?;

    // Fail fast on an occupied port before joining the network.
    let listener = node.bind().await.context("failed to bind server port")?;

    node.clone().start_background();

    if let Some(bootstrap) = &args.bootstrap {
        for peer in parse_bootstrap(bootstrap) {
            match node.bootstrap(&peer).await {
                Ok(()) => info!(%peer, "bootstrapped"),
                Err(e) => warn!(%peer, error = %e, "bootstrap failed"),
            }
        }
        if !args.server_only {
            match node.publish_self().await {
                Ok(acks) => info!(acks, "directory record published"),
                Err(e) => warn!(error = %e, "initial self-publication failed"),
            }
        }
    }

    info!("node ready; press Ctrl+C to stop");

    let server = {
        let node = node.clone();
        tokio::spawn(async move { node.serve_on(listener).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    node.shutdown().await;
    server.await??;

    info!("node stopped");
    Ok(())
}
