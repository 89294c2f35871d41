//! cloud-proxy CLI
//!
//! Deploys a batch of DigitalOcean droplets, opens one `ssh -D` SOCKS5
//! tunnel per droplet and hands control to an interactive console. The
//! droplets are destroyed when the operator quits or the process is
//! interrupted, whichever comes first.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloud_proxy::console::ConsoleController;
use cloud_proxy::output::{print_info, print_success, print_warning, write_reports};
use cp_core::config::{self, ProxyConfig};
use cp_core::types::ShutdownTrigger;
use cp_core::CloudProxyError;
use cp_fleet::provider::DigitalOceanProvider;
use cp_fleet::{start_tunnels, CleanupCoordinator, Provisioner, SshTransport, TunnelLauncher};

#[derive(Parser)]
#[command(name = "cloud-proxy")]
#[command(author, version, about = "Disposable SOCKS5 proxies on DigitalOcean droplets")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,

    /// DigitalOcean API token
    #[arg(long, env = "DIGITALOCEAN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Fingerprint of the SSH key registered with DigitalOcean
    #[arg(long)]
    key: Option<String>,

    /// SSH private key used for the tunnels
    #[arg(long)]
    key_location: Option<PathBuf>,

    /// Number of droplets to deploy
    #[arg(long)]
    count: Option<u32>,

    /// Droplet name prefix
    #[arg(long)]
    name: Option<String>,

    /// Comma separated region slugs, or `*` for all
    #[arg(long)]
    regions: Option<String>,

    /// Allow more than 50 droplets
    #[arg(long)]
    force: bool,

    /// Local port of the first proxy
    #[arg(long = "start-tcp")]
    start_tcp: Option<u16>,

    /// Seconds to wait for droplets to boot
    #[arg(long)]
    boot_wait: Option<u64>,

    /// Remote user for the tunnels
    #[arg(long)]
    ssh_user: Option<String>,

    /// SSH client executable
    #[arg(long)]
    ssh_binary: Option<String>,
}

impl Cli {
    /// Apply command-line values on top of the file configuration
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(key) = &self.key {
            config.key_id = Some(key.clone());
        }
        if let Some(path) = &self.key_location {
            config.key_location = path.clone();
        }
        if let Some(count) = self.count {
            config.count = count;
        }
        if let Some(name) = &self.name {
            config.name_prefix = name.clone();
        }
        if let Some(regions) = &self.regions {
            config.regions = regions.clone();
        }
        if self.force {
            config.force = true;
        }
        if let Some(port) = self.start_tcp {
            config.start_port = port;
        }
        if let Some(secs) = self.boot_wait {
            config.boot_wait = std::time::Duration::from_secs(secs);
        }
        if let Some(user) = &self.ssh_user {
            config.ssh_user = user.clone();
        }
        if let Some(binary) = &self.ssh_binary {
            config.ssh_binary = binary.clone();
        }
    }
}

fn load_config(cli: &Cli) -> Result<ProxyConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let path = config::default_config_path();
            if path.exists() {
                config::load_config(&path)
                    .with_context(|| format!("Failed to load config from {:?}", path))?
            } else {
                tracing::debug!("No config file at {:?}, using defaults", path);
                ProxyConfig::default()
            }
        }
    };

    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress messages are logged at info, so that is the default level
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(&cli)?;

    let provider: Arc<dyn cp_core::traits::InstanceProvider> =
        Arc::new(DigitalOceanProvider::from_config(&config)?);

    let registry = match Provisioner::new(&config, Arc::clone(&provider)).provision().await {
        Ok(registry) => Arc::new(registry),
        Err(e @ CloudProxyError::Provision(_)) => {
            print_warning("You may need to do some manual clean up!");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let transport = Arc::new(SshTransport::new(config.ssh_binary.clone()));
    let launcher = TunnelLauncher::from_config(transport, &config);

    let summary = start_tunnels(&registry, provider.as_ref(), &launcher, config.start_port).await;
    print_success(&format!(
        "{} of {} proxies running",
        summary.started.len(),
        registry.len()
    ));
    if !summary.not_ready.is_empty() || !summary.failed.is_empty() {
        print_warning(&format!(
            "{} droplet(s) not ready, {} tunnel(s) failed to start",
            summary.not_ready.len(),
            summary.failed.len()
        ));
    }

    let mut stdout = std::io::stdout();
    write_reports(&mut stdout, &registry.active_ports().await)?;
    print_info("Please CTRL-C to destroy droplets");

    let coordinator = Arc::new(CleanupCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&provider),
    ));

    // Setup signal handlers
    let signal_coordinator = Arc::clone(&coordinator);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        let trigger = signal_coordinator.shutdown(ShutdownTrigger::Interrupt).await;
        std::process::exit(trigger.exit_code());
    });

    let mut console = ConsoleController::new(registry, launcher, coordinator);
    let trigger = console
        .run(BufReader::new(tokio::io::stdin()), &mut stdout)
        .await?;

    std::process::exit(trigger.exit_code());
}
