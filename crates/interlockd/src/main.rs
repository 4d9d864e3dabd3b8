//! interlockd: HTTPS front end to an encrypted block-storage volume.
//!
//! A browser client authenticates against the volume passphrase; on
//! success the daemon unlocks and mounts the volume at a process-private
//! mount point and exposes a JSON API bound to that single session.

mod api;
mod logging;
mod operator;
mod request;
mod server;
mod session;
mod state;
mod tickets;
mod tls;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use interlock_core::config::Config;
use interlock_core::status::StatusLog;
use interlock_crypto::{aes256, openpgp, totp, CipherRegistry};
use interlock_volume::VolumeManager;

pub use interlock_core::Error;

#[derive(Parser, Debug)]
#[command(name = "interlockd", version, about = "INTERLOCK encrypted storage front end")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', default_value = "interlock.conf")]
    config: PathBuf,

    /// Debug mode
    #[arg(short = 'd')]
    debug: bool,

    /// Test mode (WARNING: disables authentication)
    #[arg(short = 't')]
    test: bool,

    /// Binding address:port pair
    #[arg(short = 'b', default_value = "0.0.0.0:4430")]
    bind_address: String,

    /// Operation ((open:<volume>)|close|derive[:<hex>])
    #[arg(short = 'o')]
    operation: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        Config::load_over(&cli.config, cli.debug).context("parsing configuration")?;
    config.test_mode = cli.test;
    config.bind_address = cli.bind_address.clone();

    if cli.operation.is_none() && nix::unistd::Uid::effective().is_root() {
        anyhow::bail!("please do not run this application with administrative privileges");
    }

    config.set_mount_point().context("creating mount point")?;

    // no temporary file may ever land in unencrypted space; relevant only
    // once the volume is mounted but applied as early as possible
    std::env::set_var("TMPDIR", &config.mount_point);

    let logs = logging::init(config.debug);
    let status = StatusLog::new();

    let mut registry = CipherRegistry::new();
    registry.register(openpgp::descriptor(), openpgp::factory())?;
    registry.register(aes256::descriptor(), aes256::factory())?;
    registry.register(totp::descriptor(), totp::factory())?;
    registry
        .enable(&config.ciphers)
        .context("enabling ciphers")?;

    let roles = interlock_hsm::configure(&config.hsm, &mut registry)
        .context("configuring HSM")?;

    let volume = VolumeManager::new(
        config.volume_group.clone(),
        config.mount_point.clone(),
        status.clone(),
        roles.luks.clone(),
    );

    if let Some(op) = &cli.operation {
        return operator::run(op, &volume).map_err(Into::into);
    }

    info!("starting INTERLOCK {}", env!("CARGO_PKG_VERSION"));
    info!(
        "configuration file {} successfully parsed",
        cli.config.display()
    );

    if config.test_mode {
        warn!("*** WARNING *** authentication disabled (test mode switch enabled)");
    }

    if config.debug {
        info!("debug mode enabled");
    } else if let Err(e) = logs.enable_syslog() {
        warn!("{e}");
    }

    info!("applied configuration:\n{}", config.render());

    let state = state::AppState::new(config, registry, status, volume, roles.tls, logs);

    let app = server::router(state.clone());

    tls::serve(state, app).await.map_err(Into::into)
}
