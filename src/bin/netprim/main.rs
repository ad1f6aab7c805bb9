use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::time::{sleep_until, Instant};
use tracing_subscriber::EnvFilter;
use vpn_netprim::config::{self, Config};
use vpn_netprim::probe::{IcmpProbe, ProbeState};

#[derive(Args, Debug)]
pub struct PingArgs {
    pub address: Ipv4Addr,
    #[arg(long, default_value_t = 3)]
    pub count: u32,
    #[arg(long, default_value_t = 56)]
    pub payload_size: usize,
    #[arg(long)]
    /// Set DF and refuse to fragment, for path MTU probing.
    pub dont_fragment: bool,
    #[arg(long)]
    /// Fake replies instead of using a raw socket, which requires privileges.
    pub simulate: bool,
    #[arg(long, default_value_t = 1000)]
    /// How long to wait for replies after each request.
    pub wait_ms: u64,
}

#[derive(Args, Debug)]
pub struct TunArgs {
    #[arg(long)]
    pub mtu: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send ICMP echo requests and report replies.
    Ping(PingArgs),
    /// Allocate a tunnel interface and hold it until interrupted.
    Tun(TunArgs),
}

#[derive(Parser)]
pub struct Cli {
    #[arg(long, global = true)]
    /// JSON config file. Defaults apply when missing.
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load(path).with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    match cli.command {
        Command::Ping(args) => run_ping(&config, args).await,
        Command::Tun(args) => run_tun(&config, args).await,
    }
}

async fn run_ping(config: &Config, args: PingArgs) -> anyhow::Result<()> {
    let mut probe_config = config.probe.clone();
    probe_config.simulate |= args.simulate;
    let mut probe = IcmpProbe::with_config(&probe_config);
    if probe.state() == ProbeState::SocketFailed {
        anyhow::bail!("could not open ICMP socket, retry with privileges or --simulate");
    }

    let wait = Duration::from_millis(args.wait_ms);
    let mut replies = 0u32;
    for _ in 0..args.count {
        let sequence = probe.next_sequence();
        if !probe.send_echo_request(args.address, args.payload_size, !args.dont_fragment) {
            println!("seq={sequence} send failed");
            continue;
        }
        let deadline = Instant::now() + wait;
        loop {
            tokio::select! {
                source = probe.next_reply() => {
                    replies += 1;
                    println!("seq={sequence} reply from {source}");
                }
                _ = sleep_until(deadline) => break,
            }
        }
    }
    println!("{} requests, {replies} replies", args.count);
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
async fn run_tun(config: &Config, args: TunArgs) -> anyhow::Result<()> {
    use vpn_netprim::tunnel::TunnelProvisioner;

    let provisioner = TunnelProvisioner::with_config(&config.tunnel);
    let mut handle = provisioner.create()?;
    if let Some(mtu) = args.mtu {
        if provisioner.set_mtu(&mut handle, mtu) == 0 {
            anyhow::bail!("failed to set mtu {mtu} on {}", handle.name());
        }
    }
    println!("{} (unit {}) mtu {}", handle.name(), handle.unit(), provisioner.mtu(&handle));
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
async fn run_tun(_config: &Config, _args: TunArgs) -> anyhow::Result<()> {
    anyhow::bail!("unsupported OS");
}
