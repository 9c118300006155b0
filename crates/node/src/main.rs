mod config;
mod node;

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use config::NodeConfig;
use entwine::PacketLossSimulation;
use node::Node;

const DEFAULT_PORT: u16 = 27960;

#[derive(Parser)]
#[command(name = "entwine-node")]
#[command(about = "Replicates a small moving world between peers")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    #[arg(short, long, default_value = "node")]
    name: String,

    #[arg(short, long, help = "TOML file with node and session settings")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<f32>,

    #[arg(long, help = "Enable packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

#[derive(Subcommand)]
enum Mode {
    /// Host a session
    Host {
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,

        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Join a hosted session
    Join {
        #[arg(default_value = "127.0.0.1")]
        server: String,

        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate;
    }
    if args.simulate_packet_loss {
        config.packet_loss = Some(PacketLossSimulation {
            enabled: true,
            loss_percent: args.loss_percent,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency,
            jitter_ms: args.jitter,
        });
    }

    let mut node = match &args.mode {
        Mode::Host { bind, port } => {
            let node = Node::host(&format!("{bind}:{port}"), &args.name, config)?;
            log::info!("hosting on {}", node.local_addr());
            node
        }
        Mode::Join { server, port } => {
            let addr = resolve(server, *port)?;
            Node::join(addr, &args.name, config)?
        }
    };

    node.run(args.duration.map(|s| Duration::from_secs_f32(s.max(0.0))))?;
    log::info!("node shutting down");
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}"))?
        .next()
        .with_context(|| format!("no address for {host}"))
}
