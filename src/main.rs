use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use canlink::{
    validate_flush_timeout, CanWorker, DebugOptions, UdpWorker, DEFAULT_FLUSH_TIMEOUT_MS,
};

/// SocketCAN-over-UDP tunnel endpoint.
///
/// Run one endpoint on each side of the IP network and point them at each
/// other; frames on either CAN bus appear on the other.
#[derive(Parser, Debug)]
#[command(name = "canlink", version, about)]
struct Args {
    /// Remote peer (destination and only accepted source), e.g. 192.168.0.2:20000.
    #[arg(short = 'R', long)]
    remote: SocketAddrV4,

    /// Local bind address, e.g. 0.0.0.0:20000.
    #[arg(short = 'L', long)]
    local: SocketAddrV4,

    /// CAN interface name.
    #[arg(short = 'I', long, default_value = "can0")]
    interface: String,

    /// Flush timeout for the UDP aggregation buffer in milliseconds (1-60000).
    #[arg(short = 't', long, default_value_t = DEFAULT_FLUSH_TIMEOUT_MS)]
    flush_timeout: u64,

    /// Log every CAN frame crossing the tunnel.
    #[arg(long)]
    debug_can: bool,

    /// Log every datagram sent or received.
    #[arg(long)]
    debug_udp: bool,

    /// Log flush timer expirations.
    #[arg(long)]
    debug_timer: bool,

    /// Log pool growth and buffer sizes on shutdown.
    #[arg(long)]
    debug_buffer: bool,
}

static QUIT: AtomicBool = AtomicBool::new(false);

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    let flush_timeout =
        validate_flush_timeout(args.flush_timeout).context("invalid --flush-timeout")?;
    let debug = DebugOptions {
        can: args.debug_can,
        udp: args.debug_udp,
        timer: args.debug_timer,
        buffer: args.debug_buffer,
    };

    let mut udp = UdpWorker::new(args.remote, args.local, flush_timeout, debug)
        .with_context(|| format!("failed to set up the UDP worker on {}", args.local))?;
    let mut can = CanWorker::new(&args.interface, debug)
        .with_context(|| format!("failed to set up the CAN worker on {}", args.interface))?;

    udp.set_peer(Arc::new(can.handle()));
    can.set_peer(Arc::new(udp.handle()));
    udp.start().context("failed to start the UDP worker")?;
    can.start().context("failed to start the CAN worker")?;
    info!(
        "tunnelling {} <-> {} (flush timeout {:?})",
        args.interface, args.remote, flush_timeout
    );

    ctrlc::set_handler(|| QUIT.store(true, Ordering::Relaxed))
        .context("failed to set the signal handler")?;
    while !QUIT.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("signal received, stopping");
    can.stop();
    udp.stop();
    Ok(())
}
