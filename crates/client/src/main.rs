mod pinger;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;

use pinger::{Outcome, Pinger};
use tickline::config::{DEFAULT_CONNECT_KEY, DEFAULT_PORT};
use tickline::{EventBuffer, TransportConfig, UdpEngines, UdpTransport};

/// How long to wait for the last reply before giving up on it.
const REPLY_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "tickline-client")]
#[command(about = "Pings a tickline echo server")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1",
        help = "Server host or ip (e.g., 127.0.0.1)"
    )]
    server: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = DEFAULT_CONNECT_KEY)]
    key: String,

    #[arg(short, long, default_value_t = 10, help = "Number of pings to send")]
    count: u32,

    #[arg(long, default_value_t = 0, help = "Channel to ping on")]
    channel: usize,

    #[arg(long, default_value_t = 250, help = "Delay between pings in ms")]
    interval_ms: u64,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long)]
    ipv6: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = TransportConfig {
        port: args.port,
        ipv6_enabled: args.ipv6,
        connect_key: args.key,
        ..Default::default()
    };

    let mut transport = UdpTransport::new(config, UdpEngines, EventBuffer::new())?;
    let channels = transport.channels().len();
    if args.channel >= channels {
        bail!("channel {} does not exist ({} channels)", args.channel, channels);
    }

    log::info!(
        "Max payload on channel {}: {} bytes",
        args.channel,
        transport.max_packet_size(args.channel)
    );
    transport.connect_client(&args.server);
    log::info!("{}", transport);

    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);
    let mut pinger = Pinger::new(
        args.channel,
        args.count,
        Duration::from_millis(args.interval_ms),
    );

    let outcome = loop {
        transport.tick();
        let now = Instant::now();
        match pinger.step(&mut transport, now) {
            Outcome::Running if pinger.timed_out(now, REPLY_GRACE) => break Outcome::Finished,
            Outcome::Running => thread::sleep(tick_duration),
            done => break done,
        }
    };

    if let Some(rtt) = transport.client_engine().and_then(|engine| engine.rtt_ms()) {
        log::info!("Keepalive rtt: {}ms", rtt);
    }
    transport.disconnect_client();

    let summary = pinger.summary();
    log::info!(
        "{} sent, {} received, average rtt {}",
        summary.sent,
        summary.received,
        summary
            .average_rtt()
            .map(|rtt| format!("{:.1}ms", rtt.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "n/a".to_string())
    );

    if let Outcome::Disconnected(reason) = outcome {
        bail!("client {}", reason.as_str());
    }
    Ok(())
}
