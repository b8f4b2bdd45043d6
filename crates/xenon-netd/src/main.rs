use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use xenon_memory::SparseMemory;
use xenon_net_backend::{list_tap_devices, MacAddr};
use xenon_net_bridge::NetworkBridge;
use xenon_net_eth::{EthernetDevice, InterruptSink};

mod config;

use config::{Args, Settings};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Interrupt controller stand-in: the harness has no CPU to deliver to.
struct LoggingIrq;

impl InterruptSink for LoggingIrq {
    fn route_interrupt(&self, prio: u8) {
        tracing::trace!(prio = format_args!("{prio:#04x}"), "interrupt routed");
    }

    fn cancel_interrupt(&self, prio: u8) {
        tracing::trace!(prio = format_args!("{prio:#04x}"), "interrupt cancelled");
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    if args.list_devices {
        for name in list_tap_devices() {
            println!("{name}");
        }
        return Ok(());
    }

    let settings = Settings::from_args(&args)?;
    run(settings)
}

fn run(settings: Settings) -> anyhow::Result<()> {
    let mem = Arc::new(
        SparseMemory::new(settings.guest_ram_bytes).context("allocating guest RAM")?,
    );

    let bridge = NetworkBridge::new();
    let mut device = EthernetDevice::new(
        settings.device.clone(),
        mem,
        Arc::new(LoggingIrq),
        Some(Arc::new(bridge.clone())),
    );
    device.spawn_worker().context("spawning ethernet worker")?;

    if let Err(err) = bridge.initialize(settings.bridge.clone()) {
        tracing::warn!(error = %err, "continuing without host networking");
    }
    bridge.attach_device(&device);

    tracing::info!(
        mac = %MacAddr(device.mac_address()),
        link_up = device.link_up(),
        backend = ?bridge.backend_kind(),
        "xenon ethernet controller running"
    );

    let started = Instant::now();
    loop {
        let remaining = match settings.duration {
            Some(limit) => match limit.checked_sub(started.elapsed()) {
                Some(left) if !left.is_zero() => Some(left),
                _ => break,
            },
            None => None,
        };
        std::thread::sleep(remaining.map_or(REPORT_INTERVAL, |left| left.min(REPORT_INTERVAL)));

        let stats = device.stats();
        tracing::debug!(
            tx_packets = stats.tx_packets,
            rx_packets = stats.rx_packets,
            tx_errors = stats.tx_errors,
            rx_errors = stats.rx_errors,
            rx_overruns = stats.rx_overruns,
            "device stats"
        );
        if let Some(backend) = bridge.backend_stats() {
            tracing::debug!(
                tx_packets = backend.tx_packets,
                rx_packets = backend.rx_packets,
                tx_dropped = backend.tx_dropped,
                "backend stats"
            );
        }
    }

    bridge.shutdown();
    device.shutdown();
    let stats = device.stats();
    tracing::info!(
        tx_packets = stats.tx_packets,
        rx_packets = stats.rx_packets,
        "xenon ethernet controller stopped"
    );
    Ok(())
}
