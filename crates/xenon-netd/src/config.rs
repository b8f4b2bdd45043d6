use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use xenon_net_backend::{BackendKind, MacAddr};
use xenon_net_bridge::BridgeConfig;
use xenon_net_eth::EthernetConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "xenon-netd", version, about)]
pub struct Args {
    /// JSON bridge configuration (`enabled`, `backend`, `backend_config`).
    ///
    /// Environment variable: `XENON_NET_CONFIG`.
    #[arg(long, env = "XENON_NET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host backend: `none`, `tap`, `pcap` or `socket`. Enables bridging and overrides the
    /// configuration file.
    ///
    /// Environment variable: `XENON_NET_BACKEND`.
    #[arg(long, env = "XENON_NET_BACKEND")]
    pub backend: Option<BackendKind>,

    /// Backend configuration string, e.g. `tap0:192.168.1.1/24`.
    ///
    /// Environment variable: `XENON_NET_BACKEND_CONFIG`.
    #[arg(long, env = "XENON_NET_BACKEND_CONFIG")]
    pub backend_config: Option<String>,

    /// MAC address programmed into the emulated controller.
    ///
    /// Environment variable: `XENON_NET_MAC`.
    #[arg(long, env = "XENON_NET_MAC")]
    pub mac: Option<MacAddr>,

    /// Stop after this many seconds instead of running until killed.
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Guest RAM backing the descriptor rings, in MiB.
    #[arg(long, default_value_t = 512)]
    pub guest_ram_mib: u64,

    /// Print the host tap adapters and exit.
    #[arg(long)]
    pub list_devices: bool,
}

/// Everything `run` needs, resolved from flags, environment and the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bridge: BridgeConfig,
    pub device: EthernetConfig,
    pub duration: Option<Duration>,
    pub guest_ram_bytes: u64,
}

impl Settings {
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        let mut bridge = match &args.config {
            Some(path) => BridgeConfig::load(path)
                .with_context(|| format!("loading bridge config {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        if let Some(kind) = args.backend {
            bridge.enabled = true;
            bridge.backend = kind;
        }
        if let Some(config) = &args.backend_config {
            bridge.backend_config = config.trim().to_string();
        }

        let mut device = EthernetConfig::default();
        if let Some(mac) = args.mac {
            device.mac_address = mac.0;
        }

        anyhow::ensure!(args.guest_ram_mib > 0, "--guest-ram-mib must be non-zero");
        let guest_ram_bytes = args
            .guest_ram_mib
            .checked_mul(1 << 20)
            .with_context(|| format!("--guest-ram-mib {} overflows u64 bytes", args.guest_ram_mib))?;

        Ok(Self {
            bridge,
            device,
            duration: args.duration_secs.map(Duration::from_secs),
            guest_ram_bytes,
        })
    }
}
