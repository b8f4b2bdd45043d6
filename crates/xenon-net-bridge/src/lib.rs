//! Host network bridge for the emulated Xenon Ethernet controller.
//!
//! A [`NetworkBridge`] owns at most one host [`Backend`](xenon_net_backend::Backend) and routes
//! frames between it and at most one attached [`EthernetDevice`](xenon_net_eth::EthernetDevice):
//!
//! ```text
//! guest TX ring -> device worker -> HostLink (bridge) -> backend -> host
//! host -> backend reader thread -> callback -> bridge -> RxPort -> device RX queue
//! ```
//!
//! The bridge is an ordinary value: build one, hand a clone to the device as its
//! [`HostLink`](xenon_net_eth::HostLink), then [`NetworkBridge::attach_device`].

mod bridge;
mod config;

pub use bridge::{BridgeError, NetworkBridge};
pub use config::{BridgeConfig, ConfigError};
