//! Xenon southbridge Fast Ethernet controller.
//!
//! The guest driver programs the device through a 128-byte MMIO window ([`regs`]) and exchanges
//! frames through 16-byte descriptors in guest RAM ([`desc`]). Two transmit rings and one receive
//! ring are walked by a per-device worker thread (or synchronously via
//! [`EthernetDevice::poll`]); completed work raises one coalesced interrupt per ring per pass.
//!
//! Frames leave the device through a [`HostLink`] and enter through an [`RxPort`]. Both are
//! implemented/held by the host network bridge; the device itself knows nothing about host
//! backends.
#![forbid(unsafe_code)]

pub mod desc;
mod device;
mod interrupts;
mod mdio;
mod queue;
pub mod regs;
mod ring;
mod stats;
mod worker;

pub use device::{EthernetConfig, EthernetDevice, HostLink, RxPort};
pub use interrupts::{InterruptSink, PRIO_ENET};
pub use mdio::{Mdio, PHY_COUNT, PHY_REG_COUNT};
pub use queue::{EthernetPacket, PacketQueue};
pub use ring::Ring;
pub use stats::EthernetStats;

/// Largest frame (including VLAN tag, excluding FCS) a TX descriptor may describe.
pub const ETH_MAX_FRAME_SIZE: usize = 1522;

/// Largest frame accepted from the host side.
pub const ETH_MAX_PACKET_SIZE: usize = 2048;

/// Default depth of the pending-transmit and pending-receive queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Factory MAC address used when the embedder does not provide one.
pub const DEFAULT_MAC_ADDRESS: [u8; 6] = [0x00, 0x1D, 0xD8, 0xB7, 0x1C, 0x00];
