//! MMIO register map.
//!
//! All registers are little-endian. Offsets are relative to BAR0; the window is
//! [`MMIO_SIZE`] bytes long.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use bitflags::bitflags;

pub const MMIO_SIZE: u64 = 0x80;

pub const REG_TX_CONFIG: u64 = 0x00;
pub const REG_TX_DESC_BASE: u64 = 0x04;
pub const REG_RX_CONFIG: u64 = 0x10;
pub const REG_RX_DESC_BASE: u64 = 0x14;
pub const REG_INT_STATUS: u64 = 0x20;
pub const REG_INT_MASK: u64 = 0x24;
pub const REG_CONFIG_0: u64 = 0x28;
pub const REG_POWER: u64 = 0x30;
pub const REG_PHY_CONFIG: u64 = 0x40;
pub const REG_PHY_CONTROL: u64 = 0x44;
pub const REG_CONFIG_1: u64 = 0x50;
pub const REG_RETRY_COUNT: u64 = 0x54;
pub const REG_MCAST_FILTER_CONTROL: u64 = 0x60;
pub const REG_MAC_ADDRESS_0: u64 = 0x62;
pub const REG_MCAST_HASH_0: u64 = 0x68;
pub const REG_MCAST_HASH_1: u64 = 0x6C;
pub const REG_MAX_PACKET_SIZE: u64 = 0x78;
pub const REG_MAC_ADDRESS_1: u64 = 0x7A;

pub const MAC_ADDRESS_LEN: u64 = 6;

/// `CONFIG_0` pattern requesting a soft reset of the DMA engine.
pub const CONFIG0_SOFT_RESET: u32 = 0x0000_0001;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxConfig: u32 {
        const DMA_ENABLE = 1 << 0;
        const RING0_ENABLE = 1 << 4;
        const RING1_ENABLE = 1 << 5;
        /// `TX_DESC_BASE` accesses target ring 1 instead of ring 0.
        const RING1_BASE_SELECT = 1 << 16;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxConfig: u32 {
        const DMA_ENABLE = 1 << 0;
        const RX_ENABLE = 1 << 4;
    }
}

bitflags! {
    /// Bits of `INT_STATUS` / `INT_MASK`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterruptCause: u32 {
        const TX0_DONE = 0x0000_0004;
        const TX1_DONE = 0x0000_0008;
        const LINK_CHANGE = 0x0000_0100;
        const RX_DONE = 0x2000_0040;
    }
}

/// Name of the register at `offset`, for logging.
pub fn register_name(offset: u64) -> &'static str {
    match offset {
        REG_TX_CONFIG => "TX_CONFIG",
        REG_TX_DESC_BASE => "TX_DESC_BASE",
        REG_RX_CONFIG => "RX_CONFIG",
        REG_RX_DESC_BASE => "RX_DESC_BASE",
        REG_INT_STATUS => "INT_STATUS",
        REG_INT_MASK => "INT_MASK",
        REG_CONFIG_0 => "CONFIG_0",
        REG_POWER => "POWER",
        REG_PHY_CONFIG => "PHY_CONFIG",
        REG_PHY_CONTROL => "PHY_CONTROL",
        REG_CONFIG_1 => "CONFIG_1",
        REG_RETRY_COUNT => "RETRY_COUNT",
        REG_MCAST_FILTER_CONTROL => "MCAST_FILTER_CONTROL",
        0x62..=0x67 => "MAC_ADDRESS_0",
        REG_MCAST_HASH_0 => "MCAST_HASH_0",
        REG_MCAST_HASH_1 => "MCAST_HASH_1",
        REG_MAX_PACKET_SIZE => "MAX_PACKET_SIZE",
        0x7A..=0x7F => "MAC_ADDRESS_1",
        _ => "UNDEFINED",
    }
}

/// Mask selecting the low `size` bytes of an access.
pub(crate) fn lane_mask(size: usize) -> u32 {
    match size {
        1 => 0xFF,
        2 => 0xFFFF,
        _ => u32::MAX,
    }
}

/// Guest-visible register storage.
///
/// Written by guest MMIO (and the engine, for `int_status`), read by the worker with relaxed
/// ordering. The PHY control register lives with the PHY bank in [`crate::Mdio`].
#[derive(Debug)]
pub(crate) struct RegisterFile {
    pub tx_config: AtomicU32,
    pub tx_desc_base: [AtomicU32; 2],
    pub rx_config: AtomicU32,
    pub rx_desc_base: AtomicU32,
    pub int_status: AtomicU32,
    pub int_mask: AtomicU32,
    pub config0: AtomicU32,
    pub power: AtomicU32,
    pub phy_config: AtomicU32,
    pub config1: AtomicU32,
    pub retry_count: AtomicU32,
    pub mcast_filter_control: AtomicU32,
    pub mcast_hash: [AtomicU32; 2],
    pub max_packet_size: AtomicU32,
    pub mac_address: [[AtomicU8; 6]; 2],
}

impl RegisterFile {
    pub fn new(mac: [u8; 6]) -> Self {
        let mac_regs = || std::array::from_fn(|i| AtomicU8::new(mac[i]));
        Self {
            tx_config: AtomicU32::new(0),
            tx_desc_base: [AtomicU32::new(0), AtomicU32::new(0)],
            rx_config: AtomicU32::new(0),
            rx_desc_base: AtomicU32::new(0),
            int_status: AtomicU32::new(0),
            int_mask: AtomicU32::new(0),
            config0: AtomicU32::new(0),
            power: AtomicU32::new(0),
            phy_config: AtomicU32::new(0),
            config1: AtomicU32::new(0),
            retry_count: AtomicU32::new(0),
            mcast_filter_control: AtomicU32::new(0),
            mcast_hash: [AtomicU32::new(0), AtomicU32::new(0)],
            max_packet_size: AtomicU32::new(crate::ETH_MAX_FRAME_SIZE as u32),
            mac_address: [mac_regs(), mac_regs()],
        }
    }

    /// Plain storage registers with no side effects beyond the store itself.
    pub fn plain(&self, offset: u64) -> Option<&AtomicU32> {
        Some(match offset {
            REG_TX_CONFIG => &self.tx_config,
            REG_RX_CONFIG => &self.rx_config,
            REG_RX_DESC_BASE => &self.rx_desc_base,
            REG_INT_STATUS => &self.int_status,
            REG_INT_MASK => &self.int_mask,
            REG_CONFIG_0 => &self.config0,
            REG_POWER => &self.power,
            REG_PHY_CONFIG => &self.phy_config,
            REG_CONFIG_1 => &self.config1,
            REG_RETRY_COUNT => &self.retry_count,
            REG_MCAST_FILTER_CONTROL => &self.mcast_filter_control,
            REG_MCAST_HASH_0 => &self.mcast_hash[0],
            REG_MCAST_HASH_1 => &self.mcast_hash[1],
            REG_MAX_PACKET_SIZE => &self.max_packet_size,
            _ => return None,
        })
    }

    /// Which MAC address field (and byte index within it) covers `offset`.
    pub fn mac_field(offset: u64) -> Option<(usize, usize)> {
        match offset {
            0x62..=0x67 => Some((0, (offset - REG_MAC_ADDRESS_0) as usize)),
            0x7A..=0x7F => Some((1, (offset - REG_MAC_ADDRESS_1) as usize)),
            _ => None,
        }
    }

    pub fn read_mac_lanes(&self, field: usize, start: usize, size: usize) -> u32 {
        let bytes = &self.mac_address[field];
        let mut value = 0u32;
        for lane in 0..size {
            if let Some(byte) = bytes.get(start + lane) {
                value |= u32::from(byte.load(Ordering::Relaxed)) << (lane * 8);
            }
        }
        value
    }

    pub fn write_mac_lanes(&self, field: usize, start: usize, size: usize, value: u32) {
        let bytes = &self.mac_address[field];
        for lane in 0..size {
            if let Some(byte) = bytes.get(start + lane) {
                byte.store((value >> (lane * 8)) as u8, Ordering::Relaxed);
            }
        }
    }

    pub fn mac(&self, field: usize) -> [u8; 6] {
        std::array::from_fn(|i| self.mac_address[field][i].load(Ordering::Relaxed))
    }
}

/// Stores the low `size` bytes of `value` into `reg`, preserving the untouched upper lanes.
/// Returns the resulting register value.
pub(crate) fn store_lanes(reg: &AtomicU32, size: usize, value: u32) -> u32 {
    let mask = lane_mask(size);
    if mask == u32::MAX {
        reg.store(value, Ordering::Relaxed);
        return value;
    }
    let merge = |old: u32| (old & !mask) | (value & mask);
    match reg.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |old| Some(merge(old))) {
        Ok(old) | Err(old) => merge(old),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_stores_merge_into_low_lanes() {
        let reg = AtomicU32::new(0xAABB_CCDD);
        assert_eq!(store_lanes(&reg, 1, 0x11), 0xAABB_CC11);
        assert_eq!(store_lanes(&reg, 2, 0x2233), 0xAABB_2233);
        assert_eq!(store_lanes(&reg, 4, 0x0102_0304), 0x0102_0304);
    }

    #[test]
    fn mac_lanes_clamp_to_field() {
        let regs = RegisterFile::new([1, 2, 3, 4, 5, 6]);
        assert_eq!(regs.read_mac_lanes(0, 0, 4), 0x0403_0201);
        // Bytes 4..8 only overlap the last two bytes of the field.
        assert_eq!(regs.read_mac_lanes(0, 4, 4), 0x0000_0605);

        regs.write_mac_lanes(1, 4, 4, 0xDDCC_BBAA);
        assert_eq!(regs.mac(1), [1, 2, 3, 4, 0xAA, 0xBB]);
        assert_eq!(regs.mac(0), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn mac_field_lookup() {
        assert_eq!(RegisterFile::mac_field(0x62), Some((0, 0)));
        assert_eq!(RegisterFile::mac_field(0x67), Some((0, 5)));
        assert_eq!(RegisterFile::mac_field(0x7A), Some((1, 0)));
        assert_eq!(RegisterFile::mac_field(0x68), None);
    }
}
