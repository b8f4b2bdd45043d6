//! Ring descriptor layouts.
//!
//! Both descriptor kinds are four little-endian `u32` words (16 bytes). Bit 31 of the status
//! word is OWN (set: hardware may use the slot) and bit 31 of the last word is WRAP (set: this is
//! the final slot of the ring).

pub const DESC_SIZE: u64 = 16;

pub const DESC_OWN: u32 = 1 << 31;
pub const DESC_WRAP: u32 = 1 << 31;
pub const DESC_LEN_MASK: u32 = 0x0000_FFFF;

pub const TX_STATUS_DONE: u32 = 0x0000_0001;
pub const TX_STATUS_ERROR: u32 = 0x0000_0002;

pub const RX_STATUS_DONE: u32 = 0x0000_0001;
pub const RX_STATUS_ERROR: u32 = 0x0000_0002;
pub const RX_STATUS_OVERFLOW: u32 = 0x0000_0008;
pub const RX_STATUS_MULTICAST: u32 = 0x0000_0020;
pub const RX_STATUS_BROADCAST: u32 = 0x0000_0040;
/// Frame starts and ends in this descriptor; set together on every completed receive.
pub const RX_STATUS_LAST: u32 = 0x2000_0000;
pub const RX_STATUS_FIRST: u32 = 0x4000_0000;

fn word(bytes: &[u8; 16], index: usize) -> u32 {
    let start = index * 4;
    u32::from_le_bytes([
        bytes[start],
        bytes[start + 1],
        bytes[start + 2],
        bytes[start + 3],
    ])
}

fn words_to_bytes(words: [u32; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (chunk, w) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&w.to_le_bytes());
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDescriptor {
    pub length: u32,
    pub status: u32,
    pub buffer_addr: u32,
    pub length_or_wrap: u32,
}

impl TxDescriptor {
    /// Byte offset of the status word within the descriptor.
    pub const STATUS_OFFSET: u64 = 4;

    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        Self {
            length: word(bytes, 0),
            status: word(bytes, 1),
            buffer_addr: word(bytes, 2),
            length_or_wrap: word(bytes, 3),
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        words_to_bytes([
            self.length,
            self.status,
            self.buffer_addr,
            self.length_or_wrap,
        ])
    }

    pub fn is_owned(&self) -> bool {
        self.status & DESC_OWN != 0
    }

    pub fn is_wrap(&self) -> bool {
        self.length_or_wrap & DESC_WRAP != 0
    }

    pub fn frame_len(&self) -> usize {
        (self.length & DESC_LEN_MASK) as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxDescriptor {
    pub received_length: u32,
    pub status: u32,
    pub buffer_addr: u32,
    pub buffer_size_or_wrap: u32,
}

impl RxDescriptor {
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        Self {
            received_length: word(bytes, 0),
            status: word(bytes, 1),
            buffer_addr: word(bytes, 2),
            buffer_size_or_wrap: word(bytes, 3),
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        words_to_bytes([
            self.received_length,
            self.status,
            self.buffer_addr,
            self.buffer_size_or_wrap,
        ])
    }

    pub fn is_owned(&self) -> bool {
        self.status & DESC_OWN != 0
    }

    pub fn is_wrap(&self) -> bool {
        self.buffer_size_or_wrap & DESC_WRAP != 0
    }

    pub fn buffer_size(&self) -> usize {
        (self.buffer_size_or_wrap & DESC_LEN_MASK) as usize
    }
}

/// Destination-address class flags for a received frame.
pub(crate) fn rx_address_flags(frame: &[u8]) -> u32 {
    match frame.get(..6) {
        Some([0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]) => RX_STATUS_BROADCAST,
        Some(dst) if dst[0] & 0x01 != 0 => RX_STATUS_MULTICAST,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_layout_is_four_le_words() {
        let bytes = [
            0xEA, 0x05, 0x00, 0x00, // length = 1514
            0x00, 0x00, 0x00, 0x80, // status = OWN
            0x00, 0x10, 0x00, 0x02, // buffer = 0x0200_1000
            0x00, 0x00, 0x00, 0x80, // WRAP
        ];
        let desc = TxDescriptor::from_bytes(&bytes);
        assert_eq!(desc.frame_len(), 1514);
        assert!(desc.is_owned());
        assert!(desc.is_wrap());
        assert_eq!(desc.buffer_addr, 0x0200_1000);
        assert_eq!(desc.to_bytes(), bytes);
    }

    #[test]
    fn rx_buffer_size_ignores_wrap_bit() {
        let desc = RxDescriptor {
            received_length: 0,
            status: DESC_OWN,
            buffer_addr: 0x0300_0000,
            buffer_size_or_wrap: DESC_WRAP | 1536,
        };
        assert_eq!(desc.buffer_size(), 1536);
        assert!(desc.is_wrap());
        assert_eq!(RxDescriptor::from_bytes(&desc.to_bytes()), desc);
    }

    #[test]
    fn classifies_destination_addresses() {
        assert_eq!(rx_address_flags(&[0xFF; 14]), RX_STATUS_BROADCAST);
        assert_eq!(
            rx_address_flags(&[0x01, 0x00, 0x5E, 0x00, 0x00, 0xFB, 0, 0]),
            RX_STATUS_MULTICAST
        );
        assert_eq!(rx_address_flags(&[0x00, 0x1D, 0xD8, 0xB7, 0x1C, 0x00]), 0);
        assert_eq!(rx_address_flags(&[0xFF; 3]), 0);
    }
}
