//! Descriptor ring walkers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use xenon_memory::GuestMemory;

use crate::desc::{
    rx_address_flags, RxDescriptor, TxDescriptor, DESC_OWN, DESC_SIZE, RX_STATUS_DONE,
    RX_STATUS_ERROR, RX_STATUS_FIRST, RX_STATUS_LAST, RX_STATUS_OVERFLOW, TX_STATUS_DONE,
    TX_STATUS_ERROR,
};
use crate::device::Shared;
use crate::queue::EthernetPacket;
use crate::regs::InterruptCause;
use crate::stats::StatsCounters;
use crate::ETH_MAX_FRAME_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ring {
    Tx0,
    Tx1,
    Rx,
}

impl Ring {
    pub const ALL: [Ring; 3] = [Ring::Tx0, Ring::Tx1, Ring::Rx];

    /// Number of descriptors in the ring.
    pub const fn size(self) -> u32 {
        match self {
            Ring::Tx0 => 32,
            Ring::Tx1 => 8,
            Ring::Rx => 64,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Ring::Tx0 => 0,
            Ring::Tx1 => 1,
            Ring::Rx => 2,
        }
    }

    pub fn done_cause(self) -> InterruptCause {
        match self {
            Ring::Tx0 => InterruptCause::TX0_DONE,
            Ring::Tx1 => InterruptCause::TX1_DONE,
            Ring::Rx => InterruptCause::RX_DONE,
        }
    }
}

/// Cursor following a consumed descriptor: back to zero on WRAP, otherwise the next slot.
pub fn next_index(ring_len: u32, head: u32, wrap: bool) -> u32 {
    if wrap {
        0
    } else {
        (head + 1) % ring_len
    }
}

/// Arm flag and cursor of one ring.
///
/// Only a pass (holding the pass lock) stores the cursor. Register writes that rewind it post a
/// reset request instead, which the pass applies before its next descriptor and which suppresses
/// the store for a descriptor already in flight.
#[derive(Debug, Default)]
pub(crate) struct RingState {
    pub armed: AtomicBool,
    head: AtomicU32,
    reset_pending: AtomicBool,
}

impl RingState {
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Cursor as the guest observes it; a pending reset reads as slot 0.
    pub fn head(&self) -> u32 {
        if self.reset_pending.load(Ordering::Acquire) {
            0
        } else {
            self.head.load(Ordering::Relaxed)
        }
    }

    pub fn request_reset(&self) {
        self.reset_pending.store(true, Ordering::Release);
    }

    fn apply_pending_reset(&self) {
        if self.reset_pending.swap(false, Ordering::AcqRel) {
            self.head.store(0, Ordering::Relaxed);
        }
    }

    /// Moves the cursor past a consumed descriptor unless a reset arrived while it was in flight.
    fn advance(&self, next: u32) -> bool {
        if self.reset_pending.load(Ordering::Acquire) {
            return false;
        }
        self.head.store(next, Ordering::Relaxed);
        true
    }
}

fn descriptor_addr(base: u32, head: u32) -> u64 {
    u64::from(base) + u64::from(head) * DESC_SIZE
}

/// Walks a TX ring from its head until it reaches a descriptor the driver still owns (or has
/// visited every slot once). Returns the number of descriptors consumed.
pub(crate) fn drain_tx(dev: &Shared, ring: Ring) -> u32 {
    let state = dev.ring(ring);
    let Some(base_reg) = dev.regs.tx_desc_base.get(ring.index()) else {
        return 0;
    };
    let mut consumed = 0;

    for _ in 0..ring.size() {
        state.apply_pending_reset();
        let base = base_reg.load(Ordering::Relaxed);
        let head = state.head();
        let addr = descriptor_addr(base, head);

        let mut raw = [0u8; 16];
        if let Err(err) = dev.mem.read_into(addr, &mut raw) {
            tracing::warn!(?ring, addr = format_args!("{addr:#x}"), error = %err, "tx descriptor fetch failed");
            break;
        }
        let desc = TxDescriptor::from_bytes(&raw);
        if !desc.is_owned() {
            break;
        }

        let len = desc.frame_len();
        let mut status = (desc.status & !DESC_OWN) | TX_STATUS_DONE;
        if len == 0 || len > ETH_MAX_FRAME_SIZE {
            tracing::warn!(?ring, head, len, "tx descriptor has invalid length");
            StatsCounters::bump(&dev.stats.tx_errors);
            status |= TX_STATUS_ERROR;
        } else {
            match dev.mem.read_vec(u64::from(desc.buffer_addr), len) {
                Ok(frame) => {
                    if dev.tx_queue.push(EthernetPacket::new(frame)) {
                        dev.stats.record_tx(len);
                    } else {
                        tracing::trace!(?ring, len, "pending-transmit queue full; frame dropped");
                    }
                }
                Err(err) => {
                    tracing::warn!(?ring, head, error = %err, "tx buffer unreachable");
                    StatsCounters::bump(&dev.stats.tx_errors);
                    status |= TX_STATUS_ERROR;
                }
            }
        }

        if let Err(err) = dev
            .mem
            .write_u32_le(addr + TxDescriptor::STATUS_OFFSET, status)
        {
            tracing::warn!(?ring, head, error = %err, "tx descriptor write-back failed");
        }
        if !state.advance(next_index(ring.size(), head, desc.is_wrap())) {
            tracing::debug!(?ring, head, "cursor reset while descriptor was in flight");
        }
        consumed += 1;
    }

    consumed
}

/// Moves queued host frames into RX descriptors until the queue empties or the driver has no
/// buffer ready. Returns the number of descriptors consumed.
pub(crate) fn drain_rx(dev: &Shared) -> u32 {
    let state = dev.ring(Ring::Rx);
    let mut consumed = 0;

    for _ in 0..Ring::Rx.size() {
        if dev.rx_queue.is_empty() {
            break;
        }

        state.apply_pending_reset();
        let base = dev.regs.rx_desc_base.load(Ordering::Relaxed);
        let head = state.head();
        let addr = descriptor_addr(base, head);

        let mut raw = [0u8; 16];
        if let Err(err) = dev.mem.read_into(addr, &mut raw) {
            tracing::warn!(addr = format_args!("{addr:#x}"), error = %err, "rx descriptor fetch failed");
            break;
        }
        let desc = RxDescriptor::from_bytes(&raw);
        if !desc.is_owned() {
            tracing::trace!(head, "rx ring full; frames stay queued");
            break;
        }

        let Some(packet) = dev.rx_queue.pop() else {
            break;
        };
        let frame = packet.as_slice();
        let copy_len = frame.len().min(desc.buffer_size());
        let mut status = (desc.status & !DESC_OWN) | RX_STATUS_DONE;

        let received = match dev
            .mem
            .write_from(u64::from(desc.buffer_addr), &frame[..copy_len])
        {
            Ok(()) => {
                if copy_len < frame.len() {
                    tracing::debug!(head, len = frame.len(), buffer = copy_len, "rx frame truncated");
                    StatsCounters::bump(&dev.stats.rx_overruns);
                    status |= RX_STATUS_OVERFLOW;
                }
                status |= RX_STATUS_FIRST | RX_STATUS_LAST | rx_address_flags(frame);
                dev.stats.record_rx(copy_len);
                copy_len as u32
            }
            Err(err) => {
                tracing::warn!(head, error = %err, "rx buffer unreachable; frame dropped");
                StatsCounters::bump(&dev.stats.rx_errors);
                status |= RX_STATUS_ERROR;
                0
            }
        };

        let mut writeback = [0u8; 8];
        writeback[..4].copy_from_slice(&received.to_le_bytes());
        writeback[4..].copy_from_slice(&status.to_le_bytes());
        if let Err(err) = dev.mem.write_from(addr, &writeback) {
            tracing::warn!(head, error = %err, "rx descriptor write-back failed");
        }

        if !state.advance(next_index(Ring::Rx.size(), head, desc.is_wrap())) {
            tracing::debug!(head, "rx cursor reset while descriptor was in flight");
        }
        consumed += 1;
    }

    consumed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_on_wrap_bit_or_ring_end() {
        assert_eq!(next_index(32, 0, false), 1);
        assert_eq!(next_index(32, 31, false), 0);
        assert_eq!(next_index(32, 5, true), 0);
        assert_eq!(next_index(8, 7, false), 0);
        assert_eq!(next_index(64, 63, false), 0);
    }

    #[test]
    fn reset_request_wins_over_in_flight_advance() {
        let state = RingState::default();
        assert!(state.advance(5));
        assert_eq!(state.head(), 5);

        state.request_reset();
        assert_eq!(state.head(), 0);
        assert!(!state.advance(6));
        assert_eq!(state.head(), 0);

        state.apply_pending_reset();
        assert!(state.advance(1));
        assert_eq!(state.head(), 1);
    }

    #[test]
    fn ring_geometry() {
        assert_eq!(Ring::ALL.map(Ring::size), [32, 8, 64]);
        assert_eq!(Ring::Rx.done_cause().bits(), 0x2000_0040);
    }
}
