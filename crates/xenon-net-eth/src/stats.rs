use std::sync::atomic::{AtomicU64, Ordering};

/// Device-side traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthernetStats {
    /// Frames fetched from TX descriptors and accepted by the pending-transmit queue.
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// TX descriptors rejected (bad length or unreachable buffer).
    pub tx_errors: u64,
    /// RX descriptors whose buffer was unreachable, plus unusable host frames.
    pub rx_errors: u64,
    /// Frames lost to a full pending-transmit queue.
    pub tx_dropped: u64,
    /// Frames lost to a full pending-receive queue.
    pub rx_dropped: u64,
    /// Frames truncated to fit an RX buffer.
    pub rx_overruns: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub tx_packets: AtomicU64,
    pub rx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub tx_errors: AtomicU64,
    pub rx_errors: AtomicU64,
    pub rx_overruns: AtomicU64,
}

impl StatsCounters {
    pub fn record_tx(&self, len: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_rx(&self, len: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tx_dropped: u64, rx_dropped: u64) -> EthernetStats {
        EthernetStats {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_dropped,
            rx_dropped,
            rx_overruns: self.rx_overruns.load(Ordering::Relaxed),
        }
    }
}
