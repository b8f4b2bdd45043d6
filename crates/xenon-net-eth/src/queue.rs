use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// One Ethernet frame in flight between the rings and the host side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetPacket {
    data: Vec<u8>,
}

impl EthernetPacket {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<&[u8]> for EthernetPacket {
    fn from(frame: &[u8]) -> Self {
        Self::new(frame.to_vec())
    }
}

/// Bounded FIFO with drop-newest overflow.
///
/// The lock is held only for the push/pop itself; producers never wait for space.
#[derive(Debug)]
pub struct PacketQueue {
    inner: Mutex<VecDeque<EthernetPacket>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl PacketQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EthernetPacket>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends `packet`; returns `false` (and counts a drop) when the queue is full.
    pub fn push(&self, packet: EthernetPacket) -> bool {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            drop(queue);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        queue.push_back(packet);
        true
    }

    pub fn pop(&self) -> Option<EthernetPacket> {
        self.lock().pop_front()
    }

    /// Discards every queued packet, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_newest_and_keeps_depth() {
        let queue = PacketQueue::with_capacity(256);
        for i in 0..256u32 {
            assert!(queue.push(EthernetPacket::new(i.to_le_bytes().to_vec())));
        }

        assert!(!queue.push(EthernetPacket::new(vec![0xEE; 4])));
        assert_eq!(queue.len(), 256);
        assert_eq!(queue.dropped(), 1);

        // The oldest entry is still at the front; the rejected one never made it in.
        assert_eq!(queue.pop().unwrap().as_slice(), &0u32.to_le_bytes());
        let mut last = None;
        while let Some(p) = queue.pop() {
            last = Some(p);
        }
        assert_eq!(last.unwrap().as_slice(), &255u32.to_le_bytes());
    }

    #[test]
    fn clear_reports_discarded_count() {
        let queue = PacketQueue::with_capacity(4);
        queue.push(EthernetPacket::from(&[1u8, 2, 3][..]));
        queue.push(EthernetPacket::from(&[4u8][..]));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 0);
    }
}
