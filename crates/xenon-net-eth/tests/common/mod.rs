#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use xenon_memory::{GuestMemory, GuestMemoryResult, SparseMemory};
use xenon_net_eth::desc::{RxDescriptor, TxDescriptor, DESC_OWN, DESC_WRAP};
use xenon_net_eth::{EthernetConfig, EthernetDevice, HostLink, InterruptSink};

pub const GUEST_RAM: u64 = 64 << 20;

/// Sparse guest RAM that records every read it serves.
pub struct CountingMemory {
    inner: SparseMemory,
    reads: Mutex<Vec<(u64, usize)>>,
}

impl CountingMemory {
    pub fn new(size: u64) -> Self {
        Self {
            inner: SparseMemory::new(size).unwrap(),
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Whether any read touched `[start, start + len)`.
    pub fn was_read(&self, start: u64, len: u64) -> bool {
        self.reads
            .lock()
            .unwrap()
            .iter()
            .any(|&(addr, n)| addr < start + len && start < addr + n as u64)
    }

    pub fn read_count(&self) -> usize {
        self.reads.lock().unwrap().len()
    }
}

impl GuestMemory for CountingMemory {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        self.reads.lock().unwrap().push((paddr, dst.len()));
        self.inner.read_into(paddr, dst)
    }

    fn write_from(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        self.inner.write_from(paddr, src)
    }
}

#[derive(Default)]
pub struct RecordingIrq {
    routed: AtomicUsize,
    cancelled: AtomicUsize,
    prios: Mutex<Vec<u8>>,
}

impl RecordingIrq {
    pub fn routed(&self) -> usize {
        self.routed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn prios(&self) -> Vec<u8> {
        self.prios.lock().unwrap().clone()
    }
}

impl InterruptSink for RecordingIrq {
    fn route_interrupt(&self, prio: u8) {
        self.routed.fetch_add(1, Ordering::SeqCst);
        self.prios.lock().unwrap().push(prio);
    }

    fn cancel_interrupt(&self, _prio: u8) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

/// Host link that keeps every frame it is handed.
#[derive(Default)]
pub struct CapturingHost {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl CapturingHost {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }
}

impl HostLink for CapturingHost {
    fn send_to_host(&self, frame: &[u8]) -> bool {
        self.frames.lock().unwrap().push(frame.to_vec());
        true
    }
}

pub struct Harness {
    pub dev: EthernetDevice,
    pub mem: Arc<CountingMemory>,
    pub irq: Arc<RecordingIrq>,
}

pub fn harness() -> Harness {
    harness_with(EthernetConfig::default(), None)
}

pub fn harness_with(config: EthernetConfig, host: Option<Arc<dyn HostLink>>) -> Harness {
    let mem = Arc::new(CountingMemory::new(GUEST_RAM));
    let irq = Arc::new(RecordingIrq::default());
    let dev = EthernetDevice::new(config, mem.clone(), irq.clone(), host);
    Harness { dev, mem, irq }
}

pub fn write_tx_desc(mem: &impl GuestMemory, addr: u64, buffer: u32, len: u32, wrap: bool) {
    let desc = TxDescriptor {
        length: len,
        status: DESC_OWN,
        buffer_addr: buffer,
        length_or_wrap: if wrap { DESC_WRAP } else { 0 },
    };
    mem.write_from(addr, &desc.to_bytes()).unwrap();
}

pub fn read_tx_desc(mem: &impl GuestMemory, addr: u64) -> TxDescriptor {
    let mut raw = [0u8; 16];
    mem.read_into(addr, &mut raw).unwrap();
    TxDescriptor::from_bytes(&raw)
}

pub fn write_rx_desc(mem: &impl GuestMemory, addr: u64, buffer: u32, size: u32, wrap: bool) {
    let desc = RxDescriptor {
        received_length: 0,
        status: DESC_OWN,
        buffer_addr: buffer,
        buffer_size_or_wrap: size | if wrap { DESC_WRAP } else { 0 },
    };
    mem.write_from(addr, &desc.to_bytes()).unwrap();
}

pub fn read_rx_desc(mem: &impl GuestMemory, addr: u64) -> RxDescriptor {
    let mut raw = [0u8; 16];
    mem.read_into(addr, &mut raw).unwrap();
    RxDescriptor::from_bytes(&raw)
}

/// A frame of `len` bytes addressed to the default MAC with a recognisable payload.
pub fn unicast_frame(len: usize) -> Vec<u8> {
    let mut frame: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
    frame[..6].copy_from_slice(&xenon_net_eth::DEFAULT_MAC_ADDRESS);
    frame
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
