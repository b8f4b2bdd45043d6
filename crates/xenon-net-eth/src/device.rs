use std::io;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use xenon_memory::GuestMemory;

use crate::interrupts::{InterruptSink, PRIO_ENET};
use crate::mdio::Mdio;
use crate::queue::{EthernetPacket, PacketQueue};
use crate::regs::{
    lane_mask, register_name, store_lanes, InterruptCause, RegisterFile, RxConfig, TxConfig,
    CONFIG0_SOFT_RESET, REG_CONFIG_0, REG_INT_MASK, REG_INT_STATUS, REG_PHY_CONTROL,
    REG_RX_CONFIG, REG_RX_DESC_BASE, REG_TX_CONFIG, REG_TX_DESC_BASE,
};
use crate::ring::{drain_rx, drain_tx, Ring, RingState};
use crate::stats::{EthernetStats, StatsCounters};
use crate::worker::{Worker, WorkerEvent};
use crate::{DEFAULT_MAC_ADDRESS, DEFAULT_QUEUE_CAPACITY, ETH_MAX_PACKET_SIZE};

#[derive(Debug, Clone)]
pub struct EthernetConfig {
    /// Initial value of both MAC address registers.
    pub mac_address: [u8; 6],
    /// Depth of each of the pending-transmit and pending-receive queues.
    pub queue_capacity: usize,
    /// Longest the worker sleeps without an event before re-checking the rings.
    pub wake_interval: Duration,
}

impl Default for EthernetConfig {
    fn default() -> Self {
        Self {
            mac_address: DEFAULT_MAC_ADDRESS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            wake_interval: Duration::from_millis(10),
        }
    }
}

/// Outbound side of the host network, as seen by the device.
pub trait HostLink: Send + Sync {
    /// Hands one guest-transmitted frame to the host. Returns `false` if it was not accepted.
    fn send_to_host(&self, frame: &[u8]) -> bool;
}

impl<T: HostLink + ?Sized> HostLink for Arc<T> {
    fn send_to_host(&self, frame: &[u8]) -> bool {
        (**self).send_to_host(frame)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the guest-facing handle, the worker thread and [`RxPort`]s.
pub(crate) struct Shared {
    pub regs: RegisterFile,
    pub mdio: Mutex<Mdio>,
    pub rings: [RingState; 3],
    pub tx_queue: PacketQueue,
    pub rx_queue: PacketQueue,
    pub stats: StatsCounters,
    pub mem: Arc<dyn GuestMemory>,
    pub config: EthernetConfig,
    irq: Arc<dyn InterruptSink>,
    host: RwLock<Option<Arc<dyn HostLink>>>,
    pub wake: Mutex<Option<SyncSender<WorkerEvent>>>,
    /// Held for the duration of a ring pass so cursors have one writer at a time.
    pass_lock: Mutex<()>,
}

impl Shared {
    pub fn ring(&self, ring: Ring) -> &RingState {
        &self.rings[ring.index()]
    }

    fn host_link(&self) -> Option<Arc<dyn HostLink>> {
        self.host
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Latches `cause` into the status register and asserts the line if it is unmasked.
    pub fn raise(&self, cause: InterruptCause) {
        let status = self
            .regs
            .int_status
            .fetch_or(cause.bits(), Ordering::AcqRel)
            | cause.bits();
        let mask = self.regs.int_mask.load(Ordering::Relaxed);
        tracing::trace!(
            cause = format_args!("{:#x}", cause.bits()),
            status = format_args!("{status:#x}"),
            mask = format_args!("{mask:#x}"),
            "interrupt raised"
        );
        if status & mask != 0 {
            self.irq.route_interrupt(PRIO_ENET);
        }
    }

    /// Wakes the worker, if one is running. Never blocks: a full channel already guarantees a
    /// pending wake-up.
    pub fn signal(&self, event: WorkerEvent) {
        let wake = lock(&self.wake);
        let Some(tx) = wake.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => tracing::trace!("worker gone; wake-up dropped"),
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.ring(Ring::Tx0).is_armed()
            || self.ring(Ring::Tx1).is_armed()
            || (self.ring(Ring::Rx).is_armed() && !self.rx_queue.is_empty())
            || (!self.tx_queue.is_empty() && self.host_link().is_some())
    }

    /// One full pass: both TX rings, then RX, then the flush to the host link.
    pub fn run_pass(&self) {
        let _pass = lock(&self.pass_lock);

        for ring in [Ring::Tx0, Ring::Tx1] {
            if self.ring(ring).is_armed() && drain_tx(self, ring) > 0 {
                self.raise(ring.done_cause());
            }
        }

        if self.ring(Ring::Rx).is_armed() && !self.rx_queue.is_empty() && drain_rx(self) > 0 {
            self.raise(Ring::Rx.done_cause());
        }

        self.flush_tx();
    }

    fn flush_tx(&self) {
        let Some(host) = self.host_link() else {
            return;
        };
        while let Some(packet) = self.tx_queue.pop() {
            if !host.send_to_host(packet.as_slice()) {
                tracing::trace!(len = packet.len(), "host link rejected frame");
            }
        }
    }

    fn deliver(&self, frame: &[u8]) -> bool {
        if frame.is_empty() || frame.len() > ETH_MAX_PACKET_SIZE {
            tracing::debug!(len = frame.len(), "host frame has invalid length; dropped");
            StatsCounters::bump(&self.stats.rx_errors);
            return false;
        }
        if !self.rx_queue.push(EthernetPacket::from(frame)) {
            tracing::trace!(len = frame.len(), "pending-receive queue full; frame dropped");
            return false;
        }
        self.signal(WorkerEvent::RxQueued);
        true
    }

    fn set_link_up(&self, up: bool) -> bool {
        let changed = lock(&self.mdio).set_link(up);
        if changed {
            tracing::info!(link_up = up, "ethernet link state changed");
            self.raise(InterruptCause::LINK_CHANGE);
        }
        changed
    }

    fn selected_tx_ring(&self) -> Ring {
        let config = TxConfig::from_bits_retain(self.regs.tx_config.load(Ordering::Relaxed));
        if config.contains(TxConfig::RING1_BASE_SELECT) {
            Ring::Tx1
        } else {
            Ring::Tx0
        }
    }

    fn base_of(&self, ring: Ring) -> u32 {
        match ring {
            Ring::Tx0 => self.regs.tx_desc_base[0].load(Ordering::Relaxed),
            Ring::Tx1 => self.regs.tx_desc_base[1].load(Ordering::Relaxed),
            Ring::Rx => self.regs.rx_desc_base.load(Ordering::Relaxed),
        }
    }

    fn arm(&self, ring: Ring) -> bool {
        let state = self.ring(ring);
        if state.armed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let base = self.base_of(ring);
        if base == 0 {
            tracing::warn!(?ring, "ring armed with a zero descriptor base");
        }
        tracing::debug!(?ring, base = format_args!("{base:#x}"), head = state.head(), "ring armed");
        true
    }

    fn disarm(&self, ring: Ring) {
        if self.ring(ring).armed.swap(false, Ordering::AcqRel) {
            tracing::debug!(?ring, "ring disarmed");
        }
    }

    fn apply_tx_config(&self, value: u32) {
        let config = TxConfig::from_bits_retain(value);
        for (ring, enable) in [
            (Ring::Tx0, TxConfig::RING0_ENABLE),
            (Ring::Tx1, TxConfig::RING1_ENABLE),
        ] {
            if config.contains(enable) {
                self.arm(ring);
                self.signal(WorkerEvent::RingArmed(ring));
            } else if !config.contains(TxConfig::DMA_ENABLE) {
                self.disarm(ring);
            }
        }
    }

    fn apply_rx_config(&self, value: u32) {
        let config = RxConfig::from_bits_retain(value);
        if config.contains(RxConfig::DMA_ENABLE | RxConfig::RX_ENABLE) {
            if self.arm(Ring::Rx) {
                self.ring(Ring::Rx).request_reset();
            }
            self.signal(WorkerEvent::RingArmed(Ring::Rx));
        } else if !config.contains(RxConfig::DMA_ENABLE) {
            self.disarm(Ring::Rx);
        }
    }

    fn acknowledge(&self, value: u32) {
        let status = self.regs.int_status.fetch_and(!value, Ordering::AcqRel) & !value;
        let mask = self.regs.int_mask.load(Ordering::Relaxed);
        if status & mask == 0 {
            self.irq.cancel_interrupt(PRIO_ENET);
        }
    }

    fn apply_mask(&self, mask: u32) {
        let status = self.regs.int_status.load(Ordering::Acquire);
        if status & mask != 0 {
            self.irq.route_interrupt(PRIO_ENET);
        } else {
            self.irq.cancel_interrupt(PRIO_ENET);
        }
    }

    fn soft_reset(&self) {
        for state in &self.rings {
            state.request_reset();
        }
        let tx = self.tx_queue.clear();
        let rx = self.rx_queue.clear();
        tracing::debug!(discarded_tx = tx, discarded_rx = rx, "soft reset");
    }

    fn read_register(&self, offset: u64, size: usize) -> u32 {
        if let Some((field, start)) = RegisterFile::mac_field(offset) {
            return self.regs.read_mac_lanes(field, start, size);
        }
        match offset {
            REG_TX_DESC_BASE => self.base_of(self.selected_tx_ring()),
            REG_PHY_CONTROL => lock(&self.mdio).read_control(),
            _ => match self.regs.plain(offset) {
                Some(reg) => reg.load(Ordering::Relaxed),
                None => {
                    tracing::warn!(offset = format_args!("{offset:#x}"), size, "read of undefined register");
                    u32::MAX
                }
            },
        }
    }

    fn write_register(&self, offset: u64, size: usize, value: u32) {
        if let Some((field, start)) = RegisterFile::mac_field(offset) {
            self.regs.write_mac_lanes(field, start, size, value);
            return;
        }
        match offset {
            REG_TX_CONFIG => {
                let config = store_lanes(&self.regs.tx_config, size, value);
                self.apply_tx_config(config);
            }
            REG_TX_DESC_BASE => {
                let ring = self.selected_tx_ring();
                store_lanes(&self.regs.tx_desc_base[ring.index()], size, value);
                self.ring(ring).request_reset();
            }
            REG_RX_CONFIG => {
                let config = store_lanes(&self.regs.rx_config, size, value);
                self.apply_rx_config(config);
            }
            REG_RX_DESC_BASE => {
                store_lanes(&self.regs.rx_desc_base, size, value);
                self.ring(Ring::Rx).request_reset();
            }
            REG_INT_STATUS => self.acknowledge(value & lane_mask(size)),
            REG_INT_MASK => {
                let mask = store_lanes(&self.regs.int_mask, size, value);
                self.apply_mask(mask);
            }
            REG_CONFIG_0 => {
                let config = store_lanes(&self.regs.config0, size, value);
                if config & CONFIG0_SOFT_RESET != 0 {
                    self.soft_reset();
                }
            }
            REG_PHY_CONTROL => {
                let mut mdio = lock(&self.mdio);
                let mask = lane_mask(size);
                let control = (mdio.control() & !mask) | (value & mask);
                mdio.write_control(control);
            }
            _ => match self.regs.plain(offset) {
                Some(reg) => {
                    store_lanes(reg, size, value);
                }
                None => {
                    tracing::warn!(
                        offset = format_args!("{offset:#x}"),
                        size,
                        value = format_args!("{value:#x}"),
                        "write to undefined register ignored"
                    );
                }
            },
        }
    }
}

/// The emulated Ethernet function.
///
/// Register accesses run on the caller's (guest-execution) thread and never wait for the worker.
/// Without a worker ([`EthernetDevice::spawn_worker`]) the rings only move when
/// [`EthernetDevice::poll`] is called.
pub struct EthernetDevice {
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl EthernetDevice {
    pub fn new(
        config: EthernetConfig,
        mem: Arc<dyn GuestMemory>,
        irq: Arc<dyn InterruptSink>,
        host: Option<Arc<dyn HostLink>>,
    ) -> Self {
        let capacity = config.queue_capacity;
        let shared = Shared {
            regs: RegisterFile::new(config.mac_address),
            mdio: Mutex::new(Mdio::new()),
            rings: Default::default(),
            tx_queue: PacketQueue::with_capacity(capacity),
            rx_queue: PacketQueue::with_capacity(capacity),
            stats: StatsCounters::default(),
            mem,
            config,
            irq,
            host: RwLock::new(host),
            wake: Mutex::new(None),
            pass_lock: Mutex::new(()),
        };
        Self {
            shared: Arc::new(shared),
            worker: None,
        }
    }

    /// Starts the background worker. Calling it again while a worker runs is a no-op.
    pub fn spawn_worker(&mut self) -> io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.worker = Some(Worker::spawn(Arc::clone(&self.shared))?);
        Ok(())
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Stops and joins the worker, if any. Queued frames stay queued.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown(&self.shared);
        }
    }

    /// Replaces the outbound host link.
    pub fn set_host_link(&self, host: Option<Arc<dyn HostLink>>) {
        *self
            .shared
            .host
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = host;
    }

    pub fn mmio_read(&self, offset: u64, size: usize) -> u64 {
        assert!(
            matches!(size, 1 | 2 | 4),
            "invalid MMIO read size {size} at {offset:#x}"
        );
        let value = self.shared.read_register(offset, size) & lane_mask(size);
        tracing::trace!(
            reg = register_name(offset),
            offset = format_args!("{offset:#x}"),
            size,
            value = format_args!("{value:#x}"),
            "mmio read"
        );
        u64::from(value)
    }

    pub fn mmio_write(&self, offset: u64, size: usize, value: u64) {
        assert!(
            matches!(size, 1 | 2 | 4),
            "invalid MMIO write size {size} at {offset:#x}"
        );
        let value = value as u32 & lane_mask(size);
        tracing::trace!(
            reg = register_name(offset),
            offset = format_args!("{offset:#x}"),
            size,
            value = format_args!("{value:#x}"),
            "mmio write"
        );
        self.shared.write_register(offset, size, value);
    }

    pub fn mmio_read_u32(&self, offset: u64) -> u32 {
        self.mmio_read(offset, 4) as u32
    }

    pub fn mmio_write_u32(&self, offset: u64, value: u32) {
        self.mmio_write(offset, 4, u64::from(value));
    }

    /// Runs one ring pass on the calling thread.
    pub fn poll(&self) {
        self.shared.run_pass();
    }

    /// Queues a host frame for delivery into the RX ring. Returns `false` if it was dropped.
    pub fn enqueue_rx_frame(&self, frame: &[u8]) -> bool {
        self.shared.deliver(frame)
    }

    /// Pops the oldest guest-transmitted frame that has not been handed to a host link.
    pub fn take_tx_frame(&self) -> Option<EthernetPacket> {
        self.shared.tx_queue.pop()
    }

    /// A non-owning handle through which the host side delivers frames.
    pub fn rx_port(&self) -> RxPort {
        RxPort {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Updates the PHY link bits; a change raises the link-change interrupt. Returns whether the
    /// state changed.
    pub fn set_link_up(&self, up: bool) -> bool {
        self.shared.set_link_up(up)
    }

    pub fn link_up(&self) -> bool {
        lock(&self.shared.mdio).link_up()
    }

    pub fn stats(&self) -> EthernetStats {
        self.shared.stats.snapshot(
            self.shared.tx_queue.dropped(),
            self.shared.rx_queue.dropped(),
        )
    }

    pub fn is_ring_armed(&self, ring: Ring) -> bool {
        self.shared.ring(ring).is_armed()
    }

    pub fn ring_head(&self, ring: Ring) -> u32 {
        self.shared.ring(ring).head()
    }

    pub fn rx_queue_len(&self) -> usize {
        self.shared.rx_queue.len()
    }

    pub fn tx_queue_len(&self) -> usize {
        self.shared.tx_queue.len()
    }

    /// Current contents of MAC address register 0.
    pub fn mac_address(&self) -> [u8; 6] {
        self.shared.regs.mac(0)
    }

    pub fn phy_register(&self, phy: usize, reg: usize) -> u16 {
        lock(&self.shared.mdio).register(phy, reg)
    }
}

impl Drop for EthernetDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EthernetDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthernetDevice")
            .field("mac_address", &self.mac_address())
            .field("link_up", &self.link_up())
            .field("worker", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

/// Receive-side handle held by the host bridge.
///
/// Holds the device weakly: once the device is dropped every delivery fails.
#[derive(Clone)]
pub struct RxPort {
    shared: Weak<Shared>,
}

impl std::fmt::Debug for RxPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxPort")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl RxPort {
    pub fn deliver(&self, frame: &[u8]) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.deliver(frame),
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.shared.strong_count() > 0
    }

    /// See [`EthernetDevice::set_link_up`]. Returns `false` if the device is gone.
    pub fn set_link_up(&self, up: bool) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.set_link_up(up))
    }

    pub fn mac_address(&self) -> Option<[u8; 6]> {
        self.shared.upgrade().map(|shared| shared.regs.mac(0))
    }
}
