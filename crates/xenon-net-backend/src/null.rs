use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    BackendCounters, BackendError, BackendKind, BackendStats, NetworkBackend, ReceiveCallback,
    SendError,
};

/// Backend that accepts every frame and delivers none.
///
/// Used when bridging is enabled without a host adapter: the guest sees a working NIC with no
/// link partner.
#[derive(Debug, Default)]
pub struct NullBackend {
    ready: AtomicBool,
    mac: Option<[u8; 6]>,
    counters: BackendCounters,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetworkBackend for NullBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::None
    }

    fn name(&self) -> &str {
        "null"
    }

    fn initialize(&mut self) -> Result<(), BackendError> {
        self.ready.store(true, Ordering::Release);
        tracing::debug!("null network backend initialized");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.ready.store(false, Ordering::Release);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn send_packet(&self, frame: &[u8]) -> Result<(), SendError> {
        tracing::trace!(len = frame.len(), "null backend dropping frame");
        self.counters.inc_tx_dropped();
        Ok(())
    }

    fn set_receive_callback(&self, _callback: Option<ReceiveCallback>) {}

    fn mac_address(&self) -> Option<[u8; 6]> {
        self.mac
    }

    fn set_mac_address(&mut self, mac: [u8; 6]) -> Result<(), BackendError> {
        self.mac = Some(mac);
        Ok(())
    }

    fn is_link_up(&self) -> bool {
        false
    }

    fn stats(&self) -> BackendStats {
        self.counters.snapshot()
    }
}
