//! Tap backend: frames go to and come from a host kernel virtual Ethernet adapter.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod unsupported;

#[cfg(target_os = "linux")]
use linux as platform;
#[cfg(not(target_os = "linux"))]
use unsupported as platform;

use std::io;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::{
    BackendCounters, BackendError, BackendKind, BackendStats, NetworkBackend, ReceiveCallback,
    SendError, MAX_FRAME_LEN,
};

/// How long the reader thread waits for a frame before re-checking for shutdown.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest interface name the kernel accepts (`IFNAMSIZ - 1`).
const MAX_IFNAME_LEN: usize = 15;

/// Lists host tap adapters that a configuration of `auto` may pick from, in name order.
pub fn list_tap_devices() -> Vec<String> {
    platform::list_tap_devices()
}

/// An opened virtual adapter.
///
/// `recv_frame` and `send_frame` may be called concurrently from different threads.
pub trait TapIo: Send + Sync {
    /// Interface name as reported by the host.
    fn name(&self) -> &str;

    fn mac_address(&self) -> Option<[u8; 6]>;

    /// Changes the adapter's hardware address.
    fn set_mac_address(&self, _mac: [u8; 6]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "adapter does not support changing its hardware address",
        ))
    }

    /// Waits up to `timeout` for one frame; `Ok(None)` means nothing arrived.
    fn recv_frame(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    /// Writes one frame without blocking; `WouldBlock` means the adapter queue is full.
    fn send_frame(&self, frame: &[u8]) -> io::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TapConfigError {
    #[error("tap interface name {0:?} is longer than 15 bytes")]
    NameTooLong(String),
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),
    #[error("invalid netmask {0:?} (expected dotted quad or prefix length)")]
    InvalidNetmask(String),
}

/// Parsed `deviceName[:ipAddress/netmask]` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapConfig {
    /// `None` selects the first available adapter (`""` or `"auto"` in the config string).
    pub device_name: Option<String>,
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
}

impl TapConfig {
    const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

    pub fn parse(s: &str) -> Result<Self, TapConfigError> {
        let s = s.trim();
        let (name, addr) = match s.split_once(':') {
            Some((name, addr)) => (name, Some(addr)),
            None => (s, None),
        };

        let device_name = match name {
            "" | "auto" => None,
            name if name.len() > MAX_IFNAME_LEN => {
                return Err(TapConfigError::NameTooLong(name.to_string()))
            }
            name => Some(name.to_string()),
        };

        let (address, netmask) = match addr.filter(|a| !a.is_empty()) {
            None => (None, None),
            Some(addr) => {
                let (ip, mask) = match addr.split_once('/') {
                    Some((ip, mask)) => (ip, Some(mask)),
                    None => (addr, None),
                };
                let ip = Ipv4Addr::from_str(ip)
                    .map_err(|_| TapConfigError::InvalidAddress(ip.to_string()))?;
                let mask = match mask {
                    Some(mask) => parse_netmask(mask)?,
                    None => Self::DEFAULT_NETMASK,
                };
                (Some(ip), Some(mask))
            }
        };

        Ok(Self {
            device_name,
            address,
            netmask,
        })
    }
}

impl FromStr for TapConfig {
    type Err = TapConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_netmask(s: &str) -> Result<Ipv4Addr, TapConfigError> {
    if let Ok(mask) = Ipv4Addr::from_str(s) {
        return Ok(mask);
    }
    match s.parse::<u32>() {
        Ok(0) => Ok(Ipv4Addr::UNSPECIFIED),
        Ok(prefix @ 1..=32) => Ok(Ipv4Addr::from(u32::MAX << (32 - prefix))),
        _ => Err(TapConfigError::InvalidNetmask(s.to_string())),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Backend bound to a host tap adapter, with a dedicated reader thread.
pub struct TapBackend {
    config: TapConfig,
    name: String,
    /// Pre-opened adapter supplied by the embedder; reused across re-initialization.
    injected: Option<Arc<dyn TapIo>>,
    device: Option<Arc<dyn TapIo>>,
    mac: Option<[u8; 6]>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    callback: Arc<Mutex<Option<ReceiveCallback>>>,
    counters: Arc<BackendCounters>,
}

impl TapBackend {
    pub fn new(config: TapConfig) -> Self {
        let name = config
            .device_name
            .clone()
            .unwrap_or_else(|| "auto".to_string());
        Self {
            config,
            name,
            injected: None,
            device: None,
            mac: None,
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
            callback: Arc::new(Mutex::new(None)),
            counters: Arc::new(BackendCounters::default()),
        }
    }

    /// Uses an already-opened adapter instead of opening one from the host on `initialize`.
    pub fn with_device(device: Arc<dyn TapIo>) -> Self {
        let mut backend = Self::new(TapConfig {
            device_name: Some(device.name().to_string()),
            ..TapConfig::default()
        });
        backend.injected = Some(device);
        backend
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    fn open_device(&self) -> Result<Arc<dyn TapIo>, BackendError> {
        if let Some(device) = &self.injected {
            return Ok(Arc::clone(device));
        }
        Ok(Arc::new(platform::HostTap::open(&self.config)?))
    }
}

impl NetworkBackend for TapBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tap
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), BackendError> {
        if self.is_ready() {
            return Ok(());
        }

        let device = self.open_device()?;
        self.name = device.name().to_string();

        match self.mac {
            // A MAC assigned before initialization is pushed down to the adapter.
            Some(mac) => {
                if let Err(err) = device.set_mac_address(mac) {
                    tracing::warn!(tap = %self.name, error = %err, "failed to apply MAC address to tap adapter");
                }
            }
            None => self.mac = device.mac_address(),
        }

        self.running.store(true, Ordering::Release);
        let reader = {
            let device = Arc::clone(&device);
            let running = Arc::clone(&self.running);
            let callback = Arc::clone(&self.callback);
            let counters = Arc::clone(&self.counters);
            std::thread::Builder::new()
                .name("tap-reader".to_string())
                .spawn(move || reader_loop(device, running, callback, counters))
        };
        match reader {
            Ok(handle) => self.reader = Some(handle),
            Err(err) => {
                self.running.store(false, Ordering::Release);
                return Err(BackendError::Spawn(err));
            }
        }

        self.device = Some(device);
        tracing::info!(tap = %self.name, "tap backend initialized");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::error!(tap = %self.name, "tap reader thread panicked");
            }
        }
        if self.device.take().is_some() {
            tracing::info!(tap = %self.name, "tap backend shut down");
        }
    }

    fn is_ready(&self) -> bool {
        self.device.is_some() && self.running.load(Ordering::Acquire)
    }

    fn send_packet(&self, frame: &[u8]) -> Result<(), SendError> {
        let Some(device) = self.device.as_ref().filter(|_| self.is_ready()) else {
            self.counters.inc_tx_dropped();
            return Err(SendError::NotReady);
        };

        if frame.is_empty() || frame.len() > MAX_FRAME_LEN {
            self.counters.inc_tx_errors();
            return Err(SendError::InvalidLength { len: frame.len() });
        }

        match device.send_frame(frame) {
            Ok(written) if written == frame.len() => {
                self.counters.record_tx(written);
                Ok(())
            }
            Ok(written) => {
                self.counters.inc_tx_errors();
                Err(SendError::ShortWrite {
                    written,
                    len: frame.len(),
                })
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.counters.inc_tx_busy();
                Err(SendError::Busy)
            }
            Err(err) => {
                self.counters.inc_tx_errors();
                tracing::debug!(tap = %self.name, error = %err, "tap write failed");
                Err(SendError::Io(err))
            }
        }
    }

    fn set_receive_callback(&self, callback: Option<ReceiveCallback>) {
        *lock(&self.callback) = callback;
    }

    fn mac_address(&self) -> Option<[u8; 6]> {
        self.mac
    }

    fn set_mac_address(&mut self, mac: [u8; 6]) -> Result<(), BackendError> {
        if let Some(device) = &self.device {
            device
                .set_mac_address(mac)
                .map_err(|source| BackendError::Ioctl {
                    op: "set hardware address",
                    name: self.name.clone(),
                    source,
                })?;
        }
        self.mac = Some(mac);
        Ok(())
    }

    fn is_link_up(&self) -> bool {
        self.is_ready()
    }

    fn stats(&self) -> BackendStats {
        self.counters.snapshot()
    }
}

impl Drop for TapBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reader_loop(
    device: Arc<dyn TapIo>,
    running: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<ReceiveCallback>>>,
    counters: Arc<BackendCounters>,
) {
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    tracing::debug!(tap = %device.name(), "tap reader started");

    while running.load(Ordering::Acquire) {
        match device.recv_frame(&mut buf, READ_POLL_INTERVAL) {
            Ok(None) | Ok(Some(0)) => {}
            Ok(Some(len)) => {
                counters.record_rx(len);
                // The callback runs outside the lock.
                let cb = lock(&callback).clone();
                match cb {
                    Some(cb) => cb(&buf[..len]),
                    None => counters.inc_rx_dropped(),
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                counters.inc_rx_errors();
                tracing::warn!(tap = %device.name(), error = %err, "tap read failed");
                std::thread::sleep(READ_POLL_INTERVAL);
            }
        }
    }

    tracing::debug!(tap = %device.name(), "tap reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_auto_select_first_adapter() {
        assert_eq!(TapConfig::parse("").unwrap(), TapConfig::default());
        assert_eq!(TapConfig::parse("auto").unwrap(), TapConfig::default());
    }

    #[test]
    fn parses_name_only() {
        let cfg = TapConfig::parse("xetap0").unwrap();
        assert_eq!(cfg.device_name.as_deref(), Some("xetap0"));
        assert_eq!(cfg.address, None);
        assert_eq!(cfg.netmask, None);
    }

    #[test]
    fn parses_address_with_prefix_and_dotted_netmask() {
        let cfg = TapConfig::parse("xetap0:192.168.50.1/24").unwrap();
        assert_eq!(cfg.address, Some(Ipv4Addr::new(192, 168, 50, 1)));
        assert_eq!(cfg.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));

        let cfg = TapConfig::parse("auto:10.0.0.2/255.255.0.0").unwrap();
        assert_eq!(cfg.device_name, None);
        assert_eq!(cfg.netmask, Some(Ipv4Addr::new(255, 255, 0, 0)));

        let cfg = TapConfig::parse("tap1:10.1.2.3/30").unwrap();
        assert_eq!(cfg.netmask, Some(Ipv4Addr::new(255, 255, 255, 252)));
    }

    #[test]
    fn address_without_netmask_defaults_to_class_c() {
        let cfg = TapConfig::parse("tap1:10.0.0.1").unwrap();
        assert_eq!(cfg.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));
    }

    #[test]
    fn rejects_bad_fields() {
        assert_eq!(
            TapConfig::parse("tap0:10.0.0/24"),
            Err(TapConfigError::InvalidAddress("10.0.0".to_string()))
        );
        assert_eq!(
            TapConfig::parse("tap0:10.0.0.1/33"),
            Err(TapConfigError::InvalidNetmask("33".to_string()))
        );
        assert!(matches!(
            TapConfig::parse("a-very-long-interface-name"),
            Err(TapConfigError::NameTooLong(_))
        ));
    }

    #[test]
    fn send_before_initialize_counts_drop() {
        let backend = TapBackend::new(TapConfig::default());
        assert!(!backend.is_ready());
        assert!(matches!(
            backend.send_packet(&[0u8; 60]),
            Err(SendError::NotReady)
        ));
        assert_eq!(backend.stats().tx_dropped, 1);
        assert_eq!(backend.name(), "auto");
    }
}
