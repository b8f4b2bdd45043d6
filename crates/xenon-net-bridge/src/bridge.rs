use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use xenon_net_backend::{
    Backend, BackendError, BackendKind, BackendStats, MacAddr, NetworkBackend, SendError,
};
use xenon_net_eth::{EthernetDevice, HostLink, RxPort};

use crate::BridgeConfig;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to create {kind} backend: {source}")]
    Create {
        kind: BackendKind,
        #[source]
        source: BackendError,
    },

    #[error("failed to initialize {kind} backend: {source}")]
    Initialize {
        kind: BackendKind,
        #[source]
        source: BackendError,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Slot holding the receive port of the attached device.
///
/// Shared with the backend's receive callback. The lock covers only the port handle; frames are
/// copied into the device after it is released.
type DeviceSlot = Arc<Mutex<Option<RxPort>>>;

fn deliver_to_device(slot: &Mutex<Option<RxPort>>, frame: &[u8]) -> bool {
    let port = lock(slot).clone();
    match port {
        Some(port) => port.deliver(frame),
        None => {
            tracing::trace!(len = frame.len(), "no device attached; host frame dropped");
            false
        }
    }
}

#[derive(Default)]
struct Inner {
    backend: RwLock<Option<Backend>>,
    device: DeviceSlot,
    config: Mutex<BridgeConfig>,
}

/// Routes frames between one emulated Ethernet device and one host backend.
///
/// Clones share the same bridge. The device reaches the bridge through [`HostLink`]; the bridge
/// reaches the device through a weak [`RxPort`], so neither keeps the other alive.
#[derive(Clone, Default)]
pub struct NetworkBridge {
    inner: Arc<Inner>,
}

impl NetworkBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings host networking up according to `config`.
    ///
    /// A disabled configuration succeeds without a backend; the attached device then reports
    /// link up and its transmissions are discarded. On failure the backend is torn down again and
    /// the bridge stays inactive.
    pub fn initialize(&self, config: BridgeConfig) -> Result<(), BridgeError> {
        if self.is_active() {
            tracing::warn!("network bridge already initialized; ignoring");
            return Ok(());
        }

        *lock(&self.inner.config) = config.clone();
        if !config.enabled {
            tracing::info!("host networking disabled");
            self.sync_device_link(true);
            return Ok(());
        }

        let backend = match Backend::create(config.backend, &config.backend_config) {
            Ok(backend) => backend,
            Err(source) => {
                tracing::error!(kind = %config.backend, error = %source, "failed to create network backend");
                self.sync_device_link(true);
                return Err(BridgeError::Create {
                    kind: config.backend,
                    source,
                });
            }
        };
        self.start(backend)
    }

    /// Like [`NetworkBridge::initialize`], with a backend the caller has already built.
    pub fn initialize_with_backend(&self, backend: Backend) -> Result<(), BridgeError> {
        if self.is_active() {
            tracing::warn!("network bridge already initialized; ignoring");
            return Ok(());
        }
        {
            let mut config = lock(&self.inner.config);
            config.enabled = true;
            config.backend = backend.kind();
        }
        self.start(backend)
    }

    fn start(&self, mut backend: Backend) -> Result<(), BridgeError> {
        let kind = backend.kind();
        let slot = Arc::clone(&self.inner.device);
        backend.set_receive_callback(Some(Arc::new(move |frame: &[u8]| {
            deliver_to_device(&slot, frame);
        })));

        if let Err(source) = backend.initialize() {
            tracing::error!(%kind, error = %source, "failed to initialize network backend");
            backend.set_receive_callback(None);
            backend.shutdown();
            self.sync_device_link(true);
            return Err(BridgeError::Initialize { kind, source });
        }

        let link_up = backend.is_link_up();
        match backend.mac_address() {
            Some(mac) => tracing::info!(%kind, name = backend.name(), mac = %MacAddr(mac), "network backend ready"),
            None => tracing::info!(%kind, name = backend.name(), "network backend ready"),
        }
        *write(&self.inner.backend) = Some(backend);
        self.sync_device_link(link_up);
        Ok(())
    }

    fn sync_device_link(&self, up: bool) {
        let port = lock(&self.inner.device).clone();
        if let Some(port) = port {
            port.set_link_up(up);
        }
    }

    /// Connects `device` as the bridge's frame destination, replacing any previous device, and
    /// mirrors the backend's link state into its PHY.
    pub fn attach_device(&self, device: &EthernetDevice) {
        let port = device.rx_port();
        let link_up = {
            let backend = read(&self.inner.backend);
            match backend.as_ref() {
                Some(backend) => {
                    if let Some(mac) = backend.mac_address() {
                        tracing::info!(backend_mac = %MacAddr(mac), "backend hardware address");
                    }
                    backend.is_link_up()
                }
                None => true,
            }
        };
        port.set_link_up(link_up);
        tracing::info!(
            device_mac = %MacAddr(device.mac_address()),
            link_up,
            "ethernet device attached to network bridge"
        );
        *lock(&self.inner.device) = Some(port);
    }

    /// Disconnects the device. The device itself is left as it is.
    pub fn detach_device(&self) {
        if lock(&self.inner.device).take().is_some() {
            tracing::info!("ethernet device detached from network bridge");
        }
    }

    pub fn has_device(&self) -> bool {
        lock(&self.inner.device)
            .as_ref()
            .is_some_and(RxPort::is_attached)
    }

    /// Detaches the device and stops and drops the backend.
    pub fn shutdown(&self) {
        self.detach_device();
        // Taken out of the lock first: joining the reader must not hold up senders.
        let backend = write(&self.inner.backend).take();
        if let Some(mut backend) = backend {
            backend.set_receive_callback(None);
            backend.shutdown();
            tracing::info!(kind = %backend.kind(), "network backend stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        read(&self.inner.backend).is_some()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        read(&self.inner.backend).as_ref().map(NetworkBackend::kind)
    }

    pub fn backend_stats(&self) -> Option<BackendStats> {
        read(&self.inner.backend).as_ref().map(NetworkBackend::stats)
    }

    pub fn config(&self) -> BridgeConfig {
        lock(&self.inner.config).clone()
    }

    /// Host → guest path. Returns whether the device accepted the frame.
    pub fn on_backend_frame_received(&self, frame: &[u8]) -> bool {
        deliver_to_device(&self.inner.device, frame)
    }

    /// Guest → host path. Returns whether the backend accepted the frame.
    pub fn send_to_backend(&self, frame: &[u8]) -> bool {
        let backend = read(&self.inner.backend);
        let Some(backend) = backend.as_ref() else {
            return false;
        };
        match backend.send_packet(frame) {
            Ok(()) => true,
            Err(SendError::Busy) => {
                tracing::trace!(len = frame.len(), "backend busy; frame dropped");
                false
            }
            Err(err) => {
                tracing::debug!(len = frame.len(), error = %err, "backend send failed");
                false
            }
        }
    }
}

impl HostLink for NetworkBridge {
    fn send_to_host(&self, frame: &[u8]) -> bool {
        self.send_to_backend(frame)
    }
}

impl std::fmt::Debug for NetworkBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkBridge")
            .field("backend", &self.backend_kind())
            .field("device", &self.has_device())
            .finish()
    }
}
