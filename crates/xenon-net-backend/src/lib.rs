//! Host network backends for the emulated Xenon Fast Ethernet controller.
//!
//! A backend moves raw Ethernet frames between the emulator and something on the host: nothing at
//! all ([`NullBackend`]) or a kernel virtual adapter ([`TapBackend`]). Frames leave through
//! [`NetworkBackend::send_packet`] and arrive through a registered [`ReceiveCallback`], which the
//! backend may invoke from its own reader thread.
//!
//! The set of variants is closed: callers hold a [`Backend`] and talk to it through the
//! [`NetworkBackend`] capability trait, never by downcasting.
#![deny(unsafe_code)]

mod error;
mod kind;
mod mac;
mod null;
mod stats;
pub mod tap;

use std::sync::Arc;

pub use error::{BackendError, SendError};
pub use kind::{BackendKind, ParseBackendKindError};
pub use mac::{MacAddr, ParseMacAddrError};
pub use null::NullBackend;
pub use stats::{BackendCounters, BackendStats};
pub use tap::{list_tap_devices, TapBackend, TapConfig, TapConfigError, TapIo};

/// Largest frame a backend will accept or deliver, in bytes.
pub const MAX_FRAME_LEN: usize = 2048;

/// Host → guest frame delivery hook.
///
/// Invoked once per received frame, possibly on a backend-owned thread. The slice is only valid
/// for the duration of the call.
pub type ReceiveCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Capability interface shared by every backend variant.
pub trait NetworkBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable identity (adapter name for tap backends).
    fn name(&self) -> &str;

    /// Acquires host resources and starts any reader thread.
    ///
    /// Initializing an already-ready backend is a no-op.
    fn initialize(&mut self) -> Result<(), BackendError>;

    /// Stops the reader thread (joining it) and releases host resources. Idempotent.
    fn shutdown(&mut self);

    fn is_ready(&self) -> bool;

    /// Sends one guest → host frame.
    ///
    /// Failures are counted in [`BackendStats`] and reported as a value; they never panic.
    fn send_packet(&self, frame: &[u8]) -> Result<(), SendError>;

    /// Installs (or with `None`, removes) the host → guest frame hook.
    fn set_receive_callback(&self, callback: Option<ReceiveCallback>);

    fn mac_address(&self) -> Option<[u8; 6]>;

    fn set_mac_address(&mut self, mac: [u8; 6]) -> Result<(), BackendError>;

    fn is_link_up(&self) -> bool;

    fn stats(&self) -> BackendStats;
}

impl<T: NetworkBackend + ?Sized> NetworkBackend for Box<T> {
    fn kind(&self) -> BackendKind {
        <T as NetworkBackend>::kind(&**self)
    }

    fn name(&self) -> &str {
        <T as NetworkBackend>::name(&**self)
    }

    fn initialize(&mut self) -> Result<(), BackendError> {
        <T as NetworkBackend>::initialize(&mut **self)
    }

    fn shutdown(&mut self) {
        <T as NetworkBackend>::shutdown(&mut **self)
    }

    fn is_ready(&self) -> bool {
        <T as NetworkBackend>::is_ready(&**self)
    }

    fn send_packet(&self, frame: &[u8]) -> Result<(), SendError> {
        <T as NetworkBackend>::send_packet(&**self, frame)
    }

    fn set_receive_callback(&self, callback: Option<ReceiveCallback>) {
        <T as NetworkBackend>::set_receive_callback(&**self, callback)
    }

    fn mac_address(&self) -> Option<[u8; 6]> {
        <T as NetworkBackend>::mac_address(&**self)
    }

    fn set_mac_address(&mut self, mac: [u8; 6]) -> Result<(), BackendError> {
        <T as NetworkBackend>::set_mac_address(&mut **self, mac)
    }

    fn is_link_up(&self) -> bool {
        <T as NetworkBackend>::is_link_up(&**self)
    }

    fn stats(&self) -> BackendStats {
        <T as NetworkBackend>::stats(&**self)
    }
}

/// The closed set of backend variants.
pub enum Backend {
    Null(NullBackend),
    Tap(TapBackend),
}

impl Backend {
    /// Builds (but does not initialize) the backend variant for `kind`.
    ///
    /// `config` is the variant-specific configuration string; see [`TapConfig`] for the tap
    /// format. Kinds that exist in configuration files but have no implementation on this host
    /// are rejected with [`BackendError::Unsupported`].
    pub fn create(kind: BackendKind, config: &str) -> Result<Self, BackendError> {
        match kind {
            BackendKind::None => Ok(Backend::Null(NullBackend::new())),
            BackendKind::Tap => Ok(Backend::Tap(TapBackend::new(config.parse()?))),
            BackendKind::Pcap | BackendKind::Socket => Err(BackendError::Unsupported(kind)),
        }
    }

    fn as_dyn(&self) -> &dyn NetworkBackend {
        match self {
            Backend::Null(b) => b,
            Backend::Tap(b) => b,
        }
    }

    fn as_dyn_mut(&mut self) -> &mut dyn NetworkBackend {
        match self {
            Backend::Null(b) => b,
            Backend::Tap(b) => b,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl From<NullBackend> for Backend {
    fn from(backend: NullBackend) -> Self {
        Backend::Null(backend)
    }
}

impl From<TapBackend> for Backend {
    fn from(backend: TapBackend) -> Self {
        Backend::Tap(backend)
    }
}

impl NetworkBackend for Backend {
    fn kind(&self) -> BackendKind {
        self.as_dyn().kind()
    }

    fn name(&self) -> &str {
        self.as_dyn().name()
    }

    fn initialize(&mut self) -> Result<(), BackendError> {
        self.as_dyn_mut().initialize()
    }

    fn shutdown(&mut self) {
        self.as_dyn_mut().shutdown()
    }

    fn is_ready(&self) -> bool {
        self.as_dyn().is_ready()
    }

    fn send_packet(&self, frame: &[u8]) -> Result<(), SendError> {
        self.as_dyn().send_packet(frame)
    }

    fn set_receive_callback(&self, callback: Option<ReceiveCallback>) {
        self.as_dyn().set_receive_callback(callback)
    }

    fn mac_address(&self) -> Option<[u8; 6]> {
        self.as_dyn().mac_address()
    }

    fn set_mac_address(&mut self, mac: [u8; 6]) -> Result<(), BackendError> {
        self.as_dyn_mut().set_mac_address(mac)
    }

    fn is_link_up(&self) -> bool {
        self.as_dyn().is_link_up()
    }

    fn stats(&self) -> BackendStats {
        self.as_dyn().stats()
    }
}
