use std::io;

use thiserror::Error;

use crate::{BackendKind, TapConfigError};

/// Failures while bringing a backend up or reconfiguring it.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0} backend is not available on this host")]
    Unsupported(BackendKind),

    #[error("tap adapters are not supported on this platform")]
    PlatformUnsupported,

    #[error("invalid backend configuration: {0}")]
    Config(#[from] TapConfigError),

    #[error("failed to open tap adapter {name:?}: {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{op} on tap adapter {name:?} failed: {source}")]
    Ioctl {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn backend reader thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Why a single frame could not be handed to the host.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("backend is not ready")]
    NotReady,

    #[error("frame length {len} is empty or exceeds the backend maximum")]
    InvalidLength { len: usize },

    #[error("host adapter is busy")]
    Busy,

    #[error("short write: {written} of {len} bytes")]
    ShortWrite { written: usize, len: usize },

    #[error("host write failed: {0}")]
    Io(#[from] io::Error),
}
