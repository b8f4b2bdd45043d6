//! Hosts without a supported tap facility.

use std::io;
use std::time::Duration;

use super::{TapConfig, TapIo};
use crate::BackendError;

pub(super) fn list_tap_devices() -> Vec<String> {
    Vec::new()
}

#[derive(Debug)]
pub(super) enum HostTap {}

impl HostTap {
    pub(super) fn open(_config: &TapConfig) -> Result<Self, BackendError> {
        Err(BackendError::PlatformUnsupported)
    }
}

impl TapIo for HostTap {
    fn name(&self) -> &str {
        match *self {}
    }

    fn mac_address(&self) -> Option<[u8; 6]> {
        match *self {}
    }

    fn recv_frame(&self, _buf: &mut [u8], _timeout: Duration) -> io::Result<Option<usize>> {
        match *self {}
    }

    fn send_frame(&self, _frame: &[u8]) -> io::Result<usize> {
        match *self {}
    }
}
