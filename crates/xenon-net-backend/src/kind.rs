use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which host backend a bridge should build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    #[serde(alias = "null")]
    None,
    Tap,
    Pcap,
    Socket,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::None => "none",
            BackendKind::Tap => "tap",
            BackendKind::Pcap => "pcap",
            BackendKind::Socket => "socket",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown network backend {0:?} (expected none, tap, pcap or socket)")]
pub struct ParseBackendKindError(pub String);

impl FromStr for BackendKind {
    type Err = ParseBackendKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "null" => Ok(BackendKind::None),
            "tap" => Ok(BackendKind::Tap),
            "pcap" => Ok(BackendKind::Pcap),
            "socket" => Ok(BackendKind::Socket),
            _ => Err(ParseBackendKindError(s.to_string())),
        }
    }
}
