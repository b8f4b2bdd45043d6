//! Guest physical memory as seen by emulated DMA-capable devices.
//!
//! Devices never hold raw host pointers into guest RAM. Every descriptor fetch and payload copy goes
//! through [`GuestMemory`], so an unmapped or out-of-range guest address is an ordinary
//! [`GuestMemoryError`] value the caller can count and recover from.

#![forbid(unsafe_code)]

mod phys;

pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult, SparseMemory};
