use core::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestMemoryError {
    /// The requested address range is outside the guest physical memory size.
    OutOfRange { paddr: u64, len: usize, size: u64 },
    /// The requested size cannot be represented by the current platform's `usize`.
    SizeTooLarge { size: u64 },
    /// The chosen chunk size is invalid (e.g. zero).
    InvalidChunkSize { chunk_size: usize },
}

impl fmt::Display for GuestMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestMemoryError::OutOfRange { paddr, len, size } => write!(
                f,
                "guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}"
            ),
            GuestMemoryError::SizeTooLarge { size } => {
                write!(f, "guest memory size {size} does not fit in usize")
            }
            GuestMemoryError::InvalidChunkSize { chunk_size } => {
                write!(f, "invalid guest memory chunk size {chunk_size}")
            }
        }
    }
}

impl std::error::Error for GuestMemoryError {}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Guest *physical* memory shared between the guest-execution context and device worker threads.
///
/// Both reads and writes take `&self`: implementations synchronize internally so a device can
/// hold an `Arc<dyn GuestMemory>` on its own thread while the CPU side keeps writing descriptors.
/// There is no slice fast path; copies in and out are the only access.
pub trait GuestMemory: Send + Sync {
    fn size(&self) -> u64;

    /// Reads bytes from guest physical memory into `dst`.
    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    /// Writes bytes from `src` into guest physical memory.
    fn write_from(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    fn read_u8_le(&self, paddr: u64) -> GuestMemoryResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(paddr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_le(&self, paddr: u64) -> GuestMemoryResult<u16> {
        let mut buf = [0u8; 2];
        self.read_into(paddr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&self, paddr: u64) -> GuestMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u8_le(&self, paddr: u64, value: u8) -> GuestMemoryResult<()> {
        self.write_from(paddr, &[value])
    }

    fn write_u16_le(&self, paddr: u64, value: u16) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }

    fn write_u32_le(&self, paddr: u64, value: u32) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }

    /// Reads `len` bytes into a freshly allocated buffer.
    fn read_vec(&self, paddr: u64, len: usize) -> GuestMemoryResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(paddr, &mut buf)?;
        Ok(buf)
    }
}

impl<T: GuestMemory + ?Sized> GuestMemory for std::sync::Arc<T> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        (**self).read_into(paddr, dst)
    }

    fn write_from(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        (**self).write_from(paddr, src)
    }
}

fn check_range(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<()> {
    let len_u64 = len as u64;
    let end = paddr
        .checked_add(len_u64)
        .ok_or(GuestMemoryError::OutOfRange { paddr, len, size })?;
    if end > size {
        return Err(GuestMemoryError::OutOfRange { paddr, len, size });
    }
    Ok(())
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Dense (contiguous) guest memory.
#[derive(Debug)]
pub struct DenseMemory {
    size: u64,
    data: RwLock<Box<[u8]>>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let size_usize =
            usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            size,
            data: RwLock::new(vec![0u8; size_usize].into_boxed_slice()),
        })
    }

    #[inline]
    fn range_to_usize(&self, paddr: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
        check_range(self.size, paddr, len)?;
        let start = usize::try_from(paddr).map_err(|_| GuestMemoryError::OutOfRange {
            paddr,
            len,
            size: self.size,
        })?;
        let end = start.checked_add(len).ok_or(GuestMemoryError::OutOfRange {
            paddr,
            len,
            size: self.size,
        })?;
        Ok((start, end))
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, dst.len())?;
        dst.copy_from_slice(&read_lock(&self.data)[start..end]);
        Ok(())
    }

    fn write_from(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, src.len())?;
        write_lock(&self.data)[start..end].copy_from_slice(src);
        Ok(())
    }
}

/// Sparse guest memory backed by lazily-allocated fixed-size chunks.
///
/// The console exposes 512 MiB of RAM but a device test typically touches a handful of pages
/// (descriptor rings at `0x0200_0000` and up), so chunks are only materialized on first write.
#[derive(Debug)]
pub struct SparseMemory {
    size: u64,
    chunk_size: usize,
    chunks: RwLock<Vec<Option<Box<[u8]>>>>,
}

impl SparseMemory {
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Self::with_chunk_size(size, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: usize) -> GuestMemoryResult<Self> {
        if chunk_size == 0 {
            return Err(GuestMemoryError::InvalidChunkSize { chunk_size });
        }
        let chunk_size_u64 = chunk_size as u64;
        let chunk_count_u64 = size
            .checked_add(chunk_size_u64 - 1)
            .ok_or(GuestMemoryError::SizeTooLarge { size })?
            / chunk_size_u64;
        let chunk_count = usize::try_from(chunk_count_u64)
            .map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            size,
            chunk_size,
            chunks: RwLock::new(vec![None; chunk_count]),
        })
    }

    /// Number of chunks that have been materialized by writes.
    pub fn allocated_chunks(&self) -> usize {
        read_lock(&self.chunks).iter().filter(|c| c.is_some()).count()
    }

    #[inline]
    fn chunk_index(&self, paddr: u64) -> GuestMemoryResult<(usize, usize)> {
        let chunk_size_u64 = self.chunk_size as u64;
        let chunk = paddr / chunk_size_u64;
        let out_of_range = || GuestMemoryError::OutOfRange {
            paddr,
            len: 1,
            size: self.size,
        };
        let chunk_usize = usize::try_from(chunk).map_err(|_| out_of_range())?;
        // `paddr % chunk_size < chunk_size`, which already fits in usize.
        let offset_usize = usize::try_from(paddr % chunk_size_u64).map_err(|_| out_of_range())?;
        Ok((chunk_usize, offset_usize))
    }
}

impl GuestMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, dst.len())?;
        let chunks = read_lock(&self.chunks);
        let mut remaining = dst;
        let mut cur = paddr;

        while !remaining.is_empty() {
            let (chunk_idx, chunk_off) = self.chunk_index(cur)?;
            let take = (self.chunk_size - chunk_off).min(remaining.len());

            match chunks.get(chunk_idx).and_then(|c| c.as_ref()) {
                Some(chunk) => {
                    remaining[..take].copy_from_slice(&chunk[chunk_off..chunk_off + take])
                }
                None => remaining[..take].fill(0),
            }

            cur += take as u64;
            remaining = &mut remaining[take..];
            debug_assert!(cur <= self.size);
        }

        Ok(())
    }

    fn write_from(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, src.len())?;
        let mut chunks = write_lock(&self.chunks);
        let mut remaining = src;
        let mut cur = paddr;

        while !remaining.is_empty() {
            let (chunk_idx, chunk_off) = self.chunk_index(cur)?;
            let take = (self.chunk_size - chunk_off).min(remaining.len());

            let slot = chunks.get_mut(chunk_idx).ok_or(GuestMemoryError::OutOfRange {
                paddr: cur,
                len: take,
                size: self.size,
            })?;
            let chunk = slot.get_or_insert_with(|| vec![0u8; self.chunk_size].into_boxed_slice());
            chunk[chunk_off..chunk_off + take].copy_from_slice(&remaining[..take]);

            cur += take as u64;
            remaining = &remaining[take..];
        }

        Ok(())
    }
}
