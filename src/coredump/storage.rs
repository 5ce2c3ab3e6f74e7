//! Coredump Storage Contract
//!
//! A small block-device interface the platform implements over whatever
//! medium holds coredumps (internal flash, MRAM, a noinit RAM window).
//! Every method here can be called from a fault handler with interrupts
//! masked, so implementations must not rely on interrupts, the heap, or
//! RTOS services.

use crate::error::Result;

/// Geometry of the backing region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageInfo {
    /// Total bytes available for one coredump.
    pub size: usize,
    /// Erase granularity. Offsets and lengths passed to
    /// [`CoredumpStorage::erase`] are multiples of this.
    pub sector_size: usize,
}

/// Block-addressed persistence for exactly one coredump.
pub trait CoredumpStorage {
    fn info(&self) -> StorageInfo;

    /// Writes `data` at `offset`. The buffered writer only issues
    /// write-unit sized, write-unit aligned calls.
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<()>;

    fn read(&self, offset: u32, out: &mut [u8]) -> Result<()>;

    /// Erases `len` bytes starting at the sector-aligned `offset`.
    fn erase(&mut self, offset: u32, len: usize) -> Result<()>;

    /// Invalidates any stored coredump. Wiping the first sector (or just
    /// the magic) is sufficient.
    fn clear(&mut self);
}
