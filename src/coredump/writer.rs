//! Buffered Sector Writer
//!
//! Coredump storage media want writes at a fixed alignment (16 bytes for
//! MRAM, up to a full page for some NOR parts). This writer accumulates
//! the byte stream produced during capture and only ever issues
//! write-unit sized, aligned writes to the driver.
//!
//! The first write unit of the stream holds the container header. It is
//! kept in RAM until [`BufferedWriter::finalize`] and committed after
//! everything else, so the magic only ever reaches storage once the rest
//! of the artifact is in place.

use crate::coredump::format::HEADER_LEN;
use crate::coredump::storage::CoredumpStorage;
use crate::error::{Error, Result};

/// Write-unit granularity used when committing buffered bytes. Large
/// enough for MRAM-class media; NOR parts with bigger pages still accept
/// smaller program operations.
pub const WRITE_UNIT: usize = 32;

/// Streaming writer over a [`CoredumpStorage`] driver.
pub struct BufferedWriter<'a, S: CoredumpStorage + ?Sized> {
    storage: &'a mut S,
    /// The first write unit of the stream, committed last.
    header_block: [u8; WRITE_UNIT],
    /// In-flight data block and the storage offset it belongs at.
    block: [u8; WRITE_UNIT],
    block_base: u32,
    /// Absolute byte cursor.
    pos: usize,
    capacity: usize,
}

impl<'a, S: CoredumpStorage + ?Sized> BufferedWriter<'a, S> {
    pub fn new(storage: &'a mut S, capacity: usize) -> Self {
        Self {
            storage,
            header_block: [0; WRITE_UNIT],
            block: [0; WRITE_UNIT],
            block_base: WRITE_UNIT as u32,
            pos: 0,
            capacity,
        }
    }

    /// Bytes appended so far.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends bytes to the stream, committing any data block that fills.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.pos + bytes.len() > self.capacity {
            return Err(Error::InvalidInput);
        }
        for &b in bytes {
            if self.pos < WRITE_UNIT {
                self.header_block[self.pos] = b;
            } else {
                let rel = self.pos - self.block_base as usize;
                self.block[rel] = b;
                if rel + 1 == WRITE_UNIT {
                    self.storage.write(self.block_base, &self.block)?;
                    self.block_base += WRITE_UNIT as u32;
                    self.block = [0; WRITE_UNIT];
                }
            }
            self.pos += 1;
        }
        Ok(())
    }

    /// Flushes the zero-padded tail, patches the real container header in,
    /// and commits the header unit last.
    pub fn finalize(&mut self, header: &[u8; HEADER_LEN]) -> Result<()> {
        if self.pos > self.block_base as usize {
            // trailing partial block; padding bytes are already zero
            self.storage.write(self.block_base, &self.block)?;
        }
        self.header_block[..HEADER_LEN].copy_from_slice(header);
        self.storage.write(0, &self.header_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coredump::format::{self, COREDUMP_MAGIC};
    use crate::coredump::ram_backend::RamCoredumpStorage;

    #[test]
    fn test_only_aligned_unit_writes_reach_storage() {
        struct CheckedStorage<'a> {
            inner: RamCoredumpStorage<'a>,
        }
        impl CoredumpStorage for CheckedStorage<'_> {
            fn info(&self) -> crate::coredump::storage::StorageInfo {
                self.inner.info()
            }
            fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
                assert_eq!(offset as usize % WRITE_UNIT, 0, "unaligned write");
                assert_eq!(data.len(), WRITE_UNIT, "partial write");
                self.inner.write(offset, data)
            }
            fn read(&self, offset: u32, out: &mut [u8]) -> Result<()> {
                self.inner.read(offset, out)
            }
            fn erase(&mut self, offset: u32, len: usize) -> Result<()> {
                self.inner.erase(offset, len)
            }
            fn clear(&mut self) {
                self.inner.clear()
            }
        }

        let mut backing = [0u8; 256];
        let mut storage = CheckedStorage { inner: RamCoredumpStorage::new(&mut backing, 64) };
        let mut writer = BufferedWriter::new(&mut storage, 256);

        writer.append(&[0u8; format::HEADER_LEN]).unwrap();
        let payload: std::vec::Vec<u8> = (0..150u8).collect();
        writer.append(&payload).unwrap();

        let total = writer.pos() as u32;
        let mut hdr = [0u8; format::HEADER_LEN];
        format::encode_header(total, &mut hdr);
        writer.finalize(&hdr).unwrap();

        // stream contents land byte for byte after the header
        let mut read_back = std::vec![0u8; payload.len()];
        storage.read(format::HEADER_LEN as u32, &mut read_back).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn test_header_unit_committed_last() {
        struct RecordingStorage<'a> {
            inner: RamCoredumpStorage<'a>,
            write_offsets: std::vec::Vec<u32>,
        }
        impl CoredumpStorage for RecordingStorage<'_> {
            fn info(&self) -> crate::coredump::storage::StorageInfo {
                self.inner.info()
            }
            fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
                self.write_offsets.push(offset);
                self.inner.write(offset, data)
            }
            fn read(&self, offset: u32, out: &mut [u8]) -> Result<()> {
                self.inner.read(offset, out)
            }
            fn erase(&mut self, offset: u32, len: usize) -> Result<()> {
                self.inner.erase(offset, len)
            }
            fn clear(&mut self) {
                self.inner.clear()
            }
        }

        let mut backing = [0u8; 256];
        let mut storage = RecordingStorage {
            inner: RamCoredumpStorage::new(&mut backing, 64),
            write_offsets: std::vec::Vec::new(),
        };
        let mut writer = BufferedWriter::new(&mut storage, 256);

        writer.append(&[0u8; format::HEADER_LEN]).unwrap();
        writer.append(&[0xaa; 100]).unwrap();

        let mut hdr = [0u8; format::HEADER_LEN];
        format::encode_header(112, &mut hdr);
        writer.finalize(&hdr).unwrap();

        // offset 0 (the unit holding the magic) is touched exactly once,
        // after every data unit
        assert_eq!(storage.write_offsets.iter().filter(|&&o| o == 0).count(), 1);
        assert_eq!(*storage.write_offsets.last().unwrap(), 0);

        let mut magic = [0u8; 4];
        storage.read(0, &mut magic).unwrap();
        assert_eq!(u32::from_le_bytes(magic), COREDUMP_MAGIC);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut backing = [0u8; 64];
        let mut storage = RamCoredumpStorage::new(&mut backing, 64);
        let mut writer = BufferedWriter::new(&mut storage, 64);

        writer.append(&[0u8; 60]).unwrap();
        assert_eq!(writer.append(&[0u8; 8]), Err(Error::InvalidInput));
        // the failed append stayed at its old position
        assert_eq!(writer.pos(), 60);
    }

    #[test]
    fn test_short_stream_fits_header_block() {
        let mut backing = [0u8; 64];
        let mut storage = RamCoredumpStorage::new(&mut backing, 64);
        let mut writer = BufferedWriter::new(&mut storage, 64);

        writer.append(&[0u8; format::HEADER_LEN]).unwrap();
        writer.append(&[7u8; 4]).unwrap(); // total 16 bytes, inside one unit

        let mut hdr = [0u8; format::HEADER_LEN];
        format::encode_header(16, &mut hdr);
        writer.finalize(&hdr).unwrap();

        let mut out = [0u8; 16];
        storage.read(0, &mut out).unwrap();
        assert_eq!(format::decode_header(&out), Some(16));
        assert_eq!(&out[12..16], &[7, 7, 7, 7]);
    }
}
