//! Coredump Capture
//!
//! Serializes CPU state and selected RAM into the tagged-block container
//! and streams it into platform storage through the buffered writer. The
//! whole path runs from a fault handler: interrupts are masked, the stack
//! may be corrupt, and nothing here allocates or takes a lock.

pub mod format;
pub mod ram_backend;
pub mod storage;
pub mod writer;

use crate::config::COREDUMP_BUILD_ID_LEN;
use crate::coredump::format::{BlockTag, BLOCK_HDR_LEN, HEADER_LEN, MACHINE_TYPE_ARM};
use crate::coredump::storage::CoredumpStorage;
use crate::coredump::writer::{BufferedWriter, WRITE_UNIT};
use crate::error::{Error, Result};
use crate::platform::{CoredumpRegion, CoredumpRegionType, CrashInfo, Platform};
use crate::reboot::RebootReason;
use crate::util::rle;

/// Architecture register block captured at fault entry, in the order the
/// backend's unwinder expects: r0-r12, sp, lr, pc, psr.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultRegisters {
    pub r: [u32; 13],
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub psr: u32,
}

/// Serialized size of [`FaultRegisters`].
pub const REGISTER_BLOCK_LEN: usize = 17 * 4;

impl FaultRegisters {
    fn write_to(&self, out: &mut [u8; REGISTER_BLOCK_LEN]) {
        let mut idx = 0;
        let mut put = |value: u32| {
            out[idx..idx + 4].copy_from_slice(&value.to_le_bytes());
            idx += 4;
        };
        for &reg in &self.r {
            put(reg);
        }
        put(self.sp);
        put(self.lr);
        put(self.pc);
        put(self.psr);
    }
}

/// Capture-time options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    /// Run-length encode memory region payloads.
    pub rle_memory: bool,
    /// Additionally capture the log ring's backing buffer.
    pub log_region: Option<CoredumpRegion>,
}

/// Outcome of a successful capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedCoredump {
    /// Bytes of artifact written, header included.
    pub total_size: usize,
    /// True when storage ran out and trailing regions were dropped. The
    /// artifact is still valid; the decoder tolerates the gap.
    pub truncated: bool,
}

/// Reads device memory for a region that has already been sanitized.
///
/// Safety: `addr..addr + len` was clamped to readable memory by
/// `Platform::sanitize_address_range`, and capture runs with the CPU held
/// exclusively, so nothing mutates the range while it is borrowed.
unsafe fn region_bytes<'a>(addr: usize, len: usize) -> &'a [u8] {
    core::slice::from_raw_parts(addr as *const u8, len)
}

struct RegionPlan {
    tag: BlockTag,
    addr: usize,
    data_len: usize,
    payload_len: usize,
    rle: bool,
}

fn plan_region<P: Platform + ?Sized>(
    platform: &P,
    region: &CoredumpRegion,
    tag: BlockTag,
    rle_wanted: bool,
) -> Option<RegionPlan> {
    let data_len = platform.sanitize_address_range(region.start_addr, region.size);
    if data_len == 0 {
        return None;
    }
    // identifier regions are never compressed; the backend matches their
    // bytes verbatim
    let rle = rle_wanted
        && tag == BlockTag::MemoryRegion
        && region.region_type == CoredumpRegionType::Memory;
    let body_len = if rle {
        rle::encoded_len(unsafe { region_bytes(region.start_addr, data_len) })
    } else {
        data_len
    };
    Some(RegionPlan {
        tag: if rle { BlockTag::MemoryRegionRle } else { tag },
        addr: region.start_addr,
        data_len,
        payload_len: 8 + body_len,
        rle,
    })
}

fn append_block<S: CoredumpStorage + ?Sized>(
    writer: &mut BufferedWriter<'_, S>,
    tag: BlockTag,
    payload: &[u8],
) -> Result<()> {
    let mut hdr = [0u8; BLOCK_HDR_LEN];
    format::encode_block_hdr(tag, payload.len() as u32, &mut hdr);
    writer.append(&hdr)?;
    writer.append(payload)
}

fn append_region<S: CoredumpStorage + ?Sized>(
    writer: &mut BufferedWriter<'_, S>,
    plan: &RegionPlan,
) -> Result<()> {
    let mut hdr = [0u8; BLOCK_HDR_LEN];
    format::encode_block_hdr(plan.tag, plan.payload_len as u32, &mut hdr);
    writer.append(&hdr)?;
    writer.append(&(plan.addr as u32).to_le_bytes())?;
    writer.append(&(plan.data_len as u32).to_le_bytes())?;

    let data = unsafe { region_bytes(plan.addr, plan.data_len) };
    if plan.rle {
        let mut encoder = rle::RleEncoder::new();
        let mut sink = |span: &[u8]| writer.append(span);
        encoder.feed(data, &mut sink)?;
        encoder.finish(&mut sink)
    } else {
        writer.append(data)
    }
}

fn identity_blocks_len<P: Platform + ?Sized>(platform: &P) -> usize {
    let info = platform.device_info();
    let build_id_len = platform.build_id().map(|id| id.len().min(COREDUMP_BUILD_ID_LEN));
    let mut total = 0;
    total += format::block_len(info.device_serial.len());
    total += format::block_len(info.hardware_version.len());
    total += format::block_len(info.software_type.len());
    total += format::block_len(info.software_version.len());
    if let Some(len) = build_id_len {
        total += format::block_len(len);
    }
    total += format::block_len(2); // machine type
    total += format::block_len(4); // reset reason
    total += format::block_len(2); // trace reason
    total += format::block_len(REGISTER_BLOCK_LEN);
    total
}

fn append_identity_blocks<P: Platform + ?Sized, S: CoredumpStorage + ?Sized>(
    writer: &mut BufferedWriter<'_, S>,
    platform: &P,
    regs: &FaultRegisters,
    crash_info: &CrashInfo,
) -> Result<()> {
    let info = platform.device_info();
    append_block(writer, BlockTag::DeviceSerial, info.device_serial.as_bytes())?;
    append_block(writer, BlockTag::HardwareVersion, info.hardware_version.as_bytes())?;
    append_block(writer, BlockTag::SoftwareType, info.software_type.as_bytes())?;
    append_block(writer, BlockTag::SoftwareVersion, info.software_version.as_bytes())?;
    if let Some(build_id) = platform.build_id() {
        let truncated = &build_id[..build_id.len().min(COREDUMP_BUILD_ID_LEN)];
        append_block(writer, BlockTag::BuildId, truncated)?;
    }
    append_block(writer, BlockTag::MachineType, &MACHINE_TYPE_ARM.to_le_bytes())?;
    append_block(writer, BlockTag::ResetReason, &(crash_info.reason.code() as u32).to_le_bytes())?;
    append_block(writer, BlockTag::TraceReason, &crash_info.trace_reason.to_le_bytes())?;

    let mut reg_block = [0u8; REGISTER_BLOCK_LEN];
    regs.write_to(&mut reg_block);
    append_block(writer, BlockTag::Registers, &reg_block)
}

/// Captures a coredump. Called exactly once per fault, after the platform
/// cached the register state.
///
/// Any storage driver failure aborts the capture; since the header magic
/// is committed last, an aborted capture leaves no valid artifact behind.
pub fn save<P: Platform + ?Sized, S: CoredumpStorage + ?Sized>(
    platform: &P,
    storage: &mut S,
    regs: &FaultRegisters,
    crash_info: &CrashInfo,
    options: &CaptureOptions,
) -> Result<SavedCoredump> {
    let info = storage.info();
    if info.size < HEADER_LEN || info.sector_size == 0 {
        return Err(Error::InvalidInput);
    }
    let usable = (info.size / WRITE_UNIT) * WRITE_UNIT;

    // invalidate whatever was stored before
    storage.erase(0, info.sector_size)?;

    let mut writer = BufferedWriter::new(storage, usable);
    writer.append(&[0u8; HEADER_LEN])?;
    append_identity_blocks(&mut writer, platform, regs, crash_info)
        .map_err(|e| if e == Error::InvalidInput { Error::Truncated } else { e })?;

    let mut truncated = false;
    let regions = platform.coredump_regions(crash_info);
    let log_region = options.log_region;
    let memory_plans = regions
        .iter()
        .map(|r| (r, tag_for(r), options.rle_memory))
        .chain(log_region.iter().map(|r| (r, BlockTag::LogRegion, false)));

    for (region, tag, rle_wanted) in memory_plans {
        let plan = match plan_region(platform, region, tag, rle_wanted) {
            Some(plan) => plan,
            None => continue,
        };
        if writer.pos() + BLOCK_HDR_LEN + plan.payload_len > usable {
            truncated = true;
            break;
        }
        append_region(&mut writer, &plan)?;
    }

    let total_size = writer.pos();
    let mut hdr = [0u8; HEADER_LEN];
    format::encode_header(total_size as u32, &mut hdr);
    writer.finalize(&hdr)?;

    if truncated {
        log::warn!("coredump truncated at {} of {} bytes of storage", total_size, info.size);
    }
    Ok(SavedCoredump { total_size, truncated })
}

fn tag_for(region: &CoredumpRegion) -> BlockTag {
    // identifier regions ride in ordinary memory blocks; the backend keys
    // off their address
    match region.region_type {
        CoredumpRegionType::Memory => BlockTag::MemoryRegion,
        CoredumpRegionType::ImageIdentifier => BlockTag::MemoryRegion,
    }
}

/// Computes, without writing anything, the bytes a capture would occupy
/// right now alongside the storage capacity. Diagnostic commands use this
/// to answer "would my coredump fit".
pub fn size_and_storage_capacity<P: Platform + ?Sized, S: CoredumpStorage + ?Sized>(
    platform: &P,
    storage: &S,
    crash_info: &CrashInfo,
    options: &CaptureOptions,
) -> (usize, usize) {
    let mut total = HEADER_LEN + identity_blocks_len(platform);
    let regions = platform.coredump_regions(crash_info);
    for region in regions {
        if let Some(plan) = plan_region(platform, region, tag_for(region), options.rle_memory) {
            total += BLOCK_HDR_LEN + plan.payload_len;
        }
    }
    if let Some(region) = options.log_region {
        if let Some(plan) = plan_region(platform, &region, BlockTag::LogRegion, false) {
            total += BLOCK_HDR_LEN + plan.payload_len;
        }
    }
    (total, storage.info().size)
}

/// Digest of a stored coredump, for diagnostic commands that want to
/// report what is waiting for upload without pulling the artifact out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoredumpSummary {
    pub total_size: usize,
    pub reason: RebootReason,
    pub trace_reason: u16,
    /// Memory, RLE and log regions included in the capture.
    pub region_count: usize,
}

/// Walks the stored artifact's blocks and digests them. `Ok(None)` when
/// no valid coredump is stored; `Integrity` when the block structure is
/// inconsistent with the stored length.
pub fn stored_summary<S: CoredumpStorage + ?Sized>(
    storage: &S,
) -> Result<Option<CoredumpSummary>> {
    let total = match stored_size(storage)? {
        Some(total) => total,
        None => return Ok(None),
    };

    let mut summary = CoredumpSummary {
        total_size: total,
        reason: RebootReason::Unknown,
        trace_reason: 0,
        region_count: 0,
    };
    let mut idx = HEADER_LEN;
    while idx < total {
        if idx + BLOCK_HDR_LEN > total {
            return Err(Error::Integrity);
        }
        let mut hdr = [0u8; BLOCK_HDR_LEN];
        storage.read(idx as u32, &mut hdr)?;
        let tag = u16::from_le_bytes([hdr[0], hdr[1]]);
        let len = u32::from_le_bytes([hdr[2], hdr[3], hdr[4], hdr[5]]) as usize;
        idx += BLOCK_HDR_LEN;
        if idx + len > total {
            return Err(Error::Integrity);
        }

        if tag == BlockTag::ResetReason as u16 && len == 4 {
            let mut code = [0u8; 4];
            storage.read(idx as u32, &mut code)?;
            summary.reason = RebootReason::from_code(u32::from_le_bytes(code) as u16);
        } else if tag == BlockTag::TraceReason as u16 && len == 2 {
            let mut code = [0u8; 2];
            storage.read(idx as u32, &mut code)?;
            summary.trace_reason = u16::from_le_bytes(code);
        } else if tag == BlockTag::MemoryRegion as u16
            || tag == BlockTag::MemoryRegionRle as u16
            || tag == BlockTag::LogRegion as u16
        {
            summary.region_count += 1;
        }
        idx += len;
    }
    Ok(Some(summary))
}

/// Size of the stored coredump, if storage currently holds a valid one.
pub fn stored_size<S: CoredumpStorage + ?Sized>(storage: &S) -> Result<Option<usize>> {
    let mut hdr = [0u8; HEADER_LEN];
    storage.read(0, &mut hdr)?;
    match format::decode_header(&hdr) {
        Some(total) if total >= HEADER_LEN && total <= storage.info().size => Ok(Some(total)),
        Some(_) => Ok(None),
        None => Ok(None),
    }
}

/// Copies artifact bytes out of storage, bounds-checked against the stored
/// length. This is what the transport drains.
pub fn read<S: CoredumpStorage + ?Sized>(storage: &S, offset: usize, out: &mut [u8]) -> Result<()> {
    match stored_size(storage)? {
        Some(total) if offset + out.len() <= total => storage.read(offset as u32, out),
        Some(_) => Err(Error::InvalidInput),
        None => Err(Error::NoMoreData),
    }
}

/// Drops the stored coredump so the next crash can be captured.
pub fn invalidate<S: CoredumpStorage + ?Sized>(storage: &mut S) {
    storage.clear();
}
