//! Reboot Tracking Region
//!
//! A fixed-size record the startup code must place in noinit RAM so its
//! contents ride across a reset. Before a self-triggered reset the intended
//! reason is marked here; after the next boot the record is reconciled with
//! the hardware reset-cause register and the result is published to the
//! rest of the SDK.
//!
//! All field access is volatile: the compiler must not cache reads of
//! memory that survives a reset the program cannot see.

use volatile::Volatile;

use crate::error::{Error, Result};
use crate::reboot::reason::RebootReason;
use crate::util::crc16;

const REGION_MAGIC: u32 = 0x21544252; // "RBT!"
const REGION_VERSION: u32 = 2;

/// Sentinel for "no reason recorded". Distinct from `Unknown` (0x0000),
/// which is a real, reportable reason.
const REASON_NOT_SET: u32 = 0xffff_ffff;

/// Registers captured alongside a marked reason, so the backend can show
/// where a self-triggered reset came from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetRegisters {
    pub pc: u32,
    pub lr: u32,
}

/// Hardware-derived boot context the port hands to [`RebootTracker::boot`]:
/// the raw reset-cause register and the port's classification of it.
#[derive(Debug, Clone, Copy)]
pub struct BootupInfo {
    pub reset_reason_reg: u32,
    pub reason: RebootReason,
}

/// What was recorded about the most recent reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetInfo {
    pub reason: RebootReason,
    pub pc: u32,
    pub lr: u32,
    pub reset_reason_reg: u32,
}

/// Both views of the reboot reason after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootReasonInfo {
    /// Classification of the hardware reset-cause register for this boot.
    pub reboot_reg_reason: RebootReason,
    /// The effective reason: a marked reason when one was recorded before
    /// the reset, the hardware classification otherwise.
    pub prior_stored_reason: RebootReason,
}

/// The persistent record. Place one of these in a noinit section and hand
/// it to [`RebootTracker::boot`] every boot.
///
/// Every field is a plain `u32`, so any pre-existing bit pattern in noinit
/// RAM is a valid (if garbage) value; the magic/version/CRC check decides
/// whether the contents are trusted.
#[repr(C)]
pub struct RebootTrackingRegion {
    magic: Volatile<u32>,
    version: Volatile<u32>,
    marked_reason: Volatile<u32>,
    bootup_reason: Volatile<u32>,
    pc: Volatile<u32>,
    lr: Volatile<u32>,
    reset_reason_reg: Volatile<u32>,
    coredump_saved: Volatile<u32>,
    crash_count: Volatile<u32>,
    crc: Volatile<u32>,
}

impl RebootTrackingRegion {
    /// A zeroed record. Zeroed contents fail the integrity check, so the
    /// first `boot` initializes it.
    pub fn new() -> Self {
        Self {
            magic: Volatile::new(0),
            version: Volatile::new(0),
            marked_reason: Volatile::new(0),
            bootup_reason: Volatile::new(0),
            pc: Volatile::new(0),
            lr: Volatile::new(0),
            reset_reason_reg: Volatile::new(0),
            coredump_saved: Volatile::new(0),
            crash_count: Volatile::new(0),
            crc: Volatile::new(0),
        }
    }

    fn crc_of_fields(&self) -> u32 {
        let fields = [
            self.magic.read(),
            self.version.read(),
            self.marked_reason.read(),
            self.bootup_reason.read(),
            self.pc.read(),
            self.lr.read(),
            self.reset_reason_reg.read(),
            self.coredump_saved.read(),
            self.crash_count.read(),
        ];
        let mut crc = crc16::INITIAL_VALUE;
        for word in fields.iter() {
            crc = crc16::update(crc, &word.to_le_bytes());
        }
        crc as u32
    }

    fn seal(&mut self) {
        let crc = self.crc_of_fields();
        self.crc.write(crc);
    }

    /// Whether the record survived the reset intact.
    pub fn integrity_ok(&self) -> bool {
        self.magic.read() == REGION_MAGIC
            && self.version.read() == REGION_VERSION
            && self.crc.read() == self.crc_of_fields()
    }

    /// Re-initializes the record, losing everything including the crash
    /// count.
    pub fn initialize(&mut self) {
        self.magic.write(REGION_MAGIC);
        self.version.write(REGION_VERSION);
        self.marked_reason.write(REASON_NOT_SET);
        self.bootup_reason.write(REASON_NOT_SET);
        self.pc.write(0);
        self.lr.write(0);
        self.reset_reason_reg.write(0);
        self.coredump_saved.write(0);
        self.crash_count.write(0);
        self.seal();
    }

    /// Records a reason ahead of a reset, directly against the region.
    ///
    /// This is the entry the fault path uses: it must work without any SDK
    /// initialization state, so a corrupt record is re-initialized on the
    /// spot. The first reason marked wins; later marks are ignored.
    pub fn mark_reset_imminent(&mut self, reason: RebootReason, regs: Option<ResetRegisters>) {
        if !self.integrity_ok() {
            self.initialize();
        }
        if self.marked_reason.read() != REASON_NOT_SET {
            return;
        }
        self.marked_reason.write(reason.code() as u32);
        let regs = regs.unwrap_or_default();
        self.pc.write(regs.pc);
        self.lr.write(regs.lr);
        self.seal();
    }

    /// Flags that a coredump was persisted for the crash being marked.
    pub fn mark_coredump_saved(&mut self) {
        if !self.integrity_ok() {
            self.initialize();
        }
        self.coredump_saved.write(1);
        self.seal();
    }

    fn marked(&self) -> Option<RebootReason> {
        match self.marked_reason.read() {
            REASON_NOT_SET => None,
            code => Some(RebootReason::from_code(code as u16)),
        }
    }

    fn bootup(&self) -> Option<RebootReason> {
        match self.bootup_reason.read() {
            REASON_NOT_SET => None,
            code => Some(RebootReason::from_code(code as u16)),
        }
    }
}

impl Default for RebootTrackingRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// Boot-time view over the persistent region.
///
/// Constructed once per boot by [`RebootTracker::boot`]; reconciliation and
/// crash counting happen there, so the accessors afterwards are cheap RAM
/// reads.
pub struct RebootTracker<'a> {
    region: Option<&'a mut RebootTrackingRegion>,
    reboot_reg_reason: RebootReason,
    effective_reason: RebootReason,
}

impl<'a> RebootTracker<'a> {
    /// Validates (or initializes) the persistent region, folds in this
    /// boot's hardware reset cause, and counts the crash if the effective
    /// reason warrants it.
    ///
    /// Passing `region = None` models a product without noinit memory:
    /// the tracker stays alive but every call becomes a no-op and
    /// [`RebootTracker::booted`] reports false.
    pub fn boot(
        region: Option<&'a mut RebootTrackingRegion>,
        bootup_info: Option<BootupInfo>,
    ) -> Self {
        let region = match region {
            Some(r) => r,
            None => {
                log::error!("reboot tracking booted without a persistent region");
                return Self {
                    region: None,
                    reboot_reg_reason: RebootReason::Unknown,
                    effective_reason: RebootReason::Unknown,
                };
            }
        };

        if !region.integrity_ok() {
            region.initialize();
        }

        let reboot_reg_reason = match bootup_info {
            Some(info) => {
                region.reset_reason_reg.write(info.reset_reason_reg);
                region.bootup_reason.write(info.reason.code() as u32);
                info.reason
            }
            None => RebootReason::Unknown,
        };

        // A reason marked before the reset wins; the hardware's answer is
        // retained alongside it.
        let effective_reason = match region.marked() {
            Some(marked) => marked,
            None => reboot_reg_reason,
        };

        if effective_reason.counts_as_crash() {
            let count = region.crash_count.read();
            region.crash_count.write(count.wrapping_add(1));
        }
        region.seal();

        Self { region: Some(region), reboot_reg_reason, effective_reason }
    }

    /// False when booted without a region; every other call is then inert.
    pub fn booted(&self) -> bool {
        self.region.is_some()
    }

    /// Records `reason` ahead of a self-triggered reset. The first marked
    /// reason wins.
    pub fn mark_reset_imminent(&mut self, reason: RebootReason, regs: Option<ResetRegisters>) {
        if let Some(region) = self.region.as_deref_mut() {
            region.mark_reset_imminent(reason, regs);
        }
    }

    /// Flags that a coredump was captured for the in-progress crash.
    pub fn mark_coredump_saved(&mut self) {
        if let Some(region) = self.region.as_deref_mut() {
            region.mark_coredump_saved();
        }
    }

    /// The recorded reset info, if any reason (marked or hardware derived)
    /// is known. Does not clear anything.
    pub fn read_reset_info(&self) -> Option<ResetInfo> {
        let region = self.region.as_deref()?;
        let reason = region.marked().or_else(|| region.bootup())?;
        Some(ResetInfo {
            reason,
            pc: region.pc.read(),
            lr: region.lr.read(),
            reset_reason_reg: region.reset_reason_reg.read(),
        })
    }

    /// Zeroes the recorded reason and registers. The crash count is not
    /// touched.
    pub fn clear_reset_info(&mut self) {
        if let Some(region) = self.region.as_deref_mut() {
            region.marked_reason.write(REASON_NOT_SET);
            region.bootup_reason.write(REASON_NOT_SET);
            region.pc.write(0);
            region.lr.write(0);
            region.reset_reason_reg.write(0);
            region.coredump_saved.write(0);
            region.seal();
        }
    }

    /// Boots that ended in an unexpected reason (or no reason at all)
    /// since the counter was last reset.
    pub fn get_crash_count(&self) -> usize {
        self.region.as_deref().map(|r| r.crash_count.read() as usize).unwrap_or(0)
    }

    pub fn reset_crash_count(&mut self) {
        if let Some(region) = self.region.as_deref_mut() {
            region.crash_count.write(0);
            region.seal();
        }
    }

    /// Both the hardware-register classification for this boot and the
    /// effective (reconciled) reason.
    pub fn get_reboot_reason(&self) -> Result<RebootReasonInfo> {
        if self.region.is_none() {
            return Err(Error::NotBooted);
        }
        Ok(RebootReasonInfo {
            reboot_reg_reason: self.reboot_reg_reason,
            prior_stored_reason: self.effective_reason,
        })
    }

    /// Whether this boot followed a crash.
    pub fn get_unexpected_reboot_occurred(&self) -> Result<bool> {
        if self.region.is_none() {
            return Err(Error::NotBooted);
        }
        Ok(self.effective_reason.counts_as_crash())
    }

    /// Whether a coredump was saved for the reset being reported.
    pub fn coredump_saved(&self) -> bool {
        self.region.as_deref().map(|r| r.coredump_saved.read() != 0).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn software_reset_bootup() -> BootupInfo {
        BootupInfo { reset_reason_reg: 0x4, reason: RebootReason::SoftwareReset }
    }

    #[test]
    fn test_bootup_reason_passthrough() {
        let mut region = RebootTrackingRegion::new();
        let tracker = RebootTracker::boot(Some(&mut region), Some(software_reset_bootup()));

        let info = tracker.get_reboot_reason().unwrap();
        assert_eq!(info.reboot_reg_reason, RebootReason::SoftwareReset);
        assert_eq!(info.prior_stored_reason, RebootReason::SoftwareReset);
        assert_eq!(tracker.get_unexpected_reboot_occurred().unwrap(), false);
        assert_eq!(tracker.get_crash_count(), 0);
    }

    #[test]
    fn test_marked_unexpected_wins() {
        let mut region = RebootTrackingRegion::new();
        region.mark_reset_imminent(
            RebootReason::Assert,
            Some(ResetRegisters { pc: 0x800_1234, lr: 0x800_5678 }),
        );

        // simulated reboot: the region content carries over
        let tracker = RebootTracker::boot(
            Some(&mut region),
            Some(BootupInfo { reset_reason_reg: 0x10, reason: RebootReason::PinReset }),
        );

        let reset_info = tracker.read_reset_info().unwrap();
        assert_eq!(reset_info.reason, RebootReason::Assert);
        assert_eq!(reset_info.pc, 0x800_1234);
        assert_eq!(reset_info.lr, 0x800_5678);

        let info = tracker.get_reboot_reason().unwrap();
        assert_eq!(info.reboot_reg_reason, RebootReason::PinReset);
        assert_eq!(info.prior_stored_reason, RebootReason::Assert);
        assert_eq!(tracker.get_crash_count(), 1);
        assert_eq!(tracker.get_unexpected_reboot_occurred().unwrap(), true);
    }

    #[test]
    fn test_first_mark_wins() {
        let mut region = RebootTrackingRegion::new();
        region.mark_reset_imminent(RebootReason::FirmwareUpdate, None);
        region.mark_reset_imminent(RebootReason::Assert, None);

        let tracker = RebootTracker::boot(Some(&mut region), None);
        assert_eq!(tracker.read_reset_info().unwrap().reason, RebootReason::FirmwareUpdate);
        assert_eq!(tracker.get_crash_count(), 0);
    }

    #[test]
    fn test_corrupt_region_reinitialized() {
        let mut region = RebootTrackingRegion::new();
        region.mark_reset_imminent(RebootReason::Assert, None);
        // flip a byte in the record to break the crc
        region.pc.write(0xdeadbeef);

        let tracker = RebootTracker::boot(Some(&mut region), Some(software_reset_bootup()));
        // the marked reason was discarded with the rest of the record
        assert_eq!(tracker.read_reset_info().unwrap().reason, RebootReason::SoftwareReset);
        assert_eq!(tracker.get_crash_count(), 0);
    }

    #[test]
    fn test_no_info_counts_as_crash() {
        let mut region = RebootTrackingRegion::new();
        let tracker = RebootTracker::boot(Some(&mut region), None);
        assert!(tracker.read_reset_info().is_none());
        assert_eq!(tracker.get_crash_count(), 1);
        assert_eq!(tracker.get_unexpected_reboot_occurred().unwrap(), true);
    }

    #[test]
    fn test_crash_count_accumulates_across_boots() {
        let mut region = RebootTrackingRegion::new();
        {
            let mut tracker = RebootTracker::boot(Some(&mut region), None);
            tracker.mark_reset_imminent(RebootReason::HardwareWatchdog, None);
        }
        {
            let mut tracker = RebootTracker::boot(Some(&mut region), None);
            assert_eq!(tracker.get_crash_count(), 2); // unknown boot + watchdog
            tracker.clear_reset_info();
            assert_eq!(tracker.get_crash_count(), 2);
            tracker.reset_crash_count();
            assert_eq!(tracker.get_crash_count(), 0);
        }
    }

    #[test]
    fn test_clear_reset_info_keeps_count() {
        let mut region = RebootTrackingRegion::new();
        region.mark_reset_imminent(RebootReason::Assert, None);
        let mut tracker = RebootTracker::boot(Some(&mut region), Some(software_reset_bootup()));
        assert_eq!(tracker.get_crash_count(), 1);

        tracker.clear_reset_info();
        assert!(tracker.read_reset_info().is_none());
        assert_eq!(tracker.get_crash_count(), 1);
    }

    #[test]
    fn test_bad_region_mode() {
        let mut tracker = RebootTracker::boot(None, Some(software_reset_bootup()));
        assert!(!tracker.booted());
        tracker.mark_reset_imminent(RebootReason::Assert, None);
        assert!(tracker.read_reset_info().is_none());
        assert_eq!(tracker.get_crash_count(), 0);
        assert_eq!(tracker.get_reboot_reason(), Err(Error::NotBooted));
        assert_eq!(tracker.get_unexpected_reboot_occurred(), Err(Error::NotBooted));
    }

    #[test]
    fn test_coredump_saved_flag() {
        let mut region = RebootTrackingRegion::new();
        region.mark_reset_imminent(RebootReason::HardFault, None);
        region.mark_coredump_saved();

        let mut tracker = RebootTracker::boot(Some(&mut region), None);
        assert!(tracker.coredump_saved());
        tracker.clear_reset_info();
        assert!(!tracker.coredump_saved());
    }
}
