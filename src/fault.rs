//! Fault Handler Entry
//!
//! The capture path a port wires into its exception vectors. A fault
//! handler cannot receive arguments, so the resources it needs (platform,
//! coredump storage, the reboot tracking region) are installed into a
//! process-wide slot at boot. The handler itself takes no locks it cannot
//! skip, allocates nothing, and tolerates being entered while a previous
//! capture is still on the stack.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::coredump::storage::CoredumpStorage;
use crate::coredump::{self, CaptureOptions, FaultRegisters};
use crate::platform::{CrashInfo, Platform};
use crate::reboot::{RebootReason, RebootTrackingRegion, ResetRegisters};

/// Resources the fault path needs, snapshotted at install time.
///
/// The pointers alias state the rest of the SDK also references. They are
/// only ever dereferenced from [`fault_handler`], which runs with the CPU
/// held exclusively (interrupts masked), so no other access can be live.
struct CrashContext {
    platform: &'static (dyn Platform + Sync),
    storage: *mut dyn CoredumpStorage,
    options: CaptureOptions,
}

// Pointers cross threads only to be parked in the slot; dereferencing is
// confined to the exclusive fault context.
unsafe impl Send for CrashContext {}

lazy_static! {
    static ref CRASH_CONTEXT: Mutex<Option<CrashContext>> = Mutex::new(None);
}

/// Reboot-tracking region pointer, kept outside the mutex so the reason
/// can be marked even when the context lock is unavailable (fault inside
/// a fault).
static REBOOT_REGION: AtomicPtr<RebootTrackingRegion> = AtomicPtr::new(ptr::null_mut());

/// Installs the crash capture resources. Call once at boot, before any
/// fault can occur.
///
/// `storage` and `region` are raw because the running system keeps its
/// own references to the same objects; the fault path only touches them
/// when it owns the CPU outright.
pub fn install(
    platform: &'static (dyn Platform + Sync),
    storage: *mut dyn CoredumpStorage,
    region: *mut RebootTrackingRegion,
    options: CaptureOptions,
) {
    REBOOT_REGION.store(region, Ordering::SeqCst);
    *CRASH_CONTEXT.lock() = Some(CrashContext { platform, storage, options });
}

/// Removes any installed context.
pub fn uninstall() {
    REBOOT_REGION.store(ptr::null_mut(), Ordering::SeqCst);
    *CRASH_CONTEXT.lock() = None;
}

/// Whether [`install`] has been called.
pub fn installed() -> bool {
    CRASH_CONTEXT.try_lock().map_or(false, |guard| guard.is_some())
}

fn mark_reboot_region(reason: RebootReason, regs: &FaultRegisters) {
    let region = REBOOT_REGION.load(Ordering::SeqCst);
    if region.is_null() {
        return;
    }
    // exclusive CPU: no other reference can be observing the region now
    let region = unsafe { &mut *region };
    region.mark_reset_imminent(reason, Some(ResetRegisters { pc: regs.pc, lr: regs.lr }));
}

/// Captures a crash: records the reboot reason, then persists a coredump.
/// Returns true when a coredump was stored.
///
/// Callable from any context, including a fault taken inside another
/// fault. The caller (the port's exception vector) is responsible for
/// resetting the device afterwards.
pub fn fault_handler(regs: &FaultRegisters, reason: RebootReason) -> bool {
    // the reason must survive even if everything below goes wrong
    mark_reboot_region(reason, regs);

    // a held lock here means a capture was already in progress on this
    // stack; re-entering the writer would only corrupt it
    let mut guard = match CRASH_CONTEXT.try_lock() {
        Some(guard) => guard,
        None => return false,
    };
    let ctx = match guard.as_mut() {
        Some(ctx) => ctx,
        None => return false,
    };

    let crash_info = CrashInfo {
        stack_address: regs.sp as usize,
        reason,
        trace_reason: 0,
    };
    let storage = unsafe { &mut *ctx.storage };
    match coredump::save(ctx.platform, storage, regs, &crash_info, &ctx.options) {
        Ok(_) => {
            let region = REBOOT_REGION.load(Ordering::SeqCst);
            if !region.is_null() {
                unsafe { &mut *region }.mark_coredump_saved();
            }
            true
        }
        Err(_) => false,
    }
}

/// Panic glue for pure-Rust targets: treat a panic like a kernel panic,
/// capturing whatever register state is available (none, from safe code)
/// alongside the reason.
pub fn handle_panic() -> bool {
    fault_handler(&FaultRegisters::default(), RebootReason::KernelPanic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coredump::ram_backend::RamCoredumpStorage;
    use crate::platform::{CoredumpRegion, DeviceInfo};
    use crate::reboot::{BootupInfo, RebootTracker};

    // the installed slot is process-wide; serialize the tests that use it
    static SLOT_GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());

    static FAKE_STACK: [u8; 64] = [0xcd; 64];

    struct StaticPlatform;

    impl Platform for StaticPlatform {
        fn device_info(&self) -> DeviceInfo {
            DeviceInfo::new("FAULTSERIAL", "evt", "main", "1.0.0")
        }
        fn time_since_boot_ms(&self) -> u64 {
            0
        }
        fn reboot(&self) -> ! {
            unreachable!("tests never reboot")
        }
        fn sanitize_address_range(&self, _addr: usize, len: usize) -> usize {
            len
        }
        fn coredump_regions(&self, _crash_info: &CrashInfo) -> &[CoredumpRegion] {
            // a single static region standing in for the active stack
            static REGION: spin::Once<[CoredumpRegion; 1]> = spin::Once::new();
            REGION.call_once(|| {
                [CoredumpRegion::memory(FAKE_STACK.as_ptr() as usize, FAKE_STACK.len())]
            })
        }
    }

    #[test]
    fn test_fault_capture_end_to_end() {
        let _guard = SLOT_GUARD.lock().unwrap();

        let platform: &'static StaticPlatform = Box::leak(Box::new(StaticPlatform));
        let storage_backing: &'static mut [u8] = Box::leak(Box::new([0u8; 2048]));
        let storage: *mut RamCoredumpStorage<'static> =
            Box::into_raw(Box::new(RamCoredumpStorage::new(storage_backing, 512)));
        let region: *mut RebootTrackingRegion =
            Box::into_raw(Box::new(RebootTrackingRegion::new()));

        install(platform, storage, region, CaptureOptions::default());
        assert!(installed());

        let regs = FaultRegisters {
            pc: 0x0800_2000,
            lr: 0x0800_2004,
            sp: FAKE_STACK.as_ptr() as u32,
            ..Default::default()
        };
        assert!(fault_handler(&regs, RebootReason::HardFault));
        uninstall();

        // the artifact is in place
        let storage_view = unsafe { &*storage };
        let total = coredump::stored_size(storage_view).unwrap().expect("coredump stored");
        assert!(total > 0);

        // and the next boot reconciles to the fault
        let region_view = unsafe { &mut *region };
        let tracker = RebootTracker::boot(
            Some(region_view),
            Some(BootupInfo { reset_reason_reg: 0, reason: RebootReason::PinReset }),
        );
        let reset_info = tracker.read_reset_info().expect("reason recorded");
        assert_eq!(reset_info.reason, RebootReason::HardFault);
        assert_eq!(reset_info.pc, 0x0800_2000);
        assert_eq!(tracker.get_crash_count(), 1);
        assert!(tracker.coredump_saved());
    }

    #[test]
    fn test_fault_without_install_still_safe() {
        let _guard = SLOT_GUARD.lock().unwrap();
        uninstall();
        let regs = FaultRegisters::default();
        assert!(!fault_handler(&regs, RebootReason::Assert));
        assert!(!handle_panic());
    }
}
