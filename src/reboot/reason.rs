//! Reboot Reason Codes
//!
//! A 16-bit code space shared with the backend. The high bit marks a
//! reason as unexpected; two carve-outs let products define their own
//! codes without colliding with future built-ins.

/// First user-defined expected reason.
pub const EXPECTED_CUSTOM_BASE: u16 = 0x1000;
/// One past the last user-defined expected reason.
pub const EXPECTED_CUSTOM_MAX: u16 = 0x1100;

/// First user-defined unexpected reason.
pub const UNEXPECTED_CUSTOM_BASE: u16 = 0xa000;
/// One past the last user-defined unexpected reason.
pub const UNEXPECTED_CUSTOM_MAX: u16 = 0xa100;

/// Why the device rebooted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootReason {
    /// No reason was determined by hardware or marked by software. Counted
    /// as a crash.
    Unknown,

    // Expected resets
    UserShutdown,
    UserReset,
    FirmwareUpdate,
    LowPower,
    DebuggerHalted,
    ButtonReset,
    PowerOnReset,
    SoftwareReset,
    /// Full reboot on exit from the lowest power state.
    DeepSleep,
    /// Reset pin was toggled.
    PinReset,
    /// Self test generated the reboot.
    SelfTest,
    /// Product-defined expected reason; the offset is added to
    /// [`EXPECTED_CUSTOM_BASE`].
    CustomExpected(u8),

    // Unexpected resets
    /// An unexpected reset path, e.g. a bare system-reset call that
    /// bypassed the shutdown logic.
    UnknownError,
    Assert,
    /// Legacy catch-all watchdog code. Kept so old devices in the field
    /// still decode; new call sites should pick hardware or software.
    WatchdogDeprecated,
    BrownOutReset,
    Nmi,
    HardwareWatchdog,
    SoftwareWatchdog,
    /// Stable clock lost, e.g. a PLL losing lock.
    ClockFailure,
    KernelPanic,
    /// OTA upgrade failed and a rollback was initiated.
    FirmwareUpdateError,
    OutOfMemory,
    StackOverflow,

    // Arm fault classes
    BusFault,
    MemFault,
    UsageFault,
    HardFault,
    /// Fault taken while already executing a fault handler.
    Lockup,
    SecurityViolation,
    /// Memory integrity check tripped.
    ParityError,
    Temperature,
    /// Some other hardware error.
    Hardware,
    /// Product-defined unexpected reason; the offset is added to
    /// [`UNEXPECTED_CUSTOM_BASE`].
    CustomUnexpected(u8),

    /// A code this firmware does not know by name. Preserved verbatim so
    /// the backend can still classify it.
    Other(u16),
}

impl RebootReason {
    /// Wire code for this reason.
    pub fn code(self) -> u16 {
        match self {
            RebootReason::Unknown => 0x0000,
            RebootReason::UserShutdown => 0x0001,
            RebootReason::UserReset => 0x0002,
            RebootReason::FirmwareUpdate => 0x0003,
            RebootReason::LowPower => 0x0004,
            RebootReason::DebuggerHalted => 0x0005,
            RebootReason::ButtonReset => 0x0006,
            RebootReason::PowerOnReset => 0x0007,
            RebootReason::SoftwareReset => 0x0008,
            RebootReason::DeepSleep => 0x0009,
            RebootReason::PinReset => 0x000a,
            RebootReason::SelfTest => 0x000b,
            RebootReason::CustomExpected(offset) => EXPECTED_CUSTOM_BASE + offset as u16,
            RebootReason::UnknownError => 0x8000,
            RebootReason::Assert => 0x8001,
            RebootReason::WatchdogDeprecated => 0x8002,
            RebootReason::BrownOutReset => 0x8003,
            RebootReason::Nmi => 0x8004,
            RebootReason::HardwareWatchdog => 0x8005,
            RebootReason::SoftwareWatchdog => 0x8006,
            RebootReason::ClockFailure => 0x8007,
            RebootReason::KernelPanic => 0x8008,
            RebootReason::FirmwareUpdateError => 0x8009,
            RebootReason::OutOfMemory => 0x800a,
            RebootReason::StackOverflow => 0x800b,
            RebootReason::BusFault => 0x9100,
            RebootReason::MemFault => 0x9200,
            RebootReason::UsageFault => 0x9300,
            RebootReason::HardFault => 0x9400,
            RebootReason::Lockup => 0x9401,
            RebootReason::SecurityViolation => 0x9402,
            RebootReason::ParityError => 0x9403,
            RebootReason::Temperature => 0x9404,
            RebootReason::Hardware => 0x9405,
            RebootReason::CustomUnexpected(offset) => UNEXPECTED_CUSTOM_BASE + offset as u16,
            RebootReason::Other(code) => code,
        }
    }

    /// Maps a wire code back to a reason. Codes without a name come back
    /// as [`RebootReason::Other`].
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => RebootReason::Unknown,
            0x0001 => RebootReason::UserShutdown,
            0x0002 => RebootReason::UserReset,
            0x0003 => RebootReason::FirmwareUpdate,
            0x0004 => RebootReason::LowPower,
            0x0005 => RebootReason::DebuggerHalted,
            0x0006 => RebootReason::ButtonReset,
            0x0007 => RebootReason::PowerOnReset,
            0x0008 => RebootReason::SoftwareReset,
            0x0009 => RebootReason::DeepSleep,
            0x000a => RebootReason::PinReset,
            0x000b => RebootReason::SelfTest,
            0x8000 => RebootReason::UnknownError,
            0x8001 => RebootReason::Assert,
            0x8002 => RebootReason::WatchdogDeprecated,
            0x8003 => RebootReason::BrownOutReset,
            0x8004 => RebootReason::Nmi,
            0x8005 => RebootReason::HardwareWatchdog,
            0x8006 => RebootReason::SoftwareWatchdog,
            0x8007 => RebootReason::ClockFailure,
            0x8008 => RebootReason::KernelPanic,
            0x8009 => RebootReason::FirmwareUpdateError,
            0x800a => RebootReason::OutOfMemory,
            0x800b => RebootReason::StackOverflow,
            0x9100 => RebootReason::BusFault,
            0x9200 => RebootReason::MemFault,
            0x9300 => RebootReason::UsageFault,
            0x9400 => RebootReason::HardFault,
            0x9401 => RebootReason::Lockup,
            0x9402 => RebootReason::SecurityViolation,
            0x9403 => RebootReason::ParityError,
            0x9404 => RebootReason::Temperature,
            0x9405 => RebootReason::Hardware,
            c if (EXPECTED_CUSTOM_BASE..EXPECTED_CUSTOM_MAX).contains(&c) => {
                RebootReason::CustomExpected((c - EXPECTED_CUSTOM_BASE) as u8)
            }
            c if (UNEXPECTED_CUSTOM_BASE..UNEXPECTED_CUSTOM_MAX).contains(&c) => {
                RebootReason::CustomUnexpected((c - UNEXPECTED_CUSTOM_BASE) as u8)
            }
            c => RebootReason::Other(c),
        }
    }

    /// Unexpected reasons carry the high bit.
    pub fn is_unexpected(self) -> bool {
        self.code() & 0x8000 != 0
    }

    /// Whether a boot that ends with this reason counts against the crash
    /// counter. `Unknown` counts: a reset nobody can explain is treated as
    /// a crash.
    pub fn counts_as_crash(self) -> bool {
        self.is_unexpected() || self == RebootReason::Unknown
    }
}

impl From<u16> for RebootReason {
    fn from(code: u16) -> Self {
        RebootReason::from_code(code)
    }
}

impl From<RebootReason> for u16 {
    fn from(reason: RebootReason) -> u16 {
        reason.code()
    }
}
