//! Reboot Tracking
//!
//! Records why the device reset and carries that answer across the reset
//! barrier in a noinit RAM region, reconciling the reason marked before a
//! self-triggered reset with whatever the hardware reset-cause register
//! reports after the fact.

pub mod reason;
pub mod tracking;

pub use reason::RebootReason;
pub use tracking::{
    BootupInfo, RebootReasonInfo, RebootTracker, RebootTrackingRegion, ResetInfo, ResetRegisters,
};
