//! Heartbeat Metrics
//!
//! A small value store for the numbers a product reports with each
//! heartbeat: counters bumped as things happen, gauges set when sampled.
//! The SDK does not schedule anything; the product's own timer decides
//! when a heartbeat interval ends and calls
//! [`crate::Blackbox::collect_heartbeat`], which snapshots the registry
//! into a heartbeat event and resets it for the next interval.
//!
//! Metric ids are plain integers agreed with the backend, the same ids
//! that key the heartbeat event's payload map.

use heapless::Vec;

use crate::error::{Error, Result};
use crate::events::encoder::MetricValue;

/// Metrics tracked per heartbeat interval.
pub const MAX_METRICS: usize = 32;

#[derive(Debug, Clone, Copy)]
struct MetricSlot {
    id: u32,
    value: MetricValue,
}

/// Value store for one heartbeat interval.
pub struct MetricsRegistry {
    entries: Vec<MetricSlot, MAX_METRICS>,
}

impl MetricsRegistry {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn upsert(&mut self, id: u32, value: MetricValue) -> Result<()> {
        if let Some(slot) = self.entries.iter_mut().find(|s| s.id == id) {
            slot.value = value;
            return Ok(());
        }
        self.entries.push(MetricSlot { id, value }).map_err(|_| Error::InvalidInput)
    }

    /// Sets a gauge-style metric.
    pub fn set_unsigned(&mut self, id: u32, value: u64) -> Result<()> {
        self.upsert(id, MetricValue::Unsigned(value))
    }

    /// Sets a gauge-style metric that can go negative.
    pub fn set_signed(&mut self, id: u32, value: i64) -> Result<()> {
        self.upsert(id, MetricValue::Signed(value))
    }

    /// Bumps a counter-style metric. A metric that was never written this
    /// interval starts from zero.
    pub fn add(&mut self, id: u32, amount: i64) -> Result<()> {
        let current = self.get(id).unwrap_or(MetricValue::Unsigned(0));
        let next = match current {
            MetricValue::Unsigned(v) => {
                if amount >= 0 {
                    MetricValue::Unsigned(v.saturating_add(amount as u64))
                } else {
                    MetricValue::Unsigned(v.saturating_sub(amount.unsigned_abs()))
                }
            }
            MetricValue::Signed(v) => MetricValue::Signed(v.saturating_add(amount)),
        };
        self.upsert(id, next)
    }

    /// Current value of a metric, if written this interval.
    pub fn get(&self, id: u32) -> Option<MetricValue> {
        self.entries.iter().find(|s| s.id == id).map(|s| s.value)
    }

    /// Number of metrics written this interval.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies the interval's samples out and resets the registry. The
    /// returned pairs feed straight into a heartbeat event.
    pub fn take_snapshot(&mut self) -> Vec<(u32, MetricValue), MAX_METRICS> {
        let mut snapshot = Vec::new();
        for slot in self.entries.iter() {
            let _ = snapshot.push((slot.id, slot.value));
        }
        self.entries.clear();
        snapshot
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut metrics = MetricsRegistry::new();
        metrics.set_unsigned(1, 42).unwrap();
        metrics.set_signed(2, -7).unwrap();

        assert_eq!(metrics.get(1), Some(MetricValue::Unsigned(42)));
        assert_eq!(metrics.get(2), Some(MetricValue::Signed(-7)));
        assert_eq!(metrics.get(3), None);
        assert_eq!(metrics.len(), 2);

        // setting again replaces, not duplicates
        metrics.set_unsigned(1, 43).unwrap();
        assert_eq!(metrics.get(1), Some(MetricValue::Unsigned(43)));
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn test_counters_accumulate() {
        let mut metrics = MetricsRegistry::new();
        metrics.add(9, 1).unwrap();
        metrics.add(9, 1).unwrap();
        metrics.add(9, 3).unwrap();
        assert_eq!(metrics.get(9), Some(MetricValue::Unsigned(5)));

        // unsigned counters saturate at zero instead of wrapping
        metrics.add(9, -100).unwrap();
        assert_eq!(metrics.get(9), Some(MetricValue::Unsigned(0)));

        metrics.set_signed(10, -1).unwrap();
        metrics.add(10, -2).unwrap();
        assert_eq!(metrics.get(10), Some(MetricValue::Signed(-3)));
    }

    #[test]
    fn test_snapshot_resets_interval() {
        let mut metrics = MetricsRegistry::new();
        metrics.set_unsigned(1, 11).unwrap();
        metrics.add(2, 4).unwrap();

        let snapshot = metrics.take_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&(1, MetricValue::Unsigned(11))));
        assert!(snapshot.contains(&(2, MetricValue::Unsigned(4))));

        assert!(metrics.is_empty());
        assert_eq!(metrics.get(1), None);
        // the next interval starts from scratch
        metrics.add(2, 1).unwrap();
        assert_eq!(metrics.get(2), Some(MetricValue::Unsigned(1)));
    }

    #[test]
    fn test_registry_capacity() {
        let mut metrics = MetricsRegistry::new();
        for id in 0..MAX_METRICS as u32 {
            metrics.set_unsigned(id, 1).unwrap();
        }
        assert_eq!(
            metrics.set_unsigned(MAX_METRICS as u32, 1),
            Err(Error::InvalidInput)
        );
        // existing ids still update fine at capacity
        metrics.set_unsigned(0, 2).unwrap();
        assert_eq!(metrics.get(0), Some(MetricValue::Unsigned(2)));
    }
}
