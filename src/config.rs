//! # Event-loop configuration.
//!
//! [`LoopConfig`] defines the loop's static knobs: consumer thread name,
//! slot-ring capacity, and the per-iteration batch limits that bound how much
//! work one iteration may drain from each of the two task sources.
//!
//! Pluggable collaborators (agent, wait strategy, clock, reject policy) are
//! not configuration data; they are supplied through
//! [`EventLoopBuilder`](crate::EventLoopBuilder).
//!
//! # Example
//! ```
//! use ringloop::LoopConfig;
//!
//! let mut cfg = LoopConfig::default();
//! cfg.name = "worker-loop".into();
//! cfg.ring_capacity = 1024;
//!
//! assert_eq!(cfg.ring_capacity_clamped(), 1024);
//! ```

/// Static configuration for one event loop.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Name given to the consumer thread (shows up in panics and profilers).
    pub name: String,
    /// Slot-ring capacity; rounded up to the next power of two, minimum 8.
    pub ring_capacity: usize,
    /// Maximum ring slots drained per iteration.
    pub batch_limit: usize,
    /// Maximum due scheduled tasks drained per iteration.
    pub timer_batch_limit: usize,
}

impl Default for LoopConfig {
    /// Provides a default configuration:
    /// - `name = "ringloop"`
    /// - `ring_capacity = 8192`
    /// - `batch_limit = 1024`
    /// - `timer_batch_limit = 64`
    fn default() -> Self {
        Self {
            name: "ringloop".to_string(),
            ring_capacity: 8192,
            batch_limit: 1024,
            timer_batch_limit: 64,
        }
    }
}

impl LoopConfig {
    /// Ring capacity normalized to a power of two (minimum 8).
    #[must_use]
    pub fn ring_capacity_clamped(&self) -> usize {
        self.ring_capacity.max(8).next_power_of_two()
    }

    /// Batch limit normalized to at least 1.
    #[must_use]
    pub fn batch_limit_clamped(&self) -> usize {
        self.batch_limit.max(1)
    }

    /// Timer batch limit normalized to at least 1.
    #[must_use]
    pub fn timer_batch_limit_clamped(&self) -> usize {
        self.timer_batch_limit.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let mut cfg = LoopConfig::default();
        cfg.ring_capacity = 1000;
        assert_eq!(cfg.ring_capacity_clamped(), 1024);

        cfg.ring_capacity = 0;
        assert_eq!(cfg.ring_capacity_clamped(), 8);
    }

    #[test]
    fn test_batch_limits_never_zero() {
        let mut cfg = LoopConfig::default();
        cfg.batch_limit = 0;
        cfg.timer_batch_limit = 0;
        assert_eq!(cfg.batch_limit_clamped(), 1);
        assert_eq!(cfg.timer_batch_limit_clamped(), 1);
    }
}
