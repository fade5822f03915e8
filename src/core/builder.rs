//! Builder for constructing an event loop with optional collaborators.

use std::sync::Arc;

use crate::agent::{Agent, NoopAgent};
use crate::clock::{Clock, MonotonicClock};
use crate::config::LoopConfig;
use crate::policies::{AbortOnReject, Parking, RejectPolicy, WaitStrategy};

use super::handle::{EventLoop, Inner};

/// Builder for an [`EventLoop`].
///
/// Defaults: [`NoopAgent`], [`Parking`] wait strategy, [`MonotonicClock`],
/// [`AbortOnReject`].
///
/// # Example
/// ```
/// use ringloop::{EventLoopBuilder, LoopConfig, BusySpin};
///
/// let lp = EventLoopBuilder::new(LoopConfig::default())
///     .with_wait_strategy(BusySpin)
///     .build();
/// lp.shutdown();
/// ```
pub struct EventLoopBuilder {
    cfg: LoopConfig,
    agent: Box<dyn Agent>,
    strategy: Arc<dyn WaitStrategy>,
    clock: Arc<dyn Clock>,
    reject: Arc<dyn RejectPolicy>,
}

impl EventLoopBuilder {
    /// Creates a builder with the given configuration.
    #[must_use]
    pub fn new(cfg: LoopConfig) -> Self {
        Self {
            cfg,
            agent: Box::new(NoopAgent),
            strategy: Arc::new(Parking::default()),
            clock: Arc::new(MonotonicClock::new()),
            reject: Arc::new(AbortOnReject),
        }
    }

    /// Installs the agent whose hooks run on the consumer thread.
    #[must_use]
    pub fn with_agent(mut self, agent: impl Agent) -> Self {
        self.agent = Box::new(agent);
        self
    }

    /// Sets how the consumer idles when no work is available.
    #[must_use]
    pub fn with_wait_strategy(mut self, strategy: impl WaitStrategy) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Injects the monotonic time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the disposition of rejected submissions.
    #[must_use]
    pub fn with_reject_policy(mut self, policy: impl RejectPolicy) -> Self {
        self.reject = Arc::new(policy);
        self
    }

    /// Builds the loop. The consumer thread starts lazily, on the first
    /// submission.
    #[must_use]
    pub fn build(self) -> EventLoop {
        let inner = Inner::new(
            self.cfg.name.clone(),
            self.cfg.ring_capacity_clamped(),
            self.cfg.batch_limit_clamped(),
            self.cfg.timer_batch_limit_clamped(),
            self.agent,
            self.strategy,
            self.clock,
            self.reject,
        );
        EventLoop {
            inner: Arc::new(inner),
        }
    }
}
