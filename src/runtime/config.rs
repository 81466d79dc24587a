use crate::runtime::telemetry;
use crate::store::ScanDescriptor;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_LOCKED_QUEUE_WAIT_SECS: u64 = 1;
const DEFAULT_EMPTY_QUEUE_WAIT_SECS: u64 = 30;

/// Per-run configuration of a scan.
///
/// All instances must be constructed via [`ScanConfig::builder`] or [`ScanConfig::new`]
/// so invariants are validated before the coordinator observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    descriptor: ScanDescriptor,
    queue_size: Option<usize>,
    locked_queue_wait: Duration,
    empty_queue_wait: Duration,
    rescan_when_complete: bool,
    vigilant: bool,
    compact_queue_before_refill: bool,
    metrics_interval: Duration,
}

pub struct ScanConfigParams {
    pub descriptor: ScanDescriptor,
    pub queue_size: Option<usize>,
    pub locked_queue_wait: Duration,
    pub empty_queue_wait: Duration,
    pub rescan_when_complete: bool,
    pub vigilant: bool,
    pub compact_queue_before_refill: bool,
    pub metrics_interval: Duration,
}

impl ScanConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: ScanConfigParams) -> Result<Self> {
        let ScanConfigParams {
            descriptor,
            queue_size,
            locked_queue_wait,
            empty_queue_wait,
            rescan_when_complete,
            vigilant,
            compact_queue_before_refill,
            metrics_interval,
        } = params;

        let config = Self {
            descriptor,
            queue_size,
            locked_queue_wait,
            empty_queue_wait,
            rescan_when_complete,
            vigilant,
            compact_queue_before_refill,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Rows, ordering and read options that define the scan.
    pub fn descriptor(&self) -> &ScanDescriptor {
        &self.descriptor
    }

    /// Page size per refill; `None` means "the current total".
    pub fn queue_size(&self) -> Option<usize> {
        self.queue_size
    }

    /// Backoff a worker applies after a `Locked` signal.
    pub fn locked_queue_wait(&self) -> Duration {
        self.locked_queue_wait
    }

    /// Backoff a worker applies after an `Empty` signal.
    pub fn empty_queue_wait(&self) -> Duration {
        self.empty_queue_wait
    }

    pub fn rescan_when_complete(&self) -> bool {
        self.rescan_when_complete
    }

    pub fn vigilant(&self) -> bool {
        self.vigilant
    }

    /// Whether the id buffer is shrunk before every refill.
    pub fn compact_queue_before_refill(&self) -> bool {
        self.compact_queue_before_refill
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.queue_size == Some(0) {
            bail!("queue_size must be greater than 0");
        }

        if self.locked_queue_wait.is_zero() {
            bail!("locked_queue_wait must be greater than 0");
        }

        if self.empty_queue_wait.is_zero() {
            bail!("empty_queue_wait must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if let Some(conditions) = &self.descriptor.conditions {
            if conditions.trim().is_empty() {
                bail!("conditions cannot be empty when provided");
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScanConfigBuilder {
    descriptor: Option<ScanDescriptor>,
    queue_size: Option<usize>,
    locked_queue_wait: Option<Duration>,
    empty_queue_wait: Option<Duration>,
    rescan_when_complete: Option<bool>,
    vigilant: Option<bool>,
    compact_queue_before_refill: Option<bool>,
    metrics_interval: Option<Duration>,
}

impl ScanConfigBuilder {
    pub fn descriptor(mut self, descriptor: ScanDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }

    pub fn locked_queue_wait(mut self, wait: Duration) -> Self {
        self.locked_queue_wait = Some(wait);
        self
    }

    pub fn empty_queue_wait(mut self, wait: Duration) -> Self {
        self.empty_queue_wait = Some(wait);
        self
    }

    pub fn rescan_when_complete(mut self, enabled: bool) -> Self {
        self.rescan_when_complete = Some(enabled);
        self
    }

    pub fn vigilant(mut self, enabled: bool) -> Self {
        self.vigilant = Some(enabled);
        self
    }

    pub fn compact_queue_before_refill(mut self, enabled: bool) -> Self {
        self.compact_queue_before_refill = Some(enabled);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ScanConfig> {
        let params = ScanConfigParams {
            descriptor: self.descriptor.unwrap_or_default(),
            queue_size: self.queue_size,
            locked_queue_wait: self
                .locked_queue_wait
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_LOCKED_QUEUE_WAIT_SECS)),
            empty_queue_wait: self
                .empty_queue_wait
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_EMPTY_QUEUE_WAIT_SECS)),
            rescan_when_complete: self.rescan_when_complete.unwrap_or(false),
            vigilant: self.vigilant.unwrap_or(false),
            compact_queue_before_refill: self.compact_queue_before_refill.unwrap_or(false),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        ScanConfig::new(params)
    }
}
