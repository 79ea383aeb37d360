use failsafe::backoff;
use std::time::Duration;

/// Delay between two failed probe passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay after every failed pass.
    Fixed(Duration),
    /// Doubles from `initial` up to `max`.
    Exponential { initial: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Infinite sequence of delays, one per failed pass, from the `failsafe`
    /// backoff iterators.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match *self {
            BackoffPolicy::Fixed(delay) => Box::new(backoff::constant(delay)),
            BackoffPolicy::Exponential { initial, max } => {
                Box::new(backoff::exponential(initial, max))
            }
        }
    }
}

/// What to do once bounded retries run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Keep serving and report unhealthy.
    Stay,
    /// Terminate the process with a non-zero status.
    Exit,
}

/// Retry configuration for the probe-and-failover loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Failed passes before giving up. `None` retries forever.
    pub max_passes: Option<u32>,
    pub backoff: BackoffPolicy,
    pub on_fatal: FatalPolicy,
}

impl RetryPolicy {
    /// Whether another pass is allowed after `failed_passes` failures.
    pub fn allows_another_pass(&self, failed_passes: u32) -> bool {
        match self.max_passes {
            Some(max) => failed_passes < max,
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_passes: Some(5),
            backoff: BackoffPolicy::Fixed(Duration::from_secs(5)),
            on_fatal: FatalPolicy::Stay,
        }
    }
}
