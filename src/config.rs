use std::time::Duration;

/// Configuration for the synchronization engine.
///
/// All options have sensible defaults; use [`SyncConfig::default()`] and the `with_*` methods to
/// override the ones you need.
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between two polls of split changes.
    ///
    /// Defaults to [`SyncConfig::DEFAULT_FEATURES_REFRESH_RATE`].
    pub features_refresh_rate: Duration,
    /// Interval between two polls of segment changes.
    ///
    /// Defaults to [`SyncConfig::DEFAULT_SEGMENTS_REFRESH_RATE`].
    pub segments_refresh_rate: Duration,
    /// Randomized duration subtracted from every polling interval. This helps to avoid multiple
    /// instances synchronizing and producing spiky network load.
    ///
    /// Defaults to zero (no jitter).
    pub refresh_jitter: Duration,
    /// Time to wait for readiness before emitting `TIMED_OUT`. `None` disables the timeout.
    pub ready_timeout: Option<Duration>,
    /// Timeout applied to fetches issued before the first successful synchronization. `None`
    /// disables it.
    pub request_timeout_before_ready: Option<Duration>,
    /// Number of retries allowed for a failed fetch before the first successful synchronization.
    pub retries_on_failure_before_ready: u32,
    /// Whether push notifications are used. When disabled, the engine only polls.
    pub streaming_enabled: bool,
    /// Base delay of the update workers backoff.
    pub fetch_backoff_base: Duration,
    /// Maximum delay of the update workers backoff.
    pub fetch_backoff_max_wait: Duration,
    /// Number of unproductive fetches an update worker performs before escalating to a CDN
    /// bypass (and, with the bypass already active, before giving up).
    pub fetch_backoff_max_retries: u32,
}

impl SyncConfig {
    /// Default value for [`SyncConfig::features_refresh_rate`].
    pub const DEFAULT_FEATURES_REFRESH_RATE: Duration = Duration::from_secs(60);
    /// Default value for [`SyncConfig::segments_refresh_rate`].
    pub const DEFAULT_SEGMENTS_REFRESH_RATE: Duration = Duration::from_secs(60);
    /// Default value for [`SyncConfig::ready_timeout`].
    pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for [`SyncConfig::request_timeout_before_ready`].
    pub const DEFAULT_REQUEST_TIMEOUT_BEFORE_READY: Duration = Duration::from_secs(5);
    /// Default value for [`SyncConfig::retries_on_failure_before_ready`].
    pub const DEFAULT_RETRIES_ON_FAILURE_BEFORE_READY: u32 = 1;
    /// Default value for [`SyncConfig::fetch_backoff_base`].
    pub const DEFAULT_FETCH_BACKOFF_BASE: Duration = Duration::from_secs(10);
    /// Default value for [`SyncConfig::fetch_backoff_max_wait`].
    pub const DEFAULT_FETCH_BACKOFF_MAX_WAIT: Duration = Duration::from_secs(60);
    /// Default value for [`SyncConfig::fetch_backoff_max_retries`].
    pub const DEFAULT_FETCH_BACKOFF_MAX_RETRIES: u32 = 10;

    /// Create a new `SyncConfig` using default configuration.
    pub fn new() -> SyncConfig {
        SyncConfig::default()
    }

    /// Update split polling interval.
    pub fn with_features_refresh_rate(mut self, rate: Duration) -> SyncConfig {
        self.features_refresh_rate = rate;
        self
    }

    /// Update segment polling interval.
    pub fn with_segments_refresh_rate(mut self, rate: Duration) -> SyncConfig {
        self.segments_refresh_rate = rate;
        self
    }

    /// Update polling interval jitter.
    pub fn with_refresh_jitter(mut self, jitter: Duration) -> SyncConfig {
        self.refresh_jitter = jitter;
        self
    }

    /// Update readiness timeout. `None` disables it.
    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> SyncConfig {
        self.ready_timeout = timeout;
        self
    }

    /// Update the fetch timeout applied before the first successful synchronization.
    pub fn with_request_timeout_before_ready(mut self, timeout: Option<Duration>) -> SyncConfig {
        self.request_timeout_before_ready = timeout;
        self
    }

    /// Update the retry budget applied before the first successful synchronization.
    pub fn with_retries_on_failure_before_ready(mut self, retries: u32) -> SyncConfig {
        self.retries_on_failure_before_ready = retries;
        self
    }

    /// Enable or disable push notifications.
    pub fn with_streaming_enabled(mut self, enabled: bool) -> SyncConfig {
        self.streaming_enabled = enabled;
        self
    }

    /// Update update workers backoff parameters.
    pub fn with_fetch_backoff(
        mut self,
        base: Duration,
        max_wait: Duration,
        max_retries: u32,
    ) -> SyncConfig {
        self.fetch_backoff_base = base;
        self.fetch_backoff_max_wait = max_wait;
        self.fetch_backoff_max_retries = max_retries;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> SyncConfig {
        SyncConfig {
            features_refresh_rate: SyncConfig::DEFAULT_FEATURES_REFRESH_RATE,
            segments_refresh_rate: SyncConfig::DEFAULT_SEGMENTS_REFRESH_RATE,
            refresh_jitter: Duration::ZERO,
            ready_timeout: Some(SyncConfig::DEFAULT_READY_TIMEOUT),
            request_timeout_before_ready: Some(SyncConfig::DEFAULT_REQUEST_TIMEOUT_BEFORE_READY),
            retries_on_failure_before_ready: SyncConfig::DEFAULT_RETRIES_ON_FAILURE_BEFORE_READY,
            streaming_enabled: true,
            fetch_backoff_base: SyncConfig::DEFAULT_FETCH_BACKOFF_BASE,
            fetch_backoff_max_wait: SyncConfig::DEFAULT_FETCH_BACKOFF_MAX_WAIT,
            fetch_backoff_max_retries: SyncConfig::DEFAULT_FETCH_BACKOFF_MAX_RETRIES,
        }
    }
}
