use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use tollgate_core::{ConnectorId, HealthState};

/// Maximum latency samples retained per connector. 1 000 samples keeps p95
/// accurate for low-to-medium traffic while costing ~8 KB per connector.
const MAX_LATENCY_SAMPLES: usize = 1_000;

/// Samples used to freeze the latency baseline.
const BASELINE_SAMPLES: usize = 100;

/// Thresholds governing the health state machine.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive upstream 5xx within [`error_window`](Self::error_window)
    /// that degrade a healthy connector.
    pub degrade_after_5xx: u32,
    /// Window for the consecutive-5xx count.
    pub error_window: Duration,
    /// Consecutive successful probes that return a degraded connector to
    /// healthy.
    pub recover_after_successes: u32,
    /// Consecutive errors of any kind that take a connector down.
    pub down_after_errors: u32,
    /// Continuous network unreachability that takes a connector down.
    pub down_after_unreachable: Duration,
    /// p95 above `baseline * latency_degrade_factor` degrades the connector
    /// once sustained for [`latency_sustain`](Self::latency_sustain).
    pub latency_degrade_factor: f64,
    pub latency_sustain: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degrade_after_5xx: 3,
            error_window: Duration::from_secs(60),
            recover_after_successes: 5,
            down_after_errors: 10,
            down_after_unreachable: Duration::from_secs(30),
            latency_degrade_factor: 2.0,
            latency_sustain: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct HealthData {
    state: HealthState,
    consecutive_5xx: u32,
    first_5xx_at_ms: Option<i64>,
    consecutive_errors: u32,
    consecutive_successes: u32,
    unreachable_since_ms: Option<i64>,
    latency_high_since_ms: Option<i64>,
}

impl Default for HealthData {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_5xx: 0,
            first_5xx_at_ms: None,
            consecutive_errors: 0,
            consecutive_successes: 0,
            unreachable_since_ms: None,
            latency_high_since_ms: None,
        }
    }
}

/// Per-connector health tracking, shared per gateway instance.
///
/// Transitions:
/// - healthy -> degraded on consecutive 5xx within the window, or sustained
///   p95 above the frozen baseline
/// - degraded -> healthy after consecutive successful probes
/// - any -> down on sustained failure (consecutive errors or prolonged
///   network unreachability)
/// - down -> degraded on the first probe success, then the standard
///   recovery path
pub struct ConnectorHealth {
    connector: ConnectorId,
    config: HealthConfig,
    data: Mutex<HealthData>,
    latency_samples: Mutex<VecDeque<u64>>,
    baseline_p95_us: Mutex<Option<u64>>,
}

impl std::fmt::Debug for ConnectorHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorHealth")
            .field("connector", &self.connector)
            .field("state", &self.data.lock().state)
            .finish_non_exhaustive()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ConnectorHealth {
    /// Create a tracker for the given connector, starting healthy.
    #[must_use]
    pub fn new(connector: ConnectorId, config: HealthConfig) -> Self {
        Self {
            connector,
            config,
            data: Mutex::new(HealthData::default()),
            latency_samples: Mutex::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES)),
            baseline_p95_us: Mutex::new(None),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HealthState {
        self.data.lock().state
    }

    /// Recent p95 latency in microseconds, 0 with no samples.
    #[must_use]
    pub fn p95_latency_us(&self) -> u64 {
        let samples = self.latency_samples.lock();
        percentile(&samples, 95.0)
    }

    /// Record a successful upstream call.
    pub fn record_success(&self, latency_us: u64) {
        self.push_latency(latency_us);
        let mut data = self.data.lock();
        data.consecutive_5xx = 0;
        data.first_5xx_at_ms = None;
        data.consecutive_errors = 0;
        data.unreachable_since_ms = None;

        match data.state {
            HealthState::Healthy => {
                self.check_latency_degrade(&mut data);
            }
            HealthState::Degraded => {
                data.consecutive_successes += 1;
                if data.consecutive_successes >= self.config.recover_after_successes {
                    info!(connector = %self.connector, "connector recovered to healthy");
                    data.state = HealthState::Healthy;
                    data.consecutive_successes = 0;
                    data.latency_high_since_ms = None;
                }
            }
            HealthState::Down => {
                info!(connector = %self.connector, "connector back from down, probing");
                data.state = HealthState::Degraded;
                data.consecutive_successes = 1;
            }
        }
    }

    /// Record an upstream 5xx.
    pub fn record_server_error(&self) {
        let mut data = self.data.lock();
        let now = now_ms();
        data.consecutive_successes = 0;
        data.consecutive_errors += 1;

        // Reset the 5xx streak if the first error fell out of the window.
        #[allow(clippy::cast_possible_truncation)]
        let window_ms = self.config.error_window.as_millis() as i64;
        match data.first_5xx_at_ms {
            Some(first) if now - first <= window_ms => data.consecutive_5xx += 1,
            _ => {
                data.first_5xx_at_ms = Some(now);
                data.consecutive_5xx = 1;
            }
        }

        if data.consecutive_errors >= self.config.down_after_errors {
            self.transition(&mut data, HealthState::Down);
        } else if data.state == HealthState::Healthy
            && data.consecutive_5xx >= self.config.degrade_after_5xx
        {
            self.transition(&mut data, HealthState::Degraded);
        }
    }

    /// Record a connect failure or other network-level error.
    pub fn record_network_error(&self) {
        let mut data = self.data.lock();
        let now = now_ms();
        data.consecutive_successes = 0;
        data.consecutive_errors += 1;
        let since = *data.unreachable_since_ms.get_or_insert(now);

        #[allow(clippy::cast_possible_truncation)]
        let limit_ms = self.config.down_after_unreachable.as_millis() as i64;
        if data.consecutive_errors >= self.config.down_after_errors || now - since >= limit_ms {
            self.transition(&mut data, HealthState::Down);
        }
    }

    fn transition(&self, data: &mut HealthData, to: HealthState) {
        if data.state != to {
            info!(connector = %self.connector, from = %data.state, to = %to,
                "connector health transition");
            data.state = to;
        }
    }

    fn push_latency(&self, latency_us: u64) {
        let mut samples = self.latency_samples.lock();
        if samples.len() >= MAX_LATENCY_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(latency_us);

        // Freeze the baseline once enough early samples accumulated.
        if samples.len() == BASELINE_SAMPLES {
            let mut baseline = self.baseline_p95_us.lock();
            if baseline.is_none() {
                *baseline = Some(percentile(&samples, 95.0));
            }
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn check_latency_degrade(&self, data: &mut HealthData) {
        let Some(baseline) = *self.baseline_p95_us.lock() else {
            return;
        };
        if baseline == 0 {
            return;
        }
        let current = {
            let samples = self.latency_samples.lock();
            percentile(&samples, 95.0)
        };
        let threshold = (baseline as f64 * self.config.latency_degrade_factor) as u64;
        if current > threshold {
            let now = now_ms();
            let since = *data.latency_high_since_ms.get_or_insert(now);
            let sustain_ms = self.config.latency_sustain.as_millis() as i64;
            if now - since >= sustain_ms {
                self.transition(data, HealthState::Degraded);
            }
        } else {
            data.latency_high_since_ms = None;
        }
    }
}

fn percentile(samples: &VecDeque<u64>, pct: f64) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let idx = ((pct / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Registry of health trackers, lazily created per connector.
#[derive(Default)]
pub struct HealthRegistry {
    trackers: DashMap<ConnectorId, Arc<ConnectorHealth>>,
    config: HealthConfig,
}

impl HealthRegistry {
    /// Create a registry with the given thresholds.
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            trackers: DashMap::new(),
            config,
        }
    }

    /// The tracker for a connector, created healthy on first use.
    #[must_use]
    pub fn tracker(&self, connector: &ConnectorId) -> Arc<ConnectorHealth> {
        self.trackers
            .entry(connector.clone())
            .or_insert_with(|| {
                Arc::new(ConnectorHealth::new(connector.clone(), self.config.clone()))
            })
            .clone()
    }

    /// Current state for a connector (healthy if never seen).
    #[must_use]
    pub fn state(&self, connector: &ConnectorId) -> HealthState {
        self.trackers
            .get(connector)
            .map_or(HealthState::Healthy, |t| t.state())
    }

    /// Recent p95 latency in microseconds (0 if never seen).
    #[must_use]
    pub fn p95_latency_us(&self, connector: &ConnectorId) -> u64 {
        self.trackers
            .get(connector)
            .map_or(0, |t| t.p95_latency_us())
    }

    /// Snapshot of `(connector, state, p95_us)` for every tracked connector.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ConnectorId, HealthState, u64)> {
        let mut all: Vec<_> = self
            .trackers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state(), entry.value().p95_latency_us()))
            .collect();
        all.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        all
    }
}

impl std::fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthRegistry")
            .field("tracked", &self.trackers.len())
            .finish()
    }
}
