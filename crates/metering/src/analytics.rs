use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

/// One settled request, as sent to the time-series analytics collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub tenant: String,
    pub correlation_id: String,
    pub actor: String,
    #[serde(default)]
    pub feature: Option<String>,
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost in micro-units.
    pub cost: u64,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Seam to the external analytics sink. Publishing must never fail a
/// request; implementations swallow their own errors.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Deliver one event.
    async fn publish(&self, event: AnalyticsEvent);
}

/// Fire-and-forget queue in front of a slow sink.
///
/// A background worker drains the buffer into the inner sink. When the
/// buffer is full the oldest event is dropped and a counter incremented,
/// so a stalled sink can never apply backpressure to the request path.
pub struct BoundedAnalyticsQueue {
    buffer: Arc<Mutex<VecDeque<AnalyticsEvent>>>,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

impl std::fmt::Debug for BoundedAnalyticsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedAnalyticsQueue")
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl BoundedAnalyticsQueue {
    /// Create a queue of the given capacity and spawn its drain worker.
    #[must_use]
    pub fn spawn(inner: Arc<dyn AnalyticsSink>, capacity: usize) -> Arc<Self> {
        let queue = Arc::new(Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            notify: Arc::new(Notify::new()),
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
        });

        let buffer = Arc::clone(&queue.buffer);
        let notify = Arc::clone(&queue.notify);
        tokio::spawn(async move {
            loop {
                let event = buffer.lock().pop_front();
                match event {
                    Some(event) => inner.publish(event).await,
                    None => notify.notified().await,
                }
            }
        });

        queue
    }

    /// Events dropped because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AnalyticsSink for BoundedAnalyticsQueue {
    async fn publish(&self, event: AnalyticsEvent) {
        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped = total, "analytics buffer full, dropping oldest");
            }
            buffer.push_back(event);
        }
        self.notify.notify_one();
    }
}

/// Aggregated cost figures for one (tenant, model, provider, feature) group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBucket {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: u64,
    pub cache_hits: u64,
}

/// In-memory sink that aggregates events for the cost-breakdown endpoint.
///
/// Counters reset when the gateway restarts; durable analytics live in the
/// external sink behind the [`BoundedAnalyticsQueue`].
#[derive(Default)]
pub struct MemoryAnalyticsSink {
    buckets: Mutex<HashMap<(String, String, String, String), CostBucket>>,
}

impl MemoryAnalyticsSink {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cost breakdown for a tenant, optionally filtered by model and feature.
    /// Keys are `model/provider/feature`.
    #[must_use]
    pub fn breakdown(
        &self,
        tenant: &str,
        model: Option<&str>,
        feature: Option<&str>,
    ) -> HashMap<String, CostBucket> {
        let buckets = self.buckets.lock();
        buckets
            .iter()
            .filter(|((t, m, _, f), _)| {
                t == tenant
                    && model.is_none_or(|want| m == want)
                    && feature.is_none_or(|want| f == want)
            })
            .map(|((_, m, p, f), bucket)| (format!("{m}/{p}/{f}"), bucket.clone()))
            .collect()
    }
}

impl std::fmt::Debug for MemoryAnalyticsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAnalyticsSink")
            .field("buckets", &self.buckets.lock().len())
            .finish()
    }
}

#[async_trait]
impl AnalyticsSink for MemoryAnalyticsSink {
    async fn publish(&self, event: AnalyticsEvent) {
        let key = (
            event.tenant,
            event.model,
            event.provider,
            event.feature.unwrap_or_default(),
        );
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_default();
        bucket.requests += 1;
        bucket.input_tokens += event.input_tokens;
        bucket.output_tokens += event.output_tokens;
        bucket.cost += event.cost;
        if event.cache_hit {
            bucket.cache_hits += 1;
        }
    }
}
