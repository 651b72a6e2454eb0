use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking request-path outcomes.
///
/// All counters use relaxed ordering for throughput. For a consistent
/// point-in-time view, call [`snapshot`](Self::snapshot). Counters reset
/// when the gateway restarts; durable figures live in the ledger.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Requests entering the pipeline.
    pub requests: AtomicU64,
    /// Non-streaming completions returned.
    pub completed: AtomicU64,
    /// Streaming responses started.
    pub streamed: AtomicU64,
    /// Responses served from the semantic cache.
    pub cache_hits: AtomicU64,
    /// Requests rejected with `wallet_exhausted`.
    pub wallet_rejections: AtomicU64,
    /// Requests denied by policy or routing rules.
    pub policy_blocks: AtomicU64,
    /// Requests blocked or quarantined by the security scanner.
    pub security_blocks: AtomicU64,
    /// Failover hops taken (connector advances within a request).
    pub failovers: AtomicU64,
    /// Requests that exhausted the whole failover chain.
    pub upstream_exhausted: AtomicU64,
    /// Streams terminated by client disconnect.
    pub client_disconnects: AtomicU64,
    /// Streams terminated by a mid-stream upstream error.
    pub stream_errors: AtomicU64,
    /// Dry-run evaluations served.
    pub dry_runs: AtomicU64,
}

macro_rules! increment {
    ($name:ident, $field:ident, $doc:expr) => {
        #[doc = $doc]
        pub fn $name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl GatewayMetrics {
    increment!(increment_requests, requests, "Count a request entering the pipeline.");
    increment!(increment_completed, completed, "Count a non-streaming completion.");
    increment!(increment_streamed, streamed, "Count a streaming response start.");
    increment!(increment_cache_hits, cache_hits, "Count a cache-served response.");
    increment!(increment_wallet_rejections, wallet_rejections, "Count a wallet rejection.");
    increment!(increment_policy_blocks, policy_blocks, "Count a policy denial.");
    increment!(increment_security_blocks, security_blocks, "Count a security block.");
    increment!(increment_failovers, failovers, "Count a failover hop.");
    increment!(increment_upstream_exhausted, upstream_exhausted, "Count chain exhaustion.");
    increment!(increment_client_disconnects, client_disconnects, "Count a client disconnect.");
    increment!(increment_stream_errors, stream_errors, "Count a mid-stream error.");
    increment!(increment_dry_runs, dry_runs, "Count a dry-run evaluation.");

    /// Take a consistent point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            streamed: self.streamed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            wallet_rejections: self.wallet_rejections.load(Ordering::Relaxed),
            policy_blocks: self.policy_blocks.load(Ordering::Relaxed),
            security_blocks: self.security_blocks.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            upstream_exhausted: self.upstream_exhausted.load(Ordering::Relaxed),
            client_disconnects: self.client_disconnects.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            dry_runs: self.dry_runs.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`GatewayMetrics`] at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub completed: u64,
    pub streamed: u64,
    pub cache_hits: u64,
    pub wallet_rejections: u64,
    pub policy_blocks: u64,
    pub security_blocks: u64,
    pub failovers: u64,
    pub upstream_exhausted: u64,
    pub client_disconnects: u64,
    pub stream_errors: u64,
    pub dry_runs: u64,
}
