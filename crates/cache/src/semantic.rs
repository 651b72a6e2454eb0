use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;
use tracing::{debug, warn};

use tollgate_core::{ChatResponse, Tenant, Usage};

use crate::embedding::EmbeddingProvider;

/// Default bound on a cache lookup; on expiry the cache reports a miss and
/// dispatch proceeds.
const DEFAULT_LOOKUP_DEADLINE: Duration = Duration::from_millis(50);

/// A stored request/response pair. Fields are `Arc`-wrapped so the cache
/// hands out cheap clones.
#[derive(Clone)]
struct StoredEntry {
    embedding: Arc<Vec<f32>>,
    response: Arc<ChatResponse>,
    usage: Usage,
    ttl: Duration,
}

/// Per-entry TTL policy: every entry carries its own lifetime, so a
/// request-level TTL override and the tenant default coexist in one cache.
struct EntryTtl;

impl Expiry<String, StoredEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A successful cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub response: ChatResponse,
    pub usage: Usage,
    pub similarity: f32,
}

/// Cosine similarity over two equal-length vectors.
///
/// Returns `0.0` when the lengths differ or either magnitude vanishes;
/// normalized embeddings land in `[0.0, 1.0]`.
fn similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });
    let scale = (norm_a * norm_b).sqrt();
    if scale > 0.0 {
        dot / scale
    } else {
        0.0
    }
}

/// Embedding-keyed response cache, scoped per tenant.
///
/// Each tenant gets its own bounded [`moka`] cache, capped at the tenant's
/// entry budget with per-entry TTLs; recency is recorded on every hit so
/// eviction favors cold entries. Lookups are a cosine scan over the
/// tenant's live entries — the budget keeps the scan small — and entries
/// are never shared across tenants.
pub struct SemanticCache {
    embedder: Arc<dyn EmbeddingProvider>,
    tenants: DashMap<String, Cache<String, StoredEntry>>,
    lookup_deadline: Duration,
}

impl std::fmt::Debug for SemanticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCache")
            .field("tenants", &self.tenants.len())
            .finish_non_exhaustive()
    }
}

impl SemanticCache {
    /// Create a cache over the given embedder.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            tenants: DashMap::new(),
            lookup_deadline: DEFAULT_LOOKUP_DEADLINE,
        }
    }

    /// Override the lookup deadline.
    #[must_use]
    pub fn with_lookup_deadline(mut self, deadline: Duration) -> Self {
        self.lookup_deadline = deadline;
        self
    }

    /// The tenant's cache, created on first use. The entry budget is fixed
    /// at that point; a changed tenant budget applies after a flush.
    fn tenant_cache(&self, tenant: &Tenant) -> Cache<String, StoredEntry> {
        self.tenants
            .entry(tenant.id.to_string())
            .or_insert_with(|| {
                Cache::builder()
                    .max_capacity(tenant.cache.max_entries)
                    .expire_after(EntryTtl)
                    .build()
            })
            .clone()
    }

    /// Look up the nearest cached response above the tenant's similarity
    /// threshold. Embedding failures and deadline expiry report a miss so
    /// the request path never blocks on the cache.
    pub async fn lookup(&self, tenant: &Tenant, prompt: &str) -> Option<CacheHit> {
        if !tenant.cache.enabled {
            return None;
        }

        let probe =
            match tokio::time::timeout(self.lookup_deadline, self.embedder.embed(prompt)).await {
                Ok(Ok(embedding)) => embedding,
                Ok(Err(e)) => {
                    warn!(tenant = %tenant.id, error = %e, "cache embedder failed, bypassing");
                    return None;
                }
                Err(_) => {
                    debug!(tenant = %tenant.id, "cache lookup deadline expired, bypassing");
                    return None;
                }
            };

        let cache = self.tenant_cache(tenant);
        let mut best: Option<(Arc<String>, f32)> = None;
        for (key, entry) in cache.iter() {
            let score = similarity(&probe, &entry.embedding);
            if score >= tenant.cache.similarity_threshold
                && best.as_ref().is_none_or(|(_, seen)| score > *seen)
            {
                best = Some((key, score));
            }
        }

        let (key, score) = best?;
        // Re-read through the cache: this confirms the entry is still live
        // and records the hit so eviction keeps warm entries.
        let entry = cache.get(key.as_str()).await?;
        Some(CacheHit {
            response: (*entry.response).clone(),
            usage: entry.usage,
            similarity: score,
        })
    }

    /// Insert a completed response. `ttl_override` comes from the request's
    /// extension object; otherwise the tenant default applies.
    pub async fn insert(
        &self,
        tenant: &Tenant,
        prompt: &str,
        response: ChatResponse,
        usage: Usage,
        ttl_override: Option<Duration>,
    ) {
        if !tenant.cache.enabled {
            return;
        }
        let embedding = match self.embedder.embed(prompt).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(tenant = %tenant.id, error = %e, "cache population skipped");
                return;
            }
        };

        let ttl = ttl_override.unwrap_or(Duration::from_secs(tenant.cache.ttl_seconds));
        self.tenant_cache(tenant)
            .insert(
                prompt.to_owned(),
                StoredEntry {
                    embedding: Arc::new(embedding),
                    response: Arc::new(response),
                    usage,
                    ttl,
                },
            )
            .await;
    }

    /// Drop every entry for a tenant.
    pub fn flush(&self, tenant: &str) {
        if let Some(cache) = self.tenants.get(tenant) {
            cache.invalidate_all();
        }
    }

    /// Entry count for a tenant after housekeeping has run.
    pub async fn len(&self, tenant: &str) -> u64 {
        match self.tenants.get(tenant) {
            Some(cache) => {
                cache.run_pending_tasks().await;
                cache.entry_count()
            }
            None => 0,
        }
    }
}
