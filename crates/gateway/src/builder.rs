use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use tollgate_cache::{EmbeddingProvider, SemanticCache};
use tollgate_connector::ConnectorRegistry;
use tollgate_core::{RoutingRule, Tenant};
use tollgate_ledger::{LedgerWriter, MemoryLedgerStore};
use tollgate_metering::{AnalyticsSink, MemoryAnalyticsSink};
use tollgate_policy::{
    IncidentStore, MemoryIncidentStore, PolicyEvaluator, ScanPolicy, SecurityScanner,
    StaticPolicyEvaluator,
};
use tollgate_router::{HealthConfig, HealthRegistry, RuleEngine};
use tollgate_wallet::{NotificationSink, NullNotificationSink, WalletService};

use crate::gateway::Gateway;
use crate::metrics::GatewayMetrics;

/// Default bound on external policy evaluation.
const DEFAULT_POLICY_DEADLINE: Duration = Duration::from_millis(100);

/// Default embedding price per 1 000 input tokens, in micro-units.
const DEFAULT_EMBEDDING_PRICE: u64 = 20;

/// Assembles a [`Gateway`] from its seams.
///
/// Only the state store behind the wallet service is required; every other
/// collaborator has an in-memory or no-op default suitable for tests and
/// single-node deployments.
pub struct GatewayBuilder {
    state: Arc<dyn tollgate_state::StateStore>,
    notifications: Arc<dyn NotificationSink>,
    ledger: Option<Arc<LedgerWriter>>,
    scan_policy: ScanPolicy,
    incidents: Option<Arc<dyn IncidentStore>>,
    policy: Option<Arc<dyn PolicyEvaluator>>,
    policy_deadline: Duration,
    rules: Vec<RoutingRule>,
    registry: ConnectorRegistry,
    health_config: HealthConfig,
    cache: Option<Arc<SemanticCache>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    embedding_price: u64,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    tenants: Vec<Tenant>,
}

impl GatewayBuilder {
    /// Start a builder over the given state store.
    pub fn new(state: Arc<dyn tollgate_state::StateStore>) -> Self {
        Self {
            state,
            notifications: Arc::new(NullNotificationSink),
            ledger: None,
            scan_policy: ScanPolicy::default(),
            incidents: None,
            policy: None,
            policy_deadline: DEFAULT_POLICY_DEADLINE,
            rules: Vec::new(),
            registry: ConnectorRegistry::new(),
            health_config: HealthConfig::default(),
            cache: None,
            embedder: None,
            embedding_price: DEFAULT_EMBEDDING_PRICE,
            analytics: None,
            tenants: Vec::new(),
        }
    }

    /// Wire the threshold notification sink.
    #[must_use]
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    /// Wire the ledger writer.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<LedgerWriter>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Set the security-scan policy.
    #[must_use]
    pub fn with_scan_policy(mut self, policy: ScanPolicy) -> Self {
        self.scan_policy = policy;
        self
    }

    /// Wire the incident store.
    #[must_use]
    pub fn with_incidents(mut self, incidents: Arc<dyn IncidentStore>) -> Self {
        self.incidents = Some(incidents);
        self
    }

    /// Wire the external policy evaluator.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn PolicyEvaluator>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Bound external policy evaluation.
    #[must_use]
    pub fn with_policy_deadline(mut self, deadline: Duration) -> Self {
        self.policy_deadline = deadline;
        self
    }

    /// Seed the routing rule set.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<RoutingRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Register a connector.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn tollgate_connector::ChatConnector>) -> Self {
        self.registry.register(connector);
        self
    }

    /// Override health state-machine thresholds.
    #[must_use]
    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.health_config = config;
        self
    }

    /// Wire the semantic cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<SemanticCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Wire the embedding provider used by the embeddings endpoint.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Price per 1 000 embedded tokens, in micro-units.
    #[must_use]
    pub fn with_embedding_price(mut self, price: u64) -> Self {
        self.embedding_price = price;
        self
    }

    /// Wire the analytics sink.
    #[must_use]
    pub fn with_analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(sink);
        self
    }

    /// Seed a tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: Tenant) -> Self {
        self.tenants.push(tenant);
        self
    }

    /// Assemble the gateway.
    #[must_use]
    pub fn build(self) -> Gateway {
        let tenants: HashMap<String, Tenant> = self
            .tenants
            .into_iter()
            .map(|t| (t.id.to_string(), t))
            .collect();
        Gateway {
            tenants: RwLock::new(tenants),
            wallets: Arc::new(WalletService::new(self.state, self.notifications)),
            ledger: self
                .ledger
                .unwrap_or_else(|| Arc::new(LedgerWriter::new(Arc::new(MemoryLedgerStore::new())))),
            scanner: SecurityScanner::new(),
            scan_policy: RwLock::new(self.scan_policy),
            incidents: self
                .incidents
                .unwrap_or_else(|| Arc::new(MemoryIncidentStore::new())),
            policy: self
                .policy
                .unwrap_or_else(|| Arc::new(StaticPolicyEvaluator::default())),
            policy_deadline: self.policy_deadline,
            rules: RwLock::new(RuleEngine::new(self.rules)),
            registry: Arc::new(self.registry),
            health: Arc::new(HealthRegistry::new(self.health_config)),
            cache: self.cache,
            embedder: self.embedder,
            embedding_price: self.embedding_price,
            analytics: self
                .analytics
                .unwrap_or_else(|| Arc::new(MemoryAnalyticsSink::new())),
            metrics: Arc::new(GatewayMetrics::default()),
            held: Mutex::new(Vec::new()),
        }
    }
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("connectors", &self.registry.ids())
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}
