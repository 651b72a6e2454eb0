use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tollgate_cache::{HttpEmbeddingProvider, SemanticCache};
use tollgate_connector::{
    AnthropicConnector, ChatConnector, ConnectorError, EnvSecretStore, OpenAiConnector,
    SecretStore,
};
use tollgate_core::ConnectorKind;
use tollgate_gateway::GatewayBuilder;
use tollgate_ledger::{LedgerWriter, MemoryLedgerStore};
use tollgate_metering::{AnalyticsSink, BoundedAnalyticsQueue, MemoryAnalyticsSink};
use tollgate_policy::StaticPolicyEvaluator;
use tollgate_state_memory::MemoryStateStore;
use tollgate_wallet::Wallet;

use crate::auth::build_api_key_table;
use crate::config::ServerConfig;
use crate::ratelimit::RateLimiter;
use crate::state::AppState;

/// Assemble the application state from configuration.
///
/// Wallet seeds must list parents before children so the materialized
/// ancestor paths can be derived at creation time.
pub async fn build_state(config: ServerConfig) -> Result<AppState, String> {
    let store = Arc::new(MemoryStateStore::new());
    let secrets: Arc<dyn SecretStore> = Arc::new(EnvSecretStore::new());

    let mut builder = GatewayBuilder::new(Arc::clone(&store) as _)
        .with_ledger(Arc::new(LedgerWriter::new(Arc::new(MemoryLedgerStore::new()))))
        .with_scan_policy(config.scan_policy.clone())
        .with_rules(config.rules.clone())
        .with_policy(Arc::new(
            StaticPolicyEvaluator::new(config.policy_rules.clone())
                .with_fail_open(config.policy_fail_open),
        ));

    for connector_config in &config.connectors {
        let connector: Arc<dyn ChatConnector> = match connector_config.kind {
            ConnectorKind::OpenAi | ConnectorKind::OpenAiCompatible => Arc::new(
                OpenAiConnector::new(connector_config.clone(), Arc::clone(&secrets))
                    .map_err(|e| connector_error(&connector_config.id, &e))?,
            ),
            ConnectorKind::Anthropic => Arc::new(
                AnthropicConnector::new(connector_config.clone(), Arc::clone(&secrets))
                    .map_err(|e| connector_error(&connector_config.id, &e))?,
            ),
        };
        builder = builder.with_connector(connector);
    }

    for tenant in &config.tenants {
        builder = builder.with_tenant(tenant.clone());
    }

    if config.cache.enabled {
        let endpoint = config
            .cache
            .endpoint
            .clone()
            .ok_or("cache.endpoint required when cache is enabled")?;
        let model = config
            .cache
            .model
            .clone()
            .ok_or("cache.model required when cache is enabled")?;
        let key_ref = config
            .cache
            .key_ref
            .clone()
            .ok_or("cache.key_ref required when cache is enabled")?;
        let api_key = secrets
            .resolve(&key_ref)
            .await
            .map_err(|e| format!("resolving cache key: {e}"))?;
        let embedder = Arc::new(
            HttpEmbeddingProvider::new(endpoint, model, api_key, Duration::from_secs(10))
                .map_err(|e| format!("building embedder: {e}"))?,
        );
        builder = builder
            .with_cache(Arc::new(SemanticCache::new(Arc::clone(&embedder) as _)))
            .with_embedder(embedder);
    }

    let analytics = Arc::new(MemoryAnalyticsSink::new());
    let queue = BoundedAnalyticsQueue::spawn(
        Arc::clone(&analytics) as Arc<dyn AnalyticsSink>,
        config.analytics_buffer,
    );
    builder = builder.with_analytics(queue);

    let gateway = Arc::new(builder.build());

    // Seed the budget tree, parents first.
    let mut created: HashMap<String, Wallet> = HashMap::new();
    for seed in &config.wallets {
        let wallet = match &seed.parent {
            None => Wallet::root(seed.tenant.as_str(), seed.id.as_str(), seed.hard_limit),
            Some(parent_id) => {
                let parent = created
                    .get(parent_id)
                    .ok_or_else(|| format!("wallet {} lists unknown parent {parent_id}", seed.id))?;
                Wallet::child_of(parent, seed.id.as_str(), seed.kind, seed.hard_limit)
            }
        };
        let wallet = wallet
            .with_overdraft(seed.overdraft)
            .with_soft_thresholds(seed.soft_thresholds.clone());
        created.insert(seed.id.clone(), wallet.clone());
        gateway
            .wallets()
            .create(wallet)
            .await
            .map_err(|e| format!("seeding wallet {}: {e}", seed.id))?;
    }
    info!(
        wallets = config.wallets.len(),
        connectors = config.connectors.len(),
        "gateway assembled"
    );

    spawn_background_jobs(&gateway, &config);

    Ok(AppState {
        gateway,
        limiter: Arc::new(RateLimiter::new(store, config.rate_limit.clone())),
        api_keys: Arc::new(build_api_key_table(&config.auth)),
        analytics,
        default_timeout: Duration::from_secs(config.default_timeout_seconds),
    })
}

fn connector_error(id: &tollgate_core::ConnectorId, error: &ConnectorError) -> String {
    format!("building connector {id}: {error}")
}

/// Interval between health probes of unhealthy connectors.
const PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Interval between wallet period-boundary checks.
const RESET_CHECK_INTERVAL: Duration = Duration::from_secs(3_600);

/// Spawn the probe loop and the wallet reset scheduler. Both are bound to
/// the process lifetime; their failures are logged and never fatal.
fn spawn_background_jobs(
    gateway: &std::sync::Arc<tollgate_gateway::Gateway>,
    config: &ServerConfig,
) {
    let prober = std::sync::Arc::clone(gateway);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROBE_INTERVAL);
        loop {
            interval.tick().await;
            prober.run_probes().await;
        }
    });

    let resetter = std::sync::Arc::clone(gateway);
    let seeded: Vec<(tollgate_core::TenantId, tollgate_core::WalletId)> = config
        .wallets
        .iter()
        .map(|seed| {
            (
                tollgate_core::TenantId::new(seed.tenant.as_str()),
                tollgate_core::WalletId::new(seed.id.as_str()),
            )
        })
        .collect();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RESET_CHECK_INTERVAL);
        loop {
            interval.tick().await;
            for (tenant, wallet_id) in &seeded {
                let due = match resetter.wallets().load(tenant, wallet_id).await {
                    Ok((wallet, _)) => wallet.reset_due(chrono::Utc::now()),
                    Err(e) => {
                        tracing::warn!(wallet = %wallet_id, error = %e, "reset check failed");
                        false
                    }
                };
                if due {
                    match resetter.reset_wallet(tenant, wallet_id).await {
                        Ok(reset) => info!(
                            wallet = %wallet_id,
                            previous_spent = reset.previous_spent,
                            "wallet period reset"
                        ),
                        Err(e) => {
                            tracing::warn!(wallet = %wallet_id, error = %e, "wallet reset failed");
                        }
                    }
                }
            }
        }
    });
}
