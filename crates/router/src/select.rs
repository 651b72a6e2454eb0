use tollgate_core::{ConnectorConfig, ConnectorId, HealthState, RoutingStrategy, Tenant};

use crate::health::HealthRegistry;

/// A connector surviving the filter pipeline, with the figures the
/// ordering strategies compare.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub connector: ConnectorId,
    pub priority: u32,
    /// Combined input+output price per 1 000 tokens for the resolved model.
    pub unit_price: u64,
    pub p95_latency_us: u64,
    pub health: HealthState,
}

/// Build the ordered failover chain for a model.
///
/// Filters: residency, capability (model + streaming), health (never
/// `down`). Survivors are ordered by the requested strategy; the head is
/// the primary, the tail the failover chain.
#[must_use]
pub fn build_failover_chain(
    model: &str,
    needs_streaming: bool,
    tenant: &Tenant,
    connectors: &[ConnectorConfig],
    health: &HealthRegistry,
    strategy: RoutingStrategy,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = connectors
        .iter()
        .filter(|c| tenant.residency_allows(&c.regions))
        .filter(|c| c.supports(model, needs_streaming))
        .filter_map(|c| {
            let state = health.state(&c.id);
            if !state.dispatchable() {
                return None;
            }
            let spec = c.model(model)?;
            Some(Candidate {
                connector: c.id.clone(),
                priority: c.priority,
                unit_price: spec.input_price + spec.output_price,
                p95_latency_us: health.p95_latency_us(&c.id),
                health: state,
            })
        })
        .collect();

    match strategy {
        RoutingStrategy::CostOptimized => {
            candidates.sort_by_key(|c| (c.unit_price, c.p95_latency_us));
        }
        RoutingStrategy::LatencyOptimized => {
            candidates.sort_by_key(|c| c.p95_latency_us);
        }
        RoutingStrategy::Priority => {
            candidates.sort_by_key(|c| (c.priority, health_rank(c.health)));
        }
    }

    candidates
}

fn health_rank(state: HealthState) -> u8 {
    match state {
        HealthState::Healthy => 0,
        HealthState::Degraded => 1,
        HealthState::Down => 2,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tollgate_core::{ConnectorKind, ModelCapabilities, ModelSpec, RateBudget};

    use super::*;

    fn connector(id: &str, priority: u32, regions: &[&str], input: u64, output: u64) -> ConnectorConfig {
        let mut models = HashMap::new();
        models.insert(
            "gpt-4o".to_owned(),
            ModelSpec {
                input_price: input,
                output_price: output,
                context_window: 128_000,
                capabilities: ModelCapabilities {
                    streaming: true,
                    ..Default::default()
                },
            },
        );
        ConnectorConfig {
            id: ConnectorId::new(id),
            kind: ConnectorKind::OpenAi,
            base_url: format!("https://{id}.example.com/v1"),
            key_ref: format!("env:{}", id.to_uppercase()),
            models,
            priority,
            regions: regions.iter().map(|r| (*r).to_owned()).collect(),
            rate_budget: RateBudget::default(),
            timeout_seconds: 120,
        }
    }

    fn connectors() -> Vec<ConnectorConfig> {
        vec![
            connector("primary", 0, &["us"], 2_500, 10_000),
            connector("fallback", 1, &["us", "eu"], 2_000, 8_000),
            connector("eu-only", 2, &["eu"], 1_000, 4_000),
        ]
    }

    #[test]
    fn priority_strategy_orders_by_priority() {
        let chain = build_failover_chain(
            "gpt-4o",
            false,
            &Tenant::new("t"),
            &connectors(),
            &HealthRegistry::default(),
            RoutingStrategy::Priority,
        );
        let ids: Vec<&str> = chain.iter().map(|c| c.connector.as_str()).collect();
        assert_eq!(ids, vec!["primary", "fallback", "eu-only"]);
    }

    #[test]
    fn cost_strategy_orders_by_price() {
        let chain = build_failover_chain(
            "gpt-4o",
            false,
            &Tenant::new("t"),
            &connectors(),
            &HealthRegistry::default(),
            RoutingStrategy::CostOptimized,
        );
        let ids: Vec<&str> = chain.iter().map(|c| c.connector.as_str()).collect();
        assert_eq!(ids, vec!["eu-only", "fallback", "primary"]);
    }

    #[test]
    fn residency_filters_connectors() {
        let mut tenant = Tenant::new("t");
        tenant.residency_regions = vec!["eu".into()];
        let chain = build_failover_chain(
            "gpt-4o",
            false,
            &tenant,
            &connectors(),
            &HealthRegistry::default(),
            RoutingStrategy::Priority,
        );
        let ids: Vec<&str> = chain.iter().map(|c| c.connector.as_str()).collect();
        assert_eq!(ids, vec!["fallback", "eu-only"]);
    }

    #[test]
    fn down_connectors_excluded() {
        let health = HealthRegistry::default();
        let tracker = health.tracker(&ConnectorId::new("primary"));
        for _ in 0..10 {
            tracker.record_server_error();
        }

        let chain = build_failover_chain(
            "gpt-4o",
            false,
            &Tenant::new("t"),
            &connectors(),
            &health,
            RoutingStrategy::Priority,
        );
        let ids: Vec<&str> = chain.iter().map(|c| c.connector.as_str()).collect();
        assert_eq!(ids, vec!["fallback", "eu-only"]);
    }

    #[test]
    fn degraded_sorts_after_healthy_same_priority() {
        let health = HealthRegistry::default();
        let configs = vec![
            connector("a", 0, &["us"], 1, 1),
            connector("b", 0, &["us"], 1, 1),
        ];
        let tracker = health.tracker(&ConnectorId::new("a"));
        for _ in 0..3 {
            tracker.record_server_error();
        }

        let chain = build_failover_chain(
            "gpt-4o",
            false,
            &Tenant::new("t"),
            &configs,
            &health,
            RoutingStrategy::Priority,
        );
        let ids: Vec<&str> = chain.iter().map(|c| c.connector.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"], "degraded after healthy");
    }

    #[test]
    fn degraded_only_still_dispatches() {
        let health = HealthRegistry::default();
        let configs = vec![connector("only", 0, &["us"], 1, 1)];
        let tracker = health.tracker(&ConnectorId::new("only"));
        for _ in 0..3 {
            tracker.record_server_error();
        }

        let chain = build_failover_chain(
            "gpt-4o",
            false,
            &Tenant::new("t"),
            &configs,
            &health,
            RoutingStrategy::Priority,
        );
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].health, HealthState::Degraded);
    }

    #[test]
    fn unknown_model_yields_empty_chain() {
        let chain = build_failover_chain(
            "claude-sonnet",
            false,
            &Tenant::new("t"),
            &connectors(),
            &HealthRegistry::default(),
            RoutingStrategy::Priority,
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn streaming_capability_filter() {
        let mut config = connector("no-stream", 0, &["us"], 1, 1);
        if let Some(spec) = config.models.get_mut("gpt-4o") {
            spec.capabilities.streaming = false;
        }
        let chain = build_failover_chain(
            "gpt-4o",
            true,
            &Tenant::new("t"),
            &[config],
            &HealthRegistry::default(),
            RoutingStrategy::Priority,
        );
        assert!(chain.is_empty());
    }
}
