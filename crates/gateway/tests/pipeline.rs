//! End-to-end pipeline tests over in-memory seams and scripted connectors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tollgate_cache::{MockEmbeddingProvider, SemanticCache};
use tollgate_connector::{MockConnector, ScriptedCall, ScriptedFailure};
use tollgate_core::{
    ChatMessage, ChatRequest, GatewayError, GatewayOptions, RequestContext, RoutingRule,
    RuleAction, RuleCondition, Tenant, TenantId, Usage, WalletId,
};
use tollgate_gateway::{ChatReply, Gateway, GatewayBuilder};
use tollgate_ledger::{LedgerQuery, LedgerRecord};
use tollgate_policy::{
    DetectionKind, IncidentStore, MemoryIncidentStore, ScanPolicy, ScanPolicyAction,
    StaticPolicyEvaluator, StaticPolicyRule,
};
use tollgate_state_memory::MemoryStateStore;
use tollgate_wallet::Wallet;

fn tenant_id() -> TenantId {
    TenantId::new("t1")
}

fn wallet_id() -> WalletId {
    WalletId::new("u1-wallet")
}

fn ctx() -> RequestContext {
    RequestContext::new("t1", "u1", "u1-wallet", "gpt-4o")
}

fn request(stream: bool) -> ChatRequest {
    let mut request = ChatRequest::new("gpt-4o", vec![ChatMessage::new("user", "hi!")]);
    request.stream = stream;
    request
}

async fn seed_wallet(gateway: &Gateway, limit: u64, spent: u64) {
    let mut wallet = Wallet::root(tenant_id(), wallet_id(), limit);
    wallet.spent = spent;
    gateway.wallets().create(wallet).await.unwrap();
}

async fn ledger_records(gateway: &Gateway, min: usize) -> Vec<LedgerRecord> {
    // Streaming settlement runs on a spawned task; poll briefly.
    for _ in 0..100 {
        let page = gateway
            .ledger()
            .store()
            .query(&LedgerQuery {
                tenant: Some(tenant_id()),
                ..Default::default()
            })
            .await
            .unwrap();
        if page.records.len() >= min {
            return page.records;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("ledger never reached {min} records");
}

// -- scenario: simple chat completion ----------------------------------------

#[tokio::test]
async fn simple_completion_settles_wallet_and_ledger() {
    let connector = Arc::new(MockConnector::new("primary"));
    connector.push(ScriptedCall::Complete(MockConnector::response(
        "gpt-4o",
        "hello!",
        Usage::new(10, 5),
    )));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(connector)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let reply = gateway
        .handle_chat(ctx(), request(false), CancellationToken::new())
        .await
        .unwrap();

    let ChatReply::Complete(response) = reply else {
        panic!("expected complete reply");
    };
    let augmentation = response.tollgate.as_ref().unwrap();
    // gpt-4o at 2500/10000 micro-units per 1k: 10 in + 5 out = 25 + 50.
    assert_eq!(augmentation.cost, 75);
    assert!(!augmentation.cache_hit);
    assert_eq!(augmentation.provider_used, "primary");
    assert_eq!(augmentation.model_used, "gpt-4o");

    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.spent, 75);
    assert_eq!(wallet.reserved, 0);

    let records = ledger_records(&gateway, 1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cost, 75);
    assert!(!records[0].cache_hit);
    assert_eq!(records[0].correlation_id.as_str(), augmentation.request_id);
}

// -- scenario: streaming with client disconnect ------------------------------

#[tokio::test]
async fn stream_client_disconnect_bills_sent_tokens() {
    let connector = Arc::new(MockConnector::new("primary"));
    // 100 content events, 4 chars each (1 token under the estimate); enough
    // that the outbound channel buffer cannot absorb the whole stream.
    let pieces: Vec<String> = (0..100).map(|i| format!("c{i:02} ")).collect();
    let refs: Vec<&str> = pieces.iter().map(String::as_str).collect();
    connector.push(ScriptedCall::Stream {
        chunks: MockConnector::chunks("gpt-4o", &refs, None),
        fail_mid_stream: false,
    });
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(connector)
        .build();
    seed_wallet(&gateway, 1_000_000, 0).await;

    let reply = gateway
        .handle_chat(ctx(), request(true), CancellationToken::new())
        .await
        .unwrap();
    let ChatReply::Stream { mut chunks, .. } = reply else {
        panic!("expected stream reply");
    };

    // Forward 20 events to the "client", then disconnect.
    for _ in 0..20 {
        chunks.recv().await.expect("chunk");
    }
    drop(chunks);

    let records = ledger_records(&gateway, 1).await;
    assert_eq!(records[0].finish_reason.as_deref(), Some("client_disconnect"));
    // Billed tokens cover what was actually forwarded: at least the 20
    // consumed events, at most those plus the channel buffer.
    assert!(records[0].output_tokens >= 20, "billed {}", records[0].output_tokens);
    assert!(records[0].output_tokens < 100, "billed {}", records[0].output_tokens);

    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.reserved, 0, "reservation settled");
    assert_eq!(wallet.spent, records[0].cost);
}

#[tokio::test]
async fn stream_completion_settles_with_authoritative_usage() {
    let connector = Arc::new(MockConnector::new("primary"));
    connector.push(ScriptedCall::Stream {
        chunks: MockConnector::chunks("gpt-4o", &["Hello", " world"], Some(Usage::new(12, 7))),
        fail_mid_stream: false,
    });
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(connector)
        .build();
    seed_wallet(&gateway, 1_000_000, 0).await;

    let reply = gateway
        .handle_chat(ctx(), request(true), CancellationToken::new())
        .await
        .unwrap();
    let ChatReply::Stream { mut chunks, .. } = reply else {
        panic!("expected stream reply");
    };
    while chunks.recv().await.is_some() {}

    let records = ledger_records(&gateway, 1).await;
    assert_eq!(records[0].finish_reason.as_deref(), Some("stop"));
    // The provider's usage event supersedes the running estimate.
    assert_eq!(records[0].input_tokens, 12);
    assert_eq!(records[0].output_tokens, 7);
}

#[tokio::test]
async fn stream_mid_error_seals_partial_response() {
    let connector = Arc::new(MockConnector::new("primary"));
    connector.push(ScriptedCall::Stream {
        chunks: MockConnector::chunks("gpt-4o", &["part"], None),
        fail_mid_stream: true,
    });
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(connector)
        .build();
    seed_wallet(&gateway, 1_000_000, 0).await;

    let reply = gateway
        .handle_chat(ctx(), request(true), CancellationToken::new())
        .await
        .unwrap();
    let ChatReply::Stream { mut chunks, .. } = reply else {
        panic!("expected stream reply");
    };
    while chunks.recv().await.is_some() {}

    let records = ledger_records(&gateway, 1).await;
    assert_eq!(records[0].finish_reason.as_deref(), Some("error"));
    assert_eq!(records[0].error_code.as_deref(), Some("upstream_error"));
    assert!(records[0].output_tokens >= 1, "partial tokens billed");
}

// -- scenario: cost-optimized reroute ----------------------------------------

#[tokio::test]
async fn utilization_rule_reroutes_to_cheaper_model() {
    let connector = Arc::new(MockConnector::new("primary"));
    connector.push(ScriptedCall::Complete(MockConnector::response(
        "gpt-4o-mini",
        "cheap answer",
        Usage::new(10, 5),
    )));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(connector)
        .with_rules(vec![RoutingRule {
            id: "downgrade-hot-growth".into(),
            priority: 10,
            active: true,
            dry_run: false,
            condition: RuleCondition::All {
                conditions: vec![
                    RuleCondition::Team {
                        team: "growth".into(),
                    },
                    RuleCondition::WalletUtilization {
                        at_least_percent: 80,
                    },
                ],
            },
            action: RuleAction::RerouteToModel {
                model: "gpt-4o-mini".into(),
            },
            experiment: None,
        }])
        .build();
    // 85% utilized with headroom left for the reservation itself.
    seed_wallet(&gateway, 100_000, 85_000).await;

    let reply = gateway
        .handle_chat(
            ctx().with_team("growth"),
            request(false),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let ChatReply::Complete(response) = reply else {
        panic!("expected complete reply");
    };
    let augmentation = response.tollgate.as_ref().unwrap();
    assert_eq!(augmentation.model_used, "gpt-4o-mini");
    assert_eq!(augmentation.model_requested, "gpt-4o");
    assert!(augmentation.routing_reason.contains("downgrade-hot-growth"));

    let records = ledger_records(&gateway, 1).await;
    assert_eq!(records[0].model_requested, "gpt-4o");
    assert_eq!(records[0].model_used, "gpt-4o-mini");
}

// -- scenario: failover on rate limit ----------------------------------------

#[tokio::test]
async fn rate_limited_primary_fails_over() {
    let primary = Arc::new(MockConnector::new("primary").with_priority(0));
    primary.push(ScriptedCall::Fail(ScriptedFailure::RateLimited));
    let fallback = Arc::new(MockConnector::new("fallback").with_priority(1));
    fallback.push(ScriptedCall::Complete(MockConnector::response(
        "gpt-4o",
        "served by fallback",
        Usage::new(10, 5),
    )));

    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&primary) as _)
        .with_connector(Arc::clone(&fallback) as _)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let reply = gateway
        .handle_chat(ctx(), request(false), CancellationToken::new())
        .await
        .unwrap();
    let ChatReply::Complete(response) = reply else {
        panic!("expected complete reply");
    };
    assert_eq!(response.tollgate.as_ref().unwrap().provider_used, "fallback");
    assert_eq!(primary.call_count(), 1);
    assert_eq!(fallback.call_count(), 1);

    let records = ledger_records(&gateway, 1).await;
    assert_eq!(records[0].failover_count, 1);
    assert_eq!(gateway.metrics().snapshot().failovers, 1);
}

#[tokio::test]
async fn server_errors_retry_then_advance() {
    let primary = Arc::new(MockConnector::new("primary").with_priority(0));
    // Initial try + three retries on the same connector, then advance.
    for _ in 0..4 {
        primary.push(ScriptedCall::Fail(ScriptedFailure::Server(500)));
    }
    let fallback = Arc::new(MockConnector::new("fallback").with_priority(1));

    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&primary) as _)
        .with_connector(Arc::clone(&fallback) as _)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let reply = gateway
        .handle_chat(ctx(), request(false), CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(reply, ChatReply::Complete(_)));
    assert_eq!(primary.call_count(), 4);
    assert_eq!(fallback.call_count(), 1);
}

#[tokio::test]
async fn exhausted_chain_returns_upstream_exhausted() {
    let only = Arc::new(MockConnector::new("only"));
    only.push(ScriptedCall::Fail(ScriptedFailure::Timeout));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&only) as _)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let err = gateway
        .handle_chat(ctx(), request(false), CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        GatewayError::UpstreamExhausted { connector, .. } => assert_eq!(connector, "only"),
        other => panic!("unexpected error: {other}"),
    }

    // Failed dispatch releases the reservation.
    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.reserved, 0);
    assert_eq!(wallet.spent, 0);

    let records = ledger_records(&gateway, 1).await;
    assert_eq!(records[0].error_code.as_deref(), Some("upstream_exhausted"));
}

// -- scenario: PII redaction -------------------------------------------------

#[tokio::test]
async fn email_redacted_before_upstream() {
    let connector = Arc::new(MockConnector::new("primary"));
    let incidents = Arc::new(MemoryIncidentStore::new());
    let mut scan_policy = ScanPolicy::default();
    scan_policy
        .actions
        .insert(DetectionKind::Email, ScanPolicyAction::Redact);

    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .with_scan_policy(scan_policy)
        .with_incidents(Arc::clone(&incidents) as Arc<dyn IncidentStore>)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let mut req = request(false);
    req.messages = vec![ChatMessage::new("user", "Email me at alice@example.com")];
    let reply = gateway
        .handle_chat(ctx(), req, CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(reply, ChatReply::Complete(_)));

    let seen = connector.requests();
    assert_eq!(seen[0].messages[0].content, "Email me at [EMAIL_1]");

    let recorded = incidents.for_tenant("t1");
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].kind, DetectionKind::Email);
    let serialized = serde_json::to_string(&recorded[0]).unwrap();
    assert!(!serialized.contains("alice@example.com"), "no content stored");
}

#[tokio::test]
async fn secret_block_rejects_request() {
    let connector = Arc::new(MockConnector::new("primary"));
    let mut scan_policy = ScanPolicy::default();
    scan_policy
        .actions
        .insert(DetectionKind::Secret, ScanPolicyAction::Block);

    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .with_scan_policy(scan_policy)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let mut req = request(false);
    req.messages = vec![ChatMessage::new(
        "user",
        "use sk-abcdefghijklmnopqrstuvwx please",
    )];
    let err = gateway
        .handle_chat(ctx(), req, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::SecurityViolation(_)));
    assert_eq!(connector.call_count(), 0, "never dispatched");
}

// -- scenario: wallet exhaustion and concurrency -----------------------------

#[tokio::test]
async fn wallet_exhausted_consumes_nothing() {
    let connector = Arc::new(MockConnector::new("primary"));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .build();
    seed_wallet(&gateway, 1, 0).await;

    let err = gateway
        .handle_chat(ctx(), request(false), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::WalletExhausted(_)));
    assert_eq!(connector.call_count(), 0);

    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.spent, 0);
    assert_eq!(wallet.reserved, 0);

    // Exactly one rejection entry, nothing more.
    let records = ledger_records(&gateway, 1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_code.as_deref(), Some("wallet_exhausted"));
    assert_eq!(records[0].cost, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_overspend() {
    let connector = Arc::new(MockConnector::new("primary"));
    let gateway = Arc::new(
        GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
            .with_connector(Arc::clone(&connector) as _)
            .build(),
    );
    // Room for only a few of the concurrent reservations.
    let limit = 6_000;
    seed_wallet(&gateway, limit, 0).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let gateway = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move {
            gateway
                .handle_chat(ctx(), request(false), CancellationToken::new())
                .await
        }));
    }

    let mut successes = 0;
    let mut rejections = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(GatewayError::WalletExhausted(_)) => rejections += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes + rejections, 10);
    assert!(successes >= 1);

    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.reserved, 0, "all reservations settled");
    assert!(wallet.spent <= limit, "spent {} over limit", wallet.spent);
    // Every success costs exactly 75 (mock usage at gpt-4o prices).
    assert_eq!(wallet.spent, successes * 75);
}

// -- scenario: semantic cache ------------------------------------------------

fn cached_tenant() -> Tenant {
    let mut tenant = Tenant::new("t1");
    tenant.cache.enabled = true;
    tenant
}

#[tokio::test]
async fn identical_request_twice_dispatches_once() {
    let connector = Arc::new(MockConnector::new("primary"));
    connector.push(ScriptedCall::Complete(MockConnector::response(
        "gpt-4o",
        "fresh answer",
        Usage::new(10, 5),
    )));
    let embedder = Arc::new(MockEmbeddingProvider::new(vec![1.0, 0.0]));
    let cache = Arc::new(SemanticCache::new(embedder as _));

    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .with_cache(cache)
        .with_tenant(cached_tenant())
        .build();
    seed_wallet(&gateway, 100_000, 0).await;

    let mut req = request(false);
    req.tollgate = Some(GatewayOptions {
        cache: Some(true),
        ..Default::default()
    });

    let first = gateway
        .handle_chat(ctx(), req.clone(), CancellationToken::new())
        .await
        .unwrap();
    let ChatReply::Complete(first) = first else {
        panic!("expected complete");
    };
    assert!(!first.tollgate.as_ref().unwrap().cache_hit);

    let second = gateway
        .handle_chat(ctx(), req, CancellationToken::new())
        .await
        .unwrap();
    let ChatReply::Complete(second) = second else {
        panic!("expected complete");
    };
    let augmentation = second.tollgate.as_ref().unwrap();
    assert!(augmentation.cache_hit);
    assert!(augmentation.cache_similarity.unwrap() >= 0.97);
    assert_eq!(augmentation.cost, 0);
    assert_eq!(connector.call_count(), 1, "one upstream dispatch");

    let records = ledger_records(&gateway, 2).await;
    assert!(records.iter().any(|r| r.cache_hit));

    // The cache hit released its reservation: spent reflects one dispatch.
    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.spent, 75);
    assert_eq!(wallet.reserved, 0);
}

// -- scenario: policy reroute for classified data ----------------------------

#[tokio::test]
async fn classified_requests_use_required_model() {
    let connector = Arc::new(MockConnector::new("primary"));
    connector.push(ScriptedCall::Complete(MockConnector::response(
        "gpt-4o-mini",
        "on approved model",
        Usage::new(5, 5),
    )));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .with_policy(Arc::new(StaticPolicyEvaluator::new(vec![StaticPolicyRule {
            id: "restricted-approved-models".into(),
            classification: "restricted".into(),
            required_model: Some("gpt-4o-mini".into()),
        }])))
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let reply = gateway
        .handle_chat(
            ctx().with_data_classification("restricted"),
            request(false),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let ChatReply::Complete(response) = reply else {
        panic!("expected complete");
    };
    let augmentation = response.tollgate.as_ref().unwrap();
    assert_eq!(augmentation.model_used, "gpt-4o-mini");
    assert!(augmentation.routing_reason.starts_with("policy:"));
    assert!(augmentation
        .policy_actions
        .iter()
        .any(|a| a.contains("restricted-approved-models")));
}

// -- dry-run and cancellation ------------------------------------------------

#[tokio::test]
async fn dry_run_skips_dispatch_and_wallet() {
    let connector = Arc::new(MockConnector::new("primary"));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let mut req = request(false);
    req.tollgate = Some(GatewayOptions {
        dry_run: true,
        ..Default::default()
    });
    let reply = gateway
        .handle_chat(ctx(), req, CancellationToken::new())
        .await
        .unwrap();
    let ChatReply::Complete(response) = reply else {
        panic!("expected complete");
    };
    assert!(response.choices.is_empty());
    assert_eq!(response.tollgate.as_ref().unwrap().provider_used, "primary");
    assert_eq!(connector.call_count(), 0);

    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.spent, 0);
    assert_eq!(wallet.reserved, 0);
}

#[tokio::test]
async fn cancellation_before_dispatch_releases_reservation() {
    let connector = Arc::new(MockConnector::new("primary"));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = gateway
        .handle_chat(ctx(), request(false), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout));

    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.reserved, 0, "full reservation released");
    assert_eq!(wallet.spent, 0);
}

// -- probes and resets --------------------------------------------------------

#[tokio::test]
async fn probes_recover_a_down_connector() {
    let connector = Arc::new(MockConnector::new("flaky"));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .build();

    // Drive the connector down.
    let tracker = gateway
        .health()
        .tracker(&tollgate_core::ConnectorId::new("flaky"));
    for _ in 0..10 {
        tracker.record_server_error();
    }
    assert_eq!(
        gateway.health().state(&tollgate_core::ConnectorId::new("flaky")),
        tollgate_core::HealthState::Down
    );

    // First successful probe: down -> degraded; four more: -> healthy.
    for _ in 0..5 {
        gateway.run_probes().await;
    }
    assert_eq!(
        gateway.health().state(&tollgate_core::ConnectorId::new("flaky")),
        tollgate_core::HealthState::Healthy
    );
}

#[tokio::test]
async fn wallet_reset_appends_audit_record() {
    let connector = Arc::new(MockConnector::new("primary"));
    connector.push(ScriptedCall::Complete(MockConnector::response(
        "gpt-4o",
        "x",
        Usage::new(10, 5),
    )));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(connector)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    gateway
        .handle_chat(ctx(), request(false), CancellationToken::new())
        .await
        .unwrap();

    let reset = gateway.reset_wallet(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(reset.previous_spent, 75);

    let (wallet, _) = gateway.wallets().load(&tenant_id(), &wallet_id()).await.unwrap();
    assert_eq!(wallet.spent, 0);
    assert!(wallet.last_reset_at.is_some());

    let records = ledger_records(&gateway, 2).await;
    assert!(records
        .iter()
        .any(|r| r.routing_reason == "wallet-reset"));
}

// -- routing misc -------------------------------------------------------------

#[tokio::test]
async fn unknown_model_is_unavailable() {
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::new(MockConnector::new("primary")) as _)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let mut req = request(false);
    req.model = "unknown-model".into();
    let mut context = ctx();
    context.requested_model = "unknown-model".into();
    let err = gateway
        .handle_chat(context, req, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn fallback_models_rescue_unknown_primary() {
    let connector = Arc::new(MockConnector::new("primary"));
    let gateway = GatewayBuilder::new(Arc::new(MemoryStateStore::new()))
        .with_connector(Arc::clone(&connector) as _)
        .build();
    seed_wallet(&gateway, 10_000, 0).await;

    let mut req = request(false);
    req.model = "unknown-model".into();
    req.tollgate = Some(GatewayOptions {
        fallback_models: vec!["gpt-4o-mini".into()],
        ..Default::default()
    });
    let mut context = ctx();
    context.requested_model = "unknown-model".into();

    let reply = gateway
        .handle_chat(context, req, CancellationToken::new())
        .await
        .unwrap();
    let ChatReply::Complete(response) = reply else {
        panic!("expected complete");
    };
    let augmentation = response.tollgate.as_ref().unwrap();
    assert_eq!(augmentation.model_used, "gpt-4o-mini");
    assert!(augmentation.routing_reason.starts_with("fallback:"));
}
