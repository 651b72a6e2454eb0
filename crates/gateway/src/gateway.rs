use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use tollgate_cache::{EmbeddingProvider, SemanticCache};
use tollgate_connector::{ChatConnector, ChatOutcome, ConnectorError, ConnectorRegistry};
use tollgate_core::{
    ChatRequest, ChatResponse, ConnectorId, GatewayError, GatewayOptions, ModelSpec,
    RequestContext, ResponseAugmentation, Tenant, Usage,
};
use tollgate_ledger::{LedgerDraft, LedgerWriter};
use tollgate_metering::{cost_for, estimate_request_tokens, estimate_tokens, AnalyticsEvent, AnalyticsSink};
use tollgate_policy::{
    evaluate_with_deadline, Incident, IncidentStore, PolicyDecision, PolicyEvaluator,
    PolicyOutcome, RedactionPass, ScanPolicy, ScanPolicyAction, ScanReport, SecurityScanner,
};
use tollgate_router::{
    backoff_delay, build_failover_chain, Candidate, HealthRegistry, RouteVerdict, RuleEngine,
    MAX_SAME_CONNECTOR_RETRIES,
};
use tollgate_wallet::{Reservation, WalletError, WalletService};

use crate::metrics::GatewayMetrics;
use crate::reply::{ChatReply, HeldRequest};
use crate::streaming::{relay_stream, RelayContext};

/// Output token allowance assumed when the client does not cap
/// `max_tokens`, for reservation sizing only.
const DEFAULT_OUTPUT_ALLOWANCE: u64 = 256;

/// Fallback pricing for models no registered connector advertises; routing
/// will reject such requests before dispatch, so this only sizes the
/// reservation that is then released.
fn fallback_spec() -> ModelSpec {
    ModelSpec {
        input_price: 1_000,
        output_price: 4_000,
        context_window: 8_192,
        capabilities: tollgate_core::ModelCapabilities::default(),
    }
}

/// The central orchestrator for the request path.
///
/// The pipeline for each chat request:
/// 1. Security scan (redact / block / quarantine) and incident recording.
/// 2. External policy evaluation with a deadline (deny / redact / reroute).
/// 3. Wallet precheck against the minimum cost estimate.
/// 4. Routing rules, then residency/capability/health filtering into a
///    primary connector plus failover chain.
/// 5. Atomic wallet reservation.
/// 6. Semantic cache lookup (opt-in, never for policy-flagged requests).
/// 7. Dispatch with in-request failover.
/// 8. Settlement: wallet commit, then ledger append, then analytics, then
///    cache population.
pub struct Gateway {
    pub(crate) tenants: RwLock<HashMap<String, Tenant>>,
    pub(crate) wallets: Arc<WalletService>,
    pub(crate) ledger: Arc<LedgerWriter>,
    pub(crate) scanner: SecurityScanner,
    pub(crate) scan_policy: RwLock<ScanPolicy>,
    pub(crate) incidents: Arc<dyn IncidentStore>,
    pub(crate) policy: Arc<dyn PolicyEvaluator>,
    pub(crate) policy_deadline: Duration,
    pub(crate) rules: RwLock<RuleEngine>,
    pub(crate) registry: Arc<ConnectorRegistry>,
    pub(crate) health: Arc<HealthRegistry>,
    pub(crate) cache: Option<Arc<SemanticCache>>,
    pub(crate) embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub(crate) embedding_price: u64,
    pub(crate) analytics: Arc<dyn AnalyticsSink>,
    pub(crate) metrics: Arc<GatewayMetrics>,
    pub(crate) held: Mutex<Vec<HeldRequest>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("connectors", &self.registry.ids())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// The gateway's metric counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// The ledger writer, for queries and chain verification.
    #[must_use]
    pub fn ledger(&self) -> &Arc<LedgerWriter> {
        &self.ledger
    }

    /// The wallet service, for the balance endpoint and admin operations.
    #[must_use]
    pub fn wallets(&self) -> &Arc<WalletService> {
        &self.wallets
    }

    /// The connector health registry.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Resolve a tenant; unknown tenants get default settings.
    #[must_use]
    pub fn tenant(&self, id: &str) -> Tenant {
        self.tenants
            .read()
            .get(id)
            .cloned()
            .unwrap_or_else(|| Tenant::new(id))
    }

    /// Create or update a tenant.
    pub fn upsert_tenant(&self, tenant: Tenant) {
        self.tenants.write().insert(tenant.id.to_string(), tenant);
    }

    /// Replace the routing rule set (admin endpoint).
    pub fn replace_rules(&self, rules: Vec<tollgate_core::RoutingRule>) {
        self.rules.write().replace(rules);
    }

    /// Replace the security-scan policy (admin endpoint).
    pub fn replace_scan_policy(&self, policy: ScanPolicy) {
        *self.scan_policy.write() = policy;
    }

    /// The current security-scan policy.
    #[must_use]
    pub fn scan_policy(&self) -> ScanPolicy {
        self.scan_policy.read().clone()
    }

    /// Current routing rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> Vec<tollgate_core::RoutingRule> {
        self.rules.read().rules().to_vec()
    }

    /// Requests currently parked for review.
    #[must_use]
    pub fn held_requests(&self) -> Vec<HeldRequest> {
        self.held.lock().clone()
    }

    /// Minimum-cost estimate for reservation sizing: cheapest advertised
    /// spec for the model, input estimate plus the output allowance.
    fn estimate_cost(&self, model: &str, input_tokens: u64, max_tokens: Option<u32>) -> u64 {
        let spec = self
            .registry
            .configs()
            .iter()
            .filter_map(|c| c.model(model).cloned())
            .min_by_key(|s| s.input_price + s.output_price)
            .unwrap_or_else(fallback_spec);
        let output_allowance = max_tokens.map_or(DEFAULT_OUTPUT_ALLOWANCE, u64::from);
        cost_for(&spec, &Usage::new(input_tokens, output_allowance)).total()
    }

    /// Scan every message, offsetting nothing: each message is scanned
    /// separately so redaction can rewrite message bodies in place.
    fn scan_messages(&self, request: &ChatRequest) -> Vec<ScanReport> {
        request
            .messages
            .iter()
            .map(|m| self.scanner.scan(&m.content))
            .collect()
    }

    fn record_incidents(
        &self,
        ctx: &RequestContext,
        reports: &[ScanReport],
        action: ScanPolicyAction,
    ) {
        for report in reports {
            for detection in &report.detections {
                self.incidents.record(Incident::new(
                    ctx.tenant.clone(),
                    ctx.correlation_id.clone(),
                    detection.kind,
                    detection.severity,
                    action,
                ));
            }
        }
    }

    fn redact_messages(
        request: &mut ChatRequest,
        reports: &[ScanReport],
        policy_actions: &mut Vec<String>,
    ) {
        let mut pass = RedactionPass::new();
        for (message, report) in request.messages.iter_mut().zip(reports) {
            if report.detections.is_empty() {
                continue;
            }
            let (redacted, applied) = pass.redact(&message.content, &report.detections);
            message.content = redacted;
            for placeholder in applied {
                policy_actions.push(format!("redact:{placeholder}"));
            }
        }
    }

    async fn release_quietly(&self, reservation: &Reservation) {
        if let Err(e) = self.wallets.release(reservation).await {
            warn!(error = %e, "failed to release reservation");
        }
    }

    fn draft(
        ctx: &RequestContext,
        model_used: &str,
        provider: ConnectorId,
        routing_reason: &str,
        usage: Usage,
        cost: u64,
        latency_ms: u64,
        policy_actions: Vec<String>,
    ) -> LedgerDraft {
        LedgerDraft {
            tenant: ctx.tenant.clone(),
            correlation_id: ctx.correlation_id.clone(),
            actor: ctx.actor.clone(),
            feature: ctx.feature.clone(),
            model_requested: ctx.requested_model.clone(),
            model_used: model_used.to_owned(),
            provider,
            routing_reason: routing_reason.to_owned(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost,
            latency_ms,
            cache_hit: false,
            cache_similarity: None,
            policy_actions,
            finish_reason: None,
            error_code: None,
            failover_count: 0,
            recorded_at: Utc::now(),
        }
    }

    async fn append_rejection(
        &self,
        ctx: &RequestContext,
        routing_reason: &str,
        error_code: &str,
        policy_actions: Vec<String>,
    ) {
        let mut draft = Self::draft(
            ctx,
            &ctx.requested_model,
            ConnectorId::new("none"),
            routing_reason,
            Usage::default(),
            0,
            0,
            policy_actions,
        );
        draft.error_code = Some(error_code.to_owned());
        if let Err(e) = self.ledger.append(draft).await {
            warn!(error = %e, "failed to append rejection ledger record");
        }
    }

    fn publish_analytics(&self, ctx: &RequestContext, record: &tollgate_ledger::LedgerRecord) {
        let event = AnalyticsEvent {
            tenant: ctx.tenant.to_string(),
            correlation_id: ctx.correlation_id.to_string(),
            actor: ctx.actor.to_string(),
            feature: ctx.feature.clone(),
            model: record.model_used.clone(),
            provider: record.provider.to_string(),
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            cost: record.cost,
            latency_ms: record.latency_ms,
            cache_hit: record.cache_hit,
            recorded_at: record.recorded_at,
        };
        let analytics = Arc::clone(&self.analytics);
        tokio::spawn(async move { analytics.publish(event).await });
    }

    /// Handle one chat completion through the full pipeline.
    ///
    /// `cancel` is the request-scoped cancellation signal (client
    /// disconnect or deadline); every suspension point below observes it.
    #[instrument(
        name = "gateway.chat",
        skip(self, ctx, request, cancel),
        fields(
            tenant = %ctx.tenant,
            correlation_id = %ctx.correlation_id,
            model = %ctx.requested_model,
            stream = request.stream,
        )
    )]
    #[allow(clippy::too_many_lines)]
    pub async fn handle_chat(
        &self,
        mut ctx: RequestContext,
        mut request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatReply, GatewayError> {
        self.metrics.increment_requests();
        let started = Instant::now();
        let tenant = self.tenant(ctx.tenant.as_str());
        let opts = request.tollgate.clone().unwrap_or_default();
        if ctx.estimated_input_tokens == 0 {
            ctx.estimated_input_tokens = estimate_request_tokens(&request);
        }

        let mut policy_actions: Vec<String> = Vec::new();

        // 1. Security scan.
        let reports = self.scan_messages(&request);
        let merged = ScanReport {
            detections: reports.iter().flat_map(|r| r.detections.clone()).collect(),
            injection_risk: reports.iter().map(|r| r.injection_risk).fold(0.0, f32::max),
        };
        let scan_action = self.scan_policy.read().resolve(&merged);
        if !merged.detections.is_empty() {
            self.record_incidents(&ctx, &reports, scan_action);
        }
        match scan_action {
            ScanPolicyAction::Block => {
                self.metrics.increment_security_blocks();
                self.append_rejection(&ctx, "security-scan", "security_violation", policy_actions)
                    .await;
                return Err(GatewayError::SecurityViolation(
                    "request blocked by security scan".into(),
                ));
            }
            ScanPolicyAction::Quarantine => {
                self.metrics.increment_security_blocks();
                self.held.lock().push(HeldRequest {
                    ctx: ctx.clone(),
                    request,
                    reason: "quarantine".into(),
                });
                self.append_rejection(&ctx, "security-scan", "security_violation", policy_actions)
                    .await;
                return Err(GatewayError::SecurityViolation(
                    "request quarantined for review".into(),
                ));
            }
            ScanPolicyAction::Redact => {
                Self::redact_messages(&mut request, &reports, &mut policy_actions);
            }
            ScanPolicyAction::LogOnly => {
                for detection in &merged.detections {
                    policy_actions.push(format!("log:{}", detection.kind));
                }
            }
            ScanPolicyAction::Allow => {}
        }
        let mut policy_flagged = scan_action == ScanPolicyAction::Redact;

        // 2. External policy evaluation.
        let mut policy_model_override: Option<(String, String)> = None;
        match evaluate_with_deadline(self.policy.as_ref(), &ctx, &merged, self.policy_deadline)
            .await
        {
            PolicyOutcome::Decisions(decisions) => {
                for decision in decisions {
                    match decision {
                        PolicyDecision::Allow => {}
                        PolicyDecision::Deny { rule, message } => {
                            self.metrics.increment_policy_blocks();
                            policy_actions.push(format!("deny:{rule}"));
                            self.append_rejection(&ctx, &rule, "policy_denied", policy_actions)
                                .await;
                            return Err(GatewayError::PolicyDenied { rule, message });
                        }
                        PolicyDecision::Redact { rule } => {
                            if scan_action != ScanPolicyAction::Redact {
                                Self::redact_messages(&mut request, &reports, &mut policy_actions);
                            }
                            policy_actions.push(format!("redact-policy:{rule}"));
                            policy_flagged = true;
                        }
                        PolicyDecision::RerouteModel { rule, model } => {
                            policy_actions.push(format!("reroute:{rule}"));
                            policy_model_override = Some((rule, model));
                            policy_flagged = true;
                        }
                    }
                }
            }
            PolicyOutcome::DeniedOnFailure { reason } => {
                self.metrics.increment_policy_blocks();
                return Err(GatewayError::PolicyDenied {
                    rule: "policy-evaluator".into(),
                    message: reason,
                });
            }
            PolicyOutcome::AllowedOnFailure { reason } => {
                warn!(reason = %reason, "policy evaluator failed open");
                policy_actions.push("policy:fail-open".into());
            }
        }

        // 3. Wallet precheck against the minimum estimate.
        let estimated_cost =
            self.estimate_cost(&ctx.requested_model, ctx.estimated_input_tokens, request.max_tokens);
        if let Err(e) = self
            .wallets
            .check(&ctx.tenant, &ctx.wallet, estimated_cost)
            .await
        {
            return self.wallet_rejection(&ctx, e, policy_actions).await;
        }

        // 4. Routing rules and candidate selection.
        let utilization = self
            .wallets
            .load(&ctx.tenant, &ctx.wallet)
            .await
            .map(|(w, _)| w.utilization_percent())
            .unwrap_or(0);
        let (verdict, decisions) = self.rules.read().evaluate(&ctx, utilization);
        for decision in &decisions {
            if decision.dry_run {
                policy_actions.push(format!("dry_run:{}", decision.rule_id));
            }
        }
        let (mut resolved_model, mut routing_reason, experiment_arm) = match verdict {
            RouteVerdict::Proceed {
                model,
                reason,
                metadata,
                experiment_arm,
            } => {
                for (key, value) in metadata {
                    policy_actions.push(format!("metadata:{key}={value}"));
                }
                (model, reason, experiment_arm)
            }
            RouteVerdict::Blocked { rule, message } => {
                self.metrics.increment_policy_blocks();
                self.append_rejection(&ctx, &rule, "policy_denied", policy_actions)
                    .await;
                return Err(GatewayError::PolicyDenied { rule, message });
            }
            RouteVerdict::NeedsApproval { rule } => {
                self.metrics.increment_policy_blocks();
                self.held.lock().push(HeldRequest {
                    ctx: ctx.clone(),
                    request,
                    reason: rule.clone(),
                });
                self.append_rejection(&ctx, &rule, "policy_denied", policy_actions)
                    .await;
                return Err(GatewayError::PolicyDenied {
                    rule,
                    message: "request requires approval before dispatch".into(),
                });
            }
        };
        if let Some(arm) = &experiment_arm {
            policy_actions.push(format!("experiment:{arm}"));
        }
        // Policy reroutes outrank routing rules.
        if let Some((rule, model)) = policy_model_override {
            resolved_model = model;
            routing_reason = format!("policy:{rule}");
        }

        let mut chain = build_failover_chain(
            &resolved_model,
            request.stream,
            &tenant,
            &self.registry.configs(),
            &self.health,
            ctx.strategy,
        );
        if chain.is_empty() {
            for fallback in &opts.fallback_models {
                chain = build_failover_chain(
                    &fallback.clone(),
                    request.stream,
                    &tenant,
                    &self.registry.configs(),
                    &self.health,
                    ctx.strategy,
                );
                if !chain.is_empty() {
                    resolved_model.clone_from(fallback);
                    routing_reason = format!("fallback:{fallback}");
                    break;
                }
            }
        }
        if chain.is_empty() {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "no connector currently serves model {resolved_model}"
            )));
        }

        // 5. Dry-run: report the decision without dispatching.
        if opts.dry_run {
            self.metrics.increment_dry_runs();
            let augmentation = ResponseAugmentation {
                request_id: ctx.correlation_id.to_string(),
                provider_used: chain[0].connector.to_string(),
                model_requested: ctx.requested_model.clone(),
                model_used: resolved_model,
                routing_reason,
                cost: 0,
                cache_hit: false,
                cache_similarity: None,
                wallet_balance: 0,
                policy_actions,
            };
            return Ok(ChatReply::Complete(Box::new(ChatResponse {
                id: format!("dryrun-{}", ctx.correlation_id),
                object: "chat.completion".into(),
                created: Utc::now().timestamp(),
                model: augmentation.model_used.clone(),
                choices: Vec::new(),
                usage: None,
                tollgate: Some(augmentation),
            })));
        }

        // 6. Atomic reservation.
        let reservation = match self
            .wallets
            .reserve(&ctx.tenant, &ctx.wallet, estimated_cost)
            .await
        {
            Ok(reservation) => reservation,
            Err(e) => return self.wallet_rejection(&ctx, e, policy_actions).await,
        };

        // 7. Cache lookup. Policy-flagged requests are never cache-served.
        let cache_enabled =
            tenant.cache.enabled && opts.cache != Some(false) && !request.stream && !policy_flagged;
        if cache_enabled {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.lookup(&tenant, &request.joined_content()).await {
                    return self
                        .serve_cache_hit(&ctx, &reservation, hit, &resolved_model, policy_actions, started)
                        .await;
                }
            }
        }

        // 8. Dispatch with failover, watching for cancellation. A request
        // already cancelled (client gone before any upstream byte) releases
        // its full reservation.
        request.model.clone_from(&resolved_model);
        if cancel.is_cancelled() {
            self.release_quietly(&reservation).await;
            return Err(GatewayError::Timeout);
        }
        let dispatch = tokio::select! {
            () = cancel.cancelled() => {
                self.release_quietly(&reservation).await;
                return Err(GatewayError::Timeout);
            }
            result = self.dispatch_with_failover(&request, &chain) => result,
        };
        let (connector, outcome, failover_count) = match dispatch {
            Ok(success) => success,
            Err(e) => {
                self.release_quietly(&reservation).await;
                if matches!(e, GatewayError::UpstreamExhausted { .. }) {
                    let mut draft = Self::draft(
                        &ctx,
                        &resolved_model,
                        ConnectorId::new(match &e {
                            GatewayError::UpstreamExhausted { connector, .. } => connector.clone(),
                            _ => String::from("none"),
                        }),
                        &routing_reason,
                        Usage::default(),
                        0,
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        policy_actions,
                    );
                    draft.error_code = Some("upstream_exhausted".into());
                    if let Err(append_err) = self.ledger.append(draft).await {
                        warn!(error = %append_err, "failed to append exhaustion record");
                    }
                }
                return Err(e);
            }
        };

        let spec = connector
            .config()
            .model(&resolved_model)
            .cloned()
            .unwrap_or_else(fallback_spec);

        match outcome {
            ChatOutcome::Complete(response) => {
                self.settle_complete(
                    &ctx,
                    &tenant,
                    &request,
                    response,
                    &reservation,
                    &spec,
                    connector.id().clone(),
                    &resolved_model,
                    &routing_reason,
                    policy_actions,
                    failover_count,
                    started,
                    cache_enabled,
                    opts,
                )
                .await
            }
            ChatOutcome::Stream(upstream) => {
                self.metrics.increment_streamed();
                let (tx, rx) = tokio::sync::mpsc::channel(32);
                let (_, effective_balance) = self
                    .wallets
                    .balance(&ctx.tenant, &ctx.wallet)
                    .await
                    .unwrap_or((tollgate_wallet::Wallet::root(ctx.tenant.clone(), "unknown", 0), 0));

                let augmentation = ResponseAugmentation {
                    request_id: ctx.correlation_id.to_string(),
                    provider_used: connector.id().to_string(),
                    model_requested: ctx.requested_model.clone(),
                    model_used: resolved_model.clone(),
                    routing_reason: routing_reason.clone(),
                    cost: 0,
                    cache_hit: false,
                    cache_similarity: None,
                    wallet_balance: effective_balance,
                    policy_actions: policy_actions.clone(),
                };

                let relay = RelayContext {
                    ctx: ctx.clone(),
                    tenant: tenant.clone(),
                    prompt: request.joined_content(),
                    cache: if tenant.cache.enabled && opts.cache != Some(false) && !policy_flagged {
                        self.cache.clone()
                    } else {
                        None
                    },
                    cache_ttl: opts.cache_ttl_seconds.map(Duration::from_secs),
                    wallets: Arc::clone(&self.wallets),
                    ledger: Arc::clone(&self.ledger),
                    analytics: Arc::clone(&self.analytics),
                    metrics: Arc::clone(&self.metrics),
                    reservation,
                    spec,
                    provider: connector.id().clone(),
                    model_used: resolved_model,
                    routing_reason,
                    policy_actions,
                    failover_count,
                    started,
                };
                tokio::spawn(relay_stream(upstream, tx, cancel, relay));

                Ok(ChatReply::Stream {
                    chunks: rx,
                    augmentation,
                })
            }
        }
    }

    async fn wallet_rejection(
        &self,
        ctx: &RequestContext,
        error: WalletError,
        policy_actions: Vec<String>,
    ) -> Result<ChatReply, GatewayError> {
        match error {
            WalletError::Exhausted { .. } => {
                self.metrics.increment_wallet_rejections();
                self.append_rejection(ctx, "wallet-precheck", "wallet_exhausted", policy_actions)
                    .await;
                Err(GatewayError::WalletExhausted(error.to_string()))
            }
            other => Err(GatewayError::Internal(other.to_string())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn serve_cache_hit(
        &self,
        ctx: &RequestContext,
        reservation: &Reservation,
        hit: tollgate_cache::CacheHit,
        model_used: &str,
        policy_actions: Vec<String>,
        started: Instant,
    ) -> Result<ChatReply, GatewayError> {
        self.metrics.increment_cache_hits();
        self.release_quietly(reservation).await;

        let (_, balance) = self
            .wallets
            .balance(&ctx.tenant, &ctx.wallet)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let mut draft = Self::draft(
            ctx,
            model_used,
            ConnectorId::new("semantic-cache"),
            "cache-hit",
            hit.usage,
            0,
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            policy_actions.clone(),
        );
        draft.cache_hit = true;
        draft.cache_similarity = Some(hit.similarity);
        let record = self
            .ledger
            .append(draft)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.publish_analytics(ctx, &record);

        let mut response = hit.response;
        response.tollgate = Some(ResponseAugmentation {
            request_id: ctx.correlation_id.to_string(),
            provider_used: "semantic-cache".into(),
            model_requested: ctx.requested_model.clone(),
            model_used: model_used.to_owned(),
            routing_reason: "cache-hit".into(),
            cost: 0,
            cache_hit: true,
            cache_similarity: Some(hit.similarity),
            wallet_balance: balance,
            policy_actions,
        });
        Ok(ChatReply::Complete(Box::new(response)))
    }

    /// Walk the failover chain: 429 advances immediately, 5xx retries the
    /// same connector up to three times with 100/200/400 ms backoff, and
    /// timeouts or network errors advance immediately. Health trackers are
    /// fed on every outcome.
    async fn dispatch_with_failover(
        &self,
        request: &ChatRequest,
        chain: &[Candidate],
    ) -> Result<(Arc<dyn ChatConnector>, ChatOutcome, u32), GatewayError> {
        let mut failover_count = 0_u32;
        let mut last_connector = String::from("none");
        let mut last_error = String::from("empty failover chain");

        for (position, candidate) in chain.iter().enumerate() {
            let Some(connector) = self.registry.get(&candidate.connector) else {
                continue;
            };
            let tracker = self.health.tracker(&candidate.connector);
            let deadline = Duration::from_secs(connector.config().timeout_seconds);
            last_connector = candidate.connector.to_string();

            let mut attempt = 0_u32;
            loop {
                let call_started = Instant::now();
                match connector.chat(request, deadline).await {
                    Ok(outcome) => {
                        tracker.record_success(
                            u64::try_from(call_started.elapsed().as_micros()).unwrap_or(u64::MAX),
                        );
                        return Ok((connector, outcome, failover_count));
                    }
                    Err(ConnectorError::RateLimited { .. }) => {
                        info!(connector = %candidate.connector, "upstream 429, advancing");
                        last_error = "rate limited".into();
                        break;
                    }
                    Err(ConnectorError::Server { status, message }) => {
                        tracker.record_server_error();
                        last_error = format!("HTTP {status}: {message}");
                        if attempt < MAX_SAME_CONNECTOR_RETRIES {
                            tokio::time::sleep(backoff_delay(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        break;
                    }
                    Err(err @ (ConnectorError::Timeout | ConnectorError::Network(_))) => {
                        tracker.record_network_error();
                        last_error = err.to_string();
                        break;
                    }
                    Err(ConnectorError::Protocol(message)) => {
                        last_error = format!("protocol: {message}");
                        break;
                    }
                    Err(ConnectorError::Rejected { status, message }) => {
                        // The upstream judged the request itself invalid;
                        // another connector would reject it the same way.
                        return Err(GatewayError::MalformedRequest(format!(
                            "upstream rejected request ({status}): {message}"
                        )));
                    }
                    Err(ConnectorError::Secret(message)) => {
                        return Err(GatewayError::UpstreamUnavailable(format!(
                            "cannot authenticate to {}: {message}",
                            candidate.connector
                        )));
                    }
                }
            }

            if position + 1 < chain.len() {
                self.metrics.increment_failovers();
                failover_count += 1;
            }
        }

        self.metrics.increment_upstream_exhausted();
        Err(GatewayError::UpstreamExhausted {
            connector: last_connector,
            message: last_error,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle_complete(
        &self,
        ctx: &RequestContext,
        tenant: &Tenant,
        request: &ChatRequest,
        mut response: ChatResponse,
        reservation: &Reservation,
        spec: &ModelSpec,
        provider: ConnectorId,
        model_used: &str,
        routing_reason: &str,
        policy_actions: Vec<String>,
        failover_count: u32,
        started: Instant,
        cache_enabled: bool,
        opts: GatewayOptions,
    ) -> Result<ChatReply, GatewayError> {
        // Usage from the provider when reported, estimated otherwise.
        let usage = response.usage.unwrap_or_else(|| {
            let output_text: String = response
                .choices
                .iter()
                .map(|c| c.message.content.as_str())
                .collect();
            Usage::new(ctx.estimated_input_tokens, estimate_tokens(&output_text))
        });
        let cost = cost_for(spec, &usage).total();

        // Settlement order: wallet commit strictly precedes the ledger
        // append so an audit can never see a charge without a commit.
        let balance = self
            .wallets
            .commit(reservation, cost)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let mut draft = Self::draft(
            ctx,
            model_used,
            provider.clone(),
            routing_reason,
            usage,
            cost,
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            policy_actions.clone(),
        );
        draft.finish_reason = response
            .choices
            .first()
            .and_then(|c| c.finish_reason.clone());
        draft.failover_count = failover_count;
        let record = self
            .ledger
            .append(draft)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.publish_analytics(ctx, &record);

        // Cache population is a side path: failures are logged, never
        // surfaced.
        if cache_enabled {
            if let Some(cache) = &self.cache {
                let mut cached = response.clone();
                cached.tollgate = None;
                cache
                    .insert(
                        tenant,
                        &request.joined_content(),
                        cached,
                        usage,
                        opts.cache_ttl_seconds.map(Duration::from_secs),
                    )
                    .await;
            }
        }

        response.tollgate = Some(ResponseAugmentation {
            request_id: ctx.correlation_id.to_string(),
            provider_used: provider.to_string(),
            model_requested: ctx.requested_model.clone(),
            model_used: model_used.to_owned(),
            routing_reason: routing_reason.to_owned(),
            cost,
            cache_hit: false,
            cache_similarity: None,
            wallet_balance: balance,
            policy_actions,
        });
        self.metrics.increment_completed();
        Ok(ChatReply::Complete(Box::new(response)))
    }

    /// Probe every connector that is not currently healthy and feed the
    /// results into the health state machine. Down connectors move to
    /// degraded on probe success and recover through the standard path.
    /// Called from a background task on an interval.
    pub async fn run_probes(&self) {
        for id in self.registry.ids() {
            if self.health.state(id) == tollgate_core::HealthState::Healthy {
                continue;
            }
            let Some(connector) = self.registry.get(id) else {
                continue;
            };
            let tracker = self.health.tracker(id);
            let probe_started = Instant::now();
            match connector.probe().await {
                Ok(()) => tracker.record_success(
                    u64::try_from(probe_started.elapsed().as_micros()).unwrap_or(u64::MAX),
                ),
                Err(e) => {
                    warn!(connector = %id, error = %e, "health probe failed");
                    tracker.record_network_error();
                }
            }
        }
    }

    /// Run the period reset for one wallet and append the reset record to
    /// the audit log. Reserved amounts survive so in-flight requests
    /// continue.
    pub async fn reset_wallet(
        &self,
        tenant: &tollgate_core::TenantId,
        wallet: &tollgate_core::WalletId,
    ) -> Result<tollgate_wallet::WalletReset, GatewayError> {
        let reset = self
            .wallets
            .reset(tenant, wallet)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let draft = LedgerDraft {
            tenant: tenant.clone(),
            correlation_id: tollgate_core::CorrelationId::generate(),
            actor: "scheduler".into(),
            feature: None,
            model_requested: String::new(),
            model_used: String::new(),
            provider: ConnectorId::new("none"),
            routing_reason: "wallet-reset".into(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0,
            latency_ms: 0,
            cache_hit: false,
            cache_similarity: None,
            policy_actions: vec![format!(
                "reset:{wallet}:previous_spent={}",
                reset.previous_spent
            )],
            finish_reason: None,
            error_code: None,
            failover_count: 0,
            recorded_at: Utc::now(),
        };
        self.ledger
            .append(draft)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(reset)
    }

    /// Handle one embeddings request: embed via the configured provider,
    /// meter the input tokens, and settle like a completion.
    pub async fn handle_embeddings(
        &self,
        ctx: RequestContext,
        input: &str,
    ) -> Result<(Vec<f32>, ResponseAugmentation), GatewayError> {
        self.metrics.increment_requests();
        let started = Instant::now();
        let Some(embedder) = &self.embedder else {
            return Err(GatewayError::UpstreamUnavailable(
                "no embedding provider configured".into(),
            ));
        };

        let input_tokens = estimate_tokens(input);
        let cost = (input_tokens * self.embedding_price).div_ceil(1_000);
        let reservation = match self.wallets.reserve(&ctx.tenant, &ctx.wallet, cost).await {
            Ok(reservation) => reservation,
            Err(WalletError::Exhausted { .. }) => {
                self.metrics.increment_wallet_rejections();
                return Err(GatewayError::WalletExhausted(
                    "no budget for embedding request".into(),
                ));
            }
            Err(e) => return Err(GatewayError::Internal(e.to_string())),
        };

        let vector = match embedder.embed(input).await {
            Ok(vector) => vector,
            Err(e) => {
                self.release_quietly(&reservation).await;
                return Err(GatewayError::UpstreamUnavailable(e.to_string()));
            }
        };

        let balance = self
            .wallets
            .commit(&reservation, cost)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let draft = Self::draft(
            &ctx,
            &ctx.requested_model,
            ConnectorId::new("embedder"),
            "embeddings",
            Usage::new(input_tokens, 0),
            cost,
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            Vec::new(),
        );
        let record = self
            .ledger
            .append(draft)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.publish_analytics(&ctx, &record);

        Ok((
            vector,
            ResponseAugmentation {
                request_id: ctx.correlation_id.to_string(),
                provider_used: "embedder".into(),
                model_requested: ctx.requested_model.clone(),
                model_used: ctx.requested_model.clone(),
                routing_reason: "embeddings".into(),
                cost,
                cache_hit: false,
                cache_similarity: None,
                wallet_balance: balance,
                policy_actions: Vec::new(),
            },
        ))
    }
}
