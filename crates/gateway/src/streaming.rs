use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tollgate_cache::SemanticCache;
use tollgate_connector::{ChunkStream, StreamItem};
use tollgate_core::{
    ChatChunk, ChatResponse, ConnectorId, FinishReason, ModelSpec, RequestContext,
    StreamAccounting, Tenant, Usage,
};
use tollgate_ledger::{LedgerDraft, LedgerWriter};
use tollgate_metering::{cost_for, estimate_tokens, AnalyticsEvent, AnalyticsSink};
use tollgate_wallet::{Reservation, WalletService};

use crate::metrics::GatewayMetrics;

/// Everything the relay needs to forward chunks and settle the stream.
pub(crate) struct RelayContext {
    pub ctx: RequestContext,
    pub tenant: Tenant,
    pub prompt: String,
    pub cache: Option<Arc<SemanticCache>>,
    pub cache_ttl: Option<Duration>,
    pub wallets: Arc<WalletService>,
    pub ledger: Arc<LedgerWriter>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub metrics: Arc<GatewayMetrics>,
    pub reservation: Reservation,
    pub spec: ModelSpec,
    pub provider: ConnectorId,
    pub model_used: String,
    pub routing_reason: String,
    pub policy_actions: Vec<String>,
    pub failover_count: u32,
    pub started: Instant,
}

/// Forward upstream chunks to the client and settle on any terminal
/// condition.
///
/// A single loop reads the upstream, writes to the outbound channel, and
/// checks cancellation every iteration, so a client disconnect or deadline
/// is observed within one chunk interval. Once the first byte has been
/// forwarded no failover is attempted; mid-stream errors seal the partial
/// response and bill the tokens already sent.
///
/// Settlement order on every exit path: wallet commit, then ledger append,
/// then analytics, then upstream close.
pub(crate) async fn relay_stream(
    mut upstream: ChunkStream,
    tx: mpsc::Sender<ChatChunk>,
    cancel: CancellationToken,
    relay: RelayContext,
) {
    let mut accounting = StreamAccounting::default();
    let mut authoritative: Option<Usage> = None;
    let mut collected = String::new();
    let mut error_message: Option<String> = None;

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break FinishReason::ClientDisconnect,
            item = upstream.next() => match item {
                Some(Ok(StreamItem::Chunk(chunk))) => {
                    if let Some(usage) = chunk.usage {
                        // Authoritative counts replace the running estimate.
                        authoritative = Some(usage);
                    }
                    let bytes = serde_json::to_vec(&chunk)
                        .map(|v| v.len() as u64)
                        .unwrap_or(0);
                    let token_estimate = chunk.content().map_or(0, estimate_tokens);
                    if let Some(content) = chunk.content() {
                        collected.push_str(content);
                    }
                    // A failed write means the client is gone.
                    if tx.send(chunk).await.is_err() {
                        break FinishReason::ClientDisconnect;
                    }
                    accounting.record_chunk(bytes, token_estimate);
                }
                Some(Ok(StreamItem::Done)) | None => break FinishReason::Stop,
                Some(Err(e)) => {
                    error_message = Some(e.to_string());
                    break FinishReason::Error;
                }
            }
        }
    };
    accounting.finalize(reason);
    // Dropping the receiver side is the client's signal; dropping `tx` here
    // closes the outbound channel so the HTTP layer ends the response.
    drop(tx);

    match reason {
        FinishReason::ClientDisconnect => relay.metrics.increment_client_disconnects(),
        FinishReason::Error => relay.metrics.increment_stream_errors(),
        FinishReason::Stop => {}
    }

    // Partial streams bill the tokens actually sent; a final usage event
    // from the provider supersedes the estimate.
    let usage = authoritative.unwrap_or_else(|| {
        Usage::new(relay.ctx.estimated_input_tokens, accounting.tokens_estimated)
    });
    let cost = cost_for(&relay.spec, &usage).total();

    // Wallet commit strictly precedes the ledger append.
    if let Err(e) = relay.wallets.commit(&relay.reservation, cost).await {
        warn!(
            correlation_id = %relay.ctx.correlation_id,
            error = %e,
            "stream settlement failed to commit wallet"
        );
    }

    let draft = LedgerDraft {
        tenant: relay.ctx.tenant.clone(),
        correlation_id: relay.ctx.correlation_id.clone(),
        actor: relay.ctx.actor.clone(),
        feature: relay.ctx.feature.clone(),
        model_requested: relay.ctx.requested_model.clone(),
        model_used: relay.model_used.clone(),
        provider: relay.provider.clone(),
        routing_reason: relay.routing_reason.clone(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cost,
        latency_ms: u64::try_from(relay.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        cache_hit: false,
        cache_similarity: None,
        policy_actions: relay.policy_actions.clone(),
        finish_reason: Some(reason.to_string()),
        error_code: error_message.map(|message| {
            warn!(correlation_id = %relay.ctx.correlation_id, %message, "stream sealed on upstream error");
            "upstream_error".to_owned()
        }),
        failover_count: relay.failover_count,
        recorded_at: Utc::now(),
    };
    match relay.ledger.append(draft).await {
        Ok(record) => {
            let event = AnalyticsEvent {
                tenant: relay.ctx.tenant.to_string(),
                correlation_id: relay.ctx.correlation_id.to_string(),
                actor: relay.ctx.actor.to_string(),
                feature: relay.ctx.feature.clone(),
                model: record.model_used.clone(),
                provider: record.provider.to_string(),
                input_tokens: record.input_tokens,
                output_tokens: record.output_tokens,
                cost: record.cost,
                latency_ms: record.latency_ms,
                cache_hit: false,
                recorded_at: record.recorded_at,
            };
            relay.analytics.publish(event).await;
        }
        Err(e) => {
            warn!(
                correlation_id = %relay.ctx.correlation_id,
                error = %e,
                "stream settlement failed to append ledger record"
            );
        }
    }

    // Only streams that reached natural completion populate the cache.
    if reason == FinishReason::Stop {
        if let Some(cache) = &relay.cache {
            let response = ChatResponse {
                id: format!("chatcmpl-{}", relay.ctx.correlation_id),
                object: "chat.completion".to_owned(),
                created: Utc::now().timestamp(),
                model: relay.model_used.clone(),
                choices: vec![tollgate_core::ChatChoice {
                    index: 0,
                    message: tollgate_core::ChatMessage::new("assistant", collected),
                    finish_reason: Some("stop".to_owned()),
                }],
                usage: Some(usage),
                tollgate: None,
            };
            cache
                .insert(&relay.tenant, &relay.prompt, response, usage, relay.cache_ttl)
                .await;
        }
    }

    // Close the upstream last, per the settlement order.
    drop(upstream);
}
