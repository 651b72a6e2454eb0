use utoipa::OpenApi;

/// OpenAPI document for the gateway surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tollgate",
        description = "OpenAI-compatible AI gateway with budgets, routing, and audit",
    ),
    paths(
        crate::api::chat::chat_completions,
        crate::api::wallet::balance,
        crate::api::health::healthz,
    ),
    components(schemas(
        tollgate_core::ChatRequest,
        tollgate_core::ChatResponse,
        tollgate_core::ChatMessage,
        tollgate_core::ChatChoice,
        tollgate_core::Usage,
        tollgate_core::GatewayOptions,
        tollgate_core::RoutingStrategy,
        tollgate_core::ResponseAugmentation,
        crate::api::wallet::BalanceResponse,
        crate::api::health::HealthResponse,
        crate::api::health::ConnectorHealthBody,
    )),
    tags(
        (name = "inference", description = "OpenAI-compatible inference surface"),
        (name = "accounting", description = "Budgets and cost"),
        (name = "operations", description = "Health and operations"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_builds() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().unwrap();
        assert!(json.contains("/v1/chat/completions"));
        assert!(json.contains("/v1/wallet/balance"));
    }
}
