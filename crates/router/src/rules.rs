use tracing::debug;

use tollgate_core::{RequestContext, RoutingRule, RuleAction, RuleDecision};

/// Outcome of evaluating the rule set for one request.
#[derive(Debug, Clone)]
pub enum RouteVerdict {
    /// Dispatch may proceed with the resolved model.
    Proceed {
        model: String,
        /// Machine-readable tag recorded as the routing reason.
        reason: String,
        /// Metadata labels accumulated from `add_metadata` rules.
        metadata: Vec<(String, String)>,
        experiment_arm: Option<String>,
    },
    /// A block rule fired.
    Blocked { rule: String, message: String },
    /// A require-approval rule fired; the request goes to the hold queue.
    NeedsApproval { rule: String },
}

/// Priority-ordered routing rule evaluation.
///
/// Rules evaluate in ascending priority; the first matching decisive rule
/// wins. `add_metadata` rules accumulate and keep evaluating. Dry-run rules
/// record the decision they would have made without affecting dispatch.
#[derive(Debug, Default)]
pub struct RuleEngine {
    rules: Vec<RoutingRule>,
}

impl RuleEngine {
    /// Build an engine; rules are sorted by ascending priority once here so
    /// evaluation order is deterministic.
    #[must_use]
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    /// The rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Replace the rule set (admin updates).
    pub fn replace(&mut self, mut rules: Vec<RoutingRule>) {
        rules.sort_by_key(|r| r.priority);
        self.rules = rules;
    }

    /// Evaluate the rule set. Returns the verdict plus every decision made,
    /// dry-run ones included, for the ledger.
    #[must_use]
    pub fn evaluate(
        &self,
        ctx: &RequestContext,
        wallet_utilization_percent: u8,
    ) -> (RouteVerdict, Vec<RuleDecision>) {
        let mut decisions = Vec::new();
        let mut metadata = Vec::new();

        for rule in &self.rules {
            if !rule.active || !rule.condition.matches(ctx, wallet_utilization_percent) {
                continue;
            }

            let mut experiment_arm = None;
            let mut effective_action = rule.action.clone();
            if let Some(split) = &rule.experiment {
                let (model, arm) = split.pick_arm(ctx.correlation_id.as_str());
                effective_action = RuleAction::RerouteToModel {
                    model: model.to_owned(),
                };
                experiment_arm = Some(arm.to_owned());
            }

            decisions.push(RuleDecision {
                rule_id: rule.id.clone(),
                action: effective_action.clone(),
                dry_run: rule.dry_run,
                experiment_arm: experiment_arm.clone(),
            });

            if rule.dry_run {
                debug!(rule = %rule.id, "dry-run rule matched, not enforcing");
                continue;
            }

            match effective_action {
                RuleAction::RerouteToModel { model } => {
                    return (
                        RouteVerdict::Proceed {
                            model,
                            reason: rule.id.clone(),
                            metadata,
                            experiment_arm,
                        },
                        decisions,
                    );
                }
                RuleAction::Block { message } => {
                    return (
                        RouteVerdict::Blocked {
                            rule: rule.id.clone(),
                            message,
                        },
                        decisions,
                    );
                }
                RuleAction::RequireApproval => {
                    return (
                        RouteVerdict::NeedsApproval {
                            rule: rule.id.clone(),
                        },
                        decisions,
                    );
                }
                RuleAction::Allow => {
                    return (
                        RouteVerdict::Proceed {
                            model: ctx.requested_model.clone(),
                            reason: rule.id.clone(),
                            metadata,
                            experiment_arm,
                        },
                        decisions,
                    );
                }
                RuleAction::AddMetadata { key, value } => {
                    metadata.push((key, value));
                }
            }
        }

        (
            RouteVerdict::Proceed {
                model: ctx.requested_model.clone(),
                reason: "default".to_owned(),
                metadata,
                experiment_arm: None,
            },
            decisions,
        )
    }
}
