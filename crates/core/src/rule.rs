use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use bucketing::stable_hash;

/// Condition over the request context, evaluated without side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Requested model alias equals the given value.
    Model { model: String },
    /// Actor's team equals the given value.
    Team { team: String },
    /// Feature tag equals the given value.
    Feature { feature: String },
    /// Arrival hour (UTC) falls in `[start_hour, end_hour)`.
    TimeOfDay { start_hour: u32, end_hour: u32 },
    /// Effective wallet utilization is at or above the given percentage.
    WalletUtilization { at_least_percent: u8 },
    /// Explicit data classification equals the given value.
    DataClassification { classification: String },
    /// Estimated input tokens at or above the given count.
    EstimatedTokens { at_least: u64 },
    /// All sub-conditions hold.
    All { conditions: Vec<RuleCondition> },
    /// At least one sub-condition holds.
    Any { conditions: Vec<RuleCondition> },
}

impl RuleCondition {
    /// Evaluate this condition against a request context.
    ///
    /// `wallet_utilization_percent` is supplied by the caller because wallet
    /// state lives outside the context.
    #[must_use]
    pub fn matches(&self, ctx: &RequestContext, wallet_utilization_percent: u8) -> bool {
        match self {
            Self::Model { model } => ctx.requested_model == *model,
            Self::Team { team } => ctx.team.as_deref() == Some(team.as_str()),
            Self::Feature { feature } => ctx.feature.as_deref() == Some(feature.as_str()),
            Self::TimeOfDay {
                start_hour,
                end_hour,
            } => {
                let hour = chrono::Timelike::hour(&ctx.arrived_at);
                if start_hour <= end_hour {
                    hour >= *start_hour && hour < *end_hour
                } else {
                    // Window wraps midnight.
                    hour >= *start_hour || hour < *end_hour
                }
            }
            Self::WalletUtilization { at_least_percent } => {
                wallet_utilization_percent >= *at_least_percent
            }
            Self::DataClassification { classification } => {
                ctx.data_classification.as_deref() == Some(classification.as_str())
            }
            Self::EstimatedTokens { at_least } => ctx.estimated_input_tokens >= *at_least,
            Self::All { conditions } => conditions
                .iter()
                .all(|c| c.matches(ctx, wallet_utilization_percent)),
            Self::Any { conditions } => conditions
                .iter()
                .any(|c| c.matches(ctx, wallet_utilization_percent)),
        }
    }
}

/// Action taken when a rule's condition matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    /// Dispatch the request to a different model.
    RerouteToModel { model: String },
    /// Refuse the request with `policy_denied`.
    Block { message: String },
    /// Hold the request for human approval before dispatch.
    RequireApproval,
    /// Explicitly allow, stopping rule evaluation.
    Allow,
    /// Attach a metadata label and continue to dispatch.
    AddMetadata { key: String, value: String },
}

/// Probabilistic traffic split between two models with the same constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExperimentSplit {
    /// Model for the control arm.
    pub control_model: String,
    /// Model for the treatment arm.
    pub treatment_model: String,
    /// Share of traffic routed to the treatment arm, 0-100.
    pub treatment_percent: u8,
}

impl ExperimentSplit {
    /// Deterministically pick an arm from the correlation id so that the
    /// same request always lands in the same arm.
    #[must_use]
    pub fn pick_arm(&self, correlation_id: &str) -> (&str, &'static str) {
        let bucket = stable_hash(correlation_id) % 100;
        if bucket < u64::from(self.treatment_percent) {
            (&self.treatment_model, "treatment")
        } else {
            (&self.control_model, "control")
        }
    }
}

/// An ordered condition-action routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(deny_unknown_fields)]
pub struct RoutingRule {
    /// Stable rule identifier, recorded as the routing reason on match.
    pub id: String,
    /// Lower priority evaluates earlier.
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    /// When set, the rule logs the decision it would have made but does not
    /// affect dispatch.
    #[serde(default)]
    pub dry_run: bool,
    pub condition: RuleCondition,
    pub action: RuleAction,
    /// Optional experiment split applied instead of the action's model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentSplit>,
}

fn default_active() -> bool {
    true
}

/// Outcome of evaluating the rule set for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RuleDecision {
    /// Rule that produced this decision.
    pub rule_id: String,
    /// The action that fired.
    pub action: RuleAction,
    /// Whether the rule was dry-run (logged only, not enforced).
    pub dry_run: bool,
    /// Experiment arm, when an experiment split chose the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_arm: Option<String>,
}

// Stable hashing for experiment bucketing lives in a private module so the
// public surface stays small.
mod bucketing {
    /// FNV-1a over the input bytes. Stable across platforms and releases,
    /// which matters because experiment arms must not reshuffle on upgrade.
    #[must_use]
    pub fn stable_hash(input: &str) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = FNV_OFFSET;
        for byte in input.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new("t1", "u1", "w1", "gpt-4o")
            .with_team("growth")
            .with_feature("search")
            .with_estimated_input_tokens(500)
    }

    #[test]
    fn model_condition() {
        let cond = RuleCondition::Model {
            model: "gpt-4o".into(),
        };
        assert!(cond.matches(&ctx(), 0));
        let cond = RuleCondition::Model {
            model: "claude-sonnet".into(),
        };
        assert!(!cond.matches(&ctx(), 0));
    }

    #[test]
    fn team_and_utilization_combined() {
        let cond = RuleCondition::All {
            conditions: vec![
                RuleCondition::Team {
                    team: "growth".into(),
                },
                RuleCondition::WalletUtilization {
                    at_least_percent: 80,
                },
            ],
        };
        assert!(cond.matches(&ctx(), 85));
        assert!(!cond.matches(&ctx(), 79));
    }

    #[test]
    fn any_condition() {
        let cond = RuleCondition::Any {
            conditions: vec![
                RuleCondition::Team { team: "ops".into() },
                RuleCondition::Feature {
                    feature: "search".into(),
                },
            ],
        };
        assert!(cond.matches(&ctx(), 0));
    }

    #[test]
    fn estimated_tokens_boundary() {
        let cond = RuleCondition::EstimatedTokens { at_least: 500 };
        assert!(cond.matches(&ctx(), 0));
        let cond = RuleCondition::EstimatedTokens { at_least: 501 };
        assert!(!cond.matches(&ctx(), 0));
    }

    #[test]
    fn data_classification_condition() {
        let c = ctx().with_data_classification("restricted");
        let cond = RuleCondition::DataClassification {
            classification: "restricted".into(),
        };
        assert!(cond.matches(&c, 0));
        assert!(!cond.matches(&ctx(), 0));
    }

    #[test]
    fn time_of_day_wrapping_window() {
        let cond = RuleCondition::TimeOfDay {
            start_hour: 22,
            end_hour: 6,
        };
        let mut c = ctx();
        c.arrived_at = chrono::DateTime::parse_from_rfc3339("2026-03-01T23:30:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert!(cond.matches(&c, 0));
        c.arrived_at = chrono::DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert!(!cond.matches(&c, 0));
    }

    #[test]
    fn experiment_arm_is_deterministic() {
        let split = ExperimentSplit {
            control_model: "gpt-4o".into(),
            treatment_model: "gpt-4o-mini".into(),
            treatment_percent: 50,
        };
        let (model1, arm1) = split.pick_arm("req-abc");
        let (model2, arm2) = split.pick_arm("req-abc");
        assert_eq!(model1, model2);
        assert_eq!(arm1, arm2);
    }

    #[test]
    fn experiment_zero_percent_never_treats() {
        let split = ExperimentSplit {
            control_model: "a".into(),
            treatment_model: "b".into(),
            treatment_percent: 0,
        };
        for i in 0..50 {
            let (model, arm) = split.pick_arm(&format!("req-{i}"));
            assert_eq!(model, "a");
            assert_eq!(arm, "control");
        }
    }

    #[test]
    fn experiment_hundred_percent_always_treats() {
        let split = ExperimentSplit {
            control_model: "a".into(),
            treatment_model: "b".into(),
            treatment_percent: 100,
        };
        for i in 0..50 {
            let (model, _) = split.pick_arm(&format!("req-{i}"));
            assert_eq!(model, "b");
        }
    }

    #[test]
    fn rule_serde_rejects_unknown_fields() {
        let json = r#"{
            "id": "r1",
            "priority": 10,
            "condition": {"kind": "model", "model": "gpt-4o"},
            "action": {"kind": "allow"},
            "bogus": true
        }"#;
        assert!(serde_json::from_str::<RoutingRule>(json).is_err());
    }

    #[test]
    fn rule_serde_roundtrip() {
        let rule = RoutingRule {
            id: "downgrade-hot-wallets".into(),
            priority: 5,
            active: true,
            dry_run: false,
            condition: RuleCondition::WalletUtilization {
                at_least_percent: 80,
            },
            action: RuleAction::RerouteToModel {
                model: "gpt-4o-mini".into(),
            },
            experiment: None,
        };
        let json = serde_json::to_string(&rule).unwrap();
        let back: RoutingRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "downgrade-hot-wallets");
        assert!(matches!(back.action, RuleAction::RerouteToModel { .. }));
    }
}
