pub mod failover;
pub mod health;
pub mod rules;
pub mod select;

pub use failover::{backoff_delay, UpstreamFailure, MAX_SAME_CONNECTOR_RETRIES};
pub use health::{ConnectorHealth, HealthConfig, HealthRegistry};
pub use rules::{RouteVerdict, RuleEngine};
pub use select::{build_failover_chain, Candidate};
