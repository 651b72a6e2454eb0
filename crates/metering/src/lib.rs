pub mod analytics;
pub mod cost;
pub mod tokens;

pub use analytics::{AnalyticsEvent, AnalyticsSink, BoundedAnalyticsQueue, MemoryAnalyticsSink};
pub use cost::{cost_for, CostBreakdown};
pub use tokens::{estimate_request_tokens, estimate_tokens};
