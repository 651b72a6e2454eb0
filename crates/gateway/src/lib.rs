pub mod builder;
pub mod gateway;
pub mod metrics;
pub mod reply;
mod streaming;

pub use builder::GatewayBuilder;
pub use gateway::Gateway;
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use reply::{ChatReply, HeldRequest};
