use async_trait::async_trait;

use tollgate_core::{TenantId, WalletId};

/// A soft-threshold crossing event sent to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdEvent {
    pub tenant: TenantId,
    pub wallet: WalletId,
    /// The configured threshold that was crossed, as a percentage.
    pub threshold_percent: u8,
    /// Utilization after the commit that crossed the threshold.
    pub utilization_percent: u8,
}

/// Seam to the external notification fan-out. Failures are logged and
/// swallowed by callers; notification must never fail a request.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a threshold-crossing event.
    async fn notify_threshold(&self, event: ThresholdEvent);
}

/// A sink that drops every event. Used when notifications are not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotificationSink;

#[async_trait]
impl NotificationSink for NullNotificationSink {
    async fn notify_threshold(&self, _event: ThresholdEvent) {}
}
