use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tollgate_core::{CorrelationId, TenantId};

use crate::evaluator::ScanPolicyAction;
use crate::scan::{DetectionKind, Severity};

/// A security finding recorded for operators.
///
/// Carries the finding type and severity but never the matched content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub tenant: TenantId,
    pub correlation_id: CorrelationId,
    pub kind: DetectionKind,
    pub severity: Severity,
    /// Action the policy applied for this finding.
    pub action: ScanPolicyAction,
    pub occurred_at: DateTime<Utc>,
}

impl Incident {
    /// Create an incident for one finding.
    #[must_use]
    pub fn new(
        tenant: TenantId,
        correlation_id: CorrelationId,
        kind: DetectionKind,
        severity: Severity,
        action: ScanPolicyAction,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            tenant,
            correlation_id,
            kind,
            severity,
            action,
            occurred_at: Utc::now(),
        }
    }
}

/// Storage seam for incident records.
pub trait IncidentStore: Send + Sync {
    /// Record an incident.
    fn record(&self, incident: Incident);

    /// Incidents for a tenant, newest last.
    fn for_tenant(&self, tenant: &str) -> Vec<Incident>;
}

/// In-memory incident store.
#[derive(Debug, Default)]
pub struct MemoryIncidentStore {
    incidents: Mutex<Vec<Incident>>,
}

impl MemoryIncidentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IncidentStore for MemoryIncidentStore {
    fn record(&self, incident: Incident) {
        self.incidents.lock().push(incident);
    }

    fn for_tenant(&self, tenant: &str) -> Vec<Incident> {
        self.incidents
            .lock()
            .iter()
            .filter(|i| i.tenant.as_str() == tenant)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_filters_by_tenant() {
        let store = MemoryIncidentStore::new();
        store.record(Incident::new(
            "t1".into(),
            "req-1".into(),
            DetectionKind::Email,
            Severity::Medium,
            ScanPolicyAction::Redact,
        ));
        store.record(Incident::new(
            "t2".into(),
            "req-2".into(),
            DetectionKind::Secret,
            Severity::Critical,
            ScanPolicyAction::Block,
        ));

        let t1 = store.for_tenant("t1");
        assert_eq!(t1.len(), 1);
        assert_eq!(t1[0].kind, DetectionKind::Email);
    }

    #[test]
    fn incident_serializes_without_content() {
        let incident = Incident::new(
            "t1".into(),
            "req-1".into(),
            DetectionKind::Email,
            Severity::Medium,
            ScanPolicyAction::Redact,
        );
        let json = serde_json::to_string(&incident).unwrap();
        assert!(json.contains("\"kind\":\"email\""));
        assert!(!json.contains("alice@"), "incidents never store content");
    }
}
