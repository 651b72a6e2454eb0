pub mod error;
pub mod evaluator;
pub mod incident;
pub mod redact;
pub mod scan;

pub use error::PolicyError;
pub use evaluator::{
    evaluate_with_deadline, PolicyDecision, PolicyEvaluator, PolicyOutcome, ScanPolicy,
    ScanPolicyAction, StaticPolicyEvaluator, StaticPolicyRule,
};
pub use incident::{Incident, IncidentStore, MemoryIncidentStore};
pub use redact::{redact, RedactionPass};
pub use scan::{Detection, DetectionKind, ScanReport, SecurityScanner, Severity};
