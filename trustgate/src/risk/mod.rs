//! Zero-trust login risk assessment.
//!
//! The engine is a pure function over the attempt, the account's recent
//! history, the presented device and the resolved location. Factors are
//! reported in a fixed order: untrusted device, country mismatch, impossible
//! travel, failed burst, then informational entries that carry no weight by
//! default.

pub mod engine;
pub mod models;

pub use engine::{AssessmentInput, RiskEngine};
pub use models::{
    CRITICAL_THRESHOLD, DeviceSignal, PreviousLogin, RiskAssessment, RiskConfig, RiskStatus,
    RiskWeights, SUSPICIOUS_THRESHOLD,
};
