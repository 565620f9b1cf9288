//! Reconciliation of extracted permit links against the municipality
//! directory, the staging merge and the audit report.

pub mod audit;
pub mod classify;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod rules;
pub mod staging;

pub use audit::{AuditReport, MalformedKind, MalformedRecord, UnresolvedCandidate};
pub use classify::{LinkClassifier, TrustAssessor, TrustRule, TrustVerdict};
pub use matcher::Matcher;
pub use normalize::{canonical_name, prefecture_key, NameKey, Normalizer};
pub use pipeline::{
    LinkCheckSummary, ReconcileConfig, ReconcileOutcome, ReconcilePipeline, Reconciler, RunSummary,
};
pub use rules::RuleSet;
pub use staging::{merge, seed_missing, MergeOutcome};

pub const CRATE_NAME: &str = "kaiso-reconcile";
