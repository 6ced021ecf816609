//! Rule packs and the types they report through.
//!
//! Each language has a static list of [`DetectorFactory`] entries. The walker
//! builds a fresh detector from every factory per pass, so detectors may keep
//! state across nodes without any cleanup between snippets.

mod aggregate;
mod detector;
mod flow;
pub mod javascript;
pub mod python;
mod types;

pub use aggregate::{aggregate, is_sentinel, syntax_failure};
pub use detector::{Detector, DetectorFactory, IssueSink, NodeClass, RulePolicy};
pub use flow::{has_reachable_exit, FlowKinds};
pub use types::{AnalysisReport, AnalysisStatus, Issue, Location, Rule, Severity};
