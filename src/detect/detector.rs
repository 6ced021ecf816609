//! The detector contract shared by every rule pack.

use std::collections::{HashMap, HashSet};

use tree_sitter::Node;

use super::{Issue, Location, Rule, Severity};
use crate::analysis::VisitContext;

/// Category of syntax node a detector can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    Declaration,
    Expression,
    Statement,
    Call,
}

/// A single rule, run during the shared tree walk.
///
/// Instances live for exactly one analysis pass; factories create fresh ones.
pub trait Detector: Send {
    /// The rule every issue from this detector is tagged with.
    fn rule(&self) -> Rule;

    /// Node classes this detector wants to see.
    fn interests(&self) -> &'static [NodeClass];

    /// Called when the walk enters a node of an interesting class.
    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink);

    /// Called when the walk leaves a node of an interesting class.
    fn leave(&mut self, _node: Node<'_>, _cx: &VisitContext<'_>, _sink: &mut IssueSink) {}

    /// Called once after the walk, for rules that aggregate across the file.
    fn finish(&mut self, _sink: &mut IssueSink) {}
}

/// Creates a fresh detector for one pass.
pub type DetectorFactory = fn() -> Box<dyn Detector>;

/// Per-detector issue buffer.
#[derive(Debug)]
pub struct IssueSink {
    rule: Rule,
    severity: Severity,
    issues: Vec<Issue>,
}

impl IssueSink {
    pub fn new(rule: Rule, severity: Severity) -> Self {
        Self {
            rule,
            severity,
            issues: Vec::new(),
        }
    }

    pub fn report(&mut self, location: Location, message: impl Into<String>) {
        self.issues
            .push(Issue::new(self.rule, self.severity, message).at(location));
    }

    pub fn report_unlocated(&mut self, message: impl Into<String>) {
        self.issues.push(Issue::new(self.rule, self.severity, message));
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }
}

/// Which rules run and at what severity.
#[derive(Debug, Clone, Default)]
pub struct RulePolicy {
    disabled: HashSet<Rule>,
    severity: HashMap<Rule, Severity>,
}

impl RulePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(mut self, rule: Rule) -> Self {
        self.disabled.insert(rule);
        self
    }

    pub fn with_severity(mut self, rule: Rule, severity: Severity) -> Self {
        self.severity.insert(rule, severity);
        self
    }

    pub fn is_enabled(&self, rule: Rule) -> bool {
        !self.disabled.contains(&rule)
    }

    pub fn severity_for(&self, rule: Rule) -> Severity {
        self.severity
            .get(&rule)
            .copied()
            .unwrap_or_else(|| rule.default_severity())
    }

    pub fn sink_for(&self, rule: Rule) -> IssueSink {
        IssueSink::new(rule, self.severity_for(rule))
    }
}
