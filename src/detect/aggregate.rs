//! Turns raw detector output into an [`AnalysisReport`].

use super::{AnalysisReport, AnalysisStatus, Issue, Rule};
use crate::analysis::SyntaxError;

/// Whether an issue is an "all clear" sentinel rather than a finding.
pub fn is_sentinel(issue: &Issue) -> bool {
    issue.rule == Rule::AllClear
        || issue.message.starts_with('✅')
        || issue.message.to_lowercase().contains("all good")
}

/// Filter sentinels and derive the report status.
///
/// A syntax-error issue anywhere makes the whole pass a syntax failure.
pub fn aggregate(raw: Vec<Issue>) -> AnalysisReport {
    let issues: Vec<Issue> = raw.into_iter().filter(|i| !is_sentinel(i)).collect();

    let status = if issues.iter().any(|i| i.rule == Rule::SyntaxError) {
        AnalysisStatus::SyntaxError
    } else if issues.is_empty() {
        AnalysisStatus::Clean
    } else {
        AnalysisStatus::IssuesFound
    };

    AnalysisReport::from_parts(status, issues)
}

/// Report for a pass that could not parse its input.
pub fn syntax_failure(error: SyntaxError) -> AnalysisReport {
    aggregate(vec![error.into_issue()])
}
