use serde::Serialize;

use crate::analysis::SourceUnit;
use crate::detect::AnalysisReport;

/// One pass through the fix loop, kept as the session's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixAttempt {
    /// 1-based.
    pub attempt_number: u32,
    pub input_code: String,
    pub report_before: AnalysisReport,
    pub oracle_output: Option<String>,
    pub report_after: Option<AnalysisReport>,
}

impl FixAttempt {
    pub fn new(attempt_number: u32, input_code: &str, report_before: AnalysisReport) -> Self {
        Self {
            attempt_number,
            input_code: input_code.to_string(),
            report_before,
            oracle_output: None,
            report_after: None,
        }
    }

    /// Issues removed by this attempt; negative when the fix made things worse.
    pub fn issue_delta(&self) -> Option<i64> {
        let after = self.report_after.as_ref()?;
        Some(self.report_before.issues.len() as i64 - after.issues.len() as i64)
    }
}

/// Per-session loop state. Created per request and dropped with it.
#[derive(Debug)]
pub struct ConvergenceState {
    current: SourceUnit,
    iteration_count: u32,
    max_iterations: u32,
}

impl ConvergenceState {
    pub fn new(unit: SourceUnit, max_iterations: u32) -> Self {
        Self {
            current: unit,
            iteration_count: 0,
            max_iterations,
        }
    }

    pub fn current(&self) -> &SourceUnit {
        &self.current
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// No oracle calls left.
    pub fn is_exhausted(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }

    /// Replace the current code with an oracle candidate.
    pub fn advance(&mut self, code: String) {
        self.current = self.current.with_code(code);
        self.iteration_count += 1;
    }

    pub fn into_current(self) -> SourceUnit {
        self.current
    }
}
