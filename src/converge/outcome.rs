use thiserror::Error;
use uuid::Uuid;

use super::FixAttempt;
use crate::detect::AnalysisReport;
use crate::oracle::OracleError;

/// Why a session stopped before producing clean code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The input (or an oracle candidate) does not parse.
    Syntax,
    InputTooLarge { length: usize, max: usize },
    UnsupportedLanguage(String),
    /// The analyzer itself broke.
    Analyzer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// Issues remained after the last allowed oracle call.
    NonConvergence,
    Oracle(OracleError),
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbandonReason::NonConvergence => write!(f, "maximum fix iterations reached"),
            AbandonReason::Oracle(e) => write!(f, "{}", e),
        }
    }
}

/// Terminal state of a convergence session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The code analyzes clean.
    Done { code: String, report: AnalysisReport },
    /// Issues were found and no fix was requested.
    Reported { code: String, report: AnalysisReport },
    Failed {
        failure: Failure,
        report: Option<AnalysisReport>,
        /// Last code that parsed, when an oracle candidate broke it.
        last_good_code: Option<String>,
    },
    Abandoned {
        code: String,
        report: AnalysisReport,
        reason: AbandonReason,
    },
    Cancelled {
        code: String,
        report: Option<AnalysisReport>,
    },
}

impl Outcome {
    /// Report of the last analysis pass, if one finished.
    pub fn report(&self) -> Option<&AnalysisReport> {
        match self {
            Outcome::Done { report, .. }
            | Outcome::Reported { report, .. }
            | Outcome::Abandoned { report, .. } => Some(report),
            Outcome::Failed { report, .. } | Outcome::Cancelled { report, .. } => report.as_ref(),
        }
    }

    /// Best code the session produced.
    pub fn code(&self) -> Option<&str> {
        match self {
            Outcome::Done { code, .. }
            | Outcome::Reported { code, .. }
            | Outcome::Abandoned { code, .. }
            | Outcome::Cancelled { code, .. } => Some(code),
            Outcome::Failed { last_good_code, .. } => last_good_code.as_deref(),
        }
    }

    pub fn has_errors(&self) -> bool {
        match self {
            Outcome::Failed { .. } => true,
            _ => self.report().is_some_and(|r| r.has_errors()),
        }
    }
}

/// Everything a session produced.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub analysis_id: Uuid,
    pub outcome: Outcome,
    pub attempts: Vec<FixAttempt>,
}

impl SessionResult {
    /// Oracle calls that returned code.
    pub fn iterations(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.oracle_output.is_some())
            .count()
    }

    /// Whether any oracle candidate was accepted.
    pub fn was_fixed(&self) -> bool {
        self.iterations() > 0
    }

    /// Collapse to the clean code or a typed error.
    pub fn into_result(self) -> Result<String, SessionError> {
        let iterations = self.iterations();
        match self.outcome {
            Outcome::Done { code, .. } => Ok(code),
            Outcome::Reported { report, .. } => Err(SessionError::NonConvergence {
                iterations,
                remaining: report.issues.len(),
            }),
            Outcome::Failed { failure, report, .. } => Err(match failure {
                Failure::Syntax => SessionError::Syntax(
                    report
                        .and_then(|r| r.issues.into_iter().next())
                        .map(|i| i.message)
                        .unwrap_or_else(|| "Syntax Error".to_string()),
                ),
                Failure::InputTooLarge { length, max } => {
                    SessionError::InputTooLarge { length, max }
                }
                Failure::UnsupportedLanguage(l) => SessionError::UnsupportedLanguage(l),
                Failure::Analyzer(details) => SessionError::AnalyzerInternal(details),
            }),
            Outcome::Abandoned {
                reason: AbandonReason::Oracle(e),
                ..
            } => Err(SessionError::Oracle(e)),
            Outcome::Abandoned { report, .. } => Err(SessionError::NonConvergence {
                iterations,
                remaining: report.issues.len(),
            }),
            Outcome::Cancelled { .. } => Err(SessionError::Cancelled),
        }
    }
}

/// Session-level failure, distinguishing bad input from system trouble.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0}")]
    Syntax(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Code exceeds maximum length of {max} characters ({length} given)")]
    InputTooLarge { length: usize, max: usize },
    #[error("analyzer failed: {0}")]
    AnalyzerInternal(String),
    #[error("fix oracle failed: {0}")]
    Oracle(OracleError),
    #[error("{remaining} issue(s) remain after {iterations} fix iteration(s)")]
    NonConvergence { iterations: usize, remaining: usize },
    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether the caller's code is at fault rather than the system.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SessionError::Syntax(_)
                | SessionError::UnsupportedLanguage(_)
                | SessionError::InputTooLarge { .. }
        )
    }
}
