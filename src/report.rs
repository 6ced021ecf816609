//! Output formatting for codemend results.
//!
//! Supports two output formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: structured output for programmatic consumption
//!
//! Also defines the JSON bodies returned by the HTTP service.

use colored::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::Language;
use crate::converge::{Outcome, SessionResult};
use crate::detect::{AnalysisReport, AnalysisStatus, Issue, Severity};

/// Message sent with a clean result.
pub const CLEAN_MESSAGE: &str = "Code looks clean!";

// =============================================================================
// Response bodies
// =============================================================================

/// Body of a successful `/api/analyze` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub analysis_id: Uuid,
    /// `done`, `fixed`, `issues_found` or `syntax_error`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_good_code: Option<String>,
}

impl AnalyzeResponse {
    fn new(analysis_id: Uuid, status: &str) -> Self {
        Self {
            analysis_id,
            status: status.to_string(),
            message: None,
            suggestions: None,
            fixed_code: None,
            iterations: None,
            converged: None,
            reason: None,
            last_good_code: None,
        }
    }

    pub fn clean(analysis_id: Uuid) -> Self {
        Self {
            message: Some(CLEAN_MESSAGE.to_string()),
            suggestions: Some(Vec::new()),
            ..Self::new(analysis_id, "done")
        }
    }

    pub fn fixed(analysis_id: Uuid, fixed_code: String, iterations: usize) -> Self {
        Self {
            fixed_code: Some(fixed_code),
            iterations: Some(iterations),
            ..Self::new(analysis_id, "fixed")
        }
    }

    pub fn issues_found(analysis_id: Uuid, report: &AnalysisReport) -> Self {
        Self {
            suggestions: Some(report.suggestions()),
            ..Self::new(analysis_id, AnalysisStatus::IssuesFound.as_str())
        }
    }

    pub fn syntax_error(
        analysis_id: Uuid,
        report: &AnalysisReport,
        last_good_code: Option<String>,
    ) -> Self {
        Self {
            suggestions: Some(report.suggestions()),
            last_good_code,
            ..Self::new(analysis_id, AnalysisStatus::SyntaxError.as_str())
        }
    }

    pub fn abandoned(
        analysis_id: Uuid,
        code: String,
        report: &AnalysisReport,
        reason: String,
        iterations: usize,
    ) -> Self {
        Self {
            suggestions: Some(report.suggestions()),
            fixed_code: Some(code),
            iterations: Some(iterations),
            converged: Some(false),
            reason: Some(reason),
            ..Self::new(analysis_id, AnalysisStatus::IssuesFound.as_str())
        }
    }
}

/// Body of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Body of a `/api/report` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub language: Language,
    pub code: String,
    pub suggestions: Vec<String>,
}

// =============================================================================
// JSON Format
// =============================================================================

/// One analyzed file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: String,
    pub language: Language,
    pub report: AnalysisReport,
}

#[derive(Serialize, Deserialize)]
pub struct JsonReport {
    pub version: String,
    pub path: String,
    pub files_scanned: usize,
    pub clean: bool,
    pub errors: usize,
    pub warnings: usize,
    pub files: Vec<JsonFile>,
}

#[derive(Serialize, Deserialize)]
pub struct JsonFile {
    pub path: String,
    pub language: Language,
    pub status: AnalysisStatus,
    pub issues: Vec<JsonIssue>,
}

#[derive(Serialize, Deserialize)]
pub struct JsonIssue {
    pub rule: String,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    pub message: String,
}

fn issue_to_json(issue: &Issue) -> JsonIssue {
    JsonIssue {
        rule: issue.rule.as_str().to_string(),
        severity: issue.severity.to_string(),
        line: issue.location.map(|l| l.line),
        column: issue.location.map(|l| l.column),
        message: issue.message.clone(),
    }
}

/// Build the JSON document for a set of analyzed files.
pub fn json_report(path: &str, files: &[FileReport]) -> JsonReport {
    JsonReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        path: path.to_string(),
        files_scanned: files.len(),
        clean: files.iter().all(|f| f.report.is_clean()),
        errors: files.iter().map(|f| f.report.error_count()).sum(),
        warnings: files.iter().map(|f| f.report.warning_count()).sum(),
        files: files
            .iter()
            .map(|f| JsonFile {
                path: f.path.clone(),
                language: f.language,
                status: f.report.status,
                issues: f.report.issues.iter().map(issue_to_json).collect(),
            })
            .collect(),
    }
}

/// Write results in JSON format.
pub fn write_json(path: &str, files: &[FileReport]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&json_report(path, files))?;
    println!("{}", json);
    Ok(())
}

/// Write a fix session in JSON format.
pub fn write_session_json(result: &SessionResult) -> anyhow::Result<()> {
    let body = session_response(result);
    let json = serde_json::to_string_pretty(&body)?;
    println!("{}", json);
    Ok(())
}

/// Response body describing a finished session.
///
/// Returns `None` for outcomes that are failures of the system rather than
/// results: analyzer breakage, oversized input, unsupported language and
/// cancellation.
pub fn session_response(result: &SessionResult) -> Option<AnalyzeResponse> {
    let id = result.analysis_id;
    let body = match &result.outcome {
        Outcome::Done { code, .. } if result.was_fixed() => {
            AnalyzeResponse::fixed(id, code.clone(), result.iterations())
        }
        Outcome::Done { .. } => AnalyzeResponse::clean(id),
        Outcome::Reported { report, .. } => AnalyzeResponse::issues_found(id, report),
        Outcome::Failed {
            report: Some(report),
            last_good_code,
            ..
        } if report.status == AnalysisStatus::SyntaxError => {
            AnalyzeResponse::syntax_error(id, report, last_good_code.clone())
        }
        Outcome::Abandoned {
            code,
            report,
            reason,
        } => AnalyzeResponse::abandoned(
            id,
            code.clone(),
            report,
            reason.to_string(),
            result.iterations(),
        ),
        Outcome::Failed { .. } | Outcome::Cancelled { .. } => return None,
    };
    Some(body)
}

// =============================================================================
// Pretty Format
// =============================================================================

fn write_header(label: &str, path: &str) {
    println!();
    print!("  ");
    print!("{}", "codemend".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();
    print!("  {}", label.dimmed());
    println!("{}", path);
    println!();
}

/// Write results in pretty (human-readable) format.
pub fn write_pretty(path: &str, files: &[FileReport]) {
    write_header("Analyzing: ", path);

    for file in files.iter().filter(|f| !f.report.is_clean()) {
        write_file(file);
    }

    let errors: usize = files.iter().map(|f| f.report.error_count()).sum();
    let warnings: usize = files.iter().map(|f| f.report.warning_count()).sum();
    let dirty = files.iter().filter(|f| !f.report.is_clean()).count();

    print!("  {}", format!("Files: {}", files.len()).dimmed());
    print!("  Errors: ");
    write_count(errors, Severity::Error);
    print!("  Warnings: ");
    write_count(warnings, Severity::Warning);
    print!("  ");
    if dirty == 0 {
        print!("{}", "✓ CLEAN".green());
    } else {
        print!("{}", format!("✗ {} file(s) with issues", dirty).red());
    }
    println!();
    println!();
}

fn write_file(file: &FileReport) {
    println!(
        "  {} {}",
        file.path.blue(),
        format!("({}, {})", file.language, file.report.status.as_str()).dimmed()
    );
    println!();
    write_issues(&file.report.issues);
}

fn write_issues(issues: &[Issue]) {
    for issue in issues {
        write_severity_tag(&issue.severity);
        print!("   ");
        print!("{:<26}", issue.rule.as_str().dimmed());
        if let Some(location) = issue.location {
            print!("{}", format!("{}:{}", location.line, location.column).dimmed());
        }
        println!();
        println!("            {}", issue.message);
        println!();
    }
}

fn write_severity_tag(severity: &Severity) {
    match severity {
        Severity::Error => print!("    {} ", "ERROR".red()),
        Severity::Warning => print!("    {} ", "WARN ".yellow()),
        Severity::Info => print!("    {} ", "INFO ".blue()),
    }
}

fn write_count(count: usize, severity: Severity) {
    let text = count.to_string();
    match (count, severity) {
        (0, _) => print!("{}", text.green()),
        (_, Severity::Error) => print!("{}", text.red().bold()),
        _ => print!("{}", text.yellow()),
    }
}

/// Write a fix session in pretty format.
pub fn write_session_pretty(path: &str, result: &SessionResult) {
    write_header("Fixing: ", path);

    for attempt in &result.attempts {
        let before = attempt.report_before.issues.len();
        let after = attempt
            .report_after
            .as_ref()
            .map(|r| r.issues.len().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {} issue(s) -> {}",
            format!("Attempt {}:", attempt.attempt_number).bold(),
            before,
            after
        );
    }
    if !result.attempts.is_empty() {
        println!();
    }

    let (label, remaining) = match &result.outcome {
        Outcome::Done { .. } => ("✓ CONVERGED".green(), None),
        Outcome::Reported { report, .. } => ("✗ ISSUES FOUND".red(), Some(report)),
        Outcome::Abandoned { report, reason, .. } => {
            (format!("✗ ABANDONED ({})", reason).red(), Some(report))
        }
        Outcome::Failed { report, failure, .. } => {
            (format!("✗ FAILED ({:?})", failure).red(), report.as_ref())
        }
        Outcome::Cancelled { report, .. } => ("✗ CANCELLED".yellow(), report.as_ref()),
    };

    if let Some(report) = remaining {
        write_issues(&report.issues);
    }
    print!("  {}", format!("Iterations: {}", result.iterations()).dimmed());
    println!("  {}", label);
    println!();
}
