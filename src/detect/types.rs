//! Core types for detection results.

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

/// Severity levels for issues.
///
/// Ordered so that `Error > Warning > Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Prefix used when rendering an issue as a suggestion string.
    pub fn marker(&self) -> &'static str {
        match self {
            Severity::Error => "❌",
            Severity::Warning => "⚠️",
            Severity::Info => "💡",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// Marker identifying which rule produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rule {
    // Engine markers
    #[serde(rename = "syntax-error")]
    SyntaxError,
    #[serde(rename = "analyzer-internal")]
    AnalyzerInternal,
    #[serde(rename = "all-clear")]
    AllClear,
    /// Issue reported by an external analyzer that carries no rule id.
    #[serde(rename = "external")]
    External,

    // JavaScript
    #[serde(rename = "js-redeclaration")]
    JsRedeclaration,
    #[serde(rename = "js-undefined-variable")]
    JsUndefinedVariable,
    #[serde(rename = "js-unreachable-code")]
    JsUnreachableCode,
    #[serde(rename = "js-infinite-loop")]
    JsInfiniteLoop,
    #[serde(rename = "js-eval")]
    JsEval,
    #[serde(rename = "js-global-mutation")]
    JsGlobalMutation,
    #[serde(rename = "js-unknown-console-member")]
    JsUnknownConsoleMember,
    #[serde(rename = "js-console-log")]
    JsConsoleLog,
    #[serde(rename = "js-no-var")]
    JsNoVar,
    #[serde(rename = "js-empty-arrow")]
    JsEmptyArrow,

    // Python
    #[serde(rename = "py-dangerous-eval")]
    PyDangerousEval,
    #[serde(rename = "py-hardcoded-password")]
    PyHardcodedPassword,
    #[serde(rename = "py-os-command")]
    PyOsCommand,
    #[serde(rename = "py-infinite-loop")]
    PyInfiniteLoop,
    #[serde(rename = "py-mutable-default")]
    PyMutableDefault,
    #[serde(rename = "py-bare-except")]
    PyBareExcept,
    #[serde(rename = "py-unused-import")]
    PyUnusedImport,
    #[serde(rename = "py-unused-variable")]
    PyUnusedVariable,
    #[serde(rename = "py-print")]
    PyPrint,
    #[serde(rename = "py-builtin-shadowing")]
    PyBuiltinShadowing,
    #[serde(rename = "py-nested-loops")]
    PyNestedLoops,
}

impl Rule {
    /// Every rule, engine markers first.
    pub const ALL: [Rule; 25] = [
        Rule::SyntaxError,
        Rule::AnalyzerInternal,
        Rule::AllClear,
        Rule::External,
        Rule::JsRedeclaration,
        Rule::JsUndefinedVariable,
        Rule::JsUnreachableCode,
        Rule::JsInfiniteLoop,
        Rule::JsEval,
        Rule::JsGlobalMutation,
        Rule::JsUnknownConsoleMember,
        Rule::JsConsoleLog,
        Rule::JsNoVar,
        Rule::JsEmptyArrow,
        Rule::PyDangerousEval,
        Rule::PyHardcodedPassword,
        Rule::PyOsCommand,
        Rule::PyInfiniteLoop,
        Rule::PyMutableDefault,
        Rule::PyBareExcept,
        Rule::PyUnusedImport,
        Rule::PyUnusedVariable,
        Rule::PyPrint,
        Rule::PyBuiltinShadowing,
        Rule::PyNestedLoops,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::SyntaxError => "syntax-error",
            Rule::AnalyzerInternal => "analyzer-internal",
            Rule::AllClear => "all-clear",
            Rule::External => "external",
            Rule::JsRedeclaration => "js-redeclaration",
            Rule::JsUndefinedVariable => "js-undefined-variable",
            Rule::JsUnreachableCode => "js-unreachable-code",
            Rule::JsInfiniteLoop => "js-infinite-loop",
            Rule::JsEval => "js-eval",
            Rule::JsGlobalMutation => "js-global-mutation",
            Rule::JsUnknownConsoleMember => "js-unknown-console-member",
            Rule::JsConsoleLog => "js-console-log",
            Rule::JsNoVar => "js-no-var",
            Rule::JsEmptyArrow => "js-empty-arrow",
            Rule::PyDangerousEval => "py-dangerous-eval",
            Rule::PyHardcodedPassword => "py-hardcoded-password",
            Rule::PyOsCommand => "py-os-command",
            Rule::PyInfiniteLoop => "py-infinite-loop",
            Rule::PyMutableDefault => "py-mutable-default",
            Rule::PyBareExcept => "py-bare-except",
            Rule::PyUnusedImport => "py-unused-import",
            Rule::PyUnusedVariable => "py-unused-variable",
            Rule::PyPrint => "py-print",
            Rule::PyBuiltinShadowing => "py-builtin-shadowing",
            Rule::PyNestedLoops => "py-nested-loops",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Rule::ALL.iter().copied().find(|rule| rule.as_str() == s)
    }

    /// Severity an issue of this rule gets unless configuration overrides it.
    pub fn default_severity(&self) -> Severity {
        match self {
            Rule::SyntaxError
            | Rule::AnalyzerInternal
            | Rule::JsRedeclaration
            | Rule::JsUndefinedVariable
            | Rule::JsEval
            | Rule::JsUnknownConsoleMember
            | Rule::PyDangerousEval => Severity::Error,
            Rule::AllClear | Rule::External => Severity::Info,
            _ => Severity::Warning,
        }
    }

    /// Engine markers are not produced by detectors and cannot be disabled.
    pub fn is_engine_marker(&self) -> bool {
        matches!(
            self,
            Rule::SyntaxError | Rule::AnalyzerInternal | Rule::AllClear | Rule::External
        )
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position of an issue in the analyzed snippet (1-indexed, character columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    /// End column on `line`; multi-line nodes are clamped to the end of the line.
    pub end_column: usize,
}

fn char_count(bytes: &[u8]) -> usize {
    std::str::from_utf8(bytes).map_or(bytes.len(), |text| text.chars().count())
}

impl Location {
    pub fn from_node(node: Node<'_>, source: &[u8]) -> Self {
        let start = node.start_position();
        let start_byte = node.start_byte();
        let line_start = start_byte.saturating_sub(start.column);
        let column = char_count(&source[line_start..start_byte]);

        let span = &source[start_byte..node.end_byte()];
        let first_line = span
            .iter()
            .position(|b| *b == b'\n')
            .map_or(span, |newline| &span[..newline]);
        Location {
            line: start.row + 1,
            column: column + 1,
            end_column: column + char_count(first_line) + 1,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single detected issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub rule: Rule,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Issue {
    pub fn new(rule: Rule, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            rule,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// The sentinel some analyzers emit when they found nothing.
    pub fn all_clear(message: impl Into<String>) -> Self {
        Self::new(Rule::AllClear, Severity::Info, message)
    }

    /// Render as the marker-prefixed string exposed to clients and the oracle.
    pub fn suggestion(&self) -> String {
        let marker = if self.rule == Rule::AllClear {
            "✅"
        } else {
            self.severity.marker()
        };
        format!("{} {}", marker, self.message)
    }
}

/// Overall verdict of one analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Clean,
    IssuesFound,
    SyntaxError,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Clean => "clean",
            AnalysisStatus::IssuesFound => "issues_found",
            AnalysisStatus::SyntaxError => "syntax_error",
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated result of one analysis pass.
///
/// Built only by the aggregator so that `status` always agrees with `issues`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub status: AnalysisStatus,
    pub issues: Vec<Issue>,
}

impl AnalysisReport {
    pub(crate) fn from_parts(status: AnalysisStatus, issues: Vec<Issue>) -> Self {
        Self { status, issues }
    }

    pub fn is_clean(&self) -> bool {
        self.status == AnalysisStatus::Clean
    }

    /// Check if there are any error-severity issues.
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Marker-prefixed suggestion strings in report order.
    pub fn suggestions(&self) -> Vec<String> {
        self.issues.iter().map(Issue::suggestion).collect()
    }

    /// Number of issues produced by `rule`.
    pub fn count(&self, rule: Rule) -> usize {
        self.issues.iter().filter(|i| i.rule == rule).count()
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }
}
