//! Out-of-process analyzer backend.
//!
//! The child receives the snippet on stdin and must print a JSON array of
//! marker-prefixed suggestion strings on stdout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Analyzer, AnalyzerError};
use crate::detect::{aggregate, AnalysisReport, Issue, Rule, Severity};

/// Default wall-clock limit for one external analysis.
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs an external program per analysis.
#[derive(Debug, Clone)]
pub struct ExternalAnalyzer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalAnalyzer {
    /// Build from an argv-style command line.
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, AnalyzerError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AnalyzerError::Spawn {
                command: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn run(&self, code: &str) -> Result<Vec<String>, AnalyzerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AnalyzerError::Spawn {
                command: self.command_line(),
                source,
            })?;

        let mut stdin = child.stdin.take();
        let feed = async move {
            if let Some(stdin) = stdin.as_mut() {
                stdin.write_all(code.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            drop(stdin);
            Ok::<_, std::io::Error>(())
        };

        let (fed, output) = tokio::time::timeout(self.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| AnalyzerError::Timeout(self.timeout))?;

        // A child that answers without reading its input closes the pipe early.
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
        }
        let output = output?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(AnalyzerError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            return Err(AnalyzerError::Stderr(stderr));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| AnalyzerError::MalformedOutput(e.to_string()))?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| AnalyzerError::MalformedOutput(e.to_string()))
    }
}

#[async_trait]
impl Analyzer for ExternalAnalyzer {
    async fn analyze(&self, code: &str) -> Result<AnalysisReport, AnalyzerError> {
        tracing::debug!(command = %self.command_line(), "running external analyzer");
        let suggestions = self.run(code).await?;
        let issues = suggestions.iter().map(|s| parse_suggestion(s)).collect();
        Ok(aggregate(issues))
    }
}

/// Map a marker-prefixed suggestion string back to an issue.
pub fn parse_suggestion(line: &str) -> Issue {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix('✅') {
        return Issue::all_clear(rest.trim_start());
    }
    if let Some(rest) = line.strip_prefix('❌') {
        let message = rest.trim_start();
        let rule = if message.starts_with("Syntax Error") {
            Rule::SyntaxError
        } else {
            Rule::External
        };
        return Issue::new(rule, Severity::Error, message);
    }
    if let Some(rest) = line.strip_prefix('⚠') {
        let message = rest.trim_start_matches('\u{fe0f}').trim_start();
        return Issue::new(Rule::External, Severity::Warning, message);
    }
    let message = line.strip_prefix('💡').map(str::trim_start).unwrap_or(line);
    Issue::new(Rule::External, Severity::Info, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::AnalysisStatus;

    #[test]
    fn test_parse_suggestion_markers() {
        let error = parse_suggestion("❌ Security Risk: Avoid using 'eval()'.");
        assert_eq!(error.severity, Severity::Error);
        assert_eq!(error.message, "Security Risk: Avoid using 'eval()'.");

        let warning = parse_suggestion("⚠️ Unused import detected: os");
        assert_eq!(warning.severity, Severity::Warning);
        assert_eq!(warning.message, "Unused import detected: os");

        let clear = parse_suggestion("✅ Code looks clean!");
        assert_eq!(clear.rule, Rule::AllClear);

        let syntax = parse_suggestion("❌ Syntax Error: invalid syntax (line 1)");
        assert_eq!(syntax.rule, Rule::SyntaxError);

        let plain = parse_suggestion("consider a docstring");
        assert_eq!(plain.severity, Severity::Info);
        assert_eq!(plain.message, "consider a docstring");
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(ExternalAnalyzer::new(&[], DEFAULT_EXTERNAL_TIMEOUT).is_err());
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn sh(script: &str, timeout: Duration) -> ExternalAnalyzer {
            let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
            ExternalAnalyzer::new(&command, timeout).unwrap()
        }

        #[tokio::test]
        async fn test_reads_json_suggestions() {
            let analyzer = sh(
                r#"cat > /dev/null; printf '%s' '["⚠️ Unused import detected: os", "✅ Code looks clean!"]'"#,
                DEFAULT_EXTERNAL_TIMEOUT,
            );
            let report = analyzer.analyze("import os\n").await.unwrap();
            assert_eq!(report.status, AnalysisStatus::IssuesFound);
            assert_eq!(report.issues.len(), 1, "sentinel should be filtered");
            assert_eq!(report.issues[0].message, "Unused import detected: os");
        }

        #[tokio::test]
        async fn test_only_sentinel_is_clean() {
            let analyzer = sh(r#"printf '%s' '["✅ Code looks clean!"]'"#, DEFAULT_EXTERNAL_TIMEOUT);
            let report = analyzer.analyze("x = 1\n").await.unwrap();
            assert!(report.is_clean());
        }

        #[tokio::test]
        async fn test_syntax_error_string_sets_status() {
            let analyzer = sh(
                r#"printf '%s' '["❌ Syntax Error: unexpected EOF while parsing"]'"#,
                DEFAULT_EXTERNAL_TIMEOUT,
            );
            let report = analyzer.analyze("print('x'").await.unwrap();
            assert_eq!(report.status, AnalysisStatus::SyntaxError);
        }

        #[tokio::test]
        async fn test_non_zero_exit_is_analyzer_error() {
            let analyzer = sh("exit 3", DEFAULT_EXTERNAL_TIMEOUT);
            let err = analyzer.analyze("x = 1\n").await.unwrap_err();
            assert!(matches!(err, AnalyzerError::Failed { .. }), "got {:?}", err);
        }

        #[tokio::test]
        async fn test_stderr_output_is_analyzer_error() {
            let analyzer = sh("echo boom >&2; echo '[]'", DEFAULT_EXTERNAL_TIMEOUT);
            let err = analyzer.analyze("x = 1\n").await.unwrap_err();
            assert!(matches!(err, AnalyzerError::Stderr(ref s) if s == "boom"), "got {:?}", err);
        }

        #[tokio::test]
        async fn test_malformed_output_is_analyzer_error() {
            let analyzer = sh("echo 'not json'", DEFAULT_EXTERNAL_TIMEOUT);
            let err = analyzer.analyze("x = 1\n").await.unwrap_err();
            assert!(matches!(err, AnalyzerError::MalformedOutput(_)), "got {:?}", err);
        }

        #[tokio::test]
        async fn test_timeout_kills_child() {
            let analyzer = sh("sleep 5", Duration::from_millis(100));
            let err = analyzer.analyze("x = 1\n").await.unwrap_err();
            assert!(matches!(err, AnalyzerError::Timeout(_)), "got {:?}", err);
        }

        #[tokio::test]
        async fn test_missing_program_is_spawn_error() {
            let command = vec!["codemend-no-such-program".to_string()];
            let analyzer = ExternalAnalyzer::new(&command, DEFAULT_EXTERNAL_TIMEOUT).unwrap();
            let err = analyzer.analyze("x = 1\n").await.unwrap_err();
            assert!(matches!(err, AnalyzerError::Spawn { .. }), "got {:?}", err);
        }
    }
}
