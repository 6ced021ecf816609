//! Language dispatch and input limits.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use super::{
    Analyzer, AnalyzerError, EngineError, ExternalAnalyzer, JavaScriptAnalyzer, Language,
    LanguageAnalyzer, PythonAnalyzer, SourceUnit,
};
use crate::detect::{AnalysisReport, RulePolicy};

/// Largest snippet accepted by default, in characters.
pub const DEFAULT_MAX_CODE_LENGTH: usize = 50_000;

/// One analyzer per supported language.
///
/// Python may be routed to an external process; the native analyzer is kept
/// for batch scans either way.
pub struct AnalyzerSet {
    javascript: Arc<JavaScriptAnalyzer>,
    python: Arc<PythonAnalyzer>,
    python_external: Option<ExternalAnalyzer>,
}

impl AnalyzerSet {
    /// Native analyzers for every language sharing one rule policy.
    pub fn native(policy: Arc<RulePolicy>) -> Result<Self, AnalyzerError> {
        Ok(Self {
            javascript: Arc::new(JavaScriptAnalyzer::with_policy(Arc::clone(&policy))?),
            python: Arc::new(PythonAnalyzer::with_policy(policy)?),
            python_external: None,
        })
    }

    /// Route Python analysis through an external program.
    pub fn with_python_backend(mut self, external: ExternalAnalyzer) -> Self {
        self.python_external = Some(external);
        self
    }

    /// The analyzer that answers requests for `language`.
    pub fn get(&self, language: Language) -> &dyn Analyzer {
        match language {
            Language::JavaScript => &*self.javascript,
            Language::Python => match &self.python_external {
                Some(external) => external,
                None => &*self.python,
            },
        }
    }

    /// The in-process analyzer for `language`.
    pub fn native_for(&self, language: Language) -> &dyn LanguageAnalyzer {
        match language {
            Language::JavaScript => &*self.javascript,
            Language::Python => &*self.python,
        }
    }

    /// Owned handle to the in-process analyzer, for use on another thread.
    pub fn shared_native(&self, language: Language) -> Arc<dyn LanguageAnalyzer> {
        match language {
            Language::JavaScript => self.javascript.clone(),
            Language::Python => self.python.clone(),
        }
    }

    pub fn is_external(&self, language: Language) -> bool {
        language == Language::Python && self.python_external.is_some()
    }
}

/// Entry point for analyzing one [`SourceUnit`].
///
/// Immutable after construction and shared between sessions behind an `Arc`.
pub struct Engine {
    analyzers: AnalyzerSet,
    max_code_length: usize,
}

impl Engine {
    pub fn new(analyzers: AnalyzerSet, max_code_length: usize) -> Self {
        Self {
            analyzers,
            max_code_length,
        }
    }

    /// Native analyzers, default rules and limits.
    pub fn with_defaults() -> Result<Self, AnalyzerError> {
        Ok(Self::new(
            AnalyzerSet::native(Arc::new(RulePolicy::default()))?,
            DEFAULT_MAX_CODE_LENGTH,
        ))
    }

    pub fn max_code_length(&self) -> usize {
        self.max_code_length
    }

    pub fn analyzers(&self) -> &AnalyzerSet {
        &self.analyzers
    }

    /// Reject input longer than the configured limit.
    pub fn check_length(&self, unit: &SourceUnit) -> Result<(), EngineError> {
        let length = unit.char_len();
        if length > self.max_code_length {
            return Err(EngineError::InputTooLarge {
                length,
                max: self.max_code_length,
            });
        }
        Ok(())
    }

    /// Analyze with whichever backend is configured for the unit's language.
    pub async fn analyze(&self, unit: &SourceUnit) -> Result<AnalysisReport, EngineError> {
        self.check_length(unit)?;
        let language = unit.language();
        let span = tracing::debug_span!(
            "analyze",
            language = %language,
            external = self.analyzers.is_external(language),
        );
        async {
            let started = Instant::now();
            let report = if self.analyzers.is_external(language) {
                self.analyzers.get(language).analyze(unit.code()).await?
            } else {
                // Parsing and the detector walk are CPU-bound.
                let analyzer = self.analyzers.shared_native(language);
                let code = unit.code().to_owned();
                tokio::task::spawn_blocking(move || analyzer.analyze_source(&code))
                    .await
                    .map_err(|e| AnalyzerError::Task(e.to_string()))??
            };
            tracing::debug!(
                status = report.status.as_str(),
                issues = report.issues.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "analysis finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Analyze in-process on the calling thread.
    pub fn analyze_native(&self, unit: &SourceUnit) -> Result<AnalysisReport, EngineError> {
        self.check_length(unit)?;
        let report = self
            .analyzers
            .native_for(unit.language())
            .analyze_source(unit.code())?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{AnalysisStatus, Rule};

    #[test]
    fn test_length_limit_counts_characters() {
        let engine = Engine::new(
            AnalyzerSet::native(Arc::new(RulePolicy::default())).unwrap(),
            4,
        );
        let ok = SourceUnit::new("ééé", Language::Python);
        assert!(engine.check_length(&ok).is_ok());

        let long = SourceUnit::new("x = 1", Language::Python);
        let err = engine.analyze_native(&long).unwrap_err();
        assert!(matches!(err, EngineError::InputTooLarge { length: 5, max: 4 }));
    }

    #[tokio::test]
    async fn test_dispatch_by_language() {
        let engine = Engine::with_defaults().unwrap();
        let js = SourceUnit::new("console.log('hi');\n", Language::JavaScript);
        let report = engine.analyze(&js).await.unwrap();
        assert_eq!(report.count(Rule::JsConsoleLog), 1);

        let py = SourceUnit::new("x = 1\n", Language::Python);
        let report = engine.analyze(&py).await.unwrap();
        assert_eq!(report.status, AnalysisStatus::Clean);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_native_analyses_agree() {
        let engine = Arc::new(Engine::with_defaults().unwrap());
        let code = "var total = 0;\nconsole.log(total);\n".repeat(500);
        let expected = engine
            .analyze_native(&SourceUnit::new(code.clone(), Language::JavaScript))
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let unit = SourceUnit::new(code.clone(), Language::JavaScript);
                tokio::spawn(async move { engine.analyze(&unit).await.unwrap() })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), expected);
        }
    }

    #[test]
    fn test_disabled_rule_is_not_reported() {
        let policy = RulePolicy::new().disable(Rule::JsConsoleLog);
        let engine = Engine::new(
            AnalyzerSet::native(Arc::new(policy)).unwrap(),
            DEFAULT_MAX_CODE_LENGTH,
        );
        let unit = SourceUnit::new("console.log('hi');\n", Language::JavaScript);
        let report = engine.analyze_native(&unit).unwrap();
        assert_eq!(report.status, AnalysisStatus::Clean, "{:?}", report.issues);
    }
}
