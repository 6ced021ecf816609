//! The analyze, fix, re-analyze loop.
//!
//! A session is one sequential run of the loop over a single [`SourceUnit`].
//! Sessions share only the immutable [`Engine`] and oracle; all loop state
//! lives in the session's own [`ConvergenceState`].

mod cancel;
mod outcome;
mod state;

pub use cancel::CancelToken;
pub use outcome::{AbandonReason, Failure, Outcome, SessionError, SessionResult};
pub use state::{ConvergenceState, FixAttempt};

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use crate::analysis::{Engine, EngineError, SourceUnit};
use crate::detect::{AnalysisReport, AnalysisStatus};
use crate::oracle::{FixOracle, FixRequest, OracleError};
use crate::progress::{NoopObserver, ProgressEvent, ProgressObserver};

/// Default bound on oracle calls per session.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
/// Default wall-clock bound on one oracle call.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Loop bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Most oracle calls one session may make. At least 1.
    pub max_iterations: u32,
    /// Wall-clock bound on one fix, including any retries the oracle makes.
    pub oracle_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
        }
    }
}

/// Drives convergence sessions.
#[derive(Clone)]
pub struct Controller {
    engine: Arc<Engine>,
    oracle: Option<Arc<dyn FixOracle>>,
    settings: LoopSettings,
    observer: Arc<dyn ProgressObserver>,
}

impl Controller {
    /// A controller that only analyzes; every session ends after one pass.
    pub fn report_only(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            oracle: None,
            settings: LoopSettings::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn new(engine: Arc<Engine>, oracle: Arc<dyn FixOracle>) -> Self {
        Self {
            oracle: Some(oracle),
            ..Self::report_only(engine)
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = LoopSettings {
            max_iterations: settings.max_iterations.max(1),
            ..settings
        };
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn can_fix(&self) -> bool {
        self.oracle.is_some()
    }

    pub fn settings(&self) -> LoopSettings {
        self.settings
    }

    /// Run a session with a fresh id, requesting fixes when an oracle is set.
    pub async fn run(&self, unit: SourceUnit, cancel: &CancelToken) -> SessionResult {
        self.run_session(Uuid::new_v4(), unit, true, cancel).await
    }

    /// Run a session that only analyzes, even when an oracle is set.
    pub async fn analyze(&self, unit: SourceUnit) -> SessionResult {
        self.run_session(Uuid::new_v4(), unit, false, &CancelToken::new())
            .await
    }

    /// Run a session under a caller-chosen id.
    pub async fn run_session(
        &self,
        analysis_id: Uuid,
        unit: SourceUnit,
        fix: bool,
        cancel: &CancelToken,
    ) -> SessionResult {
        let span = tracing::info_span!(
            "session",
            analysis_id = %analysis_id,
            language = %unit.language(),
        );
        async move {
            let oracle = if fix { self.oracle.as_deref() } else { None };
            let mut session = Session {
                id: analysis_id,
                controller: self,
                oracle,
                attempts: Vec::new(),
            };
            self.observer
                .notify(ProgressEvent::started(analysis_id, "Starting analysis..."));

            let outcome = session.drive(unit, cancel).await;

            let suggestions = outcome.report().map_or(0, |r| r.issues.len());
            self.observer.notify(ProgressEvent::completed(
                analysis_id,
                completion_message(&outcome),
                outcome.has_errors(),
                suggestions,
            ));
            tracing::info!(
                outcome = outcome_name(&outcome),
                attempts = session.attempts.len(),
                "session finished"
            );

            SessionResult {
                analysis_id,
                outcome,
                attempts: session.attempts,
            }
        }
        .instrument(span)
        .await
    }
}

struct Session<'c> {
    id: Uuid,
    controller: &'c Controller,
    oracle: Option<&'c dyn FixOracle>,
    attempts: Vec<FixAttempt>,
}

impl Session<'_> {
    async fn drive(&mut self, unit: SourceUnit, cancel: &CancelToken) -> Outcome {
        let settings = self.controller.settings;
        let mut state = ConvergenceState::new(unit, settings.max_iterations);
        let mut last_good: Option<String> = None;
        let mut last_report: Option<AnalysisReport> = None;

        loop {
            let iteration = state.iteration_count();
            if cancel.is_cancelled() {
                return Outcome::Cancelled {
                    code: state.into_current().into_code(),
                    report: last_report,
                };
            }

            self.progress(
                2 * iteration,
                format!("Analyzing code (pass {})...", iteration + 1),
            );
            let report = match self.controller.engine.analyze(state.current()).await {
                Ok(report) => report,
                Err(err) => {
                    return Outcome::Failed {
                        failure: engine_failure(err),
                        report: None,
                        last_good_code: last_good,
                    }
                }
            };
            if let Some(attempt) = self.attempts.last_mut() {
                attempt.report_after = Some(report.clone());
            }
            tracing::debug!(
                iteration,
                status = report.status.as_str(),
                issues = report.issues.len(),
                "pass analyzed"
            );

            match report.status {
                AnalysisStatus::Clean => {
                    return Outcome::Done {
                        code: state.into_current().into_code(),
                        report,
                    }
                }
                AnalysisStatus::SyntaxError => {
                    return Outcome::Failed {
                        failure: Failure::Syntax,
                        report: Some(report),
                        last_good_code: last_good,
                    }
                }
                AnalysisStatus::IssuesFound => {}
            }

            last_good = Some(state.current().code().to_string());
            let Some(oracle) = self.oracle else {
                return Outcome::Reported {
                    code: state.into_current().into_code(),
                    report,
                };
            };
            if state.is_exhausted() {
                return Outcome::Abandoned {
                    code: state.into_current().into_code(),
                    report,
                    reason: AbandonReason::NonConvergence,
                };
            }
            if cancel.is_cancelled() {
                return Outcome::Cancelled {
                    code: state.into_current().into_code(),
                    report: Some(report),
                };
            }

            self.progress(
                2 * iteration + 1,
                format!(
                    "Requesting fix {} of {}...",
                    iteration + 1,
                    state.max_iterations()
                ),
            );
            let request = FixRequest {
                code: state.current().code().to_string(),
                language: state.current().language(),
                suggestions: report.suggestions(),
            };
            let mut attempt =
                FixAttempt::new(iteration + 1, state.current().code(), report.clone());

            match self.call_oracle(oracle, &request).await {
                Ok(fixed) => {
                    attempt.oracle_output = Some(fixed.clone());
                    self.attempts.push(attempt);
                    state.advance(fixed);
                    last_report = Some(report);
                }
                Err(err) => {
                    tracing::warn!(iteration, error = %err, "fix oracle failed");
                    self.attempts.push(attempt);
                    return Outcome::Abandoned {
                        code: state.into_current().into_code(),
                        report,
                        reason: AbandonReason::Oracle(err),
                    };
                }
            }
        }
    }

    async fn call_oracle(
        &self,
        oracle: &dyn FixOracle,
        request: &FixRequest,
    ) -> Result<String, OracleError> {
        let timeout = self.controller.settings.oracle_timeout;
        match tokio::time::timeout(timeout, oracle.fix(request)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(timeout)),
        }
    }

    /// Emit an intermediate event for loop phase `phase`.
    ///
    /// Phases alternate analyze and fix; there are `2 * max + 1` of them.
    fn progress(&self, phase: u32, message: String) {
        let phases = 2 * self.controller.settings.max_iterations + 1;
        let percent = 1 + (phase.min(phases) * 98) / phases;
        self.controller
            .observer
            .notify(ProgressEvent::progress(self.id, message, percent as u8));
    }
}

fn engine_failure(err: EngineError) -> Failure {
    match err {
        EngineError::UnsupportedLanguage(language) => Failure::UnsupportedLanguage(language),
        EngineError::InputTooLarge { length, max } => Failure::InputTooLarge { length, max },
        EngineError::Analyzer(e) => Failure::Analyzer(e.to_string()),
    }
}

fn completion_message(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Done { .. } => "Analysis complete",
        Outcome::Reported { .. } => "Analysis complete with issues",
        Outcome::Failed {
            failure: Failure::Syntax,
            ..
        } => "Analysis stopped on a syntax error",
        Outcome::Failed { .. } => "Analysis failed",
        Outcome::Abandoned { .. } => "Fixing abandoned with issues remaining",
        Outcome::Cancelled { .. } => "Analysis cancelled",
    }
}

fn outcome_name(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Done { .. } => "done",
        Outcome::Reported { .. } => "reported",
        Outcome::Failed { .. } => "failed",
        Outcome::Abandoned { .. } => "abandoned",
        Outcome::Cancelled { .. } => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Language;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Replays canned answers, then keeps repeating the last one.
    struct Scripted {
        answers: Mutex<Vec<Result<String, OracleError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<&str, OracleError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(
                    answers
                        .into_iter()
                        .rev()
                        .map(|a| a.map(str::to_string))
                        .collect(),
                ),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl FixOracle for Scripted {
        async fn fix(&self, _request: &FixRequest) -> Result<String, OracleError> {
            *self.calls.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.pop().unwrap()
            } else {
                answers.last().cloned().unwrap()
            }
        }
    }

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::with_defaults().unwrap())
    }

    fn js(code: &str) -> SourceUnit {
        SourceUnit::new(code, Language::JavaScript)
    }

    #[tokio::test]
    async fn test_clean_input_needs_no_oracle() {
        let oracle = Scripted::new(vec![Ok("unused")]);
        let controller = Controller::new(engine(), oracle.clone());
        let result = controller.run(js("const x = 1;\n"), &CancelToken::new()).await;

        assert!(matches!(result.outcome, Outcome::Done { .. }));
        assert_eq!(oracle.calls(), 0);
        assert!(result.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_converges_after_one_fix() {
        let oracle = Scripted::new(vec![Ok("const x = 1;\n")]);
        let controller = Controller::new(engine(), oracle.clone());
        let result = controller.run(js("var x = 1;\n"), &CancelToken::new()).await;

        assert_eq!(result.iterations(), 1);
        let attempt = &result.attempts[0];
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.input_code, "var x = 1;\n");
        assert_eq!(attempt.issue_delta(), Some(1));
        assert_eq!(result.into_result().unwrap(), "const x = 1;\n");
    }

    #[tokio::test]
    async fn test_never_exceeds_max_iterations() {
        let oracle = Scripted::new(vec![Ok("var y = 2;\n")]);
        let controller = Controller::new(engine(), oracle.clone()).with_settings(LoopSettings {
            max_iterations: 2,
            ..LoopSettings::default()
        });
        let result = controller.run(js("var x = 1;\n"), &CancelToken::new()).await;

        assert_eq!(oracle.calls(), 2);
        match &result.outcome {
            Outcome::Abandoned { code, reason, .. } => {
                assert_eq!(code, "var y = 2;\n");
                assert_eq!(*reason, AbandonReason::NonConvergence);
            }
            other => panic!("expected abandoned, got {:?}", other),
        }
        assert!(matches!(
            result.into_result(),
            Err(SessionError::NonConvergence { iterations: 2, remaining: 1 })
        ));
    }

    #[tokio::test]
    async fn test_oracle_failure_abandons_immediately() {
        let oracle = Scripted::new(vec![Err(OracleError::Status {
            status: 500,
            body: "boom".into(),
        })]);
        let controller = Controller::new(engine(), oracle.clone());
        let result = controller.run(js("var x = 1;\n"), &CancelToken::new()).await;

        assert_eq!(oracle.calls(), 1);
        assert!(matches!(
            result.outcome,
            Outcome::Abandoned {
                reason: AbandonReason::Oracle(_),
                ..
            }
        ));
        assert_eq!(result.outcome.code(), Some("var x = 1;\n"));
    }

    #[tokio::test]
    async fn test_broken_candidate_keeps_last_good_code() {
        let oracle = Scripted::new(vec![Ok("const x = ;\n")]);
        let controller = Controller::new(engine(), oracle);
        let result = controller.run(js("var x = 1;\n"), &CancelToken::new()).await;

        match result.outcome {
            Outcome::Failed {
                failure: Failure::Syntax,
                last_good_code,
                ..
            } => assert_eq!(last_good_code.as_deref(), Some("var x = 1;\n")),
            other => panic!("expected syntax failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_syntax_error_input_never_reaches_oracle() {
        let oracle = Scripted::new(vec![Ok("x = 1\n")]);
        let controller = Controller::new(engine(), oracle.clone());
        let unit = SourceUnit::new("print('Hello'", Language::Python);
        let result = controller.run(unit, &CancelToken::new()).await;

        assert_eq!(oracle.calls(), 0);
        let err = result.into_result().unwrap_err();
        assert!(err.is_input_error());
        assert!(err.to_string().contains("Syntax Error"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let oracle = Scripted::new(vec![Ok("const x = 1;\n")]);
        let controller = Controller::new(engine(), oracle.clone());
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = controller.run(js("var x = 1;\n"), &cancel).await;

        assert_eq!(oracle.calls(), 0);
        assert!(matches!(result.outcome, Outcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_progress_events_are_ordered() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let oracle = Scripted::new(vec![Ok("var y = 2;\n")]);
        let controller = Controller::new(engine(), oracle).with_observer(Arc::new(tx));
        let result = controller.run(js("var x = 1;\n"), &CancelToken::new()).await;
        drop(controller);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(ProgressEvent::AnalysisStarted { .. })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().is_some_and(|e| e.is_terminal()));
        assert!(events.iter().all(|e| e.analysis_id() == result.analysis_id));

        let percents: Vec<u8> = events.iter().map(|e| e.percent()).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
        assert!(percents[1..percents.len() - 1].iter().all(|p| (1..=99).contains(p)));
    }

    #[tokio::test]
    async fn test_oracle_timeout_is_enforced() {
        struct Slow;

        #[async_trait]
        impl FixOracle for Slow {
            async fn fix(&self, _request: &FixRequest) -> Result<String, OracleError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(String::new())
            }
        }

        let controller = Controller::new(engine(), Arc::new(Slow)).with_settings(LoopSettings {
            max_iterations: 1,
            oracle_timeout: Duration::from_millis(20),
        });
        let result = controller.run(js("var x = 1;\n"), &CancelToken::new()).await;
        assert!(matches!(
            result.outcome,
            Outcome::Abandoned {
                reason: AbandonReason::Oracle(OracleError::Timeout(_)),
                ..
            }
        ));
    }
}
