//! Integration tests for the analyze/fix loop with in-process oracles.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use codemend::analysis::{Engine, Language, SourceUnit};
use codemend::converge::{
    AbandonReason, CancelToken, Controller, LoopSettings, Outcome, SessionError,
};
use codemend::detect::{AnalysisReport, Rule};
use codemend::oracle::{FixOracle, FixRequest, OracleError};
use codemend::progress::ProgressEvent;

fn engine() -> Arc<Engine> {
    Arc::new(Engine::with_defaults().expect("default engine"))
}

fn settings(max_iterations: u32) -> LoopSettings {
    LoopSettings {
        max_iterations,
        oracle_timeout: Duration::from_secs(5),
    }
}

fn console_logs(report: &AnalysisReport) -> usize {
    report
        .issues
        .iter()
        .filter(|i| i.rule == Rule::JsConsoleLog)
        .count()
}

/// Removes the first line mentioning `console.log` per call.
#[derive(Default)]
struct DropOneLog {
    calls: AtomicU32,
}

#[async_trait]
impl FixOracle for DropOneLog {
    async fn fix(&self, request: &FixRequest) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut dropped = false;
        let lines: Vec<&str> = request
            .code
            .lines()
            .filter(|line| {
                if !dropped && line.contains("console.log") {
                    dropped = true;
                    return false;
                }
                true
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Returns its input unchanged.
#[derive(Default)]
struct Echo {
    calls: AtomicU32,
}

#[async_trait]
impl FixOracle for Echo {
    async fn fix(&self, request: &FixRequest) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(request.code.clone())
    }
}

/// Always fails.
struct Down;

#[async_trait]
impl FixOracle for Down {
    async fn fix(&self, _request: &FixRequest) -> Result<String, OracleError> {
        Err(OracleError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

const THREE_LOGS: &str = "console.log('a');\nconsole.log('b');\nconsole.log('c');";

#[tokio::test]
async fn test_console_log_count_strictly_decreases() {
    let oracle = Arc::new(DropOneLog::default());
    let controller = Controller::new(engine(), oracle.clone()).with_settings(settings(3));

    let result = controller
        .run(
            SourceUnit::new(THREE_LOGS, Language::JavaScript),
            &CancelToken::new(),
        )
        .await;

    assert!(matches!(result.outcome, Outcome::Done { .. }));
    assert_eq!(result.iterations(), 3);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);

    let counts: Vec<usize> = result
        .attempts
        .iter()
        .map(|a| console_logs(&a.report_before))
        .collect();
    assert_eq!(counts, vec![3, 2, 1]);
    for attempt in &result.attempts {
        let after = attempt.report_after.as_ref().unwrap();
        assert!(console_logs(after) < console_logs(&attempt.report_before));
    }
    assert_eq!(result.into_result().unwrap(), "");
}

#[tokio::test]
async fn test_bound_reached_before_convergence() {
    let oracle = Arc::new(DropOneLog::default());
    let controller = Controller::new(engine(), oracle.clone()).with_settings(settings(2));

    let result = controller
        .run(
            SourceUnit::new(THREE_LOGS, Language::JavaScript),
            &CancelToken::new(),
        )
        .await;

    match &result.outcome {
        Outcome::Abandoned {
            code,
            report,
            reason,
        } => {
            assert_eq!(reason, &AbandonReason::NonConvergence);
            assert_eq!(code, "console.log('c');");
            assert_eq!(console_logs(report), 1);
        }
        other => panic!("expected Abandoned, got {:?}", other),
    }
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        result.into_result(),
        Err(SessionError::NonConvergence {
            iterations: 2,
            remaining: 1
        })
    );
}

#[tokio::test]
async fn test_unhelpful_oracle_is_bounded() {
    let oracle = Arc::new(Echo::default());
    let controller = Controller::new(engine(), oracle.clone()).with_settings(settings(4));

    let result = controller
        .run(
            SourceUnit::new("var x = 1;", Language::JavaScript),
            &CancelToken::new(),
        )
        .await;

    assert!(matches!(result.outcome, Outcome::Abandoned { .. }));
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.attempts.len(), 4);
}

#[tokio::test]
async fn test_clean_input_is_idempotent() {
    let oracle = Arc::new(Echo::default());
    let controller = Controller::new(engine(), oracle.clone());
    let unit = SourceUnit::new("x = 1", Language::Python);

    for _ in 0..2 {
        let result = controller.run(unit.clone(), &CancelToken::new()).await;
        assert!(matches!(result.outcome, Outcome::Done { .. }));
        assert!(!result.was_fixed());
    }
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oracle_failure_keeps_last_code() {
    let controller = Controller::new(engine(), Arc::new(Down));

    let result = controller
        .run(
            SourceUnit::new("var x = 1;", Language::JavaScript),
            &CancelToken::new(),
        )
        .await;

    assert_eq!(result.outcome.code(), Some("var x = 1;"));
    match result.into_result() {
        Err(SessionError::Oracle(OracleError::Status { status, .. })) => assert_eq!(status, 503),
        other => panic!("expected oracle error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_syntax_error_is_input_error() {
    let oracle = Arc::new(Echo::default());
    let controller = Controller::new(engine(), oracle.clone());

    let result = controller
        .run(
            SourceUnit::new("print('Hello'", Language::Python),
            &CancelToken::new(),
        )
        .await;

    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    let err = result.into_result().unwrap_err();
    assert!(err.is_input_error());
    assert!(err.to_string().contains("Syntax Error"));
}

#[tokio::test]
async fn test_progress_events_are_ordered() {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let controller = Controller::new(engine(), Arc::new(DropOneLog::default()))
        .with_settings(settings(3))
        .with_observer(Arc::new(tx));

    let result = controller
        .run(
            SourceUnit::new(THREE_LOGS, Language::JavaScript),
            &CancelToken::new(),
        )
        .await;
    drop(controller);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(events.first().map(|e| e.name()), Some("analysisStarted"));
    assert_eq!(events.last().map(|e| e.name()), Some("analysisCompleted"));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.iter().all(|e| e.analysis_id() == result.analysis_id));

    let percents: Vec<u8> = events.iter().map(|e| e.percent()).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
}

#[tokio::test]
async fn test_concurrent_sessions_share_an_observer() {
    let (events, mut rx) = broadcast::channel::<ProgressEvent>(256);
    let controller = Controller::new(engine(), Arc::new(DropOneLog::default()))
        .with_settings(settings(3))
        .with_observer(Arc::new(events.clone()));

    let sessions: Vec<_> = (0..4)
        .map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .run(
                        SourceUnit::new(THREE_LOGS, Language::JavaScript),
                        &CancelToken::new(),
                    )
                    .await
            })
        })
        .collect();

    let mut ids = Vec::new();
    for session in sessions {
        let result = session.await.unwrap();
        assert!(matches!(result.outcome, Outcome::Done { .. }));
        ids.push(result.analysis_id);
    }
    drop(controller);
    drop(events);

    let mut completed = Vec::new();
    while let Ok(event) = rx.recv().await {
        if let ProgressEvent::AnalysisCompleted { .. } = event {
            completed.push(event.analysis_id());
        }
    }

    ids.sort();
    completed.sort();
    assert_eq!(ids, completed);
}

#[tokio::test]
async fn test_cancelled_session_makes_no_oracle_calls() {
    let oracle = Arc::new(Echo::default());
    let controller = Controller::new(engine(), oracle.clone());
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = controller
        .run(SourceUnit::new("var x = 1;", Language::JavaScript), &cancel)
        .await;

    assert!(matches!(result.outcome, Outcome::Cancelled { .. }));
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.into_result(), Err(SessionError::Cancelled));
}
