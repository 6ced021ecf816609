//! Progress notifications for convergence sessions.
//!
//! Delivery is fire-and-forget: an observer that is gone or full never slows
//! down or fails the session that emits into it.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// One progress notification, tagged with its session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    AnalysisStarted {
        analysis_id: Uuid,
        message: String,
        progress: u8,
    },
    #[serde(rename_all = "camelCase")]
    AnalysisProgress {
        analysis_id: Uuid,
        message: String,
        progress: u8,
    },
    #[serde(rename_all = "camelCase")]
    AnalysisCompleted {
        analysis_id: Uuid,
        message: String,
        progress: u8,
        has_errors: bool,
        suggestions_count: usize,
    },
}

impl ProgressEvent {
    pub fn started(analysis_id: Uuid, message: impl Into<String>) -> Self {
        ProgressEvent::AnalysisStarted {
            analysis_id,
            message: message.into(),
            progress: 0,
        }
    }

    /// An intermediate step; `progress` is clamped into `1..=99`.
    pub fn progress(analysis_id: Uuid, message: impl Into<String>, progress: u8) -> Self {
        ProgressEvent::AnalysisProgress {
            analysis_id,
            message: message.into(),
            progress: progress.clamp(1, 99),
        }
    }

    pub fn completed(
        analysis_id: Uuid,
        message: impl Into<String>,
        has_errors: bool,
        suggestions_count: usize,
    ) -> Self {
        ProgressEvent::AnalysisCompleted {
            analysis_id,
            message: message.into(),
            progress: 100,
            has_errors,
            suggestions_count,
        }
    }

    /// Event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::AnalysisStarted { .. } => "analysisStarted",
            ProgressEvent::AnalysisProgress { .. } => "analysisProgress",
            ProgressEvent::AnalysisCompleted { .. } => "analysisCompleted",
        }
    }

    pub fn analysis_id(&self) -> Uuid {
        match self {
            ProgressEvent::AnalysisStarted { analysis_id, .. }
            | ProgressEvent::AnalysisProgress { analysis_id, .. }
            | ProgressEvent::AnalysisCompleted { analysis_id, .. } => *analysis_id,
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            ProgressEvent::AnalysisStarted { progress, .. }
            | ProgressEvent::AnalysisProgress { progress, .. }
            | ProgressEvent::AnalysisCompleted { progress, .. } => *progress,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProgressEvent::AnalysisStarted { message, .. }
            | ProgressEvent::AnalysisProgress { message, .. }
            | ProgressEvent::AnalysisCompleted { message, .. } => message,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::AnalysisCompleted { .. })
    }
}

/// Receives progress events. Must not block.
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn notify(&self, _event: ProgressEvent) {}
}

impl ProgressObserver for mpsc::UnboundedSender<ProgressEvent> {
    fn notify(&self, event: ProgressEvent) {
        if self.send(event).is_err() {
            tracing::trace!("progress receiver dropped");
        }
    }
}

/// Bounded channel: events are dropped when the consumer falls behind.
impl ProgressObserver for mpsc::Sender<ProgressEvent> {
    fn notify(&self, event: ProgressEvent) {
        if let Err(e) = self.try_send(event) {
            tracing::trace!(error = %e, "progress event dropped");
        }
    }
}

/// Fan-out to every subscriber; no subscribers is not an error.
impl ProgressObserver for broadcast::Sender<ProgressEvent> {
    fn notify(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let id = Uuid::nil();
        let event = ProgressEvent::completed(id, "Analysis complete", true, 3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "analysisCompleted");
        assert_eq!(json["analysisId"], id.to_string());
        assert_eq!(json["progress"], 100);
        assert_eq!(json["hasErrors"], true);
        assert_eq!(json["suggestionsCount"], 3);
    }

    #[test]
    fn test_progress_is_clamped() {
        let id = Uuid::new_v4();
        assert_eq!(ProgressEvent::progress(id, "x", 0).percent(), 1);
        assert_eq!(ProgressEvent::progress(id, "x", 100).percent(), 99);
        assert_eq!(ProgressEvent::started(id, "x").percent(), 0);
    }

    #[test]
    fn test_closed_channels_do_not_fail() {
        let (tx, rx) = mpsc::unbounded_channel::<ProgressEvent>();
        drop(rx);
        tx.notify(ProgressEvent::started(Uuid::new_v4(), "start"));

        let (tx, _) = broadcast::channel::<ProgressEvent>(1);
        tx.notify(ProgressEvent::started(Uuid::new_v4(), "start"));

        let (tx, _rx) = mpsc::channel::<ProgressEvent>(1);
        tx.notify(ProgressEvent::started(Uuid::new_v4(), "one"));
        tx.notify(ProgressEvent::started(Uuid::new_v4(), "two"));
    }
}
