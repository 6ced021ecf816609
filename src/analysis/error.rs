//! Error types for the analysis layer.

use std::time::Duration;

use thiserror::Error;

use super::Language;

/// Failure of an analyzer itself, as opposed to a problem in the analyzed code.
///
/// Syntax errors in the input are never reported through this type: they are
/// a normal analysis result.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("failed to load {language} grammar: {message}")]
    Grammar { language: Language, message: String },

    #[error("parser produced no tree for {0} source")]
    NoTree(Language),

    #[error("failed to start external analyzer `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("external analyzer timed out after {0:?}")]
    Timeout(Duration),

    #[error("external analyzer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("external analyzer reported an error: {0}")]
    Stderr(String),

    #[error("external analyzer produced malformed output: {0}")]
    MalformedOutput(String),

    #[error("i/o error talking to external analyzer: {0}")]
    Io(#[from] std::io::Error),

    #[error("analysis task failed: {0}")]
    Task(String),
}

/// Errors surfaced by [`crate::analysis::Engine`] before or during analysis.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Code exceeds maximum length of {max} characters ({length} given)")]
    InputTooLarge { length: usize, max: usize },

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}
