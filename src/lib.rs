//! codemend - analyze JavaScript and Python snippets and drive them clean.
//!
//! A snippet is parsed with tree-sitter and walked once by a pack of rule
//! detectors. When a fix oracle is configured, the findings are sent to it
//! and the returned code is analyzed again, up to a fixed number of rounds.
//!
//! # Architecture
//!
//! - `analysis`: parsing, scopes, the detector walk and per-language analyzers
//! - `detect`: issue types, the `Detector` trait and both rule packs
//! - `oracle`: the fix oracle seam and its HTTP client
//! - `converge`: the bounded analyze/fix loop
//! - `progress`: per-session progress events
//! - `service` and `server`: the JSON API over HTTP/1
//! - `config`, `report`, `cli`, `logging`: the surrounding tool
//!
//! # Adding a New Language
//!
//! Add a variant to `Language`, implement `LanguageAnalyzer` for it in
//! `src/analysis/languages/`, write its rule pack under `src/detect/`, and
//! route it in `AnalyzerSet`.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod converge;
pub mod detect;
pub mod logging;
pub mod oracle;
pub mod progress;
pub mod report;
pub mod server;
pub mod service;

pub use analysis::{Analyzer, AnalyzerSet, Engine, EngineError, Language, LanguageAnalyzer, SourceUnit};
pub use config::Config;
pub use converge::{CancelToken, Controller, LoopSettings, Outcome, SessionError, SessionResult};
pub use detect::{AnalysisReport, AnalysisStatus, Issue, Rule, Severity};
pub use oracle::{FixOracle, FixRequest, HttpFixOracle, OracleError, RetryPolicy};
pub use progress::{ProgressEvent, ProgressObserver};
pub use service::Service;
