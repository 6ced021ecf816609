//! Language-specific analyzer implementations.

mod javascript;
mod python;

pub use javascript::{JavaScriptAnalyzer, JavaScriptGrammar};
pub use python::{is_builtin_function, PythonAnalyzer, PythonGrammar};
