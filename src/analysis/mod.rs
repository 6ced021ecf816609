//! Tree-sitter backed code analysis.
//!
//! ```text
//! ┌────────────┐     ┌──────────────┐     ┌────────────┐     ┌────────────────┐
//! │ SourceUnit │────▶│ SyntaxTree   │────▶│ run_pass   │────▶│ AnalysisReport │
//! └────────────┘     │ (tree-sitter)│     │ (detectors)│     │ (aggregated)   │
//!                    └──────────────┘     └────────────┘     └────────────────┘
//! ```
//!
//! # Adding a New Language
//!
//! 1. Create a new module in `src/analysis/languages/` implementing [`Grammar`]
//!    and [`LanguageAnalyzer`]
//! 2. Add its rule pack under `src/detect/`
//! 3. Add a variant to [`Language`] and a field to [`AnalyzerSet`]

mod engine;
mod error;
pub mod external;
mod languages;
mod parse;
mod scope;
mod traits;
mod walker;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use engine::{AnalyzerSet, Engine, DEFAULT_MAX_CODE_LENGTH};
pub use error::{AnalyzerError, EngineError};
pub use external::ExternalAnalyzer;
pub use languages::{
    is_builtin_function, JavaScriptAnalyzer, JavaScriptGrammar, PythonAnalyzer, PythonGrammar,
};
pub use parse::{find_syntax_error, SyntaxError, SyntaxTree};
pub use scope::{DeclKind, ScopeKind, ScopeTable};
pub use traits::{Analyzer, Binding, Grammar, LanguageAnalyzer};
pub use walker::{run_pass, VisitContext};

/// Languages the engine can analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::JavaScript, Language::Python];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
        }
    }

    /// Infer the language from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "py" => Some(Language::Python),
            _ => None,
        }
    }

    /// Extensions walked when scanning a directory.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::Python => &["py"],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "python" | "py" => Ok(Language::Python),
            _ => Err(EngineError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// A snippet of code tagged with its language.
///
/// Never mutated: every fix iteration produces a new unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    code: String,
    language: Language,
}

impl SourceUnit {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Length in characters, the unit input limits are expressed in.
    pub fn char_len(&self) -> usize {
        self.code.chars().count()
    }

    /// A unit for `code` in the same language.
    pub fn with_code(&self, code: impl Into<String>) -> Self {
        Self::new(code, self.language)
    }

    pub fn into_code(self) -> String {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_aliases() {
        for alias in ["javascript", "JS", "node", " JavaScript "] {
            assert_eq!(alias.parse::<Language>().unwrap(), Language::JavaScript);
        }
        for alias in ["python", "py", "Python"] {
            assert_eq!(alias.parse::<Language>().unwrap(), Language::Python);
        }
    }

    #[test]
    fn test_unsupported_language() {
        let err = "ruby".parse::<Language>().unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedLanguage(ref l) if l == "ruby"));
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(Language::from_extension("mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("PY"), Some(Language::Python));
        assert_eq!(Language::from_extension("ts"), None);
    }

    #[test]
    fn test_source_unit_counts_chars() {
        let unit = SourceUnit::new("é✓", Language::Python);
        assert_eq!(unit.char_len(), 2);
        assert_eq!(unit.with_code("x = 1").language(), Language::Python);
    }
}
