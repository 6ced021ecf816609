//! Parsing source text into tree-sitter trees and extracting syntax errors.

use tree_sitter::{Node, Parser, Tree};

use super::{AnalyzerError, Language};
use crate::detect::{Issue, Location, Rule, Severity};

/// Holds a parsed tree-sitter tree and the source it was built from.
pub struct SyntaxTree {
    pub tree: Tree,
    pub source: String,
    pub language: Language,
}

impl SyntaxTree {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn source_bytes(&self) -> &[u8] {
        self.source.as_bytes()
    }

    /// Get text for a tree-sitter node.
    pub fn node_text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }
}

/// First syntax error found in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub location: Location,
}

impl SyntaxError {
    pub fn into_issue(self) -> Issue {
        Issue::new(Rule::SyntaxError, Severity::Error, self.message).at(self.location)
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Parse `code` with `grammar`.
pub fn parse_with(
    grammar: &tree_sitter::Language,
    language: Language,
    code: &str,
) -> Result<SyntaxTree, AnalyzerError> {
    let mut parser = Parser::new();
    parser
        .set_language(grammar)
        .map_err(|e| AnalyzerError::Grammar {
            language,
            message: e.to_string(),
        })?;
    let tree = parser
        .parse(code, None)
        .ok_or(AnalyzerError::NoTree(language))?;

    Ok(SyntaxTree {
        tree,
        source: code.to_string(),
        language,
    })
}

/// Locate the first `ERROR` or `MISSING` node in document order.
pub fn find_syntax_error(tree: &SyntaxTree) -> Option<SyntaxError> {
    let root = tree.root();
    if !root.has_error() {
        return None;
    }

    let mut node = root;
    'descend: loop {
        if node.is_error() || node.is_missing() {
            break;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.is_error() || child.is_missing() || child.has_error() {
                node = child;
                continue 'descend;
            }
        }
        break;
    }

    Some(describe(node, tree.source_bytes()))
}

fn describe(node: Node<'_>, source: &[u8]) -> SyntaxError {
    let location = Location::from_node(node, source);
    let at = format!("at line {}, column {}", location.line, location.column);

    let message = if node.is_missing() {
        format!("Syntax Error: missing '{}' {}", node.kind(), at)
    } else {
        let text = node.utf8_text(source).unwrap_or("");
        let snippet: String = text
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .chars()
            .take(20)
            .collect();
        if snippet.is_empty() {
            format!("Syntax Error: unexpected end of input {}", at)
        } else {
            format!("Syntax Error: unexpected '{}' {}", snippet, at)
        }
    };

    SyntaxError { message, location }
}
