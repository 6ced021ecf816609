//! Core traits for language analysis.

use async_trait::async_trait;
use tree_sitter::{Node, Query};

use super::parse::{find_syntax_error, SyntaxTree};
use super::scope::{DeclKind, ScopeKind};
use super::walker::run_pass;
use super::{AnalyzerError, Language};
use crate::detect::{
    aggregate, syntax_failure, AnalysisReport, DetectorFactory, Location, NodeClass, RulePolicy,
};

/// A name introduced by a syntax node.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub kind: DeclKind,
    /// Id of the identifier node that carries the name.
    pub node_id: usize,
    pub location: Location,
    /// The binding position also reads the name (e.g. `x += 1`).
    pub reads: bool,
    /// Bound in the enclosing function or module rather than the block
    /// (`var`).
    pub function_scoped: bool,
}

impl Binding {
    pub fn new(node: Node<'_>, source: &[u8], kind: DeclKind) -> Self {
        Self {
            name: node.utf8_text(source).unwrap_or("").to_string(),
            kind,
            node_id: node.id(),
            location: Location::from_node(node, source),
            reads: false,
            function_scoped: false,
        }
    }

    pub fn reading(mut self) -> Self {
        self.reads = true;
        self
    }

    pub fn function_scoped(mut self) -> Self {
        self.function_scoped = true;
        self
    }
}

/// Language-specific knowledge the tree walker needs.
///
/// Implementations describe how a grammar's node kinds map onto detector
/// capability classes, which nodes bind names and which open scopes.
pub trait Grammar: Send + Sync {
    fn language(&self) -> Language;

    /// Capability class of a named node.
    fn classify(&self, node: Node<'_>) -> NodeClass;

    /// Names `node` binds in the scope that encloses it.
    fn declarations(&self, node: Node<'_>, source: &[u8], out: &mut Vec<Binding>);

    /// Kind of frame `node` opens, if any.
    fn opens_scope(&self, node: Node<'_>) -> Option<ScopeKind>;

    /// Names bound inside the frame `node` opens (parameters, catch bindings).
    fn scope_parameters(&self, node: Node<'_>, source: &[u8], out: &mut Vec<Binding>);

    /// Function declarations directly inside `node` that are visible before
    /// their own statement.
    fn hoisted(&self, _node: Node<'_>, _source: &[u8], _out: &mut Vec<Binding>) {}

    /// Whether an identifier node sits in a position that reads a name.
    /// Binding positions are excluded by the walker separately.
    fn is_reference(&self, node: Node<'_>) -> bool;

    /// Names provided by the runtime that never need a declaration.
    fn is_known_global(&self, name: &str) -> bool;

    /// Query capturing statements that can leave a loop (`@exit`).
    fn exit_query(&self) -> &Query;
}

/// In-process analyzer built on a tree-sitter grammar.
///
/// # Thread Safety
///
/// Note: tree_sitter::Parser is not Sync, so implementations create a parser
/// per call.
pub trait LanguageAnalyzer: Send + Sync {
    fn language(&self) -> Language;

    fn grammar(&self) -> &dyn Grammar;

    /// Detector factories in registration order.
    fn detectors(&self) -> &'static [DetectorFactory];

    fn policy(&self) -> &RulePolicy;

    /// Parse source into a tree.
    ///
    /// Partial parse errors are still returned as a valid tree with ERROR nodes.
    fn parse(&self, code: &str) -> Result<SyntaxTree, AnalyzerError>;

    /// Parse, run every enabled detector in one walk and aggregate.
    fn analyze_source(&self, code: &str) -> Result<AnalysisReport, AnalyzerError> {
        let tree = self.parse(code)?;
        if let Some(error) = find_syntax_error(&tree) {
            return Ok(syntax_failure(error));
        }
        let issues = run_pass(self.grammar(), &tree, self.detectors(), self.policy());
        Ok(aggregate(issues))
    }
}

/// Anything that can turn source code into an [`AnalysisReport`].
///
/// Native analyzers answer immediately; external ones talk to another process.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, code: &str) -> Result<AnalysisReport, AnalyzerError>;
}
