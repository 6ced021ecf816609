//! Single-walk detector driver.
//!
//! One cursor-based traversal per pass: every node is entered and left once,
//! the scope table is kept current, and each detector only sees the node
//! classes it asked for.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, QueryCursor};

use super::parse::SyntaxTree;
use super::scope::ScopeTable;
use super::traits::{Binding, Grammar};
use crate::detect::{
    Detector, DetectorFactory, Issue, IssueSink, Location, NodeClass, Rule, RulePolicy,
};

/// What a detector can see about the node it is visiting.
pub struct VisitContext<'a> {
    pub grammar: &'a dyn Grammar,
    pub source: &'a [u8],
    /// Scope state before this node's own bindings are applied.
    pub scopes: &'a ScopeTable,
    /// Names this node binds in the enclosing scope.
    pub bindings: &'a [Binding],
    pub class: NodeClass,
    /// Set for identifiers that read a name.
    pub is_reference: bool,
}

impl<'a> VisitContext<'a> {
    pub fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source).unwrap_or("")
    }

    pub fn location(&self, node: Node<'_>) -> Location {
        Location::from_node(node, self.source)
    }

    /// Statements under `node` that may leave a loop, in document order.
    pub fn exit_statements<'t>(&self, node: Node<'t>) -> Vec<Node<'t>> {
        let query = self.grammar.exit_query();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, node, self.source);

        let mut exits = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                exits.push(capture.node);
            }
        }
        exits
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Enter,
    Leave,
}

struct Slot {
    detector: Box<dyn Detector>,
    sink: IssueSink,
    failure: Option<String>,
}

struct Walker<'g> {
    grammar: &'g dyn Grammar,
    scopes: ScopeTable,
    binding_ids: HashSet<usize>,
    bindings: Vec<Binding>,
    parameters: Vec<Binding>,
    hoisted: Vec<Binding>,
}

/// Run every enabled detector over `tree` in a single walk.
///
/// Issues come back grouped by detector, in registration order.
pub fn run_pass(
    grammar: &dyn Grammar,
    tree: &SyntaxTree,
    factories: &[DetectorFactory],
    policy: &RulePolicy,
) -> Vec<Issue> {
    let mut slots: Vec<Slot> = factories
        .iter()
        .map(|factory| factory())
        .filter(|detector| policy.is_enabled(detector.rule()))
        .map(|detector| Slot {
            sink: policy.sink_for(detector.rule()),
            detector,
            failure: None,
        })
        .collect();

    let mut walker = Walker {
        grammar,
        scopes: ScopeTable::new(),
        binding_ids: HashSet::new(),
        bindings: Vec::new(),
        parameters: Vec::new(),
        hoisted: Vec::new(),
    };
    let source = tree.source_bytes();

    let mut cursor = tree.root().walk();
    'walk: loop {
        walker.enter(cursor.node(), source, &mut slots);
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            walker.leave(cursor.node(), source, &mut slots);
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                break 'walk;
            }
        }
    }

    let mut issues = Vec::new();
    for mut slot in slots {
        if slot.failure.is_none() {
            let Slot {
                detector,
                sink,
                failure,
            } = &mut slot;
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| detector.finish(sink)))
            {
                *failure = Some(panic_message(payload));
            }
        }

        let rule = slot.detector.rule();
        issues.extend(slot.sink.into_issues());
        if let Some(reason) = slot.failure {
            tracing::warn!(rule = %rule, reason = %reason, "detector failed");
            issues.push(Issue::new(
                Rule::AnalyzerInternal,
                policy.severity_for(Rule::AnalyzerInternal),
                format!("Internal analyzer error in rule '{}': {}", rule, reason),
            ));
        }
    }
    issues
}

impl<'g> Walker<'g> {
    fn enter(&mut self, node: Node<'_>, source: &[u8], slots: &mut [Slot]) {
        if !node.is_named() {
            return;
        }

        self.bindings.clear();
        self.grammar.declarations(node, source, &mut self.bindings);
        for binding in &self.bindings {
            if !binding.reads {
                self.binding_ids.insert(binding.node_id);
            }
        }

        let is_reference =
            !self.binding_ids.contains(&node.id()) && self.grammar.is_reference(node);
        let cx = VisitContext {
            grammar: self.grammar,
            source,
            scopes: &self.scopes,
            bindings: &self.bindings,
            class: self.grammar.classify(node),
            is_reference,
        };
        dispatch(slots, node, &cx, Phase::Enter);

        for binding in &self.bindings {
            bind(&mut self.scopes, binding);
        }

        if let Some(kind) = self.grammar.opens_scope(node) {
            self.scopes.push(kind);
            self.parameters.clear();
            self.grammar
                .scope_parameters(node, source, &mut self.parameters);
            for parameter in &self.parameters {
                self.binding_ids.insert(parameter.node_id);
                bind(&mut self.scopes, parameter);
            }
        }

        self.hoisted.clear();
        self.grammar.hoisted(node, source, &mut self.hoisted);
        for function in &self.hoisted {
            self.scopes.hoist(&function.name);
        }
    }

    fn leave(&mut self, node: Node<'_>, source: &[u8], slots: &mut [Slot]) {
        if !node.is_named() {
            return;
        }

        let cx = VisitContext {
            grammar: self.grammar,
            source,
            scopes: &self.scopes,
            bindings: &[],
            class: self.grammar.classify(node),
            is_reference: false,
        };
        dispatch(slots, node, &cx, Phase::Leave);

        if self.grammar.opens_scope(node).is_some() {
            self.scopes.pop();
        }
    }
}

fn bind(scopes: &mut ScopeTable, binding: &Binding) {
    if binding.function_scoped {
        scopes.declare_in_unit(&binding.name, binding.kind);
    } else {
        scopes.declare(&binding.name, binding.kind);
    }
}

fn dispatch(slots: &mut [Slot], node: Node<'_>, cx: &VisitContext<'_>, phase: Phase) {
    for slot in slots.iter_mut() {
        if slot.failure.is_some() || !slot.detector.interests().contains(&cx.class) {
            continue;
        }
        let Slot {
            detector,
            sink,
            failure,
        } = slot;
        let result = panic::catch_unwind(AssertUnwindSafe(|| match phase {
            Phase::Enter => detector.enter(node, cx, sink),
            Phase::Leave => detector.leave(node, cx, sink),
        }));
        if let Err(payload) = result {
            *failure = Some(panic_message(payload));
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "detector panicked".to_string()
    }
}
