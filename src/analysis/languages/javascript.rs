//! JavaScript language analyzer using tree-sitter.

use std::sync::Arc;

use async_trait::async_trait;
use tree_sitter::{Language as TsLanguage, Node, Query};

use crate::analysis::parse::{parse_with, SyntaxTree};
use crate::analysis::scope::{DeclKind, ScopeKind};
use crate::analysis::{Analyzer, AnalyzerError, Binding, Grammar, Language, LanguageAnalyzer};
use crate::detect::{javascript, AnalysisReport, DetectorFactory, NodeClass, RulePolicy};

const EXIT_QUERY: &str = r#"
[
  (break_statement)
  (return_statement)
  (throw_statement)
] @exit
"#;

/// Names the browser and Node.js runtimes provide without a declaration.
static KNOWN_GLOBALS: phf::Set<&'static str> = phf::phf_set! {
    // Language
    "undefined", "NaN", "Infinity", "arguments", "globalThis",
    "Object", "Function", "Array", "String", "Number", "Boolean", "Symbol", "BigInt",
    "Date", "RegExp", "Math", "JSON", "Reflect", "Proxy", "Intl", "Promise",
    "Map", "Set", "WeakMap", "WeakSet", "WeakRef", "FinalizationRegistry",
    "Error", "TypeError", "RangeError", "SyntaxError", "ReferenceError", "EvalError",
    "URIError", "AggregateError",
    "ArrayBuffer", "SharedArrayBuffer", "DataView", "Atomics",
    "Int8Array", "Uint8Array", "Uint8ClampedArray", "Int16Array", "Uint16Array",
    "Int32Array", "Uint32Array", "Float32Array", "Float64Array",
    "BigInt64Array", "BigUint64Array",
    "eval", "isNaN", "isFinite", "parseInt", "parseFloat",
    "encodeURI", "encodeURIComponent", "decodeURI", "decodeURIComponent",
    "escape", "unescape",
    // Hosts
    "console", "window", "self", "global", "document", "navigator", "location",
    "history", "localStorage", "sessionStorage", "performance", "crypto",
    "alert", "confirm", "prompt", "fetch", "Request", "Response", "Headers",
    "URL", "URLSearchParams", "AbortController", "AbortSignal",
    "TextEncoder", "TextDecoder", "Blob", "File", "FormData", "Event",
    "EventTarget", "CustomEvent", "WebSocket", "Worker", "XMLHttpRequest",
    "setTimeout", "clearTimeout", "setInterval", "clearInterval",
    "setImmediate", "clearImmediate", "queueMicrotask", "structuredClone",
    "requestAnimationFrame", "cancelAnimationFrame", "atob", "btoa",
    "require", "module", "exports", "process", "Buffer", "__dirname", "__filename",
};

/// Binding and scoping rules for the JavaScript grammar.
pub struct JavaScriptGrammar {
    language: TsLanguage,
    exit_query: Query,
}

impl JavaScriptGrammar {
    pub fn new() -> Result<Self, AnalyzerError> {
        let language: TsLanguage = tree_sitter_javascript::LANGUAGE.into();
        let exit_query =
            Query::new(&language, EXIT_QUERY).map_err(|e| AnalyzerError::Grammar {
                language: Language::JavaScript,
                message: e.to_string(),
            })?;
        Ok(Self {
            language,
            exit_query,
        })
    }

    pub fn ts_language(&self) -> &TsLanguage {
        &self.language
    }
}

/// Collect identifiers bound by a (possibly destructuring) pattern.
fn pattern_names<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    match node.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => out.push(node),
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = node.child_by_field_name("left") {
                pattern_names(left, out);
            }
        }
        "pair_pattern" => {
            if let Some(value) = node.child_by_field_name("value") {
                pattern_names(value, out);
            }
        }
        "object_pattern" | "array_pattern" | "rest_pattern" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                pattern_names(child, out);
            }
        }
        _ => {}
    }
}

fn bind_pattern(node: Node<'_>, source: &[u8], kind: DeclKind, out: &mut Vec<Binding>) {
    let mut names = Vec::new();
    pattern_names(node, &mut names);
    out.extend(names.into_iter().map(|n| Binding::new(n, source, kind)));
}

/// Like [`bind_pattern`], hoisting the names to the enclosing function when
/// declared with `var`.
fn bind_declared(pattern: Node<'_>, is_var: bool, source: &[u8], out: &mut Vec<Binding>) {
    let start = out.len();
    bind_pattern(pattern, source, DeclKind::Variable, out);
    if is_var {
        for binding in &mut out[start..] {
            binding.function_scoped = true;
        }
    }
}

fn bind_field(node: Node<'_>, field: &str, source: &[u8], kind: DeclKind, out: &mut Vec<Binding>) {
    if let Some(name) = node.child_by_field_name(field) {
        if name.kind() == "identifier" {
            out.push(Binding::new(name, source, kind));
        }
    }
}

fn is_function_like(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration"
            | "generator_function_declaration"
            | "function_expression"
            | "function"
            | "generator_function"
            | "arrow_function"
            | "method_definition"
    )
}

impl Grammar for JavaScriptGrammar {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn classify(&self, node: Node<'_>) -> NodeClass {
        match node.kind() {
            "variable_declaration"
            | "lexical_declaration"
            | "variable_declarator"
            | "function_declaration"
            | "generator_function_declaration"
            | "class_declaration"
            | "import_statement"
            | "import_clause"
            | "import_specifier"
            | "namespace_import" => NodeClass::Declaration,
            "call_expression" | "new_expression" => NodeClass::Call,
            "program" | "statement_block" | "switch_case" | "switch_default" | "catch_clause"
            | "else_clause" | "finally_clause" => NodeClass::Statement,
            kind if kind.ends_with("_statement") => NodeClass::Statement,
            _ => NodeClass::Expression,
        }
    }

    fn declarations(&self, node: Node<'_>, source: &[u8], out: &mut Vec<Binding>) {
        match node.kind() {
            "variable_declarator" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let is_var = node
                        .parent()
                        .is_some_and(|p| p.kind() == "variable_declaration");
                    bind_declared(name, is_var, source, out);
                }
            }
            "function_declaration" | "generator_function_declaration" => {
                bind_field(node, "name", source, DeclKind::Function, out);
            }
            "class_declaration" => bind_field(node, "name", source, DeclKind::Class, out),
            "import_clause" | "namespace_import" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "identifier" {
                        out.push(Binding::new(child, source, DeclKind::Import));
                    }
                }
            }
            "import_specifier" => {
                let target = node
                    .child_by_field_name("alias")
                    .or_else(|| node.child_by_field_name("name"));
                if let Some(name) = target.filter(|n| n.kind() == "identifier") {
                    out.push(Binding::new(name, source, DeclKind::Import));
                }
            }
            _ => {}
        }
    }

    fn opens_scope(&self, node: Node<'_>) -> Option<ScopeKind> {
        match node.kind() {
            kind if is_function_like(kind) => Some(ScopeKind::Function),
            "class_declaration" | "class" => Some(ScopeKind::Class),
            "statement_block" | "for_statement" | "for_in_statement" | "catch_clause"
            | "switch_statement" => Some(ScopeKind::Block),
            _ => None,
        }
    }

    fn scope_parameters(&self, node: Node<'_>, source: &[u8], out: &mut Vec<Binding>) {
        let kind = node.kind();
        if is_function_like(kind) {
            // A named function expression sees its own name.
            if matches!(kind, "function_expression" | "function" | "generator_function") {
                bind_field(node, "name", source, DeclKind::Function, out);
            }
            if let Some(parameter) = node.child_by_field_name("parameter") {
                bind_pattern(parameter, source, DeclKind::Parameter, out);
            }
            if let Some(parameters) = node.child_by_field_name("parameters") {
                let mut cursor = parameters.walk();
                for parameter in parameters.named_children(&mut cursor) {
                    bind_pattern(parameter, source, DeclKind::Parameter, out);
                }
            }
        } else if kind == "class" {
            bind_field(node, "name", source, DeclKind::Class, out);
        } else if kind == "catch_clause" {
            if let Some(parameter) = node.child_by_field_name("parameter") {
                bind_pattern(parameter, source, DeclKind::Variable, out);
            }
        } else if kind == "for_in_statement" {
            // `for (const x of xs)`; without a keyword `left` is an assignment target.
            if let (Some(keyword), Some(left)) = (
                node.child_by_field_name("kind"),
                node.child_by_field_name("left"),
            ) {
                let is_var = keyword.utf8_text(source) == Ok("var");
                bind_declared(left, is_var, source, out);
            }
        }
    }

    fn hoisted(&self, node: Node<'_>, source: &[u8], out: &mut Vec<Binding>) {
        if !matches!(node.kind(), "program" | "statement_block") {
            return;
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let declaration = if child.kind() == "export_statement" {
                child.child_by_field_name("declaration")
            } else {
                Some(child)
            };
            if let Some(function) = declaration.filter(|d| {
                matches!(
                    d.kind(),
                    "function_declaration" | "generator_function_declaration"
                )
            }) {
                bind_field(function, "name", source, DeclKind::Function, out);
            }
        }
    }

    fn is_reference(&self, node: Node<'_>) -> bool {
        if !matches!(node.kind(), "identifier" | "shorthand_property_identifier") {
            return false;
        }
        let Some(parent) = node.parent() else {
            return true;
        };
        !matches!(
            parent.kind(),
            "jsx_opening_element"
                | "jsx_closing_element"
                | "jsx_self_closing_element"
                | "nested_identifier"
                | "jsx_namespace_name"
                | "export_specifier"
                | "import_specifier"
                | "meta_property"
        )
    }

    fn is_known_global(&self, name: &str) -> bool {
        KNOWN_GLOBALS.contains(name)
    }

    fn exit_query(&self) -> &Query {
        &self.exit_query
    }
}

/// In-process JavaScript analyzer.
pub struct JavaScriptAnalyzer {
    grammar: JavaScriptGrammar,
    policy: Arc<RulePolicy>,
}

impl JavaScriptAnalyzer {
    pub fn new() -> Result<Self, AnalyzerError> {
        Self::with_policy(Arc::new(RulePolicy::default()))
    }

    pub fn with_policy(policy: Arc<RulePolicy>) -> Result<Self, AnalyzerError> {
        Ok(Self {
            grammar: JavaScriptGrammar::new()?,
            policy,
        })
    }
}

impl LanguageAnalyzer for JavaScriptAnalyzer {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn grammar(&self) -> &dyn Grammar {
        &self.grammar
    }

    fn detectors(&self) -> &'static [DetectorFactory] {
        javascript::DETECTORS
    }

    fn policy(&self) -> &RulePolicy {
        &self.policy
    }

    fn parse(&self, code: &str) -> Result<SyntaxTree, AnalyzerError> {
        parse_with(self.grammar.ts_language(), Language::JavaScript, code)
    }
}

#[async_trait]
impl Analyzer for JavaScriptAnalyzer {
    async fn analyze(&self, code: &str) -> Result<AnalysisReport, AnalyzerError> {
        self.analyze_source(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::parse::find_syntax_error;

    fn collect_bindings(code: &str, kind: &str) -> Vec<String> {
        let grammar = JavaScriptGrammar::new().unwrap();
        let tree = parse_with(grammar.ts_language(), Language::JavaScript, code).unwrap();
        assert!(find_syntax_error(&tree).is_none(), "fixture should parse");

        let mut names = Vec::new();
        let mut stack = vec![tree.root()];
        while let Some(node) = stack.pop() {
            let mut out = Vec::new();
            if node.kind() == kind {
                grammar.declarations(node, tree.source_bytes(), &mut out);
                grammar.scope_parameters(node, tree.source_bytes(), &mut out);
            }
            names.extend(out.into_iter().map(|b| b.name));
            let mut cursor = node.walk();
            stack.extend(node.named_children(&mut cursor));
        }
        names.sort();
        names
    }

    #[test]
    fn test_destructuring_declarations() {
        let names = collect_bindings(
            "const { a, b: c, ...rest } = obj; let [d, , e = 1] = arr;",
            "variable_declarator",
        );
        assert_eq!(names, vec!["a", "c", "d", "e", "rest"]);
    }

    #[test]
    fn test_var_declarations_are_function_scoped() {
        let grammar = JavaScriptGrammar::new().unwrap();
        let tree = parse_with(
            grammar.ts_language(),
            Language::JavaScript,
            "var a = 1; let b = 2; for (var k in o) {} for (const [c, d] of pairs) {}",
        )
        .unwrap();

        let mut scoped = Vec::new();
        let mut stack = vec![tree.root()];
        while let Some(node) = stack.pop() {
            let mut out = Vec::new();
            grammar.declarations(node, tree.source_bytes(), &mut out);
            grammar.scope_parameters(node, tree.source_bytes(), &mut out);
            scoped.extend(out.into_iter().map(|b| (b.name, b.function_scoped)));
            let mut cursor = node.walk();
            stack.extend(node.named_children(&mut cursor));
        }
        scoped.sort();
        assert_eq!(
            scoped,
            vec![
                ("a".to_string(), true),
                ("b".to_string(), false),
                ("c".to_string(), false),
                ("d".to_string(), false),
                ("k".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_function_parameters() {
        let names = collect_bindings(
            "function f(x, { y }, z = 2, ...more) { return x; }",
            "function_declaration",
        );
        assert_eq!(names, vec!["f", "more", "x", "y", "z"]);
    }

    #[test]
    fn test_import_bindings() {
        let code = "import React, { useState as useS, useEffect } from 'react';\nimport * as path from 'path';";
        let mut names = collect_bindings(code, "import_clause");
        names.extend(collect_bindings(code, "import_specifier"));
        names.extend(collect_bindings(code, "namespace_import"));
        names.sort();
        assert_eq!(names, vec!["React", "path", "useEffect", "useS"]);
    }

    #[test]
    fn test_classify() {
        let grammar = JavaScriptGrammar::new().unwrap();
        let tree = parse_with(grammar.ts_language(), Language::JavaScript, "foo(1);").unwrap();
        let statement = tree.root().named_child(0).unwrap();
        let call = statement.named_child(0).unwrap();
        assert_eq!(grammar.classify(statement), NodeClass::Statement);
        assert_eq!(grammar.classify(call), NodeClass::Call);
    }

    #[tokio::test]
    async fn test_analyze_clean_snippet() {
        let analyzer = JavaScriptAnalyzer::new().unwrap();
        let report = analyzer
            .analyze("const greet = (name) => `hi ${name}`;\ngreet('x');\n")
            .await
            .unwrap();
        assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);
    }
}
