//! Python language analyzer using tree-sitter.

use std::sync::Arc;

use async_trait::async_trait;
use tree_sitter::{Language as TsLanguage, Node, Query};

use crate::analysis::parse::{parse_with, SyntaxTree};
use crate::analysis::scope::{DeclKind, ScopeKind};
use crate::analysis::{Analyzer, AnalyzerError, Binding, Grammar, Language, LanguageAnalyzer};
use crate::detect::{python, AnalysisReport, DetectorFactory, NodeClass, RulePolicy};

const EXIT_QUERY: &str = r#"
[
  (break_statement)
  (return_statement)
  (raise_statement)
] @exit
"#;

/// Built-in functions and types callable without an import.
static BUILTIN_FUNCTIONS: phf::Set<&'static str> = phf::phf_set! {
    "abs", "aiter", "all", "anext", "any", "ascii", "bin", "bool", "breakpoint",
    "bytearray", "bytes", "callable", "chr", "classmethod", "compile", "complex",
    "delattr", "dict", "dir", "divmod", "enumerate", "eval", "exec", "filter",
    "float", "format", "frozenset", "getattr", "globals", "hasattr", "hash", "help",
    "hex", "id", "input", "int", "isinstance", "issubclass", "iter", "len", "list",
    "locals", "map", "max", "memoryview", "min", "next", "object", "oct", "open",
    "ord", "pow", "print", "property", "range", "repr", "reversed", "round", "set",
    "setattr", "slice", "sorted", "staticmethod", "str", "sum", "super", "tuple",
    "type", "vars", "zip", "__import__",
};

/// Other names every module can see.
static BUILTIN_NAMES: phf::Set<&'static str> = phf::phf_set! {
    "__name__", "__file__", "__doc__", "__package__", "__spec__", "__builtins__",
    "NotImplemented", "Ellipsis",
    "BaseException", "Exception", "ArithmeticError", "AssertionError", "AttributeError",
    "EOFError", "FileExistsError", "FileNotFoundError", "ImportError", "IndexError",
    "KeyError", "KeyboardInterrupt", "LookupError", "MemoryError", "ModuleNotFoundError",
    "NameError", "NotImplementedError", "OSError", "OverflowError", "PermissionError",
    "RecursionError", "RuntimeError", "StopIteration", "StopAsyncIteration",
    "SyntaxError", "SystemExit", "TimeoutError", "TypeError", "UnicodeError",
    "ValueError", "ZeroDivisionError", "Warning", "DeprecationWarning", "UserWarning",
};

/// Whether `name` is one of Python's built-in functions or types.
pub fn is_builtin_function(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(name)
}

/// Binding and scoping rules for the Python grammar.
pub struct PythonGrammar {
    language: TsLanguage,
    exit_query: Query,
}

impl PythonGrammar {
    pub fn new() -> Result<Self, AnalyzerError> {
        let language: TsLanguage = tree_sitter_python::LANGUAGE.into();
        let exit_query =
            Query::new(&language, EXIT_QUERY).map_err(|e| AnalyzerError::Grammar {
                language: Language::Python,
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

/// Collect identifiers bound by an assignment or loop target.
///
/// Attribute and subscript targets bind nothing.
fn target_names<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    match node.kind() {
        "identifier" => out.push(node),
        "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
        | "list_splat_pattern" | "list_splat" | "parenthesized_expression"
        | "as_pattern_target" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                target_names(child, out);
            }
        }
        _ => {}
    }
}

fn bind_targets(node: Node<'_>, source: &[u8], kind: DeclKind, out: &mut Vec<Binding>) {
    let mut names = Vec::new();
    target_names(node, &mut names);
    out.extend(names.into_iter().map(|n| Binding::new(n, source, kind)));
}

fn bind_import_name(node: Node<'_>, source: &[u8], out: &mut Vec<Binding>) {
    match node.kind() {
        // `import a.b` binds `a`
        "dotted_name" => {
            if let Some(first) = node.named_child(0) {
                out.push(Binding::new(first, source, DeclKind::Import));
            }
        }
        "aliased_import" => {
            if let Some(alias) = node.child_by_field_name("alias") {
                out.push(Binding::new(alias, source, DeclKind::Import));
            }
        }
        _ => {}
    }
}

fn bind_parameter(node: Node<'_>, source: &[u8], out: &mut Vec<Binding>) {
    match node.kind() {
        "identifier" => out.push(Binding::new(node, source, DeclKind::Parameter)),
        "default_parameter" | "typed_default_parameter" => {
            if let Some(name) = node.child_by_field_name("name") {
                bind_parameter(name, source, out);
            }
        }
        "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
            if let Some(first) = node.named_child(0) {
                bind_parameter(first, source, out);
            }
        }
        "tuple_pattern" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                bind_parameter(child, source, out);
            }
        }
        _ => {}
    }
}

impl Grammar for PythonGrammar {
    fn language(&self) -> Language {
        Language::Python
    }

    fn classify(&self, node: Node<'_>) -> NodeClass {
        match node.kind() {
            "function_definition"
            | "class_definition"
            | "assignment"
            | "augmented_assignment"
            | "import_statement"
            | "import_from_statement"
            | "global_statement"
            | "nonlocal_statement"
            | "named_expression" => NodeClass::Declaration,
            "call" => NodeClass::Call,
            "module" | "block" | "except_clause" | "else_clause" | "elif_clause"
            | "finally_clause" => NodeClass::Statement,
            kind if kind.ends_with("_statement") => NodeClass::Statement,
            _ => NodeClass::Expression,
        }
    }

    fn declarations(&self, node: Node<'_>, source: &[u8], out: &mut Vec<Binding>) {
        match node.kind() {
            "function_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    out.push(Binding::new(name, source, DeclKind::Function));
                }
            }
            "class_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    out.push(Binding::new(name, source, DeclKind::Class));
                }
            }
            "assignment" | "for_statement" | "for_in_clause" => {
                if let Some(left) = node.child_by_field_name("left") {
                    bind_targets(left, source, DeclKind::Variable, out);
                }
            }
            "augmented_assignment" => {
                if let Some(left) = node.child_by_field_name("left") {
                    if left.kind() == "identifier" {
                        out.push(Binding::new(left, source, DeclKind::Variable).reading());
                    }
                }
            }
            "named_expression" => {
                if let Some(name) = node.child_by_field_name("name") {
                    out.push(Binding::new(name, source, DeclKind::Variable));
                }
            }
            "as_pattern" => {
                if let Some(alias) = node.child_by_field_name("alias") {
                    bind_targets(alias, source, DeclKind::Variable, out);
                }
            }
            "except_clause" => {
                // `except E as e`: the identifier following `as`
                let mut cursor = node.walk();
                let mut after_as = false;
                for child in node.children(&mut cursor) {
                    if after_as && child.kind() == "identifier" {
                        out.push(Binding::new(child, source, DeclKind::Variable));
                        break;
                    }
                    after_as = child.kind() == "as";
                }
            }
            "import_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    bind_import_name(name, source, out);
                }
            }
            "import_from_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    match name.kind() {
                        // `from a import b` binds `b`
                        "dotted_name" => {
                            let count = name.named_child_count();
                            if let Some(last) = count.checked_sub(1).and_then(|i| name.named_child(i)) {
                                out.push(Binding::new(last, source, DeclKind::Import));
                            }
                        }
                        _ => bind_import_name(name, source, out),
                    }
                }
            }
            "global_statement" | "nonlocal_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "identifier" {
                        out.push(Binding::new(child, source, DeclKind::Global));
                    }
                }
            }
            _ => {}
        }
    }

    fn opens_scope(&self, node: Node<'_>) -> Option<ScopeKind> {
        match node.kind() {
            "function_definition" | "lambda" => Some(ScopeKind::Function),
            "class_definition" => Some(ScopeKind::Class),
            "list_comprehension" | "set_comprehension" | "dictionary_comprehension"
            | "generator_expression" => Some(ScopeKind::Comprehension),
            _ => None,
        }
    }

    fn scope_parameters(&self, node: Node<'_>, source: &[u8], out: &mut Vec<Binding>) {
        if let Some(parameters) = node.child_by_field_name("parameters") {
            let mut cursor = parameters.walk();
            for parameter in parameters.named_children(&mut cursor) {
                bind_parameter(parameter, source, out);
            }
        }
    }

    fn is_reference(&self, node: Node<'_>) -> bool {
        if node.kind() != "identifier" {
            return false;
        }
        let Some(parent) = node.parent() else {
            return true;
        };
        let is_field = |field: &str| {
            parent
                .child_by_field_name(field)
                .is_some_and(|n| n.id() == node.id())
        };
        match parent.kind() {
            "dotted_name" | "aliased_import" | "import_statement" | "import_from_statement" => {
                false
            }
            "attribute" => !is_field("attribute"),
            "keyword_argument" => !is_field("name"),
            _ => true,
        }
    }

    fn is_known_global(&self, name: &str) -> bool {
        BUILTIN_FUNCTIONS.contains(name) || BUILTIN_NAMES.contains(name)
    }

    fn exit_query(&self) -> &Query {
        &self.exit_query
    }
}

/// In-process Python analyzer.
pub struct PythonAnalyzer {
    grammar: PythonGrammar,
    policy: Arc<RulePolicy>,
}

impl PythonAnalyzer {
    pub fn new() -> Result<Self, AnalyzerError> {
        Self::with_policy(Arc::new(RulePolicy::default()))
    }

    pub fn with_policy(policy: Arc<RulePolicy>) -> Result<Self, AnalyzerError> {
        Ok(Self {
            grammar: PythonGrammar::new()?,
            policy,
        })
    }
}

impl LanguageAnalyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }

    fn grammar(&self) -> &dyn Grammar {
        &self.grammar
    }

    fn detectors(&self) -> &'static [DetectorFactory] {
        python::DETECTORS
    }

    fn policy(&self) -> &RulePolicy {
        &self.policy
    }

    fn parse(&self, code: &str) -> Result<SyntaxTree, AnalyzerError> {
        parse_with(self.grammar.ts_language(), Language::Python, code)
    }
}

#[async_trait]
impl Analyzer for PythonAnalyzer {
    async fn analyze(&self, code: &str) -> Result<AnalysisReport, AnalyzerError> {
        self.analyze_source(code)
    }
}
