//! Python rule pack.

use std::collections::HashSet;

use tree_sitter::Node;

use super::flow::{has_reachable_exit, FlowKinds};
use super::{Detector, DetectorFactory, IssueSink, Location, NodeClass, Rule};
use crate::analysis::{is_builtin_function, DeclKind, ScopeKind, VisitContext};

/// Detector factories in registration order.
pub static DETECTORS: &[DetectorFactory] = &[
    || -> Box<dyn Detector> { Box::new(DangerousEval) },
    || -> Box<dyn Detector> { Box::new(HardcodedPassword) },
    || -> Box<dyn Detector> { Box::new(OsCommand) },
    || -> Box<dyn Detector> { Box::new(InfiniteLoop) },
    || -> Box<dyn Detector> { Box::new(MutableDefault) },
    || -> Box<dyn Detector> { Box::new(BareExcept) },
    || -> Box<dyn Detector> { Box::new(UnusedImport::default()) },
    || -> Box<dyn Detector> { Box::new(UnusedVariable::default()) },
    || -> Box<dyn Detector> { Box::new(PrintCall) },
    || -> Box<dyn Detector> { Box::new(BuiltinShadowing) },
    || -> Box<dyn Detector> { Box::new(NestedLoops::default()) },
];

const FLOW: FlowKinds = FlowKinds {
    loops: &["while_statement", "for_statement"],
    functions: &["function_definition", "lambda", "class_definition"],
    switches: &[],
    blocks: &["block", "module"],
    terminators: &[
        "return_statement",
        "raise_statement",
        "break_statement",
        "continue_statement",
    ],
};

const OS_COMMANDS: &[&str] = &["system", "popen", "remove", "rmdir"];

/// Name of a call's callee when it is a plain identifier.
fn callee_name<'a>(node: Node<'_>, cx: &VisitContext<'a>) -> Option<&'a str> {
    let function = node.child_by_field_name("function")?;
    (function.kind() == "identifier").then(|| cx.text(function))
}

/// `(object, attribute)` of a call like `os.system(...)`.
fn callee_attribute<'a>(node: Node<'_>, cx: &VisitContext<'a>) -> Option<(&'a str, &'a str)> {
    let function = node.child_by_field_name("function")?;
    if function.kind() != "attribute" {
        return None;
    }
    let object = function.child_by_field_name("object")?;
    let attribute = function.child_by_field_name("attribute")?;
    (object.kind() == "identifier").then(|| (cx.text(object), cx.text(attribute)))
}

/// Whether a builtin is still the builtin (not rebound by the snippet).
fn is_builtin_call(node: Node<'_>, name: &str, cx: &VisitContext<'_>) -> bool {
    callee_name(node, cx) == Some(name) && !cx.scopes.is_defined(name)
}

fn is_string_literal(node: Node<'_>) -> bool {
    match node.kind() {
        "string" => {
            let mut cursor = node.walk();
            let has_content = node
                .named_children(&mut cursor)
                .any(|c| c.kind() == "string_content");
            has_content
        }
        "concatenated_string" => true,
        _ => false,
    }
}

/// Flags `eval(...)` and `exec(...)`.
struct DangerousEval;

impl Detector for DangerousEval {
    fn rule(&self) -> Rule {
        Rule::PyDangerousEval
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Call]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        for name in ["eval", "exec"] {
            if is_builtin_call(node, name, cx) {
                sink.report(
                    cx.location(node),
                    format!("Security Risk: Avoid using '{}()'.", name),
                );
            }
        }
    }
}

/// Flags string literals assigned to names that look like passwords.
struct HardcodedPassword;

impl HardcodedPassword {
    fn looks_like_password(name: &str) -> bool {
        name.to_lowercase().contains("password")
    }

    fn target_name<'a>(target: Node<'_>, cx: &VisitContext<'a>) -> Option<&'a str> {
        match target.kind() {
            "identifier" => Some(cx.text(target)),
            "attribute" => target
                .child_by_field_name("attribute")
                .map(|a| cx.text(a)),
            _ => None,
        }
    }
}

impl Detector for HardcodedPassword {
    fn rule(&self) -> Rule {
        Rule::PyHardcodedPassword
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Declaration, NodeClass::Expression]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        let (target, value) = match node.kind() {
            "assignment" => (
                node.child_by_field_name("left"),
                node.child_by_field_name("right"),
            ),
            "keyword_argument" => (
                node.child_by_field_name("name"),
                node.child_by_field_name("value"),
            ),
            _ => return,
        };
        let (Some(target), Some(value)) = (target, value) else {
            return;
        };
        let Some(name) = Self::target_name(target, cx) else {
            return;
        };
        if Self::looks_like_password(name) && is_string_literal(value) {
            sink.report(
                cx.location(node),
                format!("Security Risk: Hardcoded password detected in '{}'.", name),
            );
        }
    }
}

/// Flags shell-reaching calls on `os` and `subprocess(..., shell=True)`.
struct OsCommand;

impl OsCommand {
    fn passes_shell_true(node: Node<'_>, cx: &VisitContext<'_>) -> bool {
        let Some(arguments) = node.child_by_field_name("arguments") else {
            return false;
        };
        let mut cursor = arguments.walk();
        let found = arguments.named_children(&mut cursor).any(|arg| {
            arg.kind() == "keyword_argument"
                && arg.child_by_field_name("name").map(|n| cx.text(n)) == Some("shell")
                && arg.child_by_field_name("value").map(|v| v.kind()) == Some("true")
        });
        found
    }
}

impl Detector for OsCommand {
    fn rule(&self) -> Rule {
        Rule::PyOsCommand
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Call]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        let Some((module, function)) = callee_attribute(node, cx) else {
            return;
        };
        if module == "os" && OS_COMMANDS.contains(&function) {
            sink.report(
                cx.location(node),
                format!("Security Risk: Avoid using 'os.{}()'.", function),
            );
        } else if module == "subprocess" && Self::passes_shell_true(node, cx) {
            sink.report(
                cx.location(node),
                format!(
                    "Security Risk: Avoid 'subprocess.{}()' with shell=True.",
                    function
                ),
            );
        }
    }
}

/// Flags `while True:` loops with no reachable way out.
struct InfiniteLoop;

impl Detector for InfiniteLoop {
    fn rule(&self) -> Rule {
        Rule::PyInfiniteLoop
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Statement]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if node.kind() != "while_statement" {
            return;
        }
        let (Some(condition), Some(body)) = (
            node.child_by_field_name("condition"),
            node.child_by_field_name("body"),
        ) else {
            return;
        };
        let constant_true = condition.kind() == "true"
            || (condition.kind() == "integer" && cx.text(condition) == "1");
        if constant_true && !has_reachable_exit(node, body, cx, &FLOW) {
            sink.report(
                cx.location(node),
                "Infinite Loop: 'while True' without a 'break'.",
            );
        }
    }
}

/// Flags list, dict and set literals used as parameter defaults.
struct MutableDefault;

impl Detector for MutableDefault {
    fn rule(&self) -> Rule {
        Rule::PyMutableDefault
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Declaration]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if node.kind() != "function_definition" {
            return;
        }
        let (Some(function), Some(parameters)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("parameters"),
        ) else {
            return;
        };
        let mut cursor = parameters.walk();
        for parameter in parameters.named_children(&mut cursor) {
            if !matches!(
                parameter.kind(),
                "default_parameter" | "typed_default_parameter"
            ) {
                continue;
            }
            let (Some(name), Some(value)) = (
                parameter.child_by_field_name("name"),
                parameter.child_by_field_name("value"),
            ) else {
                continue;
            };
            let mutable = matches!(
                value.kind(),
                "list"
                    | "dictionary"
                    | "set"
                    | "list_comprehension"
                    | "dictionary_comprehension"
                    | "set_comprehension"
            );
            if mutable {
                sink.report(
                    cx.location(parameter),
                    format!(
                        "Bad Practice: Mutable default argument '{}' in function '{}'.",
                        cx.text(name),
                        cx.text(function)
                    ),
                );
            }
        }
    }
}

/// Flags `except:` clauses without an exception type.
struct BareExcept;

impl Detector for BareExcept {
    fn rule(&self) -> Rule {
        Rule::PyBareExcept
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Statement]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if node.kind() != "except_clause" {
            return;
        }
        let mut cursor = node.walk();
        let typed = node
            .named_children(&mut cursor)
            .take_while(|child| child.kind() != "block")
            .any(|child| child.kind() != "comment");
        if !typed {
            sink.report(
                cx.location(node),
                "Bad Practice: Use 'except Exception as e:' instead of a bare 'except:'.",
            );
        }
    }
}

struct ImportedName {
    bound: String,
    display: String,
    location: Location,
}

/// Flags imports whose bound name is never read.
///
/// Decided after the walk, so uses before the import statement count.
#[derive(Default)]
struct UnusedImport {
    imports: Vec<ImportedName>,
    used: HashSet<String>,
}

impl UnusedImport {
    fn record(&mut self, bound: Node<'_>, display: Node<'_>, cx: &VisitContext<'_>) {
        self.imports.push(ImportedName {
            bound: cx.text(bound).to_string(),
            display: cx.text(display).to_string(),
            location: cx.location(display),
        });
    }
}

impl Detector for UnusedImport {
    fn rule(&self) -> Rule {
        Rule::PyUnusedImport
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Declaration, NodeClass::Expression]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, _sink: &mut IssueSink) {
        match node.kind() {
            "import_statement" | "import_from_statement" => {
                if node.kind() == "import_from_statement" {
                    let module = node.child_by_field_name("module_name").map(|m| cx.text(m));
                    if module == Some("__future__") {
                        return;
                    }
                }
                let from_import = node.kind() == "import_from_statement";
                let mut cursor = node.walk();
                let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
                for name in names {
                    match name.kind() {
                        "dotted_name" => {
                            let bound = if from_import {
                                name.named_child(name.named_child_count().saturating_sub(1))
                            } else {
                                name.named_child(0)
                            };
                            if let Some(bound) = bound {
                                self.record(bound, name, cx);
                            }
                        }
                        "aliased_import" => {
                            if let (Some(alias), Some(original)) = (
                                name.child_by_field_name("alias"),
                                name.child_by_field_name("name"),
                            ) {
                                self.record(alias, original, cx);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ if cx.is_reference => {
                self.used.insert(cx.text(node).to_string());
            }
            _ => {}
        }
    }

    fn finish(&mut self, sink: &mut IssueSink) {
        for import in &self.imports {
            if !self.used.contains(&import.bound) {
                sink.report(
                    import.location,
                    format!("Unused import detected: {}", import.display),
                );
            }
        }
    }
}

struct FunctionLocals {
    name: String,
    assigned: Vec<(String, Location)>,
    loads: HashSet<String>,
    globals: HashSet<String>,
}

/// Flags names assigned inside a function and never read there.
///
/// Module-level names are never reported since other modules may import them.
#[derive(Default)]
struct UnusedVariable {
    functions: Vec<FunctionLocals>,
}

impl Detector for UnusedVariable {
    fn rule(&self) -> Rule {
        Rule::PyUnusedVariable
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[
            NodeClass::Declaration,
            NodeClass::Statement,
            NodeClass::Expression,
        ]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, _sink: &mut IssueSink) {
        match node.kind() {
            "function_definition" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| cx.text(n))
                    .unwrap_or_default();
                self.functions.push(FunctionLocals {
                    name: name.to_string(),
                    assigned: Vec::new(),
                    loads: HashSet::new(),
                    globals: HashSet::new(),
                });
            }
            "assignment" | "for_statement" => {
                if cx.scopes.enclosing_unit() != ScopeKind::Function {
                    return;
                }
                let Some(current) = self.functions.last_mut() else {
                    return;
                };
                for binding in cx.bindings {
                    if binding.kind == DeclKind::Variable
                        && !binding.reads
                        && !current.assigned.iter().any(|(n, _)| *n == binding.name)
                    {
                        current
                            .assigned
                            .push((binding.name.clone(), binding.location));
                    }
                }
            }
            "global_statement" | "nonlocal_statement" => {
                if let Some(current) = self.functions.last_mut() {
                    current
                        .globals
                        .extend(cx.bindings.iter().map(|b| b.name.clone()));
                }
            }
            _ if cx.is_reference => {
                let name = cx.text(node);
                for function in &mut self.functions {
                    function.loads.insert(name.to_string());
                }
            }
            _ => {}
        }
    }

    fn leave(&mut self, node: Node<'_>, _cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if node.kind() != "function_definition" {
            return;
        }
        let Some(function) = self.functions.pop() else {
            return;
        };
        for (name, location) in &function.assigned {
            if name.starts_with('_')
                || function.loads.contains(name)
                || function.globals.contains(name)
            {
                continue;
            }
            sink.report(
                *location,
                format!("Unused variable '{}' in function '{}'.", name, function.name),
            );
        }
    }
}

/// Flags `print(...)` left in the snippet.
struct PrintCall;

impl Detector for PrintCall {
    fn rule(&self) -> Rule {
        Rule::PyPrint
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Call]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if is_builtin_call(node, "print", cx) {
            sink.report(
                cx.location(node),
                "Debugging Detected: Remove print() statements before production.",
            );
        }
    }
}

/// Flags assignments and loop targets that rebind a builtin function.
struct BuiltinShadowing;

impl Detector for BuiltinShadowing {
    fn rule(&self) -> Rule {
        Rule::PyBuiltinShadowing
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Declaration, NodeClass::Statement]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if !matches!(
            node.kind(),
            "assignment" | "for_statement" | "function_definition"
        ) {
            return;
        }
        for binding in cx.bindings {
            if is_builtin_function(&binding.name) {
                sink.report(
                    binding.location,
                    format!(
                        "Bad Practice: Avoid shadowing built-in function '{}'.",
                        binding.name
                    ),
                );
            }
        }
    }
}

/// Flags loops nested three deep within one function or class body.
struct NestedLoops {
    /// Current loop depth per enclosing function or class body.
    depths: Vec<usize>,
}

impl Default for NestedLoops {
    fn default() -> Self {
        Self { depths: vec![0] }
    }
}

const NESTING_LIMIT: usize = 3;

impl Detector for NestedLoops {
    fn rule(&self) -> Rule {
        Rule::PyNestedLoops
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Declaration, NodeClass::Statement]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        match node.kind() {
            "function_definition" | "class_definition" => self.depths.push(0),
            "for_statement" | "while_statement" => {
                if let Some(depth) = self.depths.last_mut() {
                    *depth += 1;
                    if *depth == NESTING_LIMIT {
                        sink.report(
                            cx.location(node),
                            "Performance Warning: Deeply nested loops detected.",
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn leave(&mut self, node: Node<'_>, _cx: &VisitContext<'_>, _sink: &mut IssueSink) {
        match node.kind() {
            "function_definition" | "class_definition" => {
                if self.depths.len() > 1 {
                    self.depths.pop();
                }
            }
            "for_statement" | "while_statement" => {
                if let Some(depth) = self.depths.last_mut() {
                    *depth = depth.saturating_sub(1);
                }
            }
            _ => {}
        }
    }
}
