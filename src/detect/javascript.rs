//! JavaScript rule pack.
//!
//! Detectors run in the order of [`DETECTORS`]; their issues are reported in
//! the same order.

use std::collections::HashSet;

use tree_sitter::Node;

use super::flow::{has_reachable_exit, FlowKinds};
use super::{Detector, DetectorFactory, IssueSink, Location, NodeClass, Rule};
use crate::analysis::VisitContext;

/// Detector factories in registration order.
pub static DETECTORS: &[DetectorFactory] = &[
    || -> Box<dyn Detector> { Box::new(Redeclaration) },
    || -> Box<dyn Detector> { Box::new(UndefinedVariable::default()) },
    || -> Box<dyn Detector> { Box::new(UnreachableCode) },
    || -> Box<dyn Detector> { Box::new(InfiniteLoop) },
    || -> Box<dyn Detector> { Box::new(DynamicEval) },
    || -> Box<dyn Detector> { Box::new(GlobalMutation::default()) },
    || -> Box<dyn Detector> { Box::new(UnknownConsoleMember) },
    || -> Box<dyn Detector> { Box::new(ConsoleLog) },
    || -> Box<dyn Detector> { Box::new(NoVar) },
    || -> Box<dyn Detector> { Box::new(EmptyArrow) },
];

const FLOW: FlowKinds = FlowKinds {
    loops: &[
        "while_statement",
        "do_statement",
        "for_statement",
        "for_in_statement",
    ],
    functions: &[
        "function_declaration",
        "generator_function_declaration",
        "function_expression",
        "function",
        "generator_function",
        "arrow_function",
        "method_definition",
        "class_body",
    ],
    switches: &["switch_statement"],
    blocks: &["statement_block", "switch_case", "switch_default", "program"],
    terminators: &[
        "return_statement",
        "throw_statement",
        "break_statement",
        "continue_statement",
    ],
};

/// Objects whose properties are the global namespace.
const GLOBAL_OBJECTS: &[&str] = &["window", "globalThis", "global", "self"];

static CONSOLE_API: phf::Set<&'static str> = phf::phf_set! {
    "assert", "clear", "count", "countReset", "debug", "dir", "dirxml", "error",
    "group", "groupCollapsed", "groupEnd", "info", "log", "profile", "profileEnd",
    "table", "time", "timeEnd", "timeLog", "timeStamp", "trace", "warn",
};

/// `object.property` where `object` is a plain identifier that the snippet
/// did not declare itself.
fn runtime_member<'a>(node: Node<'_>, cx: &VisitContext<'a>) -> Option<(&'a str, &'a str)> {
    if node.kind() != "member_expression" {
        return None;
    }
    let object = node.child_by_field_name("object")?;
    let property = node.child_by_field_name("property")?;
    if object.kind() != "identifier" {
        return None;
    }
    let object_name = cx.text(object);
    if cx.scopes.is_defined(object_name) {
        return None;
    }
    Some((object_name, cx.text(property)))
}

/// Flags a name bound twice in the same scope. `var` names share one scope
/// per function.
struct Redeclaration;

impl Detector for Redeclaration {
    fn rule(&self) -> Rule {
        Rule::JsRedeclaration
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Declaration]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if !matches!(
            node.kind(),
            "variable_declarator"
                | "function_declaration"
                | "generator_function_declaration"
                | "class_declaration"
        ) {
            return;
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for binding in cx.bindings {
            let repeated = !seen.insert(binding.name.as_str());
            let declared = if binding.function_scoped {
                cx.scopes.declared_in_unit(&binding.name)
            } else {
                cx.scopes.declared_in_current(&binding.name)
            };
            if repeated || declared {
                sink.report(
                    binding.location,
                    format!("Variable '{}' is declared multiple times.", binding.name),
                );
            }
        }
    }
}

/// Flags identifiers read without any visible declaration.
///
/// Reported once per name. Function declarations are hoisted; `var` and
/// classes are not, so reading them before their statement is flagged.
#[derive(Default)]
struct UndefinedVariable {
    reported: HashSet<String>,
}

impl Detector for UndefinedVariable {
    fn rule(&self) -> Rule {
        Rule::JsUndefinedVariable
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Expression]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if !cx.is_reference {
            return;
        }
        let name = cx.text(node);
        if name.is_empty() || cx.scopes.is_defined(name) || cx.grammar.is_known_global(name) {
            return;
        }
        if self.reported.insert(name.to_string()) {
            sink.report(
                cx.location(node),
                format!("Possible undefined variable: '{}'", name),
            );
        }
    }
}

/// Flags statements that follow a `return` or `throw` in the same block.
struct UnreachableCode;

impl Detector for UnreachableCode {
    fn rule(&self) -> Rule {
        Rule::JsUnreachableCode
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Statement]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if !matches!(
            node.kind(),
            "statement_block" | "program" | "switch_case" | "switch_default"
        ) {
            return;
        }

        let mut terminated_by = None;
        let mut cursor = node.walk();
        for statement in node.named_children(&mut cursor) {
            let kind = statement.kind();
            if let Some(after) = terminated_by {
                let hoisted = matches!(
                    kind,
                    "function_declaration" | "generator_function_declaration"
                );
                if !hoisted && !matches!(kind, "comment" | "empty_statement") {
                    sink.report(
                        cx.location(statement),
                        format!("Unreachable code detected after a {} statement.", after),
                    );
                }
                continue;
            }
            terminated_by = match kind {
                "return_statement" => Some("return"),
                "throw_statement" => Some("throw"),
                _ => None,
            };
        }
    }
}

/// Flags `while (true)` loops with no reachable way out.
struct InfiniteLoop;

fn is_constant_true(condition: Node<'_>, cx: &VisitContext<'_>) -> bool {
    let inner = if condition.kind() == "parenthesized_expression" {
        match condition.named_child(0) {
            Some(inner) => inner,
            None => return false,
        }
    } else {
        condition
    };
    inner.kind() == "true" || (inner.kind() == "number" && cx.text(inner) == "1")
}

impl Detector for InfiniteLoop {
    fn rule(&self) -> Rule {
        Rule::JsInfiniteLoop
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
        if is_constant_true(condition, cx) && !has_reachable_exit(node, body, cx, &FLOW) {
            sink.report(
                cx.location(node),
                "Possible infinite loop detected with `while(true)` and no reachable exit.",
            );
        }
    }
}

/// Flags `eval(...)` and `new Function(...)`.
struct DynamicEval;

impl Detector for DynamicEval {
    fn rule(&self) -> Rule {
        Rule::JsEval
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Call]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        let (field, name, message) = match node.kind() {
            "call_expression" => (
                "function",
                "eval",
                "Avoid using 'eval()' due to security risks.",
            ),
            "new_expression" => (
                "constructor",
                "Function",
                "Avoid using 'new Function()' due to security risks.",
            ),
            _ => return,
        };
        let Some(callee) = node.child_by_field_name(field) else {
            return;
        };
        if callee.kind() == "identifier"
            && cx.text(callee) == name
            && !cx.scopes.is_defined(name)
        {
            sink.report(cx.location(node), message);
        }
    }
}

/// Collects writes to properties of the global object into one issue.
#[derive(Default)]
struct GlobalMutation {
    properties: Vec<String>,
    first: Option<Location>,
}

impl GlobalMutation {
    fn target_property(target: Node<'_>, cx: &VisitContext<'_>) -> Option<String> {
        let object = target.child_by_field_name("object")?;
        if object.kind() != "identifier" {
            return None;
        }
        let object_name = cx.text(object);
        if !GLOBAL_OBJECTS.contains(&object_name) || cx.scopes.is_defined(object_name) {
            return None;
        }
        match target.kind() {
            "member_expression" => target
                .child_by_field_name("property")
                .map(|p| cx.text(p).to_string()),
            "subscript_expression" => {
                let index = target.child_by_field_name("index")?;
                let text = cx.text(index);
                Some(text.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string())
            }
            _ => None,
        }
    }
}

impl Detector for GlobalMutation {
    fn rule(&self) -> Rule {
        Rule::JsGlobalMutation
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Expression]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, _sink: &mut IssueSink) {
        let field = match node.kind() {
            "assignment_expression" | "augmented_assignment_expression" => "left",
            "update_expression" => "argument",
            _ => return,
        };
        let Some(target) = node.child_by_field_name(field) else {
            return;
        };
        if let Some(property) = Self::target_property(target, cx) {
            if self.first.is_none() {
                self.first = Some(cx.location(node));
            }
            if !self.properties.contains(&property) {
                self.properties.push(property);
            }
        }
    }

    fn finish(&mut self, sink: &mut IssueSink) {
        if let Some(location) = self.first {
            sink.report(
                location,
                format!(
                    "Avoid modifying global properties: {}",
                    self.properties.join(", ")
                ),
            );
        }
    }
}

/// Flags `console.<name>` where `<name>` is not part of the console API.
struct UnknownConsoleMember;

impl Detector for UnknownConsoleMember {
    fn rule(&self) -> Rule {
        Rule::JsUnknownConsoleMember
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Expression]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if let Some(("console", member)) = runtime_member(node, cx) {
            if !CONSOLE_API.contains(member) {
                sink.report(
                    cx.location(node),
                    format!("Unknown console function: console.{}()", member),
                );
            }
        }
    }
}

/// Flags debug logging left in the snippet.
struct ConsoleLog;

impl Detector for ConsoleLog {
    fn rule(&self) -> Rule {
        Rule::JsConsoleLog
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Call]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if node.kind() != "call_expression" {
            return;
        }
        let Some(callee) = node.child_by_field_name("function") else {
            return;
        };
        if let Some(("console", member @ ("log" | "debug"))) = runtime_member(callee, cx) {
            sink.report(
                cx.location(node),
                format!("Avoid using console.{} in production code", member),
            );
        }
    }
}

/// Flags `var` declarations.
struct NoVar;

impl Detector for NoVar {
    fn rule(&self) -> Rule {
        Rule::JsNoVar
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Declaration]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if node.kind() != "variable_declaration" {
            return;
        }
        let mut cursor = node.walk();
        for declarator in node.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            if let Some(name) = declarator.child_by_field_name("name") {
                sink.report(
                    cx.location(declarator),
                    format!("Use 'const' or 'let' instead of 'var' for '{}'", cx.text(name)),
                );
            }
        }
    }
}

/// Flags arrow functions with an empty block body.
struct EmptyArrow;

impl Detector for EmptyArrow {
    fn rule(&self) -> Rule {
        Rule::JsEmptyArrow
    }

    fn interests(&self) -> &'static [NodeClass] {
        &[NodeClass::Expression]
    }

    fn enter(&mut self, node: Node<'_>, cx: &VisitContext<'_>, sink: &mut IssueSink) {
        if node.kind() != "arrow_function" {
            return;
        }
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        let empty = body.kind() == "statement_block"
            && body
                .named_children(&mut cursor)
                .all(|child| child.kind() == "comment");
        if empty {
            sink.report(
                cx.location(node),
                "Arrow function should have an explicit return value.",
            );
        }
    }
}
