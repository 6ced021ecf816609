//! Loop exit analysis shared by the JavaScript and Python rule packs.

use tree_sitter::Node;

use crate::analysis::VisitContext;

/// Node kinds that drive control-flow questions for one grammar.
pub struct FlowKinds {
    pub loops: &'static [&'static str],
    /// Boundaries a `return` or `break` cannot cross.
    pub functions: &'static [&'static str],
    /// Constructs that absorb an unlabeled `break`.
    pub switches: &'static [&'static str],
    /// Statement containers in which later siblings can be unreachable.
    pub blocks: &'static [&'static str],
    /// Statements after which the rest of a block never runs.
    pub terminators: &'static [&'static str],
}

/// Whether `body` holds a statement that reachably leaves `loop_node`.
pub fn has_reachable_exit(
    loop_node: Node<'_>,
    body: Node<'_>,
    cx: &VisitContext<'_>,
    kinds: &FlowKinds,
) -> bool {
    cx.exit_statements(body)
        .into_iter()
        .any(|exit| is_reachable(exit, loop_node, kinds) && leaves(exit, loop_node, cx, kinds))
}

/// An exit is unreachable when an earlier sibling terminates in any block
/// between it and the loop.
fn is_reachable(exit: Node<'_>, loop_node: Node<'_>, kinds: &FlowKinds) -> bool {
    let mut statement = exit;
    while let Some(parent) = statement.parent() {
        if parent.id() == loop_node.id() {
            return true;
        }
        if kinds.blocks.contains(&parent.kind()) {
            let mut sibling = statement.prev_named_sibling();
            while let Some(prev) = sibling {
                if kinds.terminators.contains(&prev.kind()) {
                    return false;
                }
                sibling = prev.prev_named_sibling();
            }
        }
        statement = parent;
    }
    true
}

fn leaves(exit: Node<'_>, loop_node: Node<'_>, cx: &VisitContext<'_>, kinds: &FlowKinds) -> bool {
    let is_break = exit.kind() == "break_statement";
    let label = if is_break {
        exit.child_by_field_name("label").map(|l| cx.text(l))
    } else {
        None
    };

    let mut current = exit.parent();
    while let Some(node) = current {
        if node.id() == loop_node.id() {
            return true;
        }
        let kind = node.kind();
        if kinds.functions.contains(&kind) {
            return false;
        }
        if is_break {
            match label {
                // A label defined inside the loop keeps the break inside too.
                Some(label) => {
                    if kind == "labeled_statement"
                        && node.child_by_field_name("label").map(|l| cx.text(l)) == Some(label)
                    {
                        return false;
                    }
                }
                None => {
                    if kinds.loops.contains(&kind) || kinds.switches.contains(&kind) {
                        return false;
                    }
                }
            }
        }
        current = node.parent();
    }
    false
}
