//! Lexical scope tracking for a single analysis pass.
//!
//! The table is owned by the walker: detectors only ever see it through a
//! shared reference, in the state it had *before* the current node's own
//! bindings were applied.

use std::collections::{HashMap, HashSet};

/// What kind of construct introduced a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Variable,
    Function,
    Class,
    Parameter,
    Import,
    /// `global` / `nonlocal` declarations.
    Global,
}

/// What kind of construct opened a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
    Class,
    Comprehension,
}

#[derive(Debug)]
struct Frame {
    kind: ScopeKind,
    names: HashMap<String, DeclKind>,
    /// Function declarations visible before their statement is reached.
    hoisted: HashSet<String>,
}

impl Frame {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            names: HashMap::new(),
            hoisted: HashSet::new(),
        }
    }
}

/// Stack of scope frames, innermost last. Never empty.
#[derive(Debug)]
pub struct ScopeTable {
    frames: Vec<Frame>,
}

impl Default for ScopeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTable {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new(ScopeKind::Global)],
        }
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.frames.push(Frame::new(kind));
    }

    /// Pop the innermost frame. The global frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Bind `name` in the innermost frame, returning the previous binding in
    /// that frame if there was one.
    pub fn declare(&mut self, name: &str, kind: DeclKind) -> Option<DeclKind> {
        let frame = self.current_mut();
        frame.names.insert(name.to_string(), kind)
    }

    /// Bind `name` in the nearest function or global frame, skipping blocks.
    /// Returns the previous binding in that frame if there was one.
    pub fn declare_in_unit(&mut self, name: &str, kind: DeclKind) -> Option<DeclKind> {
        let index = self.unit_index();
        self.frames[index].names.insert(name.to_string(), kind)
    }

    /// Make a function name resolvable in the innermost frame ahead of its
    /// declaration. Hoisted names never count as prior declarations.
    pub fn hoist(&mut self, name: &str) {
        self.current_mut().hoisted.insert(name.to_string());
    }

    /// Whether `name` is bound in the innermost frame only.
    pub fn declared_in_current(&self, name: &str) -> bool {
        self.current().names.contains_key(name)
    }

    /// Whether `name` is bound by something other than a parameter in any
    /// frame from the innermost one out to the nearest function or global
    /// frame.
    pub fn declared_in_unit(&self, name: &str) -> bool {
        self.frames[self.unit_index()..]
            .iter()
            .any(|frame| {
                frame
                    .names
                    .get(name)
                    .is_some_and(|kind| *kind != DeclKind::Parameter)
            })
    }

    /// Resolve `name` walking outwards from the innermost frame.
    pub fn resolve(&self, name: &str) -> Option<DeclKind> {
        self.frames.iter().rev().find_map(|frame| {
            frame.names.get(name).copied().or_else(|| {
                frame
                    .hoisted
                    .contains(name)
                    .then_some(DeclKind::Function)
            })
        })
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Kind of the innermost frame.
    pub fn current_kind(&self) -> ScopeKind {
        self.current().kind
    }

    /// Kind of the nearest enclosing frame that is not a block.
    pub fn enclosing_unit(&self) -> ScopeKind {
        self.frames
            .iter()
            .rev()
            .map(|f| f.kind)
            .find(|k| *k != ScopeKind::Block)
            .unwrap_or(ScopeKind::Global)
    }

    /// Number of frames, including the global one.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn unit_index(&self) -> usize {
        self.frames
            .iter()
            .rposition(|f| f.kind != ScopeKind::Block)
            .unwrap_or(0)
    }

    fn current(&self) -> &Frame {
        // `frames` always holds the global frame.
        &self.frames[self.frames.len() - 1]
    }

    fn current_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}
