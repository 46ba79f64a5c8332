//! Instruction set
//!
//! The minimal opcode family the lowerer targets. Instructions operate
//! on the owning frame's value stack; operator calls go through the
//! registry by name.

use quill_diagnostics::Location;

use crate::value::{Value, ValueKind};

/// One VM instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Pop the value stack; the popped value becomes the frame's last
    /// statement result
    EndStatement,
    /// Push a literal value
    Push(Value),
    /// Look a variable up and push it; missing pushes `Nil` and warns
    GetVariable(String),
    /// Store into the scope matching the name's class (underscore means
    /// nearest enclosing private binding)
    AssignTo(String),
    /// Store into the current frame's locals unconditionally
    AssignToLocal(String),
    /// Push the nular operator's result
    CallNular(String),
    /// Pop one value, push the unary operator's result
    CallUnary(String),
    /// Pop right then left, push the binary operator's result
    CallBinary(String),
    /// Pop `n` values, push them as an array (in original order)
    MakeArray(usize),
}

/// An instruction with its source origin.
#[derive(Debug, Clone)]
pub struct LocatedInstruction {
    pub op: Instruction,
    pub location: Location,
}

/// A read-only instruction stream, shared by frames via `Rc`.
#[derive(Debug, Clone, Default)]
pub struct InstructionList {
    pub instructions: Vec<LocatedInstruction>,
    /// Name used in stack traces, if the lowerer knows one
    pub name: Option<String>,
    /// Declared `_this` signature; mismatching arguments warn
    pub expected_this: Option<ValueKind>,
}

impl InstructionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a stream from bare instructions; origins default to an
    /// unknown location. Lowerers attach real locations via `push`.
    pub fn from_ops(ops: Vec<Instruction>) -> Self {
        Self {
            instructions: ops
                .into_iter()
                .map(|op| LocatedInstruction {
                    op,
                    location: Location::default(),
                })
                .collect(),
            name: None,
            expected_this: None,
        }
    }

    pub fn push(&mut self, op: Instruction, location: Location) {
        self.instructions.push(LocatedInstruction { op, location });
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn expecting_this(mut self, kind: ValueKind) -> Self {
        self.expected_this = Some(kind);
        self
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
