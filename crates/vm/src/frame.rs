//! Call frames
//!
//! One frame per activation of a code value: its own program counter,
//! value stack and local scope. Enclosing frames on the context's stack
//! form the private-variable chain.

use std::rc::Rc;

use quill_diagnostics::{Location, Message, Reporter};

use crate::instruction::InstructionList;
use crate::scope::{NamespaceKind, Scope};
use crate::value::{Value, ValueKind};

/// What happens when a frame's program counter runs off the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameBehavior {
    /// Yield the frame result to the caller and pop
    #[default]
    RunOnce,
    /// Restart from the top; loop-forming operators build on this
    Repeat,
    /// Wait-until condition frame: a truthy result resumes the context,
    /// anything else re-suspends it
    Guard,
}

/// One activation of a code value.
#[derive(Debug, Clone)]
pub struct Frame {
    pub code: Rc<InstructionList>,
    pub pc: usize,
    pub stack: Vec<Value>,
    pub locals: Scope,
    pub behavior: FrameBehavior,
    pub catch_handler: Option<Rc<InstructionList>>,
    pub namespace: NamespaceKind,
    pub scope_name: Option<String>,
    pub script_name: Option<String>,
    /// Result of the last completed statement, yielded when the stack
    /// is empty at frame completion
    pub last_statement: Value,
}

impl Frame {
    pub fn new(code: Rc<InstructionList>, namespace: NamespaceKind) -> Self {
        Self {
            code,
            pc: 0,
            stack: Vec::new(),
            locals: Scope::new(),
            behavior: FrameBehavior::RunOnce,
            catch_handler: None,
            namespace,
            scope_name: None,
            script_name: None,
            last_statement: Value::Nil,
        }
    }

    pub fn with_behavior(mut self, behavior: FrameBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_catch(mut self, handler: Rc<InstructionList>) -> Self {
        self.catch_handler = Some(handler);
        self
    }

    /// True when the program counter has run off the end.
    pub fn completed(&self) -> bool {
        self.pc >= self.code.instructions.len()
    }

    /// The value this frame yields: top of stack if present, else the
    /// last statement result, else `Nil`.
    pub fn return_value(&mut self) -> Value {
        self.stack
            .pop()
            .unwrap_or_else(|| std::mem::take(&mut self.last_statement))
    }

    /// Restart a `Repeat` frame. Locals survive across iterations.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.stack.clear();
        self.last_statement = Value::Nil;
    }

    /// Bind call arguments to `_this`, checking a declared signature.
    pub(crate) fn bind_this(&mut self, args: Value, location: &Location, reporter: &mut Reporter) {
        if let Some(expected) = self.code.expected_this
            && expected != ValueKind::Any
            && expected != args.kind()
        {
            reporter.report(Message::MagicVariableTypeMismatch {
                location: location.clone(),
                variable: "_this".to_string(),
                expected: expected.to_string(),
                got: args.kind().to_string(),
            });
        }
        self.locals.set("_this", args);
    }

    pub(crate) fn set_scope_name(
        &mut self,
        name: String,
        location: &Location,
        reporter: &mut Reporter,
    ) {
        if let Some(existing) = &self.scope_name {
            reporter.report(Message::ScopeNameAlreadySet {
                location: location.clone(),
                name: existing.clone(),
            });
        } else {
            self.scope_name = Some(name);
        }
    }

    pub(crate) fn set_script_name(
        &mut self,
        name: String,
        location: &Location,
        reporter: &mut Reporter,
    ) {
        if let Some(existing) = &self.script_name {
            reporter.report(Message::ScriptNameAlreadySet {
                location: location.clone(),
                name: existing.clone(),
            });
        } else {
            self.script_name = Some(name);
        }
    }

    /// Name used for this frame in stack traces.
    pub fn trace_name(&self) -> &str {
        self.scope_name
            .as_deref()
            .or(self.script_name.as_deref())
            .or(self.code.name.as_deref())
            .unwrap_or("<anonymous>")
    }
}
