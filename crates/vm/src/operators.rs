//! Operator registry and dispatch
//!
//! The core ships no built-in operators; hosts register each one as a
//! function pointer plus type metadata. Dispatch keys on the lowercased
//! name and the operand kinds, preferring exact kind matches over the
//! `Any` wildcard.

use std::rc::Rc;

use indexmap::IndexMap;
use quill_diagnostics::{Location, Message, Reporter};

use crate::context::ScriptHandle;
use crate::frame::FrameBehavior;
use crate::instruction::InstructionList;
use crate::scope::Namespaces;
use crate::value::{Value, ValueKind};

/// Nular operator implementation.
pub type NularFn = fn(&mut OpEnv) -> Result<Value, String>;
/// Unary operator implementation; receives the right operand.
pub type UnaryFn = fn(&mut OpEnv, Value) -> Result<Value, String>;
/// Binary operator implementation; receives left then right.
pub type BinaryFn = fn(&mut OpEnv, Value, Value) -> Result<Value, String>;

#[derive(Debug, Clone)]
struct UnaryOperator {
    right: ValueKind,
    func: UnaryFn,
}

#[derive(Debug, Clone)]
struct BinaryOperator {
    left: ValueKind,
    right: ValueKind,
    func: BinaryFn,
}

/// Lookup table for operators, keyed by `(name, operand kinds)`.
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    nular: IndexMap<String, NularFn>,
    unary: IndexMap<String, Vec<UnaryOperator>>,
    binary: IndexMap<String, Vec<BinaryOperator>>,
}

fn matches_kind(declared: ValueKind, actual: ValueKind) -> bool {
    declared == ValueKind::Any || declared == actual
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_nular(&mut self, name: &str, func: NularFn) {
        self.nular.insert(name.to_lowercase(), func);
    }

    pub fn register_unary(&mut self, name: &str, right: ValueKind, func: UnaryFn) {
        self.unary
            .entry(name.to_lowercase())
            .or_default()
            .push(UnaryOperator { right, func });
    }

    pub fn register_binary(
        &mut self,
        name: &str,
        left: ValueKind,
        right: ValueKind,
        func: BinaryFn,
    ) {
        self.binary
            .entry(name.to_lowercase())
            .or_default()
            .push(BinaryOperator { left, right, func });
    }

    pub fn lookup_nular(&self, name: &str) -> Option<NularFn> {
        self.nular.get(&name.to_lowercase()).copied()
    }

    /// Most specific unary candidate for the operand kind.
    ///
    /// An exact kind match beats `Any`; two candidates at the same
    /// specificity are ambiguous.
    pub fn lookup_unary(&self, name: &str, right: ValueKind) -> Result<UnaryFn, DispatchError> {
        let candidates = self
            .unary
            .get(&name.to_lowercase())
            .ok_or(DispatchError::Unknown)?;
        let applicable: Vec<&UnaryOperator> = candidates
            .iter()
            .filter(|c| matches_kind(c.right, right))
            .collect();
        let best = applicable
            .iter()
            .map(|c| usize::from(c.right != ValueKind::Any))
            .max()
            .ok_or(DispatchError::NoMatch)?;
        let winners: Vec<&&UnaryOperator> = applicable
            .iter()
            .filter(|c| usize::from(c.right != ValueKind::Any) == best)
            .collect();
        match winners.as_slice() {
            [single] => Ok(single.func),
            [] => Err(DispatchError::NoMatch),
            _ => Err(DispatchError::Ambiguous),
        }
    }

    /// Most specific binary candidate for the operand kinds.
    pub fn lookup_binary(
        &self,
        name: &str,
        left: ValueKind,
        right: ValueKind,
    ) -> Result<BinaryFn, DispatchError> {
        let candidates = self
            .binary
            .get(&name.to_lowercase())
            .ok_or(DispatchError::Unknown)?;
        let applicable: Vec<&BinaryOperator> = candidates
            .iter()
            .filter(|c| matches_kind(c.left, left) && matches_kind(c.right, right))
            .collect();
        let score = |c: &BinaryOperator| {
            usize::from(c.left != ValueKind::Any) + usize::from(c.right != ValueKind::Any)
        };
        let best = applicable.iter().map(|c| score(c)).max().ok_or(DispatchError::NoMatch)?;
        let winners: Vec<&&BinaryOperator> = applicable
            .iter()
            .filter(|c| score(c) == best)
            .collect();
        match winners.as_slice() {
            [single] => Ok(single.func),
            [] => Err(DispatchError::NoMatch),
            _ => Err(DispatchError::Ambiguous),
        }
    }
}

/// Why operator dispatch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// No operator registered under the name
    Unknown,
    /// Operators exist but none accepts the operand kinds
    NoMatch,
    /// Two candidates tie on specificity
    Ambiguous,
}

/// Deferred scheduler work requested by an operator.
///
/// Effects apply at the instruction boundary after the operator
/// returns; that is the cancellation and suspension safe point.
#[derive(Debug, Clone)]
pub(crate) enum Effect {
    Sleep(f64),
    WaitUntil(Rc<InstructionList>),
    Spawn {
        handle: ScriptHandle,
        code: Rc<InstructionList>,
        args: Value,
        scheduled: bool,
    },
    Terminate(ScriptHandle),
    Throw(Value),
    PushFrame {
        code: Rc<InstructionList>,
        args: Option<Value>,
        catch: Option<Rc<InstructionList>>,
        behavior: FrameBehavior,
    },
    SetScopeName(String),
    SetScriptName(String),
}

/// Execution services visible to operator implementations.
///
/// Mutating calls queue effects rather than acting immediately, so a
/// long operator body still observes a consistent world.
pub struct OpEnv<'a> {
    pub(crate) reporter: &'a mut Reporter,
    pub(crate) namespaces: &'a mut Namespaces,
    pub(crate) location: Location,
    pub(crate) time: f64,
    pub(crate) current: ScriptHandle,
    pub(crate) next_handle: &'a mut u64,
    pub(crate) effects: Vec<Effect>,
}

impl OpEnv<'_> {
    /// Call-site location of the running operator.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Current virtual time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Handle of the context executing this operator.
    pub fn current_handle(&self) -> ScriptHandle {
        self.current
    }

    /// Emit a diagnostic through the runtime's reporter.
    pub fn report(&mut self, message: Message) {
        self.reporter.report(message);
    }

    /// Access the global namespaces.
    pub fn namespaces(&mut self) -> &mut Namespaces {
        self.namespaces
    }

    /// Suspend the owning context for `seconds` of virtual time.
    pub fn sleep(&mut self, seconds: f64) {
        self.effects.push(Effect::Sleep(seconds));
    }

    /// Suspend until `condition` evaluates truthy.
    pub fn wait_until(&mut self, condition: Rc<InstructionList>) {
        self.effects.push(Effect::WaitUntil(condition));
    }

    /// Schedule a new script context and hand back its handle.
    pub fn spawn(
        &mut self,
        code: Rc<InstructionList>,
        args: Value,
        scheduled: bool,
    ) -> ScriptHandle {
        let handle = ScriptHandle(*self.next_handle);
        *self.next_handle += 1;
        self.effects.push(Effect::Spawn {
            handle,
            code,
            args,
            scheduled,
        });
        handle
    }

    /// Request termination of a context at its next safe point.
    pub fn terminate(&mut self, handle: ScriptHandle) {
        self.effects.push(Effect::Terminate(handle));
    }

    /// Throw a value down the frame stack.
    pub fn throw(&mut self, value: Value) {
        self.effects.push(Effect::Throw(value));
    }

    /// Call a code value. The new frame's result replaces this
    /// operator's return value on the caller's stack.
    pub fn call(&mut self, code: Rc<InstructionList>, args: Option<Value>) {
        self.effects.push(Effect::PushFrame {
            code,
            args,
            catch: None,
            behavior: FrameBehavior::RunOnce,
        });
    }

    /// Call a code value with a catch handler armed for thrown values.
    pub fn call_with_catch(
        &mut self,
        body: Rc<InstructionList>,
        handler: Rc<InstructionList>,
        args: Option<Value>,
    ) {
        self.effects.push(Effect::PushFrame {
            code: body,
            args,
            catch: Some(handler),
            behavior: FrameBehavior::RunOnce,
        });
    }

    /// Push a frame that restarts from the top whenever it completes.
    /// This is the loop-forming primitive control-flow operators build on.
    pub fn push_repeat_frame(&mut self, code: Rc<InstructionList>) {
        self.effects.push(Effect::PushFrame {
            code,
            args: None,
            catch: None,
            behavior: FrameBehavior::Repeat,
        });
    }

    /// Name the current scope; a second attempt warns.
    pub fn set_scope_name(&mut self, name: impl Into<String>) {
        self.effects.push(Effect::SetScopeName(name.into()));
    }

    /// Name the current script; a second attempt warns.
    pub fn set_script_name(&mut self, name: impl Into<String>) {
        self.effects.push(Effect::SetScriptName(name.into()));
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}
