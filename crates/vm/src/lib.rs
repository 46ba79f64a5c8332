//! Quill VM
//!
//! Execution substrate for the scripting language: the value model,
//! instruction set, call frames and scopes, operator registry, script
//! contexts and the cooperative scheduler, all owned by one `Runtime`
//! aggregate. The core ships no built-in operators; hosts register what
//! their dialect needs.

pub mod config;
pub mod context;
pub mod error;
mod executor;
pub mod frame;
pub mod instruction;
pub mod operators;
pub mod runtime;
pub mod scope;
pub mod value;

pub use config::Configuration;
pub use context::{ContextState, ScriptContext, ScriptHandle};
pub use error::{Error, Result};
pub use frame::{Frame, FrameBehavior};
pub use instruction::{Instruction, InstructionList, LocatedInstruction};
pub use operators::{BinaryFn, DispatchError, NularFn, OpEnv, OperatorRegistry, UnaryFn};
pub use runtime::{Runtime, TickSummary};
pub use scope::{NamespaceKind, Namespaces, Scope, Variable};
pub use value::{ArrayCycle, ArrayRef, Side, Value, ValueKind};
