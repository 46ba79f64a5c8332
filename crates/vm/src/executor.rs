//! Instruction dispatch
//!
//! Runs slices of a script context against the registry and namespaces.
//! Operator effects (suspension, spawns, throws, frame pushes) apply at
//! the instruction boundary after the operator returns; that boundary is
//! the only cancellation and suspension safe point.

use std::rc::Rc;

use quill_diagnostics::{Location, Message};
use tracing::{debug, trace};

use crate::config::Configuration;
use crate::context::{ContextState, ScriptContext, ScriptHandle};
use crate::frame::{Frame, FrameBehavior};
use crate::instruction::{Instruction, InstructionList};
use crate::operators::{DispatchError, Effect, OpEnv, OperatorRegistry};
use crate::scope::Namespaces;
use crate::value::{Value, ValueKind};

/// Borrowed runtime services for one execution slice.
pub(crate) struct ExecEnv<'a> {
    pub operators: &'a OperatorRegistry,
    pub namespaces: &'a mut Namespaces,
    pub reporter: &'a mut quill_diagnostics::Reporter,
    pub config: &'a Configuration,
    pub next_handle: &'a mut u64,
    pub time: f64,
}

/// A spawn requested by an operator, created by the scheduler once the
/// current slice ends.
pub(crate) struct SpawnRequest {
    pub handle: ScriptHandle,
    pub code: Rc<InstructionList>,
    pub args: Value,
    pub scheduled: bool,
}

/// Run up to `budget` instructions of `ctx`.
///
/// Returns the number of instructions executed. Cross-context effects
/// are handed back through `spawns` and `terminations` because only the
/// scheduler can see the full context table.
pub(crate) fn run_slice(
    env: &mut ExecEnv,
    ctx: &mut ScriptContext,
    budget: u64,
    spawns: &mut Vec<SpawnRequest>,
    terminations: &mut Vec<ScriptHandle>,
) -> u64 {
    let mut executed: u64 = 0;
    while executed < budget && ctx.is_running() {
        let Some(top) = ctx.frames.last() else {
            ctx.state = ContextState::Finished;
            break;
        };

        if top.completed() {
            // Frame transitions are budgeted too, so an empty repeat
            // body cannot starve the tick
            executed += 1;
            if !charge(env, ctx, &Location::default()) {
                break;
            }
            complete_frame(ctx);
            continue;
        }

        let (op, location) = {
            let top = ctx.frames.last_mut().expect("vm bug: frame checked above");
            let entry = &top.code.instructions[top.pc];
            let pair = (entry.op.clone(), entry.location.clone());
            top.pc += 1;
            pair
        };
        executed += 1;
        if !charge(env, ctx, &location) {
            break;
        }
        step(env, ctx, op, &location, spawns, terminations);
    }
    executed
}

/// Count one instruction against the context's lifetime ceiling.
fn charge(env: &mut ExecEnv, ctx: &mut ScriptContext, location: &Location) -> bool {
    ctx.executed += 1;
    let ceiling = env.config.max_total_instructions;
    if ceiling > 0 && ctx.executed > ceiling {
        env.reporter.report(Message::MaximumInstructionCountReached {
            location: location.clone(),
            count: ceiling,
        });
        debug!(handle = %ctx.handle, ceiling, "instruction ceiling reached");
        ctx.state = ContextState::Terminated;
        ctx.frames.clear();
        return false;
    }
    true
}

/// Handle a frame whose program counter ran off the end.
fn complete_frame(ctx: &mut ScriptContext) {
    let behavior = ctx
        .frames
        .last()
        .expect("vm bug: frame checked above")
        .behavior;
    match behavior {
        FrameBehavior::Repeat => {
            ctx.frames
                .last_mut()
                .expect("vm bug: frame checked above")
                .reset();
        }
        FrameBehavior::Guard => {
            let mut frame = ctx.frames.pop().expect("vm bug: frame checked above");
            let result = frame.return_value();
            if result.truthy() {
                trace!(handle = %ctx.handle, "wait condition satisfied");
            } else {
                ctx.state = ContextState::Waiting {
                    condition: frame.code.clone(),
                };
            }
        }
        FrameBehavior::RunOnce => {
            let mut frame = ctx.frames.pop().expect("vm bug: frame checked above");
            let result = frame.return_value();
            match ctx.frames.last_mut() {
                Some(parent) => parent.stack.push(result),
                None => {
                    trace!(handle = %ctx.handle, "context finished");
                    ctx.last = result;
                    ctx.state = ContextState::Finished;
                }
            }
        }
    }
}

fn pop_operand(ctx: &mut ScriptContext) -> Value {
    ctx.frames
        .last_mut()
        .expect("vm bug: stepping without a frame")
        .stack
        .pop()
        .unwrap_or_default()
}

fn step(
    env: &mut ExecEnv,
    ctx: &mut ScriptContext,
    op: Instruction,
    location: &Location,
    spawns: &mut Vec<SpawnRequest>,
    terminations: &mut Vec<ScriptHandle>,
) {
    match op {
        Instruction::EndStatement => {
            let top = ctx.frames.last_mut().expect("vm bug: stepping without a frame");
            top.last_statement = top.stack.pop().unwrap_or_default();
        }
        Instruction::Push(value) => {
            ctx.frames
                .last_mut()
                .expect("vm bug: stepping without a frame")
                .stack
                .push(value);
        }
        Instruction::GetVariable(name) => {
            let value = read_variable(env, ctx, &name, location);
            ctx.frames
                .last_mut()
                .expect("vm bug: stepping without a frame")
                .stack
                .push(value);
        }
        Instruction::AssignTo(name) => {
            let value = pop_operand(ctx);
            assign(env, ctx, &name, value, false);
        }
        Instruction::AssignToLocal(name) => {
            let value = pop_operand(ctx);
            assign(env, ctx, &name, value, true);
        }
        Instruction::MakeArray(count) => {
            let top = ctx.frames.last_mut().expect("vm bug: stepping without a frame");
            let at = top.stack.len().saturating_sub(count);
            let items: Vec<Value> = top.stack.drain(at..).collect();
            top.stack.push(Value::array(items));
        }
        Instruction::CallNular(name) => match env.operators.lookup_nular(&name) {
            Some(func) => invoke(env, ctx, location, spawns, terminations, |op_env| {
                func(op_env)
            }),
            None => runtime_error(
                env,
                ctx,
                location,
                format!("Unknown nular operator '{name}'."),
            ),
        },
        Instruction::CallUnary(name) => {
            let right = pop_operand(ctx);
            match env.operators.lookup_unary(&name, right.kind()) {
                Ok(func) => invoke(env, ctx, location, spawns, terminations, move |op_env| {
                    func(op_env, right)
                }),
                Err(error) => {
                    let text = dispatch_text(&name, error, &[right.kind()]);
                    runtime_error(env, ctx, location, text);
                }
            }
        }
        Instruction::CallBinary(name) => {
            let right = pop_operand(ctx);
            let left = pop_operand(ctx);
            match env.operators.lookup_binary(&name, left.kind(), right.kind()) {
                Ok(func) => invoke(env, ctx, location, spawns, terminations, move |op_env| {
                    func(op_env, left, right)
                }),
                Err(error) => {
                    let text = dispatch_text(&name, error, &[left.kind(), right.kind()]);
                    runtime_error(env, ctx, location, text);
                }
            }
        }
    }
}

fn dispatch_text(name: &str, error: DispatchError, kinds: &[ValueKind]) -> String {
    let operands = kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    match error {
        DispatchError::Unknown => format!("Unknown operator '{name}'."),
        DispatchError::NoMatch => {
            format!("Type mismatch for operator '{name}' on {operands}.")
        }
        DispatchError::Ambiguous => {
            format!("Ambiguous overloads for operator '{name}' on {operands}.")
        }
    }
}

fn invoke<F>(
    env: &mut ExecEnv,
    ctx: &mut ScriptContext,
    location: &Location,
    spawns: &mut Vec<SpawnRequest>,
    terminations: &mut Vec<ScriptHandle>,
    call: F,
) where
    F: FnOnce(&mut OpEnv) -> Result<Value, String>,
{
    let mut op_env = OpEnv {
        reporter: &mut *env.reporter,
        namespaces: &mut *env.namespaces,
        location: location.clone(),
        time: env.time,
        current: ctx.handle,
        next_handle: &mut *env.next_handle,
        effects: Vec::new(),
    };
    match call(&mut op_env) {
        Ok(value) => {
            let effects = op_env.take_effects();
            drop(op_env);
            // A pushed frame's result replaces the operator's return
            // value on the caller's stack
            let pushes_frame = effects
                .iter()
                .any(|effect| matches!(effect, Effect::PushFrame { .. }));
            if !pushes_frame {
                ctx.frames
                    .last_mut()
                    .expect("vm bug: stepping without a frame")
                    .stack
                    .push(value);
            }
            apply_effects(env, ctx, effects, location, spawns, terminations);
        }
        Err(text) => {
            drop(op_env);
            runtime_error(env, ctx, location, text);
        }
    }
}

/// A runtime error terminates the owning context, never the scheduler.
fn runtime_error(env: &mut ExecEnv, ctx: &mut ScriptContext, location: &Location, text: String) {
    env.reporter.report(Message::GenericError {
        location: location.clone(),
        text,
    });
    ctx.state = ContextState::Terminated;
    ctx.frames.clear();
}

fn read_variable(
    env: &mut ExecEnv,
    ctx: &ScriptContext,
    name: &str,
    location: &Location,
) -> Value {
    if name.starts_with('_') {
        for frame in ctx.frames.iter().rev() {
            if let Some(value) = frame.locals.get(name) {
                return value.clone();
            }
        }
    } else {
        let namespace = ctx
            .frames
            .last()
            .map(|frame| frame.namespace)
            .unwrap_or_default();
        if let Some(value) = env.namespaces.get(namespace).get(name) {
            return value.clone();
        }
    }
    env.reporter.report(Message::UnassignedVariable {
        location: location.clone(),
        variable: name.to_string(),
    });
    Value::Nil
}

fn assign(env: &mut ExecEnv, ctx: &mut ScriptContext, name: &str, value: Value, force_local: bool) {
    if force_local {
        ctx.frames
            .last_mut()
            .expect("vm bug: stepping without a frame")
            .locals
            .set(name, value);
    } else if name.starts_with('_') {
        // Nearest enclosing private binding wins; otherwise the current
        // frame gets a new one
        match ctx
            .frames
            .iter()
            .rposition(|frame| frame.locals.contains(name))
        {
            Some(index) => ctx.frames[index].locals.set(name, value),
            None => ctx
                .frames
                .last_mut()
                .expect("vm bug: stepping without a frame")
                .locals
                .set(name, value),
        }
    } else {
        let namespace = ctx
            .frames
            .last()
            .map(|frame| frame.namespace)
            .unwrap_or_default();
        env.namespaces.get_mut(namespace).set(name, value);
    }
}

fn apply_effects(
    env: &mut ExecEnv,
    ctx: &mut ScriptContext,
    effects: Vec<Effect>,
    location: &Location,
    spawns: &mut Vec<SpawnRequest>,
    terminations: &mut Vec<ScriptHandle>,
) {
    for effect in effects {
        match effect {
            Effect::Sleep(seconds) => {
                if suspend_allowed(env, ctx, location) {
                    trace!(handle = %ctx.handle, seconds, "context sleeping");
                    ctx.state = ContextState::Sleeping {
                        until: env.time + seconds,
                    };
                }
            }
            Effect::WaitUntil(condition) => {
                if suspend_allowed(env, ctx, location) {
                    trace!(handle = %ctx.handle, "context waiting");
                    ctx.state = ContextState::Waiting { condition };
                }
            }
            Effect::Spawn {
                handle,
                code,
                args,
                scheduled,
            } => {
                debug!(handle = %handle, scheduled, "spawn requested");
                spawns.push(SpawnRequest {
                    handle,
                    code,
                    args,
                    scheduled,
                });
            }
            Effect::Terminate(handle) if handle == ctx.handle => {
                debug!(handle = %handle, "context terminated itself");
                ctx.state = ContextState::Terminated;
                ctx.frames.clear();
            }
            Effect::Terminate(handle) => terminations.push(handle),
            Effect::Throw(value) => throw_value(env, ctx, value, location),
            Effect::PushFrame {
                code,
                args,
                catch,
                behavior,
            } => {
                let namespace = ctx
                    .frames
                    .last()
                    .map(|frame| frame.namespace)
                    .unwrap_or_default();
                let mut frame = Frame::new(code, namespace).with_behavior(behavior);
                frame.catch_handler = catch;
                if let Some(args) = args {
                    frame.bind_this(args, location, env.reporter);
                }
                ctx.frames.push(frame);
            }
            Effect::SetScopeName(name) => {
                if let Some(top) = ctx.frames.last_mut() {
                    top.set_scope_name(name, location, env.reporter);
                }
            }
            Effect::SetScriptName(name) => {
                if let Some(top) = ctx.frames.last_mut() {
                    top.set_script_name(name, location, env.reporter);
                }
            }
        }
    }
}

/// Suspension is only legal in scheduled contexts.
fn suspend_allowed(env: &mut ExecEnv, ctx: &mut ScriptContext, location: &Location) -> bool {
    if ctx.scheduled {
        return true;
    }
    env.reporter
        .report(Message::SuspensionInUnscheduledEnvironment {
            location: location.clone(),
        });
    ctx.state = ContextState::Terminated;
    ctx.frames.clear();
    false
}

/// Unwind to the nearest catching frame, or terminate the context.
fn throw_value(env: &mut ExecEnv, ctx: &mut ScriptContext, value: Value, location: &Location) {
    match ctx
        .frames
        .iter()
        .rposition(|frame| frame.catch_handler.is_some())
    {
        Some(index) => {
            let handler = ctx.frames[index]
                .catch_handler
                .take()
                .expect("vm bug: position matched a catching frame");
            let namespace = ctx.frames[index].namespace;
            ctx.frames.truncate(index);
            let mut frame = Frame::new(handler, namespace);
            frame.locals.set("_exception", value);
            ctx.frames.push(frame);
        }
        None => {
            env.reporter.report(Message::Stacktrace {
                location: location.clone(),
                trace: ctx.stacktrace(),
            });
            ctx.state = ContextState::Terminated;
            ctx.frames.clear();
        }
    }
}
