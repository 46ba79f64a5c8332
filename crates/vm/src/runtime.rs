//! Runtime aggregate
//!
//! Everything that was global in older engines lives here: filesystem,
//! preprocessor, operator registry, namespaces, contexts, diagnostics
//! and the cooperative scheduler. Multiple runtimes coexist in one
//! process; nothing escapes this struct.

use std::rc::Rc;

use quill_diagnostics::{Location, Logger, Message, Reporter};
use quill_preprocessor::{PreprocessResult, Preprocessor};
use quill_vfs::{FileIo, PathInfo};
use tracing::{debug, instrument, trace};

use crate::config::Configuration;
use crate::context::{ContextState, ScriptContext, ScriptHandle};
use crate::error::{Error, Result};
use crate::executor::{ExecEnv, SpawnRequest, run_slice};
use crate::frame::{Frame, FrameBehavior};
use crate::instruction::InstructionList;
use crate::operators::OperatorRegistry;
use crate::scope::{NamespaceKind, Namespaces};
use crate::value::Value;

/// What one scheduler pass did.
#[derive(Debug, Clone, Copy)]
pub struct TickSummary {
    /// Tick number just completed (1-based)
    pub tick: u64,
    /// Instructions executed across all contexts this pass
    pub instructions: u64,
}

/// A complete scripting runtime.
pub struct Runtime {
    file_io: FileIo,
    preprocessor: Preprocessor,
    operators: OperatorRegistry,
    namespaces: Namespaces,
    reporter: Reporter,
    config: Configuration,
    contexts: Vec<ScriptContext>,
    next_handle: u64,
    clock: f64,
    tick: u64,
    instruction_count: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl Runtime {
    pub fn new(config: Configuration) -> Self {
        let mut reporter = Reporter::new();
        reporter.set_strict(config.strict_mode);
        let mut preprocessor = Preprocessor::new();
        preprocessor.set_classic_includes(config.enable_classic_includes);
        Self {
            file_io: FileIo::new(config.case_sensitive_paths),
            preprocessor,
            operators: OperatorRegistry::new(),
            namespaces: Namespaces::new(),
            reporter,
            config,
            contexts: Vec::new(),
            next_handle: 1,
            clock: 0.0,
            tick: 0,
            instruction_count: 0,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn file_io(&self) -> &FileIo {
        &self.file_io
    }

    pub fn file_io_mut(&mut self) -> &mut FileIo {
        &mut self.file_io
    }

    pub fn preprocessor_mut(&mut self) -> &mut Preprocessor {
        &mut self.preprocessor
    }

    pub fn operators_mut(&mut self) -> &mut OperatorRegistry {
        &mut self.operators
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn namespaces_mut(&mut self) -> &mut Namespaces {
        &mut self.namespaces
    }

    pub fn reporter_mut(&mut self) -> &mut Reporter {
        &mut self.reporter
    }

    pub fn add_logger(&mut self, logger: Box<dyn Logger>) {
        self.reporter.push_logger(logger);
    }

    /// Mount a physical directory at a virtual path.
    pub fn add_mapping(&mut self, physical: &str, virtual_path: &str) {
        self.file_io.add_mapping(physical, virtual_path);
    }

    /// Preprocess in-memory content attributed to `path`.
    pub fn preprocess(&mut self, content: &str, path: &PathInfo) -> Option<PreprocessResult> {
        let Runtime {
            file_io,
            preprocessor,
            reporter,
            ..
        } = self;
        preprocessor.preprocess(file_io, reporter, content, path)
    }

    /// Resolve, read and preprocess a virtual path.
    pub fn preprocess_file(&mut self, virtual_path: &str) -> Option<PreprocessResult> {
        let Runtime {
            file_io,
            preprocessor,
            reporter,
            ..
        } = self;
        preprocessor.preprocess_file(file_io, reporter, virtual_path)
    }

    /// Current virtual time in seconds.
    pub fn time(&self) -> f64 {
        self.clock
    }

    /// Advance the virtual clock; sleeping contexts wake once their
    /// deadline passes.
    pub fn advance_time(&mut self, seconds: f64) {
        self.clock += seconds;
    }

    /// Ticks completed so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Instructions executed across all contexts since construction.
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn contexts(&self) -> &[ScriptContext] {
        &self.contexts
    }

    fn find_context(&self, handle: ScriptHandle) -> Option<&ScriptContext> {
        self.contexts.iter().find(|ctx| ctx.handle == handle)
    }

    /// Spawn a script context. Unscheduled contexts run to completion
    /// before this returns.
    pub fn spawn(
        &mut self,
        code: Rc<InstructionList>,
        args: Value,
        scheduled: bool,
    ) -> ScriptHandle {
        let handle = ScriptHandle(self.next_handle);
        self.next_handle += 1;
        self.add_context(SpawnRequest {
            handle,
            code,
            args,
            scheduled,
        });
        handle
    }

    /// Run a code value inline (unscheduled) and return its result.
    pub fn evaluate(&mut self, code: Rc<InstructionList>, args: Value) -> Value {
        let handle = self.spawn(code, args, false);
        self.find_context(handle)
            .map(|ctx| ctx.last.clone())
            .unwrap_or_default()
    }

    /// Whether the script behind `handle` has finished or been
    /// terminated.
    pub fn script_done(&self, handle: ScriptHandle) -> Result<bool> {
        self.find_context(handle)
            .map(ScriptContext::is_done)
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Final value of a finished script.
    pub fn script_result(&self, handle: ScriptHandle) -> Result<Value> {
        self.find_context(handle)
            .map(|ctx| ctx.last.clone())
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Request termination at the target's next safe point.
    ///
    /// Terminating an already finished or terminated script reports a
    /// diagnostic rather than failing.
    pub fn terminate(&mut self, handle: ScriptHandle) -> Result<()> {
        if self.find_context(handle).is_none() {
            return Err(Error::UnknownHandle(handle));
        }
        self.apply_terminate(handle);
        Ok(())
    }

    /// One cooperative scheduler pass over all scheduled contexts.
    #[instrument(skip(self), fields(tick = self.tick))]
    pub fn execute_tick(&mut self) -> TickSummary {
        let mut spawns = Vec::new();
        let mut terminations = Vec::new();
        let mut instructions = 0u64;

        for index in 0..self.contexts.len() {
            let Runtime {
                contexts,
                operators,
                namespaces,
                reporter,
                config,
                next_handle,
                clock,
                ..
            } = self;
            let ctx = &mut contexts[index];
            if !ctx.scheduled {
                continue;
            }
            match &ctx.state {
                ContextState::Sleeping { until } => {
                    if *clock >= *until {
                        trace!(handle = %ctx.handle, "context woke");
                        ctx.state = ContextState::Running;
                    } else {
                        continue;
                    }
                }
                ContextState::Waiting { condition } => {
                    // Re-poll by running the condition on top of the
                    // context's own frames, so it sees enclosing locals
                    let condition = condition.clone();
                    let namespace = ctx
                        .frames
                        .last()
                        .map(|frame| frame.namespace)
                        .unwrap_or_default();
                    ctx.frames.push(
                        Frame::new(condition, namespace).with_behavior(FrameBehavior::Guard),
                    );
                    ctx.state = ContextState::Running;
                }
                ContextState::Running => {}
                _ => continue,
            }

            let budget = config.max_instructions_per_tick;
            let mut env = ExecEnv {
                operators,
                namespaces,
                reporter,
                config,
                next_handle,
                time: *clock,
            };
            instructions += run_slice(&mut env, ctx, budget, &mut spawns, &mut terminations);
        }

        for request in spawns {
            self.add_context(request);
        }
        for handle in terminations {
            self.apply_terminate(handle);
        }

        self.instruction_count += instructions;
        self.tick += 1;
        TickSummary {
            tick: self.tick,
            instructions,
        }
    }

    fn add_context(&mut self, request: SpawnRequest) {
        let mut ctx = ScriptContext::new(request.handle, request.scheduled);
        let mut frame = Frame::new(request.code, NamespaceKind::Mission);
        frame.bind_this(request.args, &Location::default(), &mut self.reporter);
        ctx.frames.push(frame);
        debug!(handle = %request.handle, scheduled = request.scheduled, "context spawned");
        self.contexts.push(ctx);
        if !request.scheduled {
            let index = self.contexts.len() - 1;
            self.run_to_completion(index);
        }
    }

    /// Drive an unscheduled context until it leaves the running state.
    fn run_to_completion(&mut self, index: usize) {
        let mut spawns = Vec::new();
        let mut terminations = Vec::new();
        loop {
            let Runtime {
                contexts,
                operators,
                namespaces,
                reporter,
                config,
                next_handle,
                clock,
                ..
            } = self;
            let ctx = &mut contexts[index];
            if !ctx.is_running() {
                break;
            }
            let mut env = ExecEnv {
                operators,
                namespaces,
                reporter,
                config,
                next_handle,
                time: *clock,
            };
            let executed = run_slice(&mut env, ctx, u64::MAX, &mut spawns, &mut terminations);
            self.instruction_count += executed;
        }
        for request in spawns {
            self.add_context(request);
        }
        for handle in terminations {
            self.apply_terminate(handle);
        }
    }

    fn apply_terminate(&mut self, handle: ScriptHandle) {
        let Runtime {
            contexts, reporter, ..
        } = self;
        match contexts.iter_mut().find(|ctx| ctx.handle == handle) {
            None => reporter.report(Message::GenericError {
                location: Location::default(),
                text: format!("Unknown script handle {handle}."),
            }),
            Some(ctx) => match ctx.state {
                ContextState::Finished => reporter.report(Message::ScriptHandleAlreadyFinished {
                    location: Location::default(),
                }),
                ContextState::Terminated => {
                    reporter.report(Message::ScriptHandleAlreadyTerminated {
                        location: Location::default(),
                    })
                }
                _ => {
                    debug!(handle = %handle, "context terminated");
                    ctx.state = ContextState::Terminated;
                    ctx.frames.clear();
                }
            },
        }
    }
}
