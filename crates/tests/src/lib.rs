//! Integration test harness for Quill.
//!
//! Wires a complete runtime together (mounts, preprocessor, a capturing
//! logger and the handful of operators the end-to-end scenarios need)
//! so the tests read as scenarios rather than setup. The operators
//! registered here are test fixtures; the core ships none.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use quill_diagnostics::{MemoryLogger, Message, Severity};
use quill_preprocessor::PreprocessResult;
use quill_vfs::PathInfo;
use quill_vm::{
    Configuration, Instruction, InstructionList, OpEnv, Runtime, ScriptHandle, Value, ValueKind,
};

/// Captured log lines, shared with the harness logger.
pub type Log = Rc<RefCell<Vec<(Severity, String)>>>;

static TRACING: Once = Once::new();

/// Route `RUST_LOG`-filtered tracing output to the test writer.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Build a shared instruction stream from bare instructions.
pub fn code(ops: Vec<Instruction>) -> Rc<InstructionList> {
    Rc::new(InstructionList::from_ops(ops))
}

fn op_plus(_env: &mut OpEnv, left: Value, right: Value) -> Result<Value, String> {
    match (left.as_number(), right.as_number()) {
        (Some(l), Some(r)) => Ok(Value::Number(l + r)),
        _ => Err("plus expects numbers".to_string()),
    }
}

fn op_less(_env: &mut OpEnv, left: Value, right: Value) -> Result<Value, String> {
    match (left.as_number(), right.as_number()) {
        (Some(l), Some(r)) => Ok(Value::Bool(l < r)),
        _ => Err("less expects numbers".to_string()),
    }
}

fn op_sleep(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    env.sleep(right.as_number().ok_or("sleep expects a number")?);
    Ok(Value::Nil)
}

fn op_wait_until(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    let condition = right.as_code().ok_or("waitUntil expects code")?.clone();
    env.wait_until(condition);
    Ok(Value::Nil)
}

fn op_spawn(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    let script = right.as_code().ok_or("spawn expects code")?.clone();
    Ok(Value::Script(env.spawn(script, Value::Nil, true)))
}

fn op_terminate(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    let handle = right.as_script().ok_or("terminate expects a script handle")?;
    env.terminate(handle);
    Ok(Value::Nil)
}

fn op_loop(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    let body = right.as_code().ok_or("loop expects code")?.clone();
    env.push_repeat_frame(body);
    Ok(Value::Nil)
}

fn op_call(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    let body = right.as_code().ok_or("call expects code")?.clone();
    env.call(body, None);
    Ok(Value::Nil)
}

fn op_throw(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    env.throw(right);
    Ok(Value::Nil)
}

fn op_try(env: &mut OpEnv, left: Value, right: Value) -> Result<Value, String> {
    let body = left.as_code().ok_or("try expects code")?.clone();
    let handler = right.as_code().ok_or("catch expects code")?.clone();
    env.call_with_catch(body, handler, None);
    Ok(Value::Nil)
}

fn op_push_back(_env: &mut OpEnv, left: Value, right: Value) -> Result<Value, String> {
    let array = left.as_array().ok_or("pushBack expects an array")?;
    array.borrow_mut().push(right);
    let index = array.borrow().len() - 1;
    Ok(Value::Number(index as f64))
}

fn op_str(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    match right.try_display() {
        Ok(text) => Ok(Value::string(text)),
        Err(_) => {
            env.report(Message::ArrayRecursion {
                location: env.location().clone(),
            });
            Ok(Value::string("<recursive>"))
        }
    }
}

fn op_is_equal(env: &mut OpEnv, left: Value, right: Value) -> Result<Value, String> {
    match left.try_eq(&right) {
        Ok(equal) => Ok(Value::Bool(equal)),
        Err(_) => {
            env.report(Message::ArrayRecursion {
                location: env.location().clone(),
            });
            Ok(Value::Bool(false))
        }
    }
}

fn op_scope_name(env: &mut OpEnv, right: Value) -> Result<Value, String> {
    let name = right.as_str().ok_or("scopeName expects a string")?.to_string();
    env.set_scope_name(name);
    Ok(Value::Nil)
}

/// A runtime plus a capturing logger and the scenario operator set.
pub struct TestHarness {
    runtime: Runtime,
    log: Log,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Configuration::default())
    }

    pub fn with_config(config: Configuration) -> Self {
        let mut runtime = Runtime::new(config);
        let logger = MemoryLogger::new();
        let log = logger.handle();
        runtime.add_logger(Box::new(logger));

        let ops = runtime.operators_mut();
        ops.register_binary("plus", ValueKind::Number, ValueKind::Number, op_plus);
        ops.register_binary("less", ValueKind::Number, ValueKind::Number, op_less);
        ops.register_unary("sleep", ValueKind::Number, op_sleep);
        ops.register_unary("waituntil", ValueKind::Code, op_wait_until);
        ops.register_unary("spawn", ValueKind::Code, op_spawn);
        ops.register_unary("terminate", ValueKind::Script, op_terminate);
        ops.register_unary("loop", ValueKind::Code, op_loop);
        ops.register_unary("call", ValueKind::Code, op_call);
        ops.register_unary("throw", ValueKind::Any, op_throw);
        ops.register_binary("try", ValueKind::Code, ValueKind::Code, op_try);
        ops.register_binary("pushback", ValueKind::Array, ValueKind::Any, op_push_back);
        ops.register_unary("str", ValueKind::Any, op_str);
        ops.register_binary("isequalto", ValueKind::Any, ValueKind::Any, op_is_equal);
        ops.register_unary("scopename", ValueKind::String, op_scope_name);

        Self { runtime, log }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    /// Mount a physical directory at a virtual path.
    pub fn mount(&mut self, physical: &str, virtual_path: &str) {
        self.runtime.add_mapping(physical, virtual_path);
    }

    pub fn preprocess(&mut self, content: &str, virtual_path: &str) -> Option<PreprocessResult> {
        let path = PathInfo::new("", virtual_path);
        self.runtime.preprocess(content, &path)
    }

    pub fn preprocess_file(&mut self, virtual_path: &str) -> Option<PreprocessResult> {
        self.runtime.preprocess_file(virtual_path)
    }

    /// Run a code value inline and return its result.
    pub fn evaluate(&mut self, script: Rc<InstructionList>) -> Value {
        self.runtime.evaluate(script, Value::Nil)
    }

    /// Spawn a scheduled context.
    pub fn spawn(&mut self, script: Rc<InstructionList>) -> ScriptHandle {
        self.runtime.spawn(script, Value::Nil, true)
    }

    pub fn run_ticks(&mut self, count: u64) {
        for _ in 0..count {
            self.runtime.execute_tick();
        }
    }

    /// Tick until every handle is done; false if `max_ticks` ran out.
    pub fn run_until_done(&mut self, handles: &[ScriptHandle], max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if handles
                .iter()
                .all(|handle| self.runtime.script_done(*handle).unwrap_or(true))
            {
                return true;
            }
            self.runtime.execute_tick();
        }
        handles
            .iter()
            .all(|handle| self.runtime.script_done(*handle).unwrap_or(true))
    }

    pub fn advance_time(&mut self, seconds: f64) {
        self.runtime.advance_time(seconds);
    }

    /// Set a mission-namespace global, as a host embedding would.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.runtime
            .namespaces_mut()
            .get_mut(quill_vm::NamespaceKind::Mission)
            .set(name, value);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.runtime
            .namespaces()
            .get(quill_vm::NamespaceKind::Mission)
            .get(name)
            .cloned()
    }

    /// Captured log lines.
    pub fn log_lines(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// How many captured lines contain `needle`.
    pub fn logged(&self, needle: &str) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|(_, line)| line.contains(needle))
            .count()
    }

    /// Severity of the first captured line containing `needle`.
    pub fn logged_severity(&self, needle: &str) -> Option<Severity> {
        self.log
            .borrow()
            .iter()
            .find(|(_, line)| line.contains(needle))
            .map(|(severity, _)| *severity)
    }
}
