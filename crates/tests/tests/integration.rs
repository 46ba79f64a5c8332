//! End-to-end scenarios for the full pipeline:
//! mount → preprocess → execute on the scheduler → verify output and
//! diagnostics.

use std::fs;

use quill_tests::{TestHarness, code, init_tracing};
use quill_vm::{Configuration, Instruction, Value};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path.display().to_string()
}

fn without_markers(output: &str) -> String {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("#line"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// A mounted file resolves back to itself through the virtual tree.
#[test]
fn test_fileio_round_trip() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let on_disk = write(&dir, "init.sqf", "x = 1;\n");

    let mut harness = TestHarness::new();
    harness.mount(&dir.path().display().to_string(), "/mission");

    let io = harness.runtime().file_io();
    let info = io
        .get_info_virtual("/mission/init.sqf", &Default::default())
        .unwrap();
    assert_eq!(info.virtual_path, "/mission/init.sqf");
    assert_eq!(info.physical, on_disk);
    assert_eq!(io.read_file(&info).unwrap(), "x = 1;\n");
}

/// `..` never climbs above the mount root.
#[test]
fn test_fileio_dir_up_clamped() {
    let dir = TempDir::new().unwrap();
    write(&dir, "f.txt", "x");

    let mut harness = TestHarness::new();
    harness.mount(&dir.path().display().to_string(), "/a");

    let io = harness.runtime().file_io();
    assert!(io.get_info_virtual("/a/../..", &Default::default()).is_none());
}

/// Scenario: mount a package, include a header with backslash separators,
/// and use the macro it defines.
#[test]
fn test_include_chain() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.h", "#define X 42\n");
    write(&dir, "main", "#include \"\\pkg\\a.h\"\nX");

    let mut harness = TestHarness::new();
    harness.mount(&dir.path().display().to_string(), "/pkg");

    let result = harness.preprocess_file("/pkg/main").unwrap();
    assert!(!result.soft_errors);
    assert_eq!(without_markers(&result.output), "42");
}

/// Scenario: nested function-like macro expansion.
#[test]
fn test_macro_expansion() {
    let mut harness = TestHarness::new();
    let result = harness
        .preprocess("#define ADD(a,b) ((a)+(b))\nADD(1, ADD(2,3))", "/mem/t")
        .unwrap();
    assert_eq!(result.output, "((1)+(((2)+(3))))");
}

/// Scenario: conditional compilation selects the defined branch.
#[test]
fn test_conditional_exclusion() {
    let mut harness = TestHarness::new();
    let with_flag = harness
        .preprocess("#define DBG\n#ifdef DBG\ny\n#else\nn\n#endif", "/mem/t")
        .unwrap();
    assert_eq!(with_flag.output.trim(), "y");

    let without_flag = harness
        .preprocess("#ifdef DBG\ny\n#else\nn\n#endif", "/mem/t")
        .unwrap();
    assert_eq!(without_flag.output.trim(), "n");
}

/// Preprocessing directive-free, macro-free input is byte-identical.
#[test]
fn test_preprocessor_idempotence() {
    let mut harness = TestHarness::new();
    let input = "private _total = 0;\n_total = _total plus 1;\n";
    let result = harness.preprocess(input, "/mem/t").unwrap();
    assert_eq!(result.output, input);
    assert!(!result.output.contains("#line"));
}

/// Wrong macro arity emits exactly one diagnostic.
#[test]
fn test_macro_arity_diagnostic() {
    let mut harness = TestHarness::new();
    let result = harness
        .preprocess("#define F(a,b) a+b\nF(1)", "/mem/t")
        .unwrap();
    assert!(result.soft_errors);
    assert_eq!(harness.logged("Argument count mismatch"), 1);
}

/// A two-file include cycle is reported once and output stays bounded.
#[test]
fn test_recursive_include() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.h", "#include \"/pkg/b.h\"\nalpha\n");
    write(&dir, "b.h", "#include \"/pkg/a.h\"\nbeta\n");

    let mut harness = TestHarness::new();
    harness.mount(&dir.path().display().to_string(), "/pkg");

    let result = harness.preprocess_file("/pkg/a.h").unwrap();
    assert_eq!(harness.logged("Recursive include"), 1);
    assert_eq!(result.output.matches("alpha").count(), 1);
    assert_eq!(result.output.matches("beta").count(), 1);
}

/// Unbalanced conditionals are always diagnosed, in both directions.
#[test]
fn test_conditional_balance() {
    let mut harness = TestHarness::new();
    harness.preprocess("#ifdef A\nx\n", "/mem/t").unwrap();
    assert_eq!(harness.logged("Missing ENDIF"), 1);

    harness.preprocess("x\n#endif\n", "/mem/t").unwrap();
    assert_eq!(harness.logged("Unexpected ENDIF"), 1);
}

/// Scenario: suspension inside an unscheduled context terminates it.
#[test]
fn test_suspension_in_unscheduled_context() {
    let mut harness = TestHarness::new();
    let script = code(vec![
        Instruction::Push(Value::Number(1.0)),
        Instruction::CallUnary("sleep".to_string()),
        Instruction::EndStatement,
    ]);
    let handle = harness.runtime_mut().spawn(script, Value::Nil, false);

    assert!(harness.runtime().script_done(handle).unwrap());
    assert_eq!(
        harness.logged("Cannot suspend in an unscheduled environment."),
        1
    );
}

/// Scenario: a busy loop trips the lifetime instruction ceiling, with
/// the limit rendered in digits.
#[test]
fn test_instruction_budget() {
    let mut harness = TestHarness::with_config(Configuration {
        max_total_instructions: 1000,
        ..Configuration::default()
    });
    let body = code(vec![
        Instruction::Push(Value::Bool(true)),
        Instruction::EndStatement,
    ]);
    let script = code(vec![
        Instruction::Push(Value::Code(body)),
        Instruction::CallUnary("loop".to_string()),
    ]);
    let handle = harness.spawn(script);

    assert!(harness.run_until_done(&[handle], 100));
    assert_eq!(
        harness.logged("Maximum instruction count of 1000 reached."),
        1
    );
}

/// Scenario: overlapping mounts resolve in mount order.
#[test]
fn test_resolver_overlay_precedence() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let expected = write(&first, "f.txt", "first");
    write(&second, "f.txt", "second");

    let mut harness = TestHarness::new();
    harness.mount(&first.path().display().to_string(), "/m");
    harness.mount(&second.path().display().to_string(), "/m");

    let info = harness
        .runtime()
        .file_io()
        .get_info_virtual("/m/f.txt", &Default::default())
        .unwrap();
    assert_eq!(info.physical, expected);
}

/// Two contexts interleave on one thread; the shared array shows no
/// tearing and no lost appends.
#[test]
fn test_single_thread_serialization() {
    let mut harness = TestHarness::with_config(Configuration {
        max_instructions_per_tick: 64,
        ..Configuration::default()
    });
    let shared = Value::array(vec![]);
    let appends = 1000usize;

    let mut build = |marker: f64| {
        let mut ops = Vec::with_capacity(appends * 4);
        for _ in 0..appends {
            ops.push(Instruction::Push(shared.clone()));
            ops.push(Instruction::Push(Value::Number(marker)));
            ops.push(Instruction::CallBinary("pushback".to_string()));
            ops.push(Instruction::EndStatement);
        }
        code(ops)
    };
    let first = harness.spawn(build(1.0));
    let second = harness.spawn(build(2.0));

    assert!(harness.run_until_done(&[first, second], 1000));

    let array = shared.as_array().unwrap().borrow();
    assert_eq!(array.len(), appends * 2);
    let ones = array.iter().filter(|v| **v == Value::Number(1.0)).count();
    assert_eq!(ones, appends);
    assert!(array
        .iter()
        .all(|v| *v == Value::Number(1.0) || *v == Value::Number(2.0)));
}

/// Private assignment stays in its frame; public assignment shares the
/// namespace cell.
#[test]
fn test_name_resolution() {
    let mut harness = TestHarness::new();
    let inner = code(vec![
        Instruction::Push(Value::Number(2.0)),
        Instruction::AssignToLocal("_x".to_string()),
        Instruction::EndStatement,
        Instruction::Push(Value::Number(9.0)),
        Instruction::AssignTo("shared".to_string()),
        Instruction::EndStatement,
    ]);
    let outer = code(vec![
        Instruction::Push(Value::Number(1.0)),
        Instruction::AssignToLocal("_x".to_string()),
        Instruction::Push(Value::Code(inner)),
        Instruction::CallUnary("call".to_string()),
        Instruction::EndStatement,
        Instruction::GetVariable("_x".to_string()),
    ]);

    assert_eq!(harness.evaluate(outer), Value::Number(1.0));
    assert_eq!(harness.get_global("shared"), Some(Value::Number(9.0)));
}

/// sleep parks a context on the virtual clock; waitUntil re-polls its
/// condition each pass.
#[test]
fn test_sleep_and_wait_until() {
    let mut harness = TestHarness::new();
    harness.set_global("ready", Value::Bool(false));

    let sleeper = code(vec![
        Instruction::Push(Value::Number(3.0)),
        Instruction::CallUnary("sleep".to_string()),
        Instruction::EndStatement,
        Instruction::Push(Value::Number(1.0)),
        Instruction::EndStatement,
    ]);
    let condition = code(vec![Instruction::GetVariable("ready".to_string())]);
    let waiter = code(vec![
        Instruction::Push(Value::Code(condition)),
        Instruction::CallUnary("waituntil".to_string()),
        Instruction::EndStatement,
        Instruction::Push(Value::Number(2.0)),
        Instruction::EndStatement,
    ]);

    let sleeping = harness.spawn(sleeper);
    let waiting = harness.spawn(waiter);

    harness.run_ticks(3);
    assert!(!harness.runtime().script_done(sleeping).unwrap());
    assert!(!harness.runtime().script_done(waiting).unwrap());

    harness.advance_time(3.0);
    harness.run_ticks(1);
    assert!(harness.runtime().script_done(sleeping).unwrap());
    assert!(!harness.runtime().script_done(waiting).unwrap());

    harness.set_global("ready", Value::Bool(true));
    harness.run_ticks(2);
    assert!(harness.runtime().script_done(waiting).unwrap());
    assert_eq!(
        harness.runtime().script_result(waiting).unwrap(),
        Value::Number(2.0)
    );
}

/// A script spawns a worker, the host terminates it; terminating again
/// reports the handle state instead of failing.
#[test]
fn test_spawn_and_terminate() {
    let mut harness = TestHarness::new();
    let body = code(vec![
        Instruction::Push(Value::Bool(true)),
        Instruction::EndStatement,
    ]);
    let worker = code(vec![
        Instruction::Push(Value::Code(body)),
        Instruction::CallUnary("loop".to_string()),
    ]);
    let parent = code(vec![
        Instruction::Push(Value::Code(worker)),
        Instruction::CallUnary("spawn".to_string()),
        Instruction::AssignTo("child".to_string()),
        Instruction::EndStatement,
    ]);
    harness.evaluate(parent);

    let child = harness
        .get_global("child")
        .and_then(|v| v.as_script())
        .unwrap();
    harness.run_ticks(2);
    assert!(!harness.runtime().script_done(child).unwrap());

    harness.runtime_mut().terminate(child).unwrap();
    assert!(harness.runtime().script_done(child).unwrap());

    harness.runtime_mut().terminate(child).unwrap();
    assert_eq!(harness.logged("already terminated"), 1);
}

/// Thrown values land in the nearest catch handler as `_exception`.
#[test]
fn test_throw_and_catch() {
    let mut harness = TestHarness::new();
    let body = code(vec![
        Instruction::Push(Value::string("boom")),
        Instruction::CallUnary("throw".to_string()),
    ]);
    let handler = code(vec![Instruction::GetVariable("_exception".to_string())]);
    let script = code(vec![
        Instruction::Push(Value::Code(body)),
        Instruction::Push(Value::Code(handler)),
        Instruction::CallBinary("try".to_string()),
    ]);
    assert_eq!(harness.evaluate(script), Value::string("boom"));
}

/// Formatting a self-referential array reports recursion instead of
/// hanging.
#[test]
fn test_array_recursion_diagnostic() {
    let mut harness = TestHarness::new();
    let cyclic = Value::array(vec![]);
    if let Value::Array(inner) = &cyclic {
        inner.borrow_mut().push(cyclic.clone());
    }
    let script = code(vec![Instruction::Push(cyclic), Instruction::CallUnary("str".to_string())]);

    assert_eq!(harness.evaluate(script), Value::string("<recursive>"));
    assert_eq!(harness.logged("Array recursion detected."), 1);
}

/// Naming a scope twice keeps the first name and warns.
#[test]
fn test_scope_name_set_twice() {
    let mut harness = TestHarness::new();
    let script = code(vec![
        Instruction::Push(Value::string("main")),
        Instruction::CallUnary("scopename".to_string()),
        Instruction::EndStatement,
        Instruction::Push(Value::string("other")),
        Instruction::CallUnary("scopename".to_string()),
        Instruction::EndStatement,
    ]);
    harness.evaluate(script);
    assert_eq!(harness.logged("Scope name already set to 'main'."), 1);
}

/// The whole pipeline in one breath: preprocess a mounted script, then
/// run the equivalent instruction stream under strict mode.
#[test]
fn test_strict_mode_pipeline() {
    let mut harness = TestHarness::with_config(Configuration {
        strict_mode: true,
        ..Configuration::default()
    });
    let result = harness
        .preprocess("#define LIMIT 3\nLIMIT", "/mem/strict")
        .unwrap();
    assert_eq!(result.output, "3");

    harness.evaluate(code(vec![
        Instruction::GetVariable("_undefined".to_string()),
        Instruction::EndStatement,
    ]));
    assert_eq!(
        harness.logged_severity("'_undefined' not assigned"),
        Some(quill_diagnostics::Severity::Error)
    );
}
