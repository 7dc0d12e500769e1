use std::rc::Rc;

use crate::ast::Program;
use crate::config::InterpreterOptions;
use crate::error::SyntaxError;
use crate::parser;

mod builtins;
mod environment;
mod error;
mod operators;
mod runtime;
mod snapshot;
mod value;

pub use error::{ErrorInfo, ErrorKind};
pub use snapshot::{
    ConsoleKind, ConsoleOutput, ExecutionState, SnapshotValue, SourceLocation, StackFrame,
    Variable, VariableScope,
};
pub use value::{VariableType, format_number};

use runtime::InterpreterRuntime;

/// Step-recording tree-walking interpreter.
///
/// ```
/// use stepwise::Interpreter;
///
/// let mut interpreter = Interpreter::new();
/// interpreter.parse("let x = 40 + 2;").unwrap();
/// let snapshots = interpreter.run();
/// let last = snapshots.last().unwrap();
/// assert_eq!(last.global("x").and_then(|v| v.as_number()), Some(42.0));
/// ```
pub struct Interpreter {
    options: InterpreterOptions,
    program: Option<Rc<Program>>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_options(InterpreterOptions::default())
    }

    pub fn with_options(options: InterpreterOptions) -> Self {
        Self {
            options,
            program: None,
        }
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    /// Parses `source` and keeps it for the next [`run`](Self::run).
    /// On failure the previously parsed program is discarded.
    pub fn parse(&mut self, source: &str) -> Result<(), SyntaxError> {
        self.program = None;
        let program = parser::parse(source)?;
        self.program = Some(Rc::new(program));
        Ok(())
    }

    /// Executes the parsed program from a fresh global scope.
    ///
    /// Never fails: runtime errors end the run and are reported on the last
    /// snapshot's `error_state`. Without a parsed program only the initial
    /// snapshot is produced.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(&mut self) -> Vec<ExecutionState> {
        let program = match &self.program {
            Some(program) => Rc::clone(program),
            None => Rc::new(Program {
                body: Vec::new(),
                span: Default::default(),
            }),
        };
        InterpreterRuntime::new(self.options).run(&program)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses and runs `source` with default options.
pub fn execute(source: &str) -> Result<Vec<ExecutionState>, SyntaxError> {
    let mut interpreter = Interpreter::new();
    interpreter.parse(source)?;
    Ok(interpreter.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> Vec<ExecutionState> {
        execute(source).expect("program parses")
    }

    fn run_with_limit(source: &str, max_steps: usize) -> Vec<ExecutionState> {
        let mut interpreter = Interpreter::with_options(InterpreterOptions {
            max_steps,
            ..InterpreterOptions::default()
        });
        interpreter.parse(source).expect("program parses");
        interpreter.run()
    }

    fn final_number(states: &[ExecutionState], name: &str) -> f64 {
        states
            .last()
            .and_then(|state| state.global(name))
            .and_then(SnapshotValue::as_number)
            .unwrap_or_else(|| panic!("no numeric global {name}"))
    }

    fn error_message(states: &[ExecutionState]) -> String {
        states
            .last()
            .and_then(|state| state.error_state.as_ref())
            .map(|error| error.message.clone())
            .expect("run ended with an error")
    }

    fn console_lines(states: &[ExecutionState]) -> Vec<String> {
        states
            .last()
            .map(|state| state.output.iter().map(ConsoleOutput::text).collect())
            .unwrap_or_default()
    }

    #[test]
    fn empty_program_has_only_the_initial_snapshot() {
        let states = run("");
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].step, 0);
        assert!(states[0].global_variables.is_empty());
        assert!(states[0].error_state.is_none());
    }

    #[test]
    fn run_without_parse_yields_initial_snapshot() {
        let mut interpreter = Interpreter::new();
        assert_eq!(interpreter.run().len(), 1);
    }

    #[test]
    fn one_snapshot_per_declaration_and_statement() {
        let states = run(indoc! {"
            let a = 2 + 3;
            let b = a * 4;
            a + b;
        "});
        assert_eq!(states.len(), 4);
        assert_eq!(final_number(&states, "a"), 5.0);
        assert_eq!(final_number(&states, "b"), 20.0);
        assert_eq!(states[1].current_line, 1);
        assert_eq!(states[3].current_line, 3);
    }

    #[test]
    fn steps_are_contiguous() {
        let states = run(indoc! {"
            let total = 0;
            for (let i = 0; i < 3; i++) {
                total += i;
            }
        "});
        for (index, state) in states.iter().enumerate() {
            assert_eq!(state.step, index);
        }
    }

    #[test]
    fn snapshots_are_not_affected_by_later_mutation() {
        let states = run(indoc! {"
            let list = [1];
            list.push(2);
        "});
        assert_eq!(
            states[1].global("list"),
            Some(&SnapshotValue::Array(vec![SnapshotValue::Number(1.0)]))
        );
        assert_eq!(
            states[2].global("list"),
            Some(&SnapshotValue::Array(vec![
                SnapshotValue::Number(1.0),
                SnapshotValue::Number(2.0)
            ]))
        );
    }

    #[test]
    fn is_new_marks_changed_variables_only() {
        let states = run(indoc! {"
            let x = 1;
            let y = 2;
            x = 5;
        "});
        assert!(states[1].global_variables["x"].is_new);
        assert!(!states[2].global_variables["x"].is_new);
        assert!(states[2].global_variables["y"].is_new);
        assert!(states[3].global_variables["x"].is_new);
        assert!(!states[3].global_variables["y"].is_new);
    }

    #[test]
    fn function_calls_push_and_pop_frames() {
        let states = run(indoc! {"
            function add(a, b) {
                return a + b;
            }
            let r = add(3, 4);
        "});
        assert_eq!(final_number(&states, "r"), 7.0);
        let frames: Vec<&StackFrame> = states
            .iter()
            .filter_map(ExecutionState::current_frame)
            .collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame.function_name == "add"));
        assert_eq!(frames[0].return_value, None);
        assert_eq!(frames[1].return_value, Some(SnapshotValue::Number(7.0)));
        assert_eq!(frames[0].arguments[0].value, SnapshotValue::Number(3.0));
        assert_eq!(frames[0].source_location.line, 4);
        assert!(states.last().expect("snapshots").call_stack.is_empty());
    }

    #[test]
    fn snapshot_sequence_for_a_call_is_exact() {
        let states = run(indoc! {"
            function double(n) {
                return n * 2;
            }
            let r = double(4);
        "});
        // initial, declaration, call entry, return, `let r`
        assert_eq!(states.len(), 5);
        assert_eq!(states[2].call_stack.len(), 1);
        assert_eq!(states[2].current_line, 1);
        assert_eq!(states[3].current_line, 2);
        assert!(states[4].call_stack.is_empty());
        assert_eq!(states[4].current_line, 4);
    }

    #[test]
    fn frame_locals_include_block_scopes() {
        let states = run(indoc! {"
            function sum(n) {
                let total = 0;
                for (let i = 1; i <= n; i++) {
                    total += i;
                }
                return total;
            }
            let s = sum(3);
        "});
        assert_eq!(final_number(&states, "s"), 6.0);
        let saw_loop_variable = states.iter().any(|state| {
            state
                .current_frame()
                .is_some_and(|frame| frame.local_variables.contains_key("i"))
        });
        assert!(saw_loop_variable);
        assert!(states.iter().all(|state| !state.global_variables.contains_key("total")));
    }

    #[test]
    fn recursion_computes_factorial() {
        let states = run(indoc! {"
            function factorial(n) {
                if (n <= 1) {
                    return 1;
                }
                return n * factorial(n - 1);
            }
            let result = factorial(5);
        "});
        assert_eq!(final_number(&states, "result"), 120.0);
        let deepest = states.iter().map(|state| state.call_stack.len()).max();
        assert_eq!(deepest, Some(5));
    }

    #[test]
    fn loops_accumulate() {
        let states = run(indoc! {"
            let sum = 0;
            for (let i = 1; i <= 5; i++) sum += i;
            let count = 0;
            while (count < 3) count++;
        "});
        assert_eq!(final_number(&states, "sum"), 15.0);
        assert_eq!(final_number(&states, "count"), 3.0);
    }

    #[test]
    fn while_loop_snapshots_every_test_including_the_last() {
        let states = run(indoc! {"
            let count = 0;
            while (count < 2) {
                count = count + 1;
            }
        "});
        // initial, let, (test, body) x2, final test
        assert_eq!(states.len(), 7);
        assert_eq!(states[6].current_line, 2);
    }

    #[test]
    fn break_and_continue_steer_loops() {
        let states = run(indoc! {"
            let seen = [];
            for (let i = 0; i < 10; i++) {
                if (i === 5) break;
                if (i % 2 === 0) continue;
                seen.push(i);
            }
        "});
        assert_eq!(
            states.last().and_then(|state| state.global("seen")),
            Some(&SnapshotValue::Array(vec![
                SnapshotValue::Number(1.0),
                SnapshotValue::Number(3.0)
            ]))
        );
    }

    #[test]
    fn infinite_loop_hits_the_step_ceiling() {
        let states = run("while (true) {}");
        let last = states.last().expect("snapshots");
        let error = last.error_state.as_ref().expect("step limit error");
        assert!(error.message.contains("Maximum execution steps exceeded"));
        assert_eq!(error.kind, ErrorKind::StepLimit);
        assert_eq!(states.len(), crate::config::DEFAULT_MAX_STEPS + 1);
    }

    #[test]
    fn step_ceiling_is_configurable_and_not_catchable() {
        let states = run_with_limit(
            indoc! {"
                let caught = false;
                try {
                    while (true) {}
                } catch (e) {
                    caught = true;
                }
            "},
            100,
        );
        assert_eq!(states.len(), 101);
        assert!(error_message(&states).contains("Maximum execution steps exceeded"));
    }

    #[test]
    fn try_catch_binds_thrown_value() {
        let states = run(indoc! {"
            let message = 'none';
            try {
                throw 'boom';
            } catch (e) {
                message = e;
            }
            let after = 1;
        "});
        let last = states.last().expect("snapshots");
        assert!(last.error_state.is_none());
        assert_eq!(last.global("message").and_then(SnapshotValue::as_str), Some("boom"));
        assert_eq!(final_number(&states, "after"), 1.0);
    }

    #[test]
    fn catch_receives_error_objects_for_runtime_errors() {
        let states = run(indoc! {"
            let kind = '';
            try {
                missing();
            } catch (err) {
                kind = err.name + ': ' + err.message;
            }
        "});
        assert_eq!(
            states.last().and_then(|state| state.global("kind")).and_then(SnapshotValue::as_str),
            Some("ReferenceError: missing is not defined")
        );
    }

    #[test]
    fn finally_runs_once_and_rethrows_original_error() {
        let states = run(indoc! {"
            let log = [];
            try {
                try {
                    throw new TypeError('inner');
                } finally {
                    log.push('finally');
                }
            } catch (e) {
                log.push(e.message);
            }
        "});
        assert_eq!(
            states.last().and_then(|state| state.global("log")),
            Some(&SnapshotValue::Array(vec![
                SnapshotValue::String("finally".to_string()),
                SnapshotValue::String("inner".to_string())
            ]))
        );
    }

    #[test]
    fn errors_inside_calls_unwind_the_stack() {
        let states = run(indoc! {"
            function fail() {
                throw new Error('deep');
            }
            function outer() {
                fail();
            }
            let recovered = false;
            try {
                outer();
            } catch (e) {
                recovered = true;
            }
            let depth = 0;
        "});
        let last = states.last().expect("snapshots");
        assert!(last.error_state.is_none());
        assert!(last.call_stack.is_empty());
        assert_eq!(last.global("recovered").and_then(SnapshotValue::as_bool), Some(true));
    }

    #[test]
    fn uncaught_errors_end_the_run_with_location() {
        let states = run(indoc! {"
            let a = 1;
            let b = missing + a;
            let c = 3;
        "});
        let last = states.last().expect("snapshots");
        let error = last.error_state.as_ref().expect("reference error");
        assert_eq!(error.name, "ReferenceError");
        assert_eq!(error.message, "missing is not defined");
        assert_eq!(error.line, 2);
        assert_eq!(error.column, 8);
        assert!(last.global("c").is_none());
        assert!(states[..states.len() - 1].iter().all(|state| state.error_state.is_none()));
    }

    #[test]
    fn uncaught_error_in_call_reports_stack() {
        let states = run(indoc! {"
            function boom() {
                return null.value;
            }
            boom();
        "});
        let error = states
            .last()
            .and_then(|state| state.error_state.clone())
            .expect("type error");
        assert_eq!(error.message, "Cannot read properties of null (reading 'value')");
        assert_eq!(error.kind, ErrorKind::Type);
        assert_eq!(error.stack.as_deref(), Some("    at boom (line 4)"));
        assert!(states.last().expect("snapshots").call_stack.is_empty());
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        let states = run("let n = 5;\nn();");
        assert_eq!(error_message(&states), "n is not a function");
    }

    #[test]
    fn assigning_undeclared_names_fails() {
        let states = run("ghost = 1;");
        let error = states
            .last()
            .and_then(|state| state.error_state.clone())
            .expect("reference error");
        assert_eq!(error.kind, ErrorKind::Reference);
    }

    #[test]
    fn const_bindings_reject_assignment() {
        let states = run("const k = 1;\nk = 2;");
        assert!(error_message(&states).contains("constant"));
    }

    #[test]
    fn closures_capture_their_defining_scope() {
        let states = run(indoc! {"
            function counter() {
                let count = 0;
                return () => {
                    count++;
                    return count;
                };
            }
            const next = counter();
            next();
            let value = next();
        "});
        assert_eq!(final_number(&states, "value"), 2.0);
    }

    #[test]
    fn loop_closures_capture_each_iteration() {
        let states = run(indoc! {"
            let fns = [];
            for (let i = 0; i < 3; i++) {
                fns.push(() => i);
            }
            let second = fns[1]();
        "});
        assert_eq!(final_number(&states, "second"), 1.0);
    }

    #[test]
    fn arrow_expression_bodies_return_implicitly() {
        let states = run("const sq = x => x * x;\nlet nine = sq(3);");
        assert_eq!(final_number(&states, "nine"), 9.0);
        let frame_names: Vec<&str> = states
            .iter()
            .filter_map(ExecutionState::current_frame)
            .map(|frame| frame.function_name.as_str())
            .collect();
        assert_eq!(frame_names, vec!["sq", "sq"]);
    }

    #[test]
    fn missing_arguments_are_undefined() {
        let states = run(indoc! {"
            function f(a, b) {
                return typeof b;
            }
            let t = f(1);
        "});
        assert_eq!(
            states.last().and_then(|state| state.global("t")).and_then(SnapshotValue::as_str),
            Some("undefined")
        );
    }

    #[test]
    fn console_output_accumulates() {
        let states = run(indoc! {"
            console.log('hello', 42);
            console.warn([1, 2]);
            console.error({ a: 'b' });
        "});
        assert_eq!(
            console_lines(&states),
            vec!["hello 42", "[1, 2]", "{ a: 'b' }"]
        );
        let kinds: Vec<ConsoleKind> = states
            .last()
            .expect("snapshots")
            .output
            .iter()
            .map(|entry| entry.kind)
            .collect();
        assert_eq!(kinds, vec![ConsoleKind::Log, ConsoleKind::Warn, ConsoleKind::Error]);
        assert_eq!(states[1].output.len(), 1);
    }

    #[test]
    fn switch_falls_through_until_break() {
        let states = run(indoc! {"
            let out = '';
            switch (2) {
                case 1:
                    out += 'one';
                case 2:
                    out += 'two';
                case 3:
                    out += 'three';
                    break;
                default:
                    out += 'default';
            }
        "});
        assert_eq!(
            states.last().and_then(|state| state.global("out")).and_then(SnapshotValue::as_str),
            Some("twothree")
        );
    }

    #[test]
    fn objects_arrays_and_methods() {
        let states = run(indoc! {"
            const person = { name: 'Ada', age: 36 };
            person.age += 1;
            const names = ['b', 'a', 'c'].sort().join('-');
            const doubled = [1, 2, 3].map(n => n * 2).filter(n => n > 2);
            const total = doubled.reduce((acc, n) => acc + n, 0);
            const shout = person.name.toUpperCase();
        "});
        let last = states.last().expect("snapshots");
        assert_eq!(
            last.global("person").and_then(|p| p.get("age")).and_then(SnapshotValue::as_number),
            Some(37.0)
        );
        assert_eq!(last.global("names").and_then(SnapshotValue::as_str), Some("a-b-c"));
        assert_eq!(final_number(&states, "total"), 10.0);
        assert_eq!(last.global("shout").and_then(SnapshotValue::as_str), Some("ADA"));
        assert_eq!(last.global_variables["doubled"].type_tag, VariableType::Array);
        assert_eq!(last.global_variables["person"].type_tag, VariableType::Object);
    }

    #[test]
    fn callbacks_appear_as_frames() {
        let states = run("const r = [1, 2].map(function twice(x) { return x * 2; });");
        let calls = states
            .iter()
            .filter_map(ExecutionState::current_frame)
            .filter(|frame| frame.function_name == "twice")
            .count();
        assert_eq!(calls, 4);
    }

    #[test]
    fn new_binds_this_to_a_fresh_object() {
        let states = run(indoc! {"
            function Point(x, y) {
                this.x = x;
                this.y = y;
            }
            const p = new Point(1, 2);
            const sum = p.x + p.y;
        "});
        assert_eq!(final_number(&states, "sum"), 3.0);
    }

    #[test]
    fn methods_see_their_receiver() {
        let states = run(indoc! {"
            const account = {
                balance: 10,
                deposit(amount) {
                    this.balance += amount;
                    return this.balance;
                }
            };
            const b = account.deposit(5);
        "});
        assert_eq!(final_number(&states, "b"), 15.0);
    }

    #[test]
    fn for_of_and_for_in_iterate() {
        let states = run(indoc! {"
            let total = 0;
            for (const n of [1, 2, 3]) {
                total += n;
            }
            let keys = '';
            for (const k in { a: 1, b: 2 }) {
                keys += k;
            }
        "});
        assert_eq!(final_number(&states, "total"), 6.0);
        assert_eq!(
            states.last().and_then(|state| state.global("keys")).and_then(SnapshotValue::as_str),
            Some("ab")
        );
    }

    #[test]
    fn do_while_runs_body_first() {
        let states = run(indoc! {"
            let n = 10;
            do {
                n++;
            } while (n < 5);
        "});
        assert_eq!(final_number(&states, "n"), 11.0);
    }

    #[test]
    fn templates_and_coercions() {
        let states = run(indoc! {"
            const name = 'world';
            const greeting = `hello ${name}, ${1 + 1}!`;
            const loose = 1 == '1';
            const strict = 1 === '1';
        "});
        let last = states.last().expect("snapshots");
        assert_eq!(
            last.global("greeting").and_then(SnapshotValue::as_str),
            Some("hello world, 2!")
        );
        assert_eq!(last.global("loose").and_then(SnapshotValue::as_bool), Some(true));
        assert_eq!(last.global("strict").and_then(SnapshotValue::as_bool), Some(false));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let states = run(indoc! {"
            let calls = 0;
            function touch() {
                calls++;
                return true;
            }
            const a = false && touch();
            const b = true || touch();
            const c = null ?? 'fallback';
        "});
        assert_eq!(final_number(&states, "calls"), 0.0);
        assert_eq!(
            states.last().and_then(|state| state.global("c")).and_then(SnapshotValue::as_str),
            Some("fallback")
        );
    }

    #[test]
    fn runaway_recursion_is_a_range_error() {
        let mut interpreter = Interpreter::with_options(InterpreterOptions {
            max_call_depth: 50,
            ..InterpreterOptions::default()
        });
        interpreter
            .parse("function f() { return f(); }\nf();")
            .expect("program parses");
        let states = interpreter.run();
        let error = states
            .last()
            .and_then(|state| state.error_state.clone())
            .expect("range error");
        assert_eq!(error.message, "Maximum call stack size exceeded");
        assert_eq!(error.kind, ErrorKind::Range);
    }

    #[test]
    fn hoisted_functions_can_be_called_before_declaration() {
        let states = run(indoc! {"
            let v = early();
            function early() {
                return 3;
            }
        "});
        assert_eq!(final_number(&states, "v"), 3.0);
    }

    #[test]
    fn builtins_are_not_reported_as_globals() {
        let states = run("let x = Math.max(1, 9);");
        let names: Vec<&String> = states
            .last()
            .expect("snapshots")
            .global_variables
            .keys()
            .collect();
        assert_eq!(names, vec!["x"]);
        assert_eq!(final_number(&states, "x"), 9.0);
    }

    #[test]
    fn parse_errors_surface_before_running() {
        let mut interpreter = Interpreter::new();
        let err = interpreter.parse("let = 5;").expect_err("malformed");
        assert_eq!(err.line(), 1);
        assert!(err.to_string().starts_with("SyntaxError"));
    }

    #[test]
    fn reruns_start_from_scratch() {
        let mut interpreter = Interpreter::new();
        interpreter.parse("let x = 1;").expect("program parses");
        let first = interpreter.run();
        let second = interpreter.run();
        assert_eq!(first, second);
    }

    #[test]
    fn cyclic_arrays_convert_to_strings() {
        let states = run(indoc! {"
            let a = [];
            a.push(a);
            let s = a + \"\";
            let t = `${[1, a]}`;
            let caught = false;
            try {
                throw a;
            } catch (e) {
                caught = e === a;
            }
        "});
        let last = states.last().expect("snapshots");
        assert_eq!(last.error_state, None);
        assert_eq!(last.global("s").and_then(SnapshotValue::as_str), Some(""));
        assert_eq!(last.global("t").and_then(SnapshotValue::as_str), Some("1,"));
        assert_eq!(last.global("caught").and_then(SnapshotValue::as_bool), Some(true));
        assert_eq!(
            last.global("a"),
            Some(&SnapshotValue::Array(vec![SnapshotValue::Circular]))
        );
    }

    #[test]
    fn deeply_nested_arrays_run_to_completion() {
        let states = run(indoc! {"
            let a = [];
            for (let i = 0; i < 12000; i++) a = [a];
            let s = String(a);
        "});
        let last = states.last().expect("snapshots");
        assert_eq!(last.error_state, None);
        assert_eq!(last.global("s").and_then(SnapshotValue::as_str), Some(""));
        assert!(last.global("a").is_some_and(|a| a.to_string().contains("[...]")));
    }

    #[test]
    fn thrown_error_mentioning_the_step_ceiling_is_a_user_error() {
        let states = run(r#"throw new Error("Maximum execution steps exceeded");"#);
        let error = states
            .last()
            .and_then(|state| state.error_state.as_ref())
            .expect("run ended with an error");
        assert_eq!(error.kind, ErrorKind::Thrown);
        assert_eq!(error.message, "Maximum execution steps exceeded");
        assert!(states.len() < 5);
    }

    #[test]
    fn thrown_error_mentioning_the_step_ceiling_can_be_caught() {
        let states = run(indoc! {r#"
            let seen = "";
            try {
                throw new Error("Maximum execution steps exceeded");
            } catch (e) {
                seen = e.message;
            }
        "#});
        let last = states.last().expect("snapshots");
        assert_eq!(last.error_state, None);
        assert_eq!(
            last.global("seen").and_then(SnapshotValue::as_str),
            Some("Maximum execution steps exceeded")
        );
    }
}
