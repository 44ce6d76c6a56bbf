//! Snippet tests for the whole pipeline:
//! each case is a little program, the outcome it should reach,
//! and the output it should print along the way.

use std::{cell::RefCell, io, rc::Rc};

use kestrel::{InterpretError, Vm};

/// Represents specific success/failure modes of a snippet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Outcome {
    Success,
    CompileError,
    RuntimeError,
}

/// A `print` sink the harness can read back after the run.
#[derive(Clone, Default)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn check(source: &str, outcome: Outcome, expect: &str) {
    let sink = Sink::default();
    let mut vm = Vm::with_output(Box::new(sink.clone()));
    let result = vm.interpret(source);

    let reached = match &result {
        Ok(()) => Outcome::Success,
        Err(InterpretError::Compile(_)) => Outcome::CompileError,
        Err(InterpretError::Runtime(_)) => Outcome::RuntimeError,
    };
    assert_eq!(
        reached, outcome,
        "snippet {:?} finished with {:?}",
        source, result,
    );

    let output = String::from_utf8(sink.0.borrow().clone()).unwrap();
    assert_eq!(output, expect, "snippet {:?} printed {:?}", source, output);
}

#[test]
fn expressions() {
    check("print 1 + 2 * 3;", Outcome::Success, "7\n");
    check("print (1 + 2) * 3;", Outcome::Success, "9\n");
    check("print 1_000 + 2_000.5;", Outcome::Success, "3000.5\n");
    check("print !true;", Outcome::Success, "false\n");
    check("print \"it's \" + \"alive\";", Outcome::Success, "it's alive\n");
    check("print 1 < 2 ? \"lt\" : \"ge\";", Outcome::Success, "lt\n");
}

#[test]
fn string_identity() {
    check("var a = \"hi\"; var b = \"hi\"; print a == b;", Outcome::Success, "true\n");
    check("print \"a\" + \"b\" == \"ab\";", Outcome::Success, "true\n");
}

#[test]
fn control_flow() {
    check(
        "var a = 0; for (var i = 0; i < 3; i = i + 1) a = a + i; print a;",
        Outcome::Success,
        "3\n",
    );
    check(
        "var i = 0; while (i < 3) { i = i + 1; if (i == 2) continue; print i; }",
        Outcome::Success,
        "1\n3\n",
    );
    check("if (nil) print \"then\"; else print \"else\";", Outcome::Success, "else\n");
}

#[test]
fn functions_and_closures() {
    check(
        "fun make() { var x = 0; fun inc() { x = x + 1; return x; } return inc; } \
         var c = make(); print c(); print c();",
        Outcome::Success,
        "1\n2\n",
    );
    check(
        "fun fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } print fact(5);",
        Outcome::Success,
        "120\n",
    );
    check("print clock() >= 0;", Outcome::Success, "true\n");
}

#[test]
fn compile_errors() {
    check("var x = x;", Outcome::CompileError, "");
    check("{ var x = x; }", Outcome::CompileError, "");
    check("1 + 2 = 3;", Outcome::CompileError, "");
    check("continue;", Outcome::CompileError, "");
    check("return 1;", Outcome::CompileError, "");
    check("print \"unterminated;", Outcome::CompileError, "");
}

#[test]
fn runtime_errors() {
    check("1 + \"a\";", Outcome::RuntimeError, "");
    check("print missing;", Outcome::RuntimeError, "");
    check("fun f() { f(); } f();", Outcome::RuntimeError, "");
    // anything already printed stays printed
    check("print 1; print missing;", Outcome::RuntimeError, "1\n");
}

#[test]
fn error_messages_read_as_expected() {
    let mut vm = Vm::with_output(Box::new(Sink::default()));

    match vm.interpret("var x = x;") {
        Err(InterpretError::Compile(diagnostics)) => {
            let printed = format!("{}", diagnostics);
            assert!(printed.contains("Can't read variable in its own initializer."));
            assert!(printed.starts_with("[line 1] Error"));
        }
        other => panic!("expected a compile error, got {:?}", other),
    }

    match vm.interpret("1 + \"a\";") {
        Err(InterpretError::Runtime(trace)) => {
            assert_eq!(
                format!("{}", trace),
                "Operands must be two numbers or two strings.\n[line 1] in script",
            );
        }
        other => panic!("expected a runtime error, got {:?}", other),
    }
}
