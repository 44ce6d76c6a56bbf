use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

use tracing::{debug, trace};

use crate::common::{
    object::{Closure, Native, NativeFn, ObjString, Upvalue},
    opcode::Opcode,
    table::{Strings, Table},
    value::{Obj, Value},
};
use crate::compiler::parse::compile;
use crate::vm::{ffi, trace::Trace};
use crate::InterpretError;

/// A call deeper than this is a stack overflow.
pub const FRAMES_MAX: usize = 64;
/// Nominal value-stack size: enough slots for every frame to run flat out.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// One function invocation: the closure being run,
/// the instruction pointer into its chunk,
/// and where its window starts on the value stack.
/// Slot zero of the window is the callee itself.
#[derive(Debug)]
struct CallFrame {
    closure: Rc<Closure>,
    ip: usize,
    slots: usize,
}

/// The virtual machine: a light stack machine over the bytecode
/// the compiler produces.
/// One `Vm` is one isolated world - globals and interned strings
/// persist across [`Vm::interpret`] calls, nothing is shared between
/// instances, and nothing here is reentrant:
/// a native function must never call back into the interpreter.
pub struct Vm {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    strings: Strings,
    /// Upvalues still pointing into the stack,
    /// sorted by slot so closing a range works from the tail.
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
    /// Where `print` goes; stdout outside of tests.
    out: Box<dyn Write>,
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Vm {
        Vm::with_output(Box::new(io::stdout()))
    }

    /// A VM whose `print` output goes somewhere of the caller's choosing.
    pub fn with_output(out: Box<dyn Write>) -> Vm {
        let mut vm = Vm {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            strings: Strings::new(),
            open_upvalues: vec![],
            out,
        };

        vm.define_native("clock", 0, ffi::clock);
        vm
    }

    /// Registers a host function under `name`.
    pub fn define_native(&mut self, name: &'static str, arity: usize, function: NativeFn) {
        let key = self.strings.intern(name);
        let native = Native { name, arity, function };
        self.globals.set(key, Value::Object(Obj::Native(Rc::new(native))));
    }

    /// Compiles and runs a source string.
    /// Compile errors never start execution;
    /// runtime errors reset the machine, so the `Vm` can be reused.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compile(source, &mut self.strings)?;
        let closure = Rc::new(Closure::wrap(Rc::new(function)));

        self.stack.push(Value::Object(Obj::Closure(Rc::clone(&closure))));
        self.call(closure, 0).map_err(InterpretError::Runtime)?;

        self.run().map_err(Into::into)
    }

    // frame and stack plumbing

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("a frame is executing")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("a frame is executing")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("a frame is executing");
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self, long: bool) -> Value {
        let index = if long {
            self.read_u16() as usize
        } else {
            self.read_byte() as usize
        };
        self.frame().closure.function.chunk.constants[index].clone()
    }

    fn read_string(&mut self, long: bool) -> Rc<ObjString> {
        match self.read_constant(long) {
            Value::Object(Obj::String(string)) => string,
            _ => unreachable!("name constants are always interned strings"),
        }
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn top_mut(&mut self) -> &mut Value {
        self.stack.last_mut().expect("stack underflow")
    }

    /// Builds the traceback for a runtime error and resets the machine.
    fn runtime_error(&mut self, message: impl Into<String>) -> Trace {
        let mut trace = Trace::new(message);
        for frame in self.frames.iter().rev() {
            let function = &frame.closure.function;
            let line = function.chunk.line(frame.ip.saturating_sub(1));
            trace.frame(line, function.name.as_ref().map(|name| name.chars.to_string()));
        }

        debug!("runtime error: {}", trace.message);
        self.reset();
        trace
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // the dispatch loop

    fn run(&mut self) -> Result<(), Trace> {
        loop {
            let opcode = Opcode::from_byte(self.read_byte());
            match opcode {
                Opcode::Constant => {
                    let value = self.read_constant(false);
                    self.stack.push(value);
                }
                Opcode::ConstantLong => {
                    let value = self.read_constant(true);
                    self.stack.push(value);
                }
                Opcode::Nil => self.stack.push(Value::Nil),
                Opcode::True => self.stack.push(Value::Boolean(true)),
                Opcode::False => self.stack.push(Value::Boolean(false)),

                Opcode::Pop => {
                    self.pop();
                }
                Opcode::PopN => {
                    let n = self.read_byte() as usize;
                    let len = self.stack.len() - n;
                    self.stack.truncate(len);
                }

                Opcode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    self.get_local(slot);
                }
                Opcode::GetLocalLong => {
                    let slot = self.read_u16() as usize;
                    self.get_local(slot);
                }
                Opcode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    self.set_local(slot);
                }
                Opcode::SetLocalLong => {
                    let slot = self.read_u16() as usize;
                    self.set_local(slot);
                }

                Opcode::GetGlobal => self.get_global(false)?,
                Opcode::GetGlobalLong => self.get_global(true)?,
                Opcode::DefineGlobal => self.define_global(false),
                Opcode::DefineGlobalLong => self.define_global(true),
                Opcode::SetGlobal => self.set_global(false)?,
                Opcode::SetGlobalLong => self.set_global(true)?,

                Opcode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    self.get_upvalue(index);
                }
                Opcode::GetUpvalueLong => {
                    let index = self.read_u16() as usize;
                    self.get_upvalue(index);
                }
                Opcode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    self.set_upvalue(index);
                }
                Opcode::SetUpvalueLong => {
                    let index = self.read_u16() as usize;
                    self.set_upvalue(index);
                }
                Opcode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                Opcode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.stack.push(Value::Boolean(a == b));
                }
                Opcode::NotEqual => {
                    let b = self.pop();
                    let a = self.pop();
                    self.stack.push(Value::Boolean(a != b));
                }

                Opcode::Add => {
                    if let (Some(a), Some(b)) = (self.peek(1).as_string(), self.peek(0).as_string()) {
                        let joined = format!("{}{}", a.chars, b.chars);
                        let string = self.strings.intern(&joined);
                        let len = self.stack.len() - 2;
                        self.stack.truncate(len);
                        self.stack.push(Value::Object(Obj::String(string)));
                    } else {
                        self.numeric(Opcode::Add)?;
                    }
                }
                Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Greater
                | Opcode::GreaterEqual
                | Opcode::Less
                | Opcode::LessEqual => self.numeric(opcode)?,

                Opcode::Not => {
                    let top = self.top_mut();
                    *top = Value::Boolean(!top.truthy());
                }
                Opcode::Negate => match self.top_mut() {
                    Value::Number(n) => *n = -*n,
                    _ => return Err(self.runtime_error("Operand must be a number.")),
                },

                Opcode::Print => {
                    let value = self.pop();
                    let _ = writeln!(self.out, "{}", value);
                }

                Opcode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip += offset;
                }
                Opcode::JumpIfTrue => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).truthy() {
                        self.frame_mut().ip += offset;
                    }
                }
                Opcode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if !self.peek(0).truthy() {
                        self.frame_mut().ip += offset;
                    }
                }
                Opcode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip -= offset;
                }

                Opcode::Call => {
                    let argc = self.read_byte() as usize;
                    self.call_value(argc)?;
                }

                Opcode::Closure => self.make_closure(false),
                Opcode::ClosureLong => self.make_closure(true),

                Opcode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("a frame is executing");
                    self.close_upvalues(frame.slots);

                    if self.frames.is_empty() {
                        // that was the script itself
                        self.pop();
                        debug_assert!(self.stack.is_empty(), "statements must balance the stack");
                        return Ok(());
                    }

                    self.stack.truncate(frame.slots);
                    self.stack.push(result);
                }
            }
        }
    }

    // opcode implementations

    fn get_local(&mut self, slot: usize) {
        let value = self.stack[self.frame().slots + slot].clone();
        self.stack.push(value);
    }

    fn set_local(&mut self, slot: usize) {
        // assignment is an expression: the value stays on top
        let value = self.peek(0).clone();
        let base = self.frame().slots;
        self.stack[base + slot] = value;
    }

    fn get_global(&mut self, long: bool) -> Result<(), Trace> {
        let name = self.read_string(long);
        match self.globals.get(&name) {
            Some(value) => {
                let value = value.clone();
                self.stack.push(value);
                Ok(())
            }
            None => Err(self.runtime_error(format!("Undefined variable '{}'.", name.chars))),
        }
    }

    fn define_global(&mut self, long: bool) {
        let name = self.read_string(long);
        let value = self.peek(0).clone();
        self.globals.set(name, value);
        self.pop();
    }

    fn set_global(&mut self, long: bool) -> Result<(), Trace> {
        let name = self.read_string(long);
        let value = self.peek(0).clone();

        if self.globals.set(Rc::clone(&name), value) {
            // assignment must never create a global; undo and complain
            self.globals.delete(&name);
            return Err(self.runtime_error(format!("Undefined variable '{}'.", name.chars)));
        }
        Ok(())
    }

    fn get_upvalue(&mut self, index: usize) {
        let cell = Rc::clone(&self.frame().closure.upvalues[index]);
        let value = match &*cell.borrow() {
            Upvalue::Open(slot) => self.stack[*slot].clone(),
            Upvalue::Closed(value) => value.clone(),
        };
        self.stack.push(value);
    }

    fn set_upvalue(&mut self, index: usize) {
        let cell = Rc::clone(&self.frame().closure.upvalues[index]);
        let value = self.peek(0).clone();
        match &mut *cell.borrow_mut() {
            Upvalue::Open(slot) => self.stack[*slot] = value,
            Upvalue::Closed(inner) => *inner = value,
        };
    }

    /// Arithmetic and ordering; both operands must be numbers.
    fn numeric(&mut self, opcode: Opcode) -> Result<(), Trace> {
        let (a, b) = match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => (*a, *b),
            _ => {
                let message = if opcode == Opcode::Add {
                    "Operands must be two numbers or two strings."
                } else {
                    "Operands must be numbers."
                };
                return Err(self.runtime_error(message));
            }
        };

        let len = self.stack.len() - 2;
        self.stack.truncate(len);
        self.stack.push(match opcode {
            Opcode::Add => Value::Number(a + b),
            Opcode::Subtract => Value::Number(a - b),
            Opcode::Multiply => Value::Number(a * b),
            Opcode::Divide => Value::Number(a / b),
            Opcode::Greater => Value::Boolean(a > b),
            Opcode::GreaterEqual => Value::Boolean(a >= b),
            Opcode::Less => Value::Boolean(a < b),
            Opcode::LessEqual => Value::Boolean(a <= b),
            _ => unreachable!("not a numeric operator"),
        });

        Ok(())
    }

    /// Calls whatever sits beneath the arguments.
    fn call_value(&mut self, argc: usize) -> Result<(), Trace> {
        let callee = self.peek(argc).clone();
        match callee {
            Value::Object(Obj::Closure(closure)) => self.call(closure, argc),
            Value::Object(Obj::Native(native)) => {
                if argc != native.arity {
                    return Err(self.runtime_error(format!(
                        "Expected {} arguments but got {}.",
                        native.arity, argc,
                    )));
                }

                let first = self.stack.len() - argc;
                match (native.function)(&self.stack[first..]) {
                    Ok(value) => {
                        // the arguments and the callee make way for the result
                        self.stack.truncate(first - 1);
                        self.stack.push(value);
                        Ok(())
                    }
                    Err(message) => Err(self.runtime_error(message)),
                }
            }
            _ => Err(self.runtime_error("Can only call functions.")),
        }
    }

    /// Pushes a frame for a closure call.
    fn call(&mut self, closure: Rc<Closure>, argc: usize) -> Result<(), Trace> {
        if argc != closure.function.arity {
            return Err(self.runtime_error(format!(
                "Expected {} arguments but got {}.",
                closure.function.arity, argc,
            )));
        }

        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }

        trace!("calling {}", closure.function);
        self.frames.push(CallFrame {
            slots: self.stack.len() - argc - 1,
            closure,
            ip: 0,
        });
        Ok(())
    }

    /// Builds a closure from a function constant,
    /// resolving each upvalue record the compiler wrote after the opcode:
    /// locals capture a live stack slot, the rest share the current
    /// closure's own cells.
    fn make_closure(&mut self, long: bool) {
        let function = match self.read_constant(long) {
            Value::Object(Obj::Function(function)) => function,
            _ => unreachable!("closure wraps a function constant"),
        };

        let mut upvalues = Vec::with_capacity(function.upvalues);
        for _ in 0..function.upvalues {
            let is_local = self.read_byte() == 1;
            let index = self.read_u16() as usize;

            if is_local {
                let slot = self.frame().slots + index;
                upvalues.push(self.capture_upvalue(slot));
            } else {
                upvalues.push(Rc::clone(&self.frame().closure.upvalues[index]));
            }
        }

        let closure = Closure { function, upvalues };
        self.stack.push(Value::Object(Obj::Closure(Rc::new(closure))));
    }

    /// The cell for a stack slot: reused when some closure already
    /// captured it (that's what makes captures share storage),
    /// freshly inserted in slot order otherwise.
    fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        let position = self.open_upvalues.binary_search_by_key(&slot, |cell| {
            match *cell.borrow() {
                Upvalue::Open(open) => open,
                Upvalue::Closed(_) => unreachable!("closed upvalues leave the open list"),
            }
        });

        match position {
            Ok(found) => Rc::clone(&self.open_upvalues[found]),
            Err(insert) => {
                let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
                self.open_upvalues.insert(insert, Rc::clone(&cell));
                cell
            }
        }
    }

    /// Closes every open upvalue at or above `from`:
    /// the value moves off the stack into the cell,
    /// and the cell leaves the open list.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(cell) = self.open_upvalues.last() {
            let slot = match *cell.borrow() {
                Upvalue::Open(open) => open,
                Upvalue::Closed(_) => unreachable!("closed upvalues leave the open list"),
            };
            if slot < from {
                break;
            }

            let cell = self.open_upvalues.pop().expect("just peeked at it");
            let value = self.stack[slot].clone();
            *cell.borrow_mut() = Upvalue::Closed(value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A `print` sink tests can read back after the VM is done with it.
    #[derive(Clone, Default)]
    struct Sink(Rc<RefCell<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(source: &str) -> Result<String, InterpretError> {
        let sink = Sink::default();
        let mut vm = Vm::with_output(Box::new(sink.clone()));
        vm.interpret(source)?;

        assert!(vm.stack.is_empty(), "statements must balance the stack");
        assert!(vm.frames.is_empty());
        let bytes = sink.0.borrow().clone();
        Ok(String::from_utf8(bytes).unwrap())
    }

    fn expect_trace(source: &str) -> Trace {
        match run(source) {
            Err(InterpretError::Runtime(trace)) => trace,
            Err(other) => panic!("expected a runtime error, got {:?}", other),
            Ok(output) => panic!("expected a runtime error, got output {:?}", output),
        }
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run("print 1 + 2 * 3;").unwrap(), "7\n");
        assert_eq!(run("print (1 + 2) * 3;").unwrap(), "9\n");
        assert_eq!(run("print 10 / 4;").unwrap(), "2.5\n");
        assert_eq!(run("print -(1 + 2);").unwrap(), "-3\n");
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(run("print 1 < 2;").unwrap(), "true\n");
        assert_eq!(run("print 2 <= 1;").unwrap(), "false\n");
        assert_eq!(run("print 1 != 2;").unwrap(), "true\n");
        assert_eq!(run("print !nil;").unwrap(), "true\n");
        assert_eq!(run("print nil and 1;").unwrap(), "nil\n");
        assert_eq!(run("print false or 2;").unwrap(), "2\n");
        assert_eq!(run("print 1 and 2;").unwrap(), "2\n");
    }

    #[test]
    fn ternary() {
        assert_eq!(run("print 1 < 2 ? \"yes\" : \"no\";").unwrap(), "yes\n");
        assert_eq!(run("print 1 > 2 ? \"yes\" : \"no\";").unwrap(), "no\n");
        // right-associative
        assert_eq!(run("print false ? 1 : true ? 2 : 3;").unwrap(), "2\n");
    }

    #[test]
    fn interned_literals_compare_equal() {
        assert_eq!(run("var a = \"hi\"; var b = \"hi\"; print a == b;").unwrap(), "true\n");
    }

    #[test]
    fn concatenation_reinterns() {
        assert_eq!(run("print \"foo\" + \"bar\";").unwrap(), "foobar\n");
        // the concatenated string is the same object as the literal
        assert_eq!(run("print \"foo\" + \"bar\" == \"foobar\";").unwrap(), "true\n");
    }

    #[test]
    fn globals() {
        assert_eq!(run("var a = 1; a = a + 1; print a;").unwrap(), "2\n");
        assert_eq!(run("var a; print a;").unwrap(), "nil\n");
    }

    #[test]
    fn globals_persist_across_interpret_calls() {
        let sink = Sink::default();
        let mut vm = Vm::with_output(Box::new(sink.clone()));
        vm.interpret("var a = 41;").unwrap();
        vm.interpret("print a + 1;").unwrap();
        assert_eq!(String::from_utf8(sink.0.borrow().clone()).unwrap(), "42\n");
    }

    #[test]
    fn locals_shadow_and_unwind() {
        assert_eq!(
            run("var a = 1; { var a = 2; { var a = 3; print a; } print a; } print a;").unwrap(),
            "3\n2\n1\n",
        );
    }

    #[test]
    fn while_loop() {
        assert_eq!(
            run("var i = 0; while (i < 3) { print i; i = i + 1; }").unwrap(),
            "0\n1\n2\n",
        );
    }

    #[test]
    fn for_loop_accumulates() {
        assert_eq!(
            run("var a = 0; for (var i = 0; i < 3; i = i + 1) a = a + i; print a;").unwrap(),
            "3\n",
        );
    }

    #[test]
    fn continue_runs_the_increment() {
        assert_eq!(
            run("for (var i = 0; i < 5; i = i + 1) { if (i == 2) continue; print i; }").unwrap(),
            "0\n1\n3\n4\n",
        );
    }

    #[test]
    fn continue_in_while_rechecks_condition() {
        assert_eq!(
            run("var i = 0; while (i < 3) { i = i + 1; if (i == 2) continue; print i; }").unwrap(),
            "1\n3\n",
        );
    }

    #[test]
    fn functions_and_recursion() {
        assert_eq!(
            run("fun fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } print fact(5);")
                .unwrap(),
            "120\n",
        );
    }

    #[test]
    fn implicit_return_is_nil() {
        assert_eq!(run("fun noop() {} print noop();").unwrap(), "nil\n");
    }

    #[test]
    fn counter_closure() {
        assert_eq!(
            run("fun make() { var x = 0; fun inc() { x = x + 1; return x; } return inc; } \
                 var c = make(); print c(); print c();")
            .unwrap(),
            "1\n2\n",
        );
    }

    #[test]
    fn two_closures_share_one_variable() {
        assert_eq!(
            run("var get; var set; \
                 fun make() { \
                   var x = 0; \
                   fun g() { return x; } \
                   fun s(v) { x = v; } \
                   get = g; set = s; \
                 } \
                 make(); set(5); print get();")
            .unwrap(),
            "5\n",
        );
    }

    #[test]
    fn upvalue_closes_with_its_last_value() {
        assert_eq!(
            run("var f; { var x = 10; fun get() { return x; } f = get; x = 11; } print f();")
                .unwrap(),
            "11\n",
        );
    }

    #[test]
    fn sibling_closures_capture_the_same_cell() {
        // both closures are made while x is still open
        assert_eq!(
            run("var a; var b; \
                 { var x = 1; fun one() { x = x + 1; return x; } fun two() { return x; } \
                   a = one; b = two; } \
                 print a(); print b();")
            .unwrap(),
            "2\n2\n",
        );
    }

    #[test]
    fn clock_native() {
        assert_eq!(run("print clock() >= 0;").unwrap(), "true\n");
    }

    // runtime errors

    #[test]
    fn adding_number_and_string_fails() {
        let trace = expect_trace("1 + \"a\";");
        assert_eq!(trace.message, "Operands must be two numbers or two strings.");
    }

    #[test]
    fn comparing_non_numbers_fails() {
        assert_eq!(expect_trace("1 < \"a\";").message, "Operands must be numbers.");
    }

    #[test]
    fn negating_non_number_fails() {
        assert_eq!(expect_trace("-true;").message, "Operand must be a number.");
    }

    #[test]
    fn undefined_global_read() {
        assert_eq!(expect_trace("print ghost;").message, "Undefined variable 'ghost'.");
    }

    #[test]
    fn assignment_never_creates_a_global() {
        let trace = expect_trace("ghost = 1;");
        assert_eq!(trace.message, "Undefined variable 'ghost'.");

        // and the failed assignment left nothing behind
        assert_eq!(expect_trace("ghost = 1; print ghost;").message, "Undefined variable 'ghost'.");
    }

    #[test]
    fn calling_a_number_fails() {
        assert_eq!(expect_trace("1();").message, "Can only call functions.");
    }

    #[test]
    fn arity_is_checked() {
        assert_eq!(
            expect_trace("fun f(a) { return a; } f();").message,
            "Expected 1 arguments but got 0.",
        );
        assert_eq!(
            expect_trace("print clock(1);").message,
            "Expected 0 arguments but got 1.",
        );
    }

    #[test]
    fn unbounded_recursion_overflows() {
        assert_eq!(expect_trace("fun f() { f(); } f();").message, "Stack overflow.");
    }

    #[test]
    fn traceback_lists_frames_innermost_first() {
        let trace = expect_trace("fun boom() { return 1 + \"a\"; }\nboom();");
        assert_eq!(
            format!("{}", trace),
            "Operands must be two numbers or two strings.\n[line 1] in boom\n[line 2] in script",
        );
    }

    #[test]
    fn vm_recovers_after_a_runtime_error() {
        let sink = Sink::default();
        let mut vm = Vm::with_output(Box::new(sink.clone()));

        assert!(vm.interpret("1 + \"a\";").is_err());
        assert!(vm.stack.is_empty());

        vm.interpret("print 2 + 2;").unwrap();
        assert_eq!(String::from_utf8(sink.0.borrow().clone()).unwrap(), "4\n");
    }

    #[test]
    fn compile_errors_do_not_run() {
        let sink = Sink::default();
        let mut vm = Vm::with_output(Box::new(sink.clone()));

        match vm.interpret("print 1; var;") {
            Err(InterpretError::Compile(_)) => {}
            other => panic!("expected a compile error, got {:?}", other),
        }
        // nothing was printed: the chunk never started
        assert!(sink.0.borrow().is_empty());
    }
}
