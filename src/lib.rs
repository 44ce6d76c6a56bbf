//! # Kestrel
//! This crate contains the core of the Kestrel scripting language:
//! a one-pass bytecode compiler and the stack-based VM that runs its
//! output, plus the handful of datastructures they share.
//!
//! ## Running Kestrel
//! To run a script from Rust, hand the source to [`interpret`]:
//! ```
//! kestrel::interpret("print 1 + 2;").unwrap();
//! ```
//! To keep state (globals, interned strings) alive between runs,
//! hold on to a [`Vm`] instead:
//! ```
//! use kestrel::Vm;
//!
//! let mut vm = Vm::new();
//! vm.interpret("var greeting = \"hello\";").unwrap();
//! vm.interpret("print greeting;").unwrap();
//! ```
//!
//! ## Overview of the pipeline
//! Source code goes to the compiler as a plain `&str`.
//! The `Lexer` hands out one token at a time, on demand;
//! the parser in `compiler::parse` is a Pratt parser that emits bytecode
//! directly into the [`Chunk`](common::chunk::Chunk) of the function being
//! compiled - there is no syntax tree in between.
//! That's the trick that keeps the whole system small:
//! one pass, and the generated code stays close to the source.
//!
//! Compilation can raise [`Diagnostics`], a batch of [`Syntax`] errors;
//! the parser recovers at statement boundaries and keeps going,
//! so one pass reports everything it can find.
//!
//! The compiled script lands in the [`Vm`] wrapped in a closure and runs
//! on a single value stack under a stack of call frames.
//! Execution can raise a [`Trace`], a runtime error carrying one line
//! entry per live call frame.
//!
//! Strings are interned: every construction site funnels through one
//! [`Strings`](common::table::Strings) table, so equality anywhere else
//! is reference identity.

pub mod common;
pub mod compiler;
pub mod vm;

use thiserror::Error;

pub use common::value::Value;
pub use compiler::parse::compile;
pub use compiler::syntax::{Diagnostics, Syntax};
pub use vm::trace::Trace;
pub use vm::vm::Vm;

/// Everything that can go wrong between a source string and its output.
#[derive(Debug, Error)]
pub enum InterpretError {
    /// The source never compiled; nothing ran.
    #[error(transparent)]
    Compile(#[from] Diagnostics),
    /// The program compiled but died; the VM has been reset.
    #[error(transparent)]
    Runtime(#[from] Trace),
}

impl InterpretError {
    /// The conventional process exit code for this failure:
    /// 65 for compile errors, 70 for runtime errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Compile(_) => 65,
            InterpretError::Runtime(_) => 70,
        }
    }
}

/// Compiles and runs a source string in a fresh, throwaway [`Vm`].
pub fn interpret(source: &str) -> Result<(), InterpretError> {
    Vm::new().interpret(source)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interpret_runs() {
        assert!(interpret("var x = 1; x = x + 1;").is_ok());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(interpret("var;").unwrap_err().exit_code(), 65);
        assert_eq!(interpret("1 + \"a\";").unwrap_err().exit_code(), 70);
    }
}
