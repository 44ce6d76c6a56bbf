//! The source-to-bytecode half of the interpreter.
//! Each piece hands its output straight to the next - loosely:
//!
//! ~> Source (string)
//! -> Tokens, one at a time   : lex.rs
//! -> Bytecode                : parse.rs (no syntax tree in between)
//! ~> Run (result)            : vm/vm.rs

pub mod lex;
pub mod parse;
pub mod syntax;
pub mod token;
