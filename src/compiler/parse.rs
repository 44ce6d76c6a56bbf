use std::{mem, rc::Rc};

use tracing::debug;

use crate::common::{
    object::{Function, ObjString},
    opcode::Opcode,
    table::Strings,
    value::{Obj, Value},
};
use crate::compiler::{
    lex::Lexer,
    syntax::{Diagnostics, Syntax},
    token::{Token, TokenKind},
};

/// Local slots and upvalue indices are 16-bit,
/// so a single function can hold this many before the compiler objects.
const MAX_LOCALS: usize = u16::MAX as usize + 1;
const MAX_UPVALUES: usize = u16::MAX as usize + 1;

/// Compiles a source string straight to the bytecode of a
/// top-level `Function`, interning every string it meets along the way.
///
/// There is no syntax tree: the parser emits into the chunk of the
/// function currently being compiled as it goes.
/// All errors found in the pass are accumulated and returned together;
/// a function is only produced when there were none.
pub fn compile(source: &str, strings: &mut Strings) -> Result<Function, Diagnostics> {
    let mut parser = Parser::new(source, strings);

    parser.advance();
    while !parser.eat(TokenKind::Eof) {
        parser.declaration();
    }

    parser.finish()
}

/// How tightly an operator binds, loosest to tightest.
/// `parse_precedence` keeps consuming infix operators
/// while the upcoming one binds at least this tightly.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prec {
    None = 0,
    Assignment,
    Ternary,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Prec {
    /// The next-tighter level, used to make binary operators
    /// left-associative.
    fn tighter(self) -> Prec {
        if let Prec::Primary = self {
            panic!("no precedence binds tighter than primary")
        }
        unsafe { mem::transmute(self as u8 + 1) }
    }
}

/// A variable living in a stack slot of the function being compiled.
/// `depth` is `-1` from declaration until the initializer finishes,
/// which is what makes `var x = x;` resolvable as an error.
#[derive(Debug)]
struct Local<'src> {
    name: &'src str,
    depth: i32,
    /// Captured by some closure; scope exit must hoist it, not pop it.
    captured: bool,
}

/// One upvalue a function captures:
/// either a local slot of the enclosing function,
/// or an index into the enclosing function's own upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Captured {
    index: u16,
    is_local: bool,
}

impl Captured {
    fn local(index: u16) -> Captured {
        Captured { index, is_local: true }
    }

    fn nonlocal(index: u16) -> Captured {
        Captured { index, is_local: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FnKind {
    /// The synthetic function wrapping the whole program.
    Script,
    Function,
}

/// Everything the compiler tracks for one function.
/// Nested `fun` declarations push a new state;
/// the enclosing one is simply the previous element of the stack.
#[derive(Debug)]
struct FnState<'src> {
    function: Function,
    kind: FnKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<Captured>,
    scope_depth: i32,
    /// Bytecode offset `continue` loops back to, when inside a loop.
    loop_start: Option<usize>,
    /// Scope depth at the innermost enclosing loop.
    loop_depth: i32,
}

impl<'src> FnState<'src> {
    fn new(kind: FnKind, name: Option<Rc<ObjString>>) -> FnState<'src> {
        FnState {
            function: Function::new(name),
            kind,
            // slot zero belongs to the callee itself
            locals: vec![Local { name: "", depth: 0, captured: false }],
            upvalues: vec![],
            scope_depth: 0,
            loop_start: None,
            loop_depth: 0,
        }
    }
}

struct Parser<'src, 'i> {
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    strings: &'i mut Strings,
    /// Innermost function last; never empty while compiling.
    states: Vec<FnState<'src>>,
    /// Name of the global whose initializer is being compiled, if any.
    initializing: Option<&'src str>,
    errors: Vec<Syntax>,
    /// Set on the first error in a statement;
    /// suppresses the cascade until synchronization.
    panicking: bool,
}

impl<'src, 'i> Parser<'src, 'i> {
    fn new(source: &'src str, strings: &'i mut Strings) -> Parser<'src, 'i> {
        Parser {
            lexer: Lexer::new(source),
            previous: Token::empty(),
            current: Token::empty(),
            strings,
            states: vec![FnState::new(FnKind::Script, None)],
            initializing: None,
            errors: vec![],
            panicking: false,
        }
    }

    // Cookie Monster's helper functions:

    fn advance(&mut self) {
        self.previous = self.current;

        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }

            // the scanner already wrote the message into the token
            let token = self.current;
            self.error_at(token, token.text);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Consumes the current token if it matches.
    fn eat(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token, message: &str) {
        if self.panicking {
            return;
        }
        self.panicking = true;

        self.errors.push(match token.kind {
            TokenKind::Eof => Syntax::at_end(token.line, message),
            TokenKind::Error => Syntax::plain(token.line, message),
            _ => Syntax::at_lexeme(token.line, token.text, message),
        });
    }

    /// Discards tokens until a statement boundary,
    /// so one mistake doesn't drown the report in nonsense.
    fn synchronize(&mut self) {
        self.panicking = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }

            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return
                | TokenKind::Continue => return,
                _ => self.advance(),
            }
        }
    }

    // state plumbing

    fn state(&self) -> &FnState<'src> {
        self.states.last().expect("a function is always being compiled")
    }

    fn state_mut(&mut self) -> &mut FnState<'src> {
        self.states.last_mut().expect("a function is always being compiled")
    }

    fn chunk_len(&self) -> usize {
        self.state().function.chunk.code.len()
    }

    // emission

    fn emit(&mut self, opcode: Opcode) {
        let line = self.previous.line;
        self.state_mut().function.chunk.emit(opcode, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.state_mut().function.chunk.write(byte, line);
    }

    /// Emits the short opcode with a 1-byte operand when the index fits,
    /// and the long opcode with a 2-byte big-endian operand otherwise.
    fn emit_indexed(&mut self, short: Opcode, long: Opcode, index: u16) {
        if index <= u8::MAX as u16 {
            self.emit(short);
            self.emit_byte(index as u8);
        } else {
            self.emit(long);
            let [hi, lo] = index.to_be_bytes();
            self.emit_byte(hi);
            self.emit_byte(lo);
        }
    }

    fn make_constant(&mut self, value: Value) -> u16 {
        let index = self.state_mut().function.chunk.add_constant(value);
        if index > u16::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u16
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_indexed(Opcode::Constant, Opcode::ConstantLong, index);
    }

    fn identifier_constant(&mut self, name: &str) -> u16 {
        let string = self.strings.intern(name);
        self.make_constant(Value::Object(Obj::String(string)))
    }

    /// Emits a jump with a two-byte placeholder
    /// and returns the offset to patch once the target is known.
    fn emit_jump(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    /// Points a pending jump at the current end of the chunk.
    fn patch_jump(&mut self, site: usize) {
        // -2 adjusts for the operand bytes themselves
        let jump = self.chunk_len() - site - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }

        let [hi, lo] = (jump as u16).to_be_bytes();
        let chunk = &mut self.state_mut().function.chunk;
        chunk.code[site] = hi;
        chunk.code[site + 1] = lo;
    }

    /// Emits a backward jump to `start`,
    /// which must already be behind us.
    fn emit_loop(&mut self, start: usize) {
        self.emit(Opcode::Loop);

        // +2 skips back over this instruction's own operand
        let offset = self.chunk_len() - start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }

        let [hi, lo] = (offset as u16).to_be_bytes();
        self.emit_byte(hi);
        self.emit_byte(lo);
    }

    fn emit_return(&mut self) {
        self.emit(Opcode::Nil);
        self.emit(Opcode::Return);
    }

    // scope bookkeeping

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    /// Leaves a scope, discarding its locals from both the compiler's
    /// records and, at runtime, the stack.
    /// Runs of plain slots collapse into a single `PopN`;
    /// captured slots must be hoisted one at a time with `CloseUpvalue`,
    /// in stack order, so pending pops are flushed before each.
    fn end_scope(&mut self) {
        let depth = {
            let state = self.state_mut();
            state.scope_depth -= 1;
            state.scope_depth
        };

        let mut run = 0;
        loop {
            let captured = match self.state().locals.last() {
                Some(local) if local.depth > depth => local.captured,
                _ => break,
            };

            self.state_mut().locals.pop();
            if captured {
                self.flush_pops(run);
                run = 0;
                self.emit(Opcode::CloseUpvalue);
            } else {
                run += 1;
            }
        }

        self.flush_pops(run);
    }

    /// `Pop` for one slot, `PopN` for a run, repeated for runs over 255.
    fn flush_pops(&mut self, mut n: usize) {
        while n > 255 {
            self.emit(Opcode::PopN);
            self.emit_byte(255);
            n -= 255;
        }

        match n {
            0 => {}
            1 => self.emit(Opcode::Pop),
            _ => {
                self.emit(Opcode::PopN);
                self.emit_byte(n as u8);
            }
        }
    }

    // variables

    /// Records a local in the current scope, still uninitialized.
    fn add_local(&mut self, name: &'src str) {
        if self.state().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }

        self.state_mut().locals.push(Local {
            name,
            depth: -1,
            captured: false,
        });
    }

    /// In a scope, the just-parsed identifier becomes a new local;
    /// shadowing an enclosing scope is fine, a duplicate here is not.
    /// At the top level this does nothing - globals are late-bound.
    fn declare_variable(&mut self) {
        if self.state().scope_depth == 0 {
            return;
        }
        let name = self.previous.text;

        let mut duplicate = false;
        {
            let state = self.state();
            for local in state.locals.iter().rev() {
                if local.depth != -1 && local.depth < state.scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }

        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    /// Promotes the newest local from "declared" to "usable".
    fn mark_initialized(&mut self) {
        let state = self.state_mut();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        if let Some(local) = state.locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Parses a variable name; returns the constant index of the name
    /// for globals, and an ignored 0 for locals.
    fn parse_variable(&mut self, message: &str) -> u16 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();

        if self.state().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.text)
    }

    fn define_variable(&mut self, global: u16) {
        if self.state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_indexed(Opcode::DefineGlobal, Opcode::DefineGlobalLong, global);
    }

    /// The slot of `name` in the given function's locals, innermost first.
    fn resolve_local(&mut self, state: usize, name: &str) -> Option<u16> {
        let found = self.states[state]
            .locals
            .iter()
            .rposition(|local| local.name == name)?;

        if self.states[state].locals[found].depth == -1 {
            self.error("Can't read variable in its own initializer.");
        }
        Some(found as u16)
    }

    /// Looks for `name` in enclosing functions, capturing as it goes:
    /// a match in the immediately-enclosing function's locals marks that
    /// slot captured and records a local upvalue;
    /// a match further out recurses and records a chained upvalue.
    fn resolve_upvalue(&mut self, state: usize, name: &str) -> Option<u16> {
        if state == 0 {
            return None;
        }
        let enclosing = state - 1;

        if let Some(slot) = self.resolve_local(enclosing, name) {
            self.states[enclosing].locals[slot as usize].captured = true;
            return Some(self.add_upvalue(state, Captured::local(slot)));
        }

        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(state, Captured::nonlocal(upvalue)));
        }

        None
    }

    /// Appends an upvalue record, reusing an identical one if present.
    fn add_upvalue(&mut self, state: usize, captured: Captured) -> u16 {
        if let Some(index) = self.states[state]
            .upvalues
            .iter()
            .position(|existing| *existing == captured)
        {
            return index as u16;
        }

        if self.states[state].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }

        self.states[state].upvalues.push(captured);
        (self.states[state].upvalues.len() - 1) as u16
    }

    /// Compiles a read of `name`, or a write when it is followed by `=`
    /// in a context where assignment is allowed.
    /// Resolution order: local, then upvalue, then global.
    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let top = self.states.len() - 1;

        let (get, get_long, set, set_long, index);
        if let Some(slot) = self.resolve_local(top, name) {
            get = Opcode::GetLocal;
            get_long = Opcode::GetLocalLong;
            set = Opcode::SetLocal;
            set_long = Opcode::SetLocalLong;
            index = slot;
        } else if let Some(upvalue) = self.resolve_upvalue(top, name) {
            get = Opcode::GetUpvalue;
            get_long = Opcode::GetUpvalueLong;
            set = Opcode::SetUpvalue;
            set_long = Opcode::SetUpvalueLong;
            index = upvalue;
        } else {
            if self.initializing == Some(name) {
                self.error("Can't read variable in its own initializer.");
            }
            get = Opcode::GetGlobal;
            get_long = Opcode::GetGlobalLong;
            set = Opcode::SetGlobal;
            set_long = Opcode::SetGlobalLong;
            index = self.identifier_constant(name);
        }

        if can_assign && self.eat(TokenKind::Equal) {
            self.expression();
            self.emit_indexed(set, set_long, index);
        } else {
            self.emit_indexed(get, get_long, index);
        }
    }

    // the core Pratt parser

    fn expression(&mut self) {
        self.parse_precedence(Prec::Assignment);
    }

    /// Parses anything binding at least as tightly as `prec`:
    /// one prefix expression, then infix operators while they qualify.
    /// Assignment is only allowed when the target could still be one,
    /// i.e. when we were called at assignment precedence or looser.
    fn parse_precedence(&mut self, prec: Prec) {
        self.advance();
        let can_assign = prec <= Prec::Assignment;

        if !self.prefix_rule(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while Self::precedence_of(self.current.kind) >= prec {
            self.advance();
            self.infix_rule(self.previous.kind);
        }

        if can_assign && self.eat(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// One row of the rule table: how tightly each token binds as an
    /// infix operator. Everything else answers `None` and stops the loop.
    fn precedence_of(kind: TokenKind) -> Prec {
        match kind {
            TokenKind::Question => Prec::Ternary,
            TokenKind::Or => Prec::Or,
            TokenKind::And => Prec::And,
            TokenKind::BangEqual | TokenKind::EqualEqual => Prec::Equality,
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => Prec::Comparison,
            TokenKind::Minus | TokenKind::Plus => Prec::Term,
            TokenKind::Slash | TokenKind::Star => Prec::Factor,
            TokenKind::LeftParen => Prec::Call,
            _ => Prec::None,
        }
    }

    /// The prefix column of the rule table.
    /// Returns whether the token can start an expression at all.
    fn prefix_rule(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::Identifier => self.variable(can_assign),
            TokenKind::Nil | TokenKind::True | TokenKind::False => self.literal(),
            _ => return false,
        }
        true
    }

    /// The infix column of the rule table.
    /// Only reached for tokens `precedence_of` let through.
    fn infix_rule(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::LeftParen => self.call_expr(),
            TokenKind::Question => self.ternary(),
            TokenKind::And => self.and_expr(),
            TokenKind::Or => self.or_expr(),
            _ => self.binary(),
        }
    }

    // prefix rules

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let op = self.previous.kind;
        self.parse_precedence(Prec::Unary);

        match op {
            TokenKind::Minus => self.emit(Opcode::Negate),
            TokenKind::Bang => self.emit(Opcode::Not),
            _ => unreachable!("not a unary operator"),
        }
    }

    fn number(&mut self) {
        // underscores are a visual separator, the scanner keeps them
        let raw = self.previous.text.replace('_', "");
        match raw.parse::<f64>() {
            Ok(number) => self.emit_constant(Value::Number(number)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self) {
        let text = self.previous.text;
        let string = self.strings.intern(&text[1..text.len() - 1]);
        self.emit_constant(Value::Object(Obj::String(string)));
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.text, can_assign);
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::Nil => self.emit(Opcode::Nil),
            TokenKind::True => self.emit(Opcode::True),
            TokenKind::False => self.emit(Opcode::False),
            _ => unreachable!("not a literal"),
        }
    }

    // infix rules

    fn binary(&mut self) {
        let op = self.previous.kind;
        self.parse_precedence(Self::precedence_of(op).tighter());

        self.emit(match op {
            TokenKind::Plus => Opcode::Add,
            TokenKind::Minus => Opcode::Subtract,
            TokenKind::Star => Opcode::Multiply,
            TokenKind::Slash => Opcode::Divide,
            TokenKind::EqualEqual => Opcode::Equal,
            TokenKind::BangEqual => Opcode::NotEqual,
            TokenKind::Greater => Opcode::Greater,
            TokenKind::GreaterEqual => Opcode::GreaterEqual,
            TokenKind::Less => Opcode::Less,
            TokenKind::LessEqual => Opcode::LessEqual,
            _ => unreachable!("not a binary operator"),
        });
    }

    /// `and` short-circuits: if the left side is falsey it stays on the
    /// stack as the result, otherwise it's popped for the right side.
    fn and_expr(&mut self) {
        let end = self.emit_jump(Opcode::JumpIfFalse);
        self.emit(Opcode::Pop);
        self.parse_precedence(Prec::And);
        self.patch_jump(end);
    }

    /// `or` mirrors `and` with the jump sense flipped.
    fn or_expr(&mut self) {
        let end = self.emit_jump(Opcode::JumpIfTrue);
        self.emit(Opcode::Pop);
        self.parse_precedence(Prec::Or);
        self.patch_jump(end);
    }

    /// `c ? t : e` lowers exactly like an `if` expression would:
    /// each arm pops the condition on its own side of the jumps.
    fn ternary(&mut self) {
        let otherwise = self.emit_jump(Opcode::JumpIfFalse);
        self.emit(Opcode::Pop);
        self.parse_precedence(Prec::Ternary);
        let end = self.emit_jump(Opcode::Jump);

        self.patch_jump(otherwise);
        self.emit(Opcode::Pop);
        self.consume(TokenKind::Colon, "Expect ':' after then branch of ternary.");
        self.parse_precedence(Prec::Ternary);
        self.patch_jump(end);
    }

    fn call_expr(&mut self) {
        let argc = self.argument_list();
        self.emit(Opcode::Call);
        self.emit_byte(argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: usize = 0;

        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc.min(255) as u8
    }

    // declarations and statements

    fn declaration(&mut self) {
        if self.eat(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.eat(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panicking {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        // a global's initializer may not read the name it is defining;
        // locals get the same guard from their -1 depth
        let shadow = if self.state().scope_depth == 0 {
            Some(self.previous.text)
        } else {
            None
        };

        if self.eat(TokenKind::Equal) {
            let outer = mem::replace(&mut self.initializing, shadow);
            self.expression();
            self.initializing = outer;
        } else {
            self.emit(Opcode::Nil);
        }

        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // usable immediately, so a function can recurse into itself
        self.mark_initialized();
        self.function();
        self.define_variable(global);
    }

    /// Compiles a whole function body into a fresh `FnState`,
    /// then wraps the result in a closure at the declaration site,
    /// spelling out where each upvalue comes from for the VM.
    fn function(&mut self) {
        let name = self.strings.intern(self.previous.text);
        self.states.push(FnState::new(FnKind::Function, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.state_mut().function.arity += 1;
                if self.state().function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }

                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);

                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");

        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();
        let index = self.make_constant(Value::Object(Obj::Function(Rc::new(function))));
        self.emit_indexed(Opcode::Closure, Opcode::ClosureLong, index);

        for captured in upvalues {
            self.emit_byte(captured.is_local as u8);
            let [hi, lo] = captured.index.to_be_bytes();
            self.emit_byte(hi);
            self.emit_byte(lo);
        }
    }

    /// Seals the innermost function: implicit `nil` return,
    /// upvalue count recorded on the function itself.
    fn end_function(&mut self) -> (Function, Vec<Captured>) {
        self.emit_return();

        let state = self.states.pop().expect("a function is always being compiled");
        let FnState { mut function, upvalues, .. } = state;
        function.upvalues = upvalues.len();

        debug!(
            "compiled {}: {} bytes, {} constants, {} upvalues",
            function,
            function.chunk.code.len(),
            function.chunk.constants.len(),
            function.upvalues,
        );

        (function, upvalues)
    }

    fn statement(&mut self) {
        if self.eat(TokenKind::Print) {
            self.print_statement();
        } else if self.eat(TokenKind::If) {
            self.if_statement();
        } else if self.eat(TokenKind::Return) {
            self.return_statement();
        } else if self.eat(TokenKind::While) {
            self.while_statement();
        } else if self.eat(TokenKind::For) {
            self.for_statement();
        } else if self.eat(TokenKind::Continue) {
            self.continue_statement();
        } else if self.eat(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(Opcode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(Opcode::Pop);
    }

    /// `if` never pops the condition as part of the jump;
    /// each branch starts with an explicit `Pop` instead,
    /// so both paths leave the stack exactly as they found it.
    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit(Opcode::Pop);
        self.statement();
        let else_jump = self.emit_jump(Opcode::Jump);

        self.patch_jump(then_jump);
        self.emit(Opcode::Pop);
        if self.eat(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn return_statement(&mut self) {
        if self.state().kind == FnKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.eat(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit(Opcode::Return);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit(Opcode::Pop);

        let enclosing = self.enter_loop(loop_start);
        self.statement();
        self.emit_loop(loop_start);
        self.exit_loop(enclosing);

        self.patch_jump(exit_jump);
        self.emit(Opcode::Pop);
    }

    /// `for` desugars into its own scope:
    /// initializer first, then the condition,
    /// and when an increment is present the body jumps over it on entry
    /// while the back edge lands on it - so `continue` runs it too.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.eat(TokenKind::Semicolon) {
            // no initializer
        } else if self.eat(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let mut exit_jump = None;
        if !self.eat(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit(Opcode::Pop);
        }

        if !self.eat(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Opcode::Jump);
            let increment_start = self.chunk_len();

            self.expression();
            self.emit(Opcode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        let enclosing = self.enter_loop(loop_start);
        self.statement();
        self.emit_loop(loop_start);
        self.exit_loop(enclosing);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(Opcode::Pop);
        }

        self.end_scope();
    }

    /// Jumps straight to the innermost loop's back-edge target.
    /// Locals the body has piled up are popped (or hoisted) first so the
    /// stack is exactly as deep at the back edge as it was at loop entry -
    /// but only at runtime: compile-time scopes are untouched, since the
    /// code after `continue` still sees them.
    fn continue_statement(&mut self) {
        let start = match self.state().loop_start {
            Some(start) => start,
            None => {
                self.error("Can't use 'continue' outside of a loop.");
                return;
            }
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");

        let loop_depth = self.state().loop_depth;
        let deeper: Vec<bool> = self
            .state()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > loop_depth)
            .map(|local| local.captured)
            .collect();

        let mut run = 0;
        for captured in deeper {
            if captured {
                self.flush_pops(run);
                run = 0;
                self.emit(Opcode::CloseUpvalue);
            } else {
                run += 1;
            }
        }
        self.flush_pops(run);

        self.emit_loop(start);
    }

    fn enter_loop(&mut self, start: usize) -> (Option<usize>, i32) {
        let state = self.state_mut();
        let enclosing = (state.loop_start, state.loop_depth);
        state.loop_start = Some(start);
        state.loop_depth = state.scope_depth;
        enclosing
    }

    fn exit_loop(&mut self, enclosing: (Option<usize>, i32)) {
        let state = self.state_mut();
        state.loop_start = enclosing.0;
        state.loop_depth = enclosing.1;
    }

    /// Wraps up the script function once the token stream runs dry.
    fn finish(mut self) -> Result<Function, Diagnostics> {
        let (function, _) = self.end_function();

        if self.errors.is_empty() {
            Ok(function)
        } else {
            Err(Diagnostics(self.errors))
        }
    }
}
