use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
};

use crate::common::{chunk::Chunk, value::Value};

/// An interned, immutable string.
/// The hash is FNV-1a over the bytes, computed once at construction.
/// Invariant: for any given byte sequence at most one live `ObjString` exists,
/// so equality checks elsewhere can compare by reference identity.
/// Construction goes through the interner (`Strings`), never around it.
#[derive(Debug, PartialEq, Eq)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

impl ObjString {
    /// Builds a string with its hash precomputed.
    /// Crate-private so interning can't be bypassed.
    pub(crate) fn new(chars: &str) -> ObjString {
        ObjString {
            chars: chars.into(),
            hash: ObjString::hash_of(chars),
        }
    }

    /// 32-bit FNV-1a over the string's bytes.
    pub fn hash_of(chars: &str) -> u32 {
        let mut hash: u32 = 2_166_136_261;

        for byte in chars.as_bytes() {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(16_777_619);
        }

        hash
    }
}

impl fmt::Display for ObjString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chars)
    }
}

/// A compiled function: a compile-time artifact.
/// The top-level script is itself a `Function` with no name.
#[derive(Debug, Clone)]
pub struct Function {
    /// Number of declared parameters.
    pub arity: usize,
    /// Number of upvalues the wrapping closure must provide.
    pub upvalues: usize,
    /// The function's bytecode.
    pub chunk: Chunk,
    pub name: Option<Rc<ObjString>>,
}

impl Function {
    pub fn new(name: Option<Rc<ObjString>>) -> Function {
        Function {
            arity: 0,
            upvalues: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<fn {}>", name),
            None => write!(f, "<script>"),
        }
    }
}

/// The signature every native function implements.
/// Natives receive their arguments as a slice
/// and report failures as plain messages,
/// which the VM turns into runtime errors with a traceback.
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A host function exposed to scripts, bound at VM construction.
#[derive(Clone)]
pub struct Native {
    pub name: &'static str,
    pub arity: usize,
    pub function: NativeFn,
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({})", self.name)
    }
}

impl fmt::Display for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}

/// Wraps a `Function` with the captured variables it closes over.
/// `upvalues` has exactly `function.upvalues` entries,
/// built by the VM while executing the `Closure` opcode.
#[derive(Debug, Clone)]
pub struct Closure {
    pub function: Rc<Function>,
    pub upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

impl Closure {
    /// Wraps a function that captures nothing,
    /// which is how the top-level script enters the VM.
    pub fn wrap(function: Rc<Function>) -> Closure {
        Closure {
            function,
            upvalues: vec![],
        }
    }
}

/// A heap cell shared between an enclosing frame's stack slot
/// and every closure that captured it.
/// While the variable is still on the stack the cell is `Open`
/// and holds the slot's index;
/// when the slot goes out of scope the value moves into the cell
/// and it becomes `Closed`.
#[derive(Debug, Clone, PartialEq)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fnv1a() {
        // reference vectors for 32-bit FNV-1a
        assert_eq!(ObjString::hash_of(""), 2_166_136_261);
        assert_eq!(ObjString::hash_of("a"), 0xe40c292c);
        assert_eq!(ObjString::hash_of("foobar"), 0xbf9cf968);
    }

    #[test]
    fn script_display() {
        let script = Function::new(None);
        assert_eq!(format!("{}", script), "<script>");
    }

    #[test]
    fn named_display() {
        let name = Rc::new(ObjString::new("soar"));
        let function = Function::new(Some(name));
        assert_eq!(format!("{}", function), "<fn soar>");
    }
}
