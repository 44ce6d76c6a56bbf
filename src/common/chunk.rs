use crate::common::{opcode::Opcode, value::Value};

/// Represents a single interpretable chunk of bytecode,
/// think the body of a function.
/// A `Chunk` owns three parallel pieces of state:
/// the raw byte stream, the constants it indexes into,
/// and a run-length encoded map from byte offsets back to source lines.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Each byte is an opcode or one of its operand bytes.
    pub code: Vec<u8>,
    /// Constant-pool indexed, used to load constants.
    /// Indices are 16-bit; the first 256 can use short opcode forms.
    pub constants: Vec<Value>,
    /// `(line, run)` pairs: `run` consecutive bytes share `line`.
    lines: Vec<(u32, u32)>,
}

impl Chunk {
    /// Creates a new empty `Chunk` to be filled.
    pub fn new() -> Chunk {
        Chunk {
            code: vec![],
            constants: vec![],
            lines: vec![],
        }
    }

    /// Appends one byte, recording the source line it came from.
    /// When the byte shares the previous byte's line,
    /// the last run is extended instead of pushing a new pair.
    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);

        match self.lines.last_mut() {
            Some((last, run)) if *last == line => *run += 1,
            _ => self.lines.push((line, 1)),
        }
    }

    /// Emits an opcode as a byte.
    pub fn emit(&mut self, opcode: Opcode, line: u32) {
        self.write(opcode as u8, line);
    }

    /// Given some value, adds it to the constant pool
    /// and returns the value's index.
    /// The pool is push-only, so constants are identified by their index.
    /// The caller is responsible for checking that the index
    /// still fits in the 16-bit operand the bytecode can express.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// The source line the byte at `offset` came from.
    /// This linearly scans the run-length pairs,
    /// which is fine - it's only used when reporting diagnostics.
    pub fn line(&self, offset: usize) -> u32 {
        let mut seen = 0;

        for (line, run) in self.lines.iter() {
            seen += *run as usize;
            if offset < seen {
                return *line;
            }
        }

        // past the end: blame the last line we know about
        self.lines.last().map(|(line, _)| *line).unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty() {
        let chunk = Chunk::new();
        assert!(chunk.code.is_empty());
        assert_eq!(chunk.line(0), 0);
    }

    #[test]
    fn runs_collapse() {
        let mut chunk = Chunk::new();
        chunk.emit(Opcode::Nil, 1);
        chunk.emit(Opcode::Nil, 1);
        chunk.emit(Opcode::Pop, 2);
        chunk.emit(Opcode::Pop, 2);
        chunk.emit(Opcode::Return, 2);

        assert_eq!(chunk.lines, vec![(1, 2), (2, 3)]);
        assert_eq!(chunk.line(0), 1);
        assert_eq!(chunk.line(1), 1);
        assert_eq!(chunk.line(2), 2);
        assert_eq!(chunk.line(4), 2);
    }

    #[test]
    fn line_past_end() {
        let mut chunk = Chunk::new();
        chunk.emit(Opcode::Return, 3);
        assert_eq!(chunk.line(17), 3);
    }

    #[test]
    fn constants_are_push_only() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.add_constant(Value::Number(1.0)), 0);
        assert_eq!(chunk.add_constant(Value::Number(1.0)), 1);
        assert_eq!(chunk.add_constant(Value::Nil), 2);
    }

    proptest! {
        /// Writing bytes under any line sequence,
        /// `line` recovers exactly the line each byte was written with.
        #[test]
        fn line_map_faithful(lines in proptest::collection::vec(1u32..64, 1..200)) {
            let mut chunk = Chunk::new();
            for line in lines.iter() {
                chunk.write(0, *line);
            }
            for (offset, line) in lines.iter().enumerate() {
                prop_assert_eq!(chunk.line(offset), *line);
            }
        }
    }
}
