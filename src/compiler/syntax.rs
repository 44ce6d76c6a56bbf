use std::{error, fmt};

/// Which piece of source a compile error points at.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Place {
    /// A concrete offending lexeme.
    Lexeme(String),
    /// The end of the source.
    End,
    /// Nowhere in particular - the scanner's own error tokens
    /// already describe the problem.
    Nowhere,
}

/// Represents a static error (syntax, scoping, size limits, etc.)
/// found at compile time.
/// Pretty-prints the way diagnostics are expected to look:
///
/// ```plain
/// [line 4] Error at 'x': Can't read variable in its own initializer.
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub line: u32,
    place: Place,
    pub message: String,
}

impl Syntax {
    /// An error anchored to an offending lexeme.
    pub fn at_lexeme(line: u32, lexeme: &str, message: &str) -> Syntax {
        Syntax {
            line,
            place: Place::Lexeme(lexeme.to_string()),
            message: message.to_string(),
        }
    }

    /// An error at the end of the source.
    pub fn at_end(line: u32, message: &str) -> Syntax {
        Syntax {
            line,
            place: Place::End,
            message: message.to_string(),
        }
    }

    /// An error with no lexeme to point at.
    pub fn plain(line: u32, message: &str) -> Syntax {
        Syntax {
            line,
            place: Place::Nowhere,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error", self.line)?;

        match &self.place {
            Place::Lexeme(lexeme) => write!(f, " at '{}'", lexeme)?,
            Place::End => write!(f, " at end")?,
            Place::Nowhere => {}
        }

        write!(f, ": {}", self.message)
    }
}

impl error::Error for Syntax {}

/// Every compile error found in one pass over a source.
/// Compilation keeps going after the first error
/// (panic mode suppresses the cascade until a synchronization point),
/// so there is usually something here worth reading past index zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Syntax>);

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in self.0.iter() {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl error::Error for Diagnostics {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_at_lexeme() {
        let error = Syntax::at_lexeme(4, "x", "Can't read variable in its own initializer.");
        assert_eq!(
            format!("{}", error),
            "[line 4] Error at 'x': Can't read variable in its own initializer.",
        );
    }

    #[test]
    fn error_at_end() {
        let error = Syntax::at_end(9, "Expect '}' after block.");
        assert_eq!(format!("{}", error), "[line 9] Error at end: Expect '}' after block.");
    }

    #[test]
    fn scanner_errors_have_no_at_clause() {
        let error = Syntax::plain(2, "Unterminated string.");
        assert_eq!(format!("{}", error), "[line 2] Error: Unterminated string.");
    }

    #[test]
    fn diagnostics_join_lines() {
        let diagnostics = Diagnostics(vec![
            Syntax::plain(1, "Unexpected character."),
            Syntax::at_end(2, "Expect expression."),
        ]);
        assert_eq!(
            format!("{}", diagnostics),
            "[line 1] Error: Unexpected character.\n[line 2] Error at end: Expect expression.",
        );
    }
}
