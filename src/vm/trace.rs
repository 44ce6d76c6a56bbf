use std::{error, fmt};

/// Represents a runtime error, i.e. a traceback.
/// Holds the message plus one entry per call frame that was live
/// when things went wrong, innermost first:
///
/// ```plain
/// Operands must be two numbers or two strings.
/// [line 2] in dub
/// [line 4] in script
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub message: String,
    /// `(line, function name)` per live frame; `None` is the script.
    frames: Vec<(u32, Option<String>)>,
}

impl Trace {
    pub fn new(message: impl Into<String>) -> Trace {
        Trace {
            message: message.into(),
            frames: vec![],
        }
    }

    /// Appends the next-outer frame to the traceback.
    pub fn frame(&mut self, line: u32, name: Option<String>) {
        self.frames.push((line, name));
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        for (line, name) in self.frames.iter() {
            write!(f, "\n[line {}] in {}", line, name.as_deref().unwrap_or("script"))?;
        }

        Ok(())
    }
}

impl error::Error for Trace {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn traceback() {
        let mut trace = Trace::new("Operands must be numbers.");
        trace.frame(2, Some("incr".to_string()));
        trace.frame(4, None);

        assert_eq!(
            format!("{}", trace),
            "Operands must be numbers.\n[line 2] in incr\n[line 4] in script",
        );
    }

    #[test]
    fn no_frames_is_just_the_message() {
        let trace = Trace::new("whoops");
        assert_eq!(format!("{}", trace), "whoops");
    }
}
