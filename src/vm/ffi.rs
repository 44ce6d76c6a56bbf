//! The handful of native functions every VM starts with,
//! plus nothing else - populating a real standard library is the
//! embedder's business, via [`Vm::define_native`](crate::vm::vm::Vm).
//!
//! Natives are plain function pointers: they can compute and they can
//! fail with a message, but they cannot re-enter the interpreter.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::value::Value;

/// Seconds since the Unix epoch, as a number.
/// Good enough for the classic `clock()`-based benchmark scripts.
pub fn clock(_args: &[Value]) -> Result<Value, String> {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => Ok(Value::Number(elapsed.as_secs_f64())),
        Err(_) => Err("System clock went backwards.".to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clock_is_nonnegative() {
        match clock(&[]).unwrap() {
            Value::Number(seconds) => assert!(seconds >= 0.0),
            other => panic!("clock returned {:?}", other),
        }
    }

    #[test]
    fn clock_moves_forward() {
        let first = match clock(&[]).unwrap() {
            Value::Number(seconds) => seconds,
            _ => unreachable!(),
        };
        let second = match clock(&[]).unwrap() {
            Value::Number(seconds) => seconds,
            _ => unreachable!(),
        };
        assert!(second >= first);
    }
}
