//! # Output Stream Handlers
//!
//! Handlers interpret a finished run's stderr, exit value and stdout before
//! any output is converted. They are behaviour, not data: a configuration
//! carries them as [`Handler`] values that remember the option name they
//! were created from, and only that name takes part in equality and in the
//! cache key.
//!
//! | Option | Stream | Effect |
//! |---|---|---|
//! | `logging` | any | log the content |
//! | `errorIfNotEmpty` | stderr | fail on any stderr output |
//! | `pythonTraceback` | stderr | fail with the traceback text |
//! | `rError` | stderr | fail with text from the first `Error` line |
//! | `errorIfNotZero` | exit value | fail on non-zero exit |
//!
//! `ignore` maps to no handler at all.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::info;

use crate::constants::{PYTHON_TRACEBACK_MARKER, R_ERROR_MARKER};
use crate::error::{Error, Result};

/// Interprets the stderr of a finished run.
pub trait StderrHandler: Send + Sync {
    fn handle_stderr(&self, stderr: &str) -> Result<()>;
}

/// Interprets the exit value of a finished run.
pub trait ExitValueHandler: Send + Sync {
    fn handle_exit_value(&self, exit_value: i32) -> Result<()>;
}

/// Interprets the stdout of a finished run.
pub trait StdoutHandler: Send + Sync {
    fn handle_stdout(&self, stdout: &str);
}

/// A handler together with the option name it was created from.
pub struct Handler<H: ?Sized> {
    kind: String,
    inner: Arc<H>,
}

impl<H: ?Sized> Handler<H> {
    pub fn new(kind: impl Into<String>, inner: Arc<H>) -> Self {
        Self {
            kind: kind.into(),
            inner,
        }
    }

    /// Option name, the only part that identifies the handler.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn get(&self) -> &H {
        &self.inner
    }
}

impl<H: ?Sized> Clone for Handler<H> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ?Sized> PartialEq for Handler<H> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl<H: ?Sized> Eq for Handler<H> {}

impl<H: ?Sized> Hash for Handler<H> {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.kind.hash(state);
    }
}

impl<H: ?Sized> fmt::Debug for Handler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.kind).finish()
    }
}

// =============================================================================
// Stderr
// =============================================================================

/// Logs stderr.
#[derive(Debug, Default)]
pub struct LogStderr;

impl StderrHandler for LogStderr {
    fn handle_stderr(&self, stderr: &str) -> Result<()> {
        if !stderr.is_empty() {
            info!(stderr = %stderr, "process stderr");
        }
        Ok(())
    }
}

/// Fails when anything was written to stderr.
#[derive(Debug, Default)]
pub struct ErrorIfStderrNotEmpty;

impl StderrHandler for ErrorIfStderrNotEmpty {
    fn handle_stderr(&self, stderr: &str) -> Result<()> {
        if stderr.is_empty() {
            Ok(())
        } else {
            Err(Error::StderrNotEmpty {
                stderr: stderr.to_string(),
            })
        }
    }
}

/// Fails when stderr contains a python traceback; other output is ignored.
#[derive(Debug, Default)]
pub struct PythonTraceback;

impl StderrHandler for PythonTraceback {
    fn handle_stderr(&self, stderr: &str) -> Result<()> {
        match stderr.find(PYTHON_TRACEBACK_MARKER) {
            Some(start) => Err(Error::StderrError {
                message: stderr[start..].to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Fails when a stderr line starts with `Error`, as R reports fatal errors.
#[derive(Debug, Default)]
pub struct RError;

impl StderrHandler for RError {
    fn handle_stderr(&self, stderr: &str) -> Result<()> {
        let start = stderr
            .match_indices(R_ERROR_MARKER)
            .map(|(idx, _)| idx)
            .find(|&idx| idx == 0 || stderr.as_bytes()[idx - 1] == b'\n');
        match start {
            Some(start) => Err(Error::StderrError {
                message: stderr[start..].to_string(),
            }),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Exit value
// =============================================================================

/// Logs the exit value.
#[derive(Debug, Default)]
pub struct LogExitValue;

impl ExitValueHandler for LogExitValue {
    fn handle_exit_value(&self, exit_value: i32) -> Result<()> {
        info!(exit_value, "process exit value");
        Ok(())
    }
}

/// Fails on a non-zero exit value.
#[derive(Debug, Default)]
pub struct ErrorIfExitValueNotZero;

impl ExitValueHandler for ErrorIfExitValueNotZero {
    fn handle_exit_value(&self, exit_value: i32) -> Result<()> {
        if exit_value == 0 {
            Ok(())
        } else {
            Err(Error::NonZeroExitValue { code: exit_value })
        }
    }
}

// =============================================================================
// Stdout
// =============================================================================

/// Logs stdout.
#[derive(Debug, Default)]
pub struct LogStdout;

impl StdoutHandler for LogStdout {
    fn handle_stdout(&self, stdout: &str) {
        if !stdout.is_empty() {
            info!(stdout = %stdout, "process stdout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_traceback_extracts_from_marker() {
        let stderr = "warning: slow\nTraceback (most recent call last):\n  File \"x.py\"\nValueError: bad";
        match PythonTraceback.handle_stderr(stderr) {
            Err(Error::StderrError { message }) => {
                assert!(message.starts_with("Traceback (most recent call last)"));
                assert!(message.ends_with("ValueError: bad"));
            }
            other => panic!("expected traceback error, got {:?}", other),
        }
        assert!(PythonTraceback.handle_stderr("just a warning").is_ok());
    }

    #[test]
    fn test_r_error_only_at_line_start() {
        assert!(RError.handle_stderr("no Error here").is_ok());
        assert!(RError.handle_stderr("Error in f(): boom").is_err());
        match RError.handle_stderr("Loading\nError in x: y") {
            Err(Error::StderrError { message }) => assert_eq!(message, "Error in x: y"),
            other => panic!("expected R error, got {:?}", other),
        }
    }

    #[test]
    fn test_exit_value_handlers() {
        assert!(ErrorIfExitValueNotZero.handle_exit_value(0).is_ok());
        assert!(matches!(
            ErrorIfExitValueNotZero.handle_exit_value(2),
            Err(Error::NonZeroExitValue { code: 2 })
        ));
        assert!(LogExitValue.handle_exit_value(2).is_ok());
    }

    #[test]
    fn test_stderr_not_empty() {
        assert!(ErrorIfStderrNotEmpty.handle_stderr("").is_ok());
        assert!(ErrorIfStderrNotEmpty.handle_stderr("x").is_err());
    }

    #[test]
    fn test_handler_equality_by_kind() {
        let log: Arc<dyn StderrHandler> = Arc::new(LogStderr);
        let r: Arc<dyn StderrHandler> = Arc::new(RError);
        let a = Handler::new("logging", Arc::clone(&log));
        let b = Handler::new("logging", log);
        let c = Handler::new("rError", r);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(format!("{:?}", a), "Handler(\"logging\")");
    }
}
