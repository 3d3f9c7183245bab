//! Process runner trait - the boundary to whatever executes the program.
//!
//! A runner receives a fully assembled [`RunRequest`] (argv, stdin bytes,
//! input files, the output files to fetch) and returns the raw
//! [`RunOutput`]. It knows nothing about parameters, bindings or caching;
//! those are handled by [`crate::process`].
//!
//! # Lifecycle
//!
//! ```text
//! prepare environment → write input files → run(argv, stdin)
//!     → read output files → tear down environment (always)
//! ```
//!
//! # Implementations
//!
//! - `DockerRunner`: a fresh container per run via the docker CLI
//! - `LocalRunner`: a host process in a private scratch directory

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A file to place in the working directory before the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Path relative to the working directory (or absolute).
    pub path: String,
    /// File content.
    pub content: Vec<u8>,
}

/// Everything a runner needs for one execution.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Container image reference.
    pub image: String,
    /// Working directory inside the execution environment.
    pub working_directory: String,
    /// Program and arguments; the first token is the executable.
    pub command: Vec<String>,
    /// Bytes written to the program's stdin.
    pub stdin: Vec<u8>,
    /// Files written before the run.
    pub input_files: Vec<InputFile>,
    /// Files read after the run.
    pub output_files: Vec<String>,
}

/// Raw result of one execution.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Exit code of the program.
    pub exit_code: i32,
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
    /// Requested output files that existed after the run.
    pub files: HashMap<String, Vec<u8>>,
}

impl RunOutput {
    /// Returns true if the program succeeded (exit code 0).
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout decoded lossily as UTF-8.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily as UTF-8.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Executes assembled programs.
///
/// Implementations must release every resource they acquire for a run
/// (containers, scratch directories) on all exit paths, including errors.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Returns the runner name.
    fn name(&self) -> &str;

    /// Checks if this runner can execute programs on this host.
    fn is_available(&self) -> bool;

    /// Runs the program and collects its raw output.
    ///
    /// A non-zero exit code is not an error here; it is reported in
    /// [`RunOutput::exit_code`] for the exit value handler to judge.
    async fn run(&self, request: RunRequest) -> Result<RunOutput>;
}
