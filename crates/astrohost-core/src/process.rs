//! Child process execution.
//!
//! Both compiler stages go through [`ProcessRunner`], so tests can swap the
//! real toolchain for a recording double.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::{CompileStage, Error, Result};

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes written to the child's standard input, which is then closed.
    pub stdin: Vec<u8>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = input.into();
        self
    }

    /// Command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status and captured text of a finished child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub status_code: i32,
    /// Standard output followed by standard error.
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Runs a child process to completion.
pub trait ProcessRunner: Send + Sync {
    /// Spawn, feed stdin, wait, and capture exit code plus combined output.
    ///
    /// A nonzero exit is reported through [`ProcessOutput::status_code`], not
    /// as an error. Errors are reserved for failing to run the child at all.
    fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput>;
}

/// [`ProcessRunner`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput> {
        if spec.program.trim().is_empty() {
            return Err(Error::argument("program must not be empty"));
        }
        debug!(command = %spec.command_line(), "Spawning child process");

        let spawn_failure = |cause: String| Error::Toolchain {
            stage: CompileStage::Build,
            status: -1,
            diagnostics: cause,
        };

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failure(format!("failed to spawn '{}': {}", spec.program, e)))?;

        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            // Feed stdin concurrently so a chatty child cannot fill its output
            // pipes while we are still writing.
            if let Some(mut stdin) = stdin {
                let input = spec.stdin.as_slice();
                let program = spec.program.as_str();
                scope.spawn(move || {
                    if let Err(e) = stdin.write_all(input) {
                        warn!(program = %program, error = %e, "Failed to write child stdin");
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| spawn_failure(format!("failed to wait for '{}': {}", spec.program, e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ProcessOutput {
            status_code: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let spec = ProcessSpec::new("g++").args(["-fsyntax-only", "-x", "c++", "-"]);
        assert_eq!(spec.command_line(), "g++ -fsyntax-only -x c++ -");
    }

    #[test]
    fn test_empty_program_rejected() {
        let result = SystemProcessRunner.run(&ProcessSpec::new("  "));
        assert!(matches!(result, Err(Error::Argument(_))));
    }

    #[test]
    fn test_missing_program_is_toolchain_error() {
        let result = SystemProcessRunner.run(&ProcessSpec::new("astrohost-no-such-binary"));
        assert!(matches!(result, Err(Error::Toolchain { status: -1, .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_stdin_round_trip_and_combined_output() {
        let spec = ProcessSpec::new("sh")
            .args(["-c", "cat; echo oops >&2; exit 3"])
            .stdin("hello");
        let out = SystemProcessRunner.run(&spec).unwrap();
        assert_eq!(out.status_code, 3);
        assert!(!out.success());
        assert!(out.output.starts_with("hello"));
        assert!(out.output.contains("oops"));
    }
}
