//! Executable lookup and child process execution.
//!
//! [`execute`] runs a program to completion and returns its exit status
//! together with the captured output. With
//! [`ExecutionOptions::redirect_stderr`] the child's stderr is written to
//! the same pipe as stdout, so the captured text interleaves both in the
//! order the child produced them.

use crate::environment;
use crate::error::CoreError;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, trace};

/// Shell used for command strings.
pub const SHELL: &str = "sh";

/// Argument that makes [`SHELL`] read the command from the next argument.
pub const SHELL_COMMAND_FLAG: &str = "-c";

/// Options for [`execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Merge stderr into the captured output.
    pub redirect_stderr: bool,
    /// Strip surrounding whitespace from the captured output.
    pub trim_output: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            redirect_stderr: false,
            trim_output: true,
        }
    }
}

impl ExecutionOptions {
    /// Sets stderr merging.
    #[must_use]
    pub fn redirect_stderr(mut self, redirect: bool) -> Self {
        self.redirect_stderr = redirect;
        self
    }

    /// Sets output trimming.
    #[must_use]
    pub fn trim_output(mut self, trim: bool) -> Self {
        self.trim_output = trim;
        self
    }
}

/// Outcome of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// The child exited with status zero.
    pub success: bool,
    /// Captured output (stdout, plus stderr when redirected).
    pub output: String,
    /// Exit code; `None` when the child was terminated by a signal.
    pub status: Option<i32>,
}

/// Resolves an executable name through `PATH`.
///
/// Names containing a path separator are checked directly.
#[must_use]
pub fn which(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    which::which(name).ok()
}

/// Runs `program` with `args` and waits for it to finish.
///
/// A non-zero exit status is not an error: it is reported through
/// [`ExecutionResult::success`].
///
/// # Errors
///
/// Returns [`CoreError::Spawn`] if the process cannot be started and
/// [`CoreError::Output`] if its output cannot be collected.
pub fn execute(
    program: &str,
    args: &[&str],
    options: ExecutionOptions,
) -> Result<ExecutionResult, CoreError> {
    debug!(program, ?args, "executing");

    let (status, raw) = if options.redirect_stderr {
        let (mut reader, writer) = std::io::pipe().map_err(|e| CoreError::spawn(program, e))?;
        let stdout_writer = writer
            .try_clone()
            .map_err(|e| CoreError::spawn(program, e))?;

        // The command owns the write ends; it must be dropped before
        // reading or the pipe never reaches end of file.
        let mut child = {
            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(Stdio::null())
                .stdout(stdout_writer)
                .stderr(writer);
            cmd.spawn().map_err(|e| CoreError::spawn(program, e))?
        };

        let mut raw = Vec::new();
        reader
            .read_to_end(&mut raw)
            .map_err(|e| CoreError::output(program, e))?;
        let status = child.wait().map_err(|e| CoreError::output(program, e))?;
        (status, raw)
    } else {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CoreError::spawn(program, e))?;
        if !output.stderr.is_empty() {
            debug!(
                program,
                stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                "child wrote to stderr"
            );
        }
        (output.status, output.stdout)
    };

    let text = String::from_utf8_lossy(&raw);
    let output = if options.trim_output {
        text.trim().to_string()
    } else {
        text.into_owned()
    };

    trace!(program, status = ?status.code(), "child exited");

    Ok(ExecutionResult {
        success: status.success(),
        output,
        status: status.code(),
    })
}

/// Resolves the executable of a shell command line.
///
/// The first token (optionally quoted) has `$VAR`/`${VAR}` references
/// expanded and is looked up with [`which`]; the rest of the line is kept
/// as written. Returns `None` for an empty command, an unterminated quote
/// or an executable that cannot be found.
#[must_use]
pub fn expand_command(command: &str) -> Option<String> {
    let command = command.trim();
    if command.is_empty() {
        return None;
    }

    let (quote, token, rest) = match command.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let body = &command[1..];
            let end = body.find(q)?;
            (Some(q), &body[..end], &body[end + 1..])
        }
        _ => {
            let end = command
                .find(char::is_whitespace)
                .unwrap_or(command.len());
            (None, &command[..end], &command[end..])
        }
    };

    let expanded = environment::expand(token);
    let resolved = which(&expanded)?;
    let resolved = resolved.to_string_lossy();

    Some(match quote {
        Some(q) => format!("{q}{resolved}{q}{rest}"),
        None => format!("{resolved}{rest}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{ScopedEnv, ENV_LOCK};

    #[test]
    fn execute_captures_trimmed_stdout() {
        let result = execute(SHELL, &[SHELL_COMMAND_FLAG, "echo hi"], ExecutionOptions::default())
            .expect("sh should run");
        assert!(result.success);
        assert_eq!(result.output, "hi");
        assert_eq!(result.status, Some(0));
    }

    #[test]
    fn execute_keeps_whitespace_when_untrimmed() {
        let options = ExecutionOptions::default().trim_output(false);
        let result =
            execute(SHELL, &[SHELL_COMMAND_FLAG, "echo hi"], options).expect("sh should run");
        assert_eq!(result.output, "hi\n");
    }

    #[test]
    fn execute_reports_failure_status() {
        let result = execute(SHELL, &[SHELL_COMMAND_FLAG, "exit 3"], ExecutionOptions::default())
            .expect("sh should run");
        assert!(!result.success);
        assert_eq!(result.status, Some(3));
    }

    #[test]
    fn execute_merges_stderr_when_redirected() {
        let options = ExecutionOptions::default().redirect_stderr(true);
        let result = execute(
            SHELL,
            &[SHELL_COMMAND_FLAG, "echo out; echo err 1>&2"],
            options,
        )
        .expect("sh should run");
        assert_eq!(result.output, "out\nerr");
    }

    #[test]
    fn execute_drops_stderr_by_default() {
        let result = execute(
            SHELL,
            &[SHELL_COMMAND_FLAG, "echo err 1>&2"],
            ExecutionOptions::default(),
        )
        .expect("sh should run");
        assert_eq!(result.output, "");
    }

    #[test]
    fn execute_missing_program_is_spawn_error() {
        let err = execute(
            "/nonexistent/facter-test-binary",
            &[],
            ExecutionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Spawn { .. }));
    }

    #[test]
    fn which_finds_shell() {
        let path = which(SHELL).expect("sh on PATH");
        assert!(path.is_absolute());
        assert!(which("").is_none());
        assert!(which("facter-test-no-such-binary").is_none());
    }

    #[test]
    fn expand_command_resolves_executable() {
        let expanded = expand_command("  sh -c 'echo hi'  ").expect("sh resolves");
        assert!(expanded.ends_with("sh -c 'echo hi'"));
        assert!(expanded.starts_with('/'));
    }

    #[test]
    fn expand_command_expands_env_in_executable() {
        let _lock = ENV_LOCK.lock();
        let _shell = ScopedEnv::new("FACTER_TEST_SHELL_NAME", "sh");
        let expanded = expand_command("$FACTER_TEST_SHELL_NAME -c true").expect("sh resolves");
        assert!(expanded.ends_with("sh -c true"));
    }

    #[test]
    fn expand_command_handles_quoted_executable() {
        let expanded = expand_command("\"sh\" -c true").expect("sh resolves");
        assert!(expanded.starts_with("\"/"));
        assert!(expanded.ends_with("sh\" -c true"));
    }

    #[test]
    fn expand_command_rejects_bad_input() {
        assert!(expand_command("   ").is_none());
        assert!(expand_command("\"sh -c true").is_none());
        assert!(expand_command("facter-test-no-such-binary --flag").is_none());
    }
}
