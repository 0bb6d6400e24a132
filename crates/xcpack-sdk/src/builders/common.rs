//! Command execution shared by the Xcode builder and the IPA packager.
//!
//! Every external tool is invoked as a single shell command line. The
//! [`CommandRunner`] trait is the seam between assembling those lines and
//! running them: [`ShellRunner`] hands them to `bash`, while tests swap in
//! a runner that records the lines and replays scripted results.
//!
//! ## Error Messages
//!
//! A failing command surfaces as [`XcodeError::CommandFailed`] carrying the
//! full command line, and [`run_reporting_failure`] writes whatever the
//! command printed to the caller's output before returning it.

use std::io::Write;
use std::process::Command;

use crate::types::{CommandOutput, XcodeError};

/// Runs shell command lines.
pub trait CommandRunner {
    /// Runs `command` to completion and returns its captured output.
    ///
    /// A non-zero exit is reported through [`CommandOutput::status`], not as
    /// an error. `Err` is reserved for failing to run the command at all.
    fn run(&self, command: &str) -> Result<CommandOutput, XcodeError>;

    /// Whether commands are only logged. Callers skip their own filesystem
    /// side effects when this is set.
    fn is_dry_run(&self) -> bool {
        false
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &str) -> Result<CommandOutput, XcodeError> {
        (**self).run(command)
    }

    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }
}

/// Runs command lines through `bash -o pipefail -c`.
///
/// `pipefail` makes a filtered build report the status of `xcodebuild`
/// rather than that of the filter.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    dry_run: bool,
}

impl ShellRunner {
    /// Creates a runner that executes commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs commands instead of running them; every command then succeeds
    /// with empty output.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<CommandOutput, XcodeError> {
        if self.dry_run {
            log::info!("[dry-run] {}", command);
            return Ok(CommandOutput::ok());
        }

        log::debug!("Running: {}", command);
        let output = Command::new("bash")
            .args(["-o", "pipefail", "-c"])
            .arg(command)
            .output()?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            log::debug!("Command exited with {:?}: {}", result.status, command);
        }
        Ok(result)
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Runs `command` and fails unless it exits successfully.
pub fn run_checked<R: CommandRunner>(
    runner: &R,
    command: &str,
) -> Result<CommandOutput, XcodeError> {
    let output = runner.run(command)?;
    if !output.success() {
        return Err(XcodeError::CommandFailed {
            command: command.to_string(),
            status: output.status,
        });
    }
    Ok(output)
}

/// Runs `command`; on failure writes its captured stdout and stderr to `out`
/// and returns [`XcodeError::CommandFailed`].
///
/// # Arguments
/// * `runner` - Runner executing the command
/// * `command` - Full shell command line
/// * `out` - Where the captured output of a failing command is written
pub fn run_reporting_failure<R: CommandRunner>(
    runner: &R,
    command: &str,
    out: &mut dyn Write,
) -> Result<CommandOutput, XcodeError> {
    let output = runner.run(command)?;
    if !output.success() {
        out.write_all(output.stdout.as_bytes())?;
        out.write_all(output.stderr.as_bytes())?;
        out.flush()?;
        return Err(XcodeError::CommandFailed {
            command: command.to_string(),
            status: output.status,
        });
    }
    Ok(output)
}

/// Wraps `value` in double quotes for the shell, escaping the characters that
/// stay special inside them.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
