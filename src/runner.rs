//! Command execution against the target identity
//!
//! A non-zero exit is returned as data, never as an Err; callers decide what
//! counts as failure. When the process is elevated and the target differs from
//! the invoking identity, the child drops to the target's uid/gid with the
//! target's HOME/USER/LOGNAME and working directory established first.

use anyhow::{Context, Result, bail};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::context::ExecutionContext;
use crate::error::SetupError;
use crate::target::TargetIdentity;

/// Captured result of one command invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; None when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// One-line failure detail for logs and results
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            match self.code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            stderr.lines().last().unwrap_or(stderr).to_string()
        }
    }
}

/// Run a command as the target identity, capturing output.
///
/// Fails with `PermissionDenied` if the identities differ and the process is
/// not elevated; escalation is not something this tool can acquire on its own.
pub fn run_as(
    ctx: &ExecutionContext,
    target: &TargetIdentity,
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());

    let same_identity = ctx.invoking_user == target.user;

    if same_identity {
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
    } else if ctx.elevated {
        // Drop to the target identity with its environment established
        cmd.uid(target.uid)
            .gid(target.gid)
            .env("HOME", &target.home)
            .env("USER", &target.user)
            .env("LOGNAME", &target.user)
            .current_dir(cwd.unwrap_or(&target.home));
    } else {
        bail!(SetupError::PermissionDenied(format!(
            "cannot run as {} without elevation",
            target.user
        )));
    }

    log::debug!("run: {program} {args:?} (as {})", target.user);

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute: {program} {}", args.join(" ")))?;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Run a command as the target and treat non-zero exit as an error
pub fn run_as_checked(
    ctx: &ExecutionContext,
    target: &TargetIdentity,
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<CommandOutput> {
    let output = run_as(ctx, target, program, args, cwd)?;
    if !output.success() {
        bail!("{program} failed: {}", output.detail());
    }
    Ok(output)
}

/// Check if a command exists on PATH
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
