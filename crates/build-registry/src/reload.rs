//! Post-deployment reload notification

use anyhow::{Context, Result};
use std::process::Command;

/// Notifies an external process (e.g. a reverse proxy) that the active
/// build changed. Failures are reported to the caller, which only logs them.
pub trait ReloadHook: Send + Sync {
    fn reload(&self) -> Result<()>;
}

/// Does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReloadHook;

impl ReloadHook for NoopReloadHook {
    fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs a command line such as `nginx -s reload`
#[derive(Debug, Clone)]
pub struct CommandReloadHook {
    program: String,
    args: Vec<String>,
}

impl CommandReloadHook {
    /// Parse a whitespace-separated command line. Returns `None` when empty.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;

        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ReloadHook for CommandReloadHook {
    fn reload(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("Failed to execute {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        Ok(())
    }
}
