//! Shell command execution for build metadata

use relcat_engine::CommandRunner;
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs commands through `sh -c` in the current directory
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Option<String> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() {
            debug!(command, status = ?output.status.code(), "Command failed");
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}
