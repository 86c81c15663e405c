//! Utility functions

use tokio::process::Command;
use tracing::debug;

use crate::errors::EngineError;

/// Run a shell command line, capturing combined output.
///
/// Returns the exit status code and output; callers decide whether a
/// non-zero status is fatal.
pub async fn shell(command: &str) -> Result<(i32, String), EngineError> {
    debug!("SHELL: {}", command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(command.trim())
        .output()
        .await?;

    let status = output.status.code().unwrap_or(-1);
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((status, text))
}
