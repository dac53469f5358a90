use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::InvocationError;

/// Configuration for a Claude CLI invocation.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// stderr fragments that mean the request itself is bad.
const PERMANENT_MARKERS: [&str; 5] = [
    "invalid model",
    "model not found",
    "not_found_error",
    "invalid_request_error",
    "authentication",
];

/// Classify a failed CLI exit from its stderr.
fn classify_failure(status: &str, stderr: &str) -> InvocationError {
    let message = format!("claude exited {status}: {}", stderr.trim());
    let lowered = stderr.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        InvocationError::Permanent(message)
    } else {
        InvocationError::Transient(message)
    }
}

/// Invoke `claude -p` with a system prompt. The user prompt goes over stdin,
/// since run contexts easily outgrow an argv entry. Returns the raw stdout.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, InvocationError> {
    debug!(model = %config.model, prompt_bytes = user_prompt.len(), "Invoking claude CLI");

    let mut command = Command::new("claude");
    command.args([
        "-p",
        "--system-prompt",
        system_prompt,
        "--model",
        config.model.as_str(),
        "--output-format",
        "text",
    ]);
    let result = pipe_through(command, user_prompt, config.timeout).await?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        warn!(status = %result.status, stderr = %stderr, "Claude CLI failed");
        return Err(classify_failure(&result.status.to_string(), &stderr));
    }

    let stdout = String::from_utf8_lossy(&result.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(InvocationError::Permanent(
            "Claude returned empty response".to_string(),
        ));
    }
    Ok(stdout)
}

/// Run `command` with `input` on stdin, collecting its output.
///
/// stdin is fed while stdout and stderr are drained, so a child that writes
/// before it has read all of its input cannot fill the pipes and stall.
async fn pipe_through(
    mut command: Command,
    input: &str,
    timeout: Duration,
) -> Result<Output, InvocationError> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| InvocationError::Permanent(format!("Failed to spawn claude: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| InvocationError::Permanent("claude stdin unavailable".to_string()))?;

    let feed = async move {
        let written = stdin.write_all(input.as_bytes()).await;
        // Closing stdin tells the CLI the prompt is complete.
        drop(stdin);
        written
    };

    let (written, output) = tokio::time::timeout(timeout, async {
        tokio::join!(feed, child.wait_with_output())
    })
    .await
    .map_err(|_| InvocationError::Timeout(timeout))?;

    let output =
        output.map_err(|e| InvocationError::Transient(format!("claude I/O failed: {e}")))?;
    // A child that exits early closes its stdin; its exit status says more
    // than the broken pipe.
    if let Err(e) = written {
        if output.status.success() {
            return Err(InvocationError::Transient(format!(
                "claude closed stdin early: {e}"
            )));
        }
        debug!(error = %e, "claude stopped reading its prompt");
    }
    Ok(output)
}

/// Check if the `claude` CLI is available on the system.
pub async fn check_cli_available() -> bool {
    match Command::new("claude").arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClaudeCliConfig::default();
        assert_eq!(config.model, "claude-3-5-haiku-latest");
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn rate_limits_are_transient() {
        let err = classify_failure("exit status: 1", "Error: rate limit exceeded, retry later\n");
        assert!(err.is_transient());
        assert_eq!(
            err,
            InvocationError::Transient(
                "claude exited exit status: 1: Error: rate limit exceeded, retry later".to_string()
            )
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chatty_child_does_not_stall_on_a_large_prompt() {
        let mut command = Command::new("sh");
        command.args(["-c", "head -c 262144 /dev/zero; cat > /dev/null; echo done >&2"]);
        let prompt = "x".repeat(262_144);

        let output = pipe_through(command, &prompt, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.len(), 262_144);
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_exit_status_wins_over_a_broken_pipe() {
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        let prompt = "x".repeat(262_144);

        let output = pipe_through(command, &prompt, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!output.status.success());
    }

    #[test]
    fn bad_requests_are_permanent() {
        let err = classify_failure("exit status: 1", "API Error: Invalid model: gpt-9");
        assert!(!err.is_transient());
        let err = classify_failure("exit status: 1", "{\"type\":\"authentication_error\"}");
        assert!(matches!(err, InvocationError::Permanent(_)));
    }
}
