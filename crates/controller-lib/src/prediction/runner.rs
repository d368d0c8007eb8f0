//! Out-of-process algorithm execution

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_INTERPRETER: &str = "python3";

/// Runs an algorithm selected by `identifier` with a textual payload
#[async_trait]
pub trait AlgorithmRunner: Send + Sync {
    async fn run_with_input(&self, identifier: &str, input: &str, timeout: Duration)
        -> Result<String>;
}

/// Runs `<interpreter> <identifier>`, feeding the payload on stdin and
/// returning stdout.
///
/// The child is killed when the timeout elapses or when the calling future
/// is dropped.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

#[async_trait]
impl AlgorithmRunner for ProcessRunner {
    async fn run_with_input(
        &self,
        identifier: &str,
        input: &str,
        timeout: Duration,
    ) -> Result<String> {
        let mut child = Command::new(&self.interpreter)
            .arg(identifier)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Invocation(format!(
                    "failed to start `{} {}`: {}",
                    self.interpreter, identifier, e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Invocation("algorithm stdin unavailable".to_string()))?;
        let payload = input.as_bytes().to_vec();

        let run = async move {
            // An algorithm may exit without reading its input
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != IoErrorKind::BrokenPipe {
                    return Err(e);
                }
            }
            drop(stdin);
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::Invocation(format!(
                    "error running algorithm {}: {}",
                    identifier, e
                )))
            }
            Err(_) => {
                return Err(Error::Invocation(format!(
                    "algorithm {} timed out after {}ms",
                    identifier,
                    timeout.as_millis()
                )))
            }
        };

        if !output.status.success() {
            return Err(Error::Invocation(format!(
                "algorithm {} exited with {}: {}",
                identifier,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(
            algorithm = %identifier,
            stdout_bytes = output.stdout.len(),
            "Algorithm completed"
        );

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant;
    use tempfile::NamedTempFile;

    fn script(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", body).unwrap();
        file.flush().unwrap();
        file
    }

    fn path(file: &NamedTempFile) -> String {
        file.path().to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_payload_reaches_stdin() {
        let algorithm = script("cat");
        let runner = ProcessRunner::new("sh");

        let output = runner
            .run_with_input(&path(&algorithm), r#"{"lookAhead":10}"#, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output, r#"{"lookAhead":10}"#);
    }

    #[tokio::test]
    async fn test_returns_stdout() {
        let algorithm = script("cat > /dev/null\nprintf '12.3'");
        let runner = ProcessRunner::new("sh");

        let output = runner
            .run_with_input(&path(&algorithm), "{}", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output, "12.3");
    }

    #[tokio::test]
    async fn test_algorithm_ignoring_stdin() {
        let algorithm = script("printf '3'");
        let runner = ProcessRunner::new("sh");

        let output = runner
            .run_with_input(&path(&algorithm), &"x".repeat(256 * 1024), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output, "3");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_invocation_error() {
        let algorithm = script("echo 'No standard input provided' >&2\nexit 1");
        let runner = ProcessRunner::new("sh");

        let err = runner
            .run_with_input(&path(&algorithm), "", Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(
            matches!(&err, Error::Invocation(msg) if msg.contains("No standard input provided")),
            "unexpected error: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let algorithm = script("sleep 10");
        let runner = ProcessRunner::new("sh");

        let start = Instant::now();
        let err = runner
            .run_with_input(&path(&algorithm), "{}", Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(&err, Error::Invocation(msg) if msg.contains("timed out")));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let runner = ProcessRunner::new("/nonexistent/interpreter");

        let err = runner
            .run_with_input("predict.py", "{}", Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Invocation(_)));
    }

    #[test]
    fn test_default_interpreter() {
        assert_eq!(ProcessRunner::default().interpreter(), DEFAULT_INTERPRETER);
    }
}
