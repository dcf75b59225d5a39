//! Child process helper shared by the command-line adapters.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use sigil_core::error::{AppError, ErrorKind};
use sigil_core::result::AppResult;

/// Run `program` to completion and capture its output.
///
/// The child is killed if `timeout` elapses or the returned future is
/// dropped. A non-zero exit is not an error here; callers inspect
/// `status`.
pub async fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> AppResult<Output> {
    debug!(program = %program, args = ?args, "Spawning process");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let spawn_failed = |e: std::io::Error| {
        AppError::with_source(
            ErrorKind::ExternalService,
            format!("Failed to run '{program}': {e}"),
            e,
        )
    };

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
            Ok(result) => result.map_err(spawn_failed),
            Err(_) => Err(AppError::timeout(format!(
                "'{program}' did not finish within {}s",
                limit.as_secs()
            ))),
        },
        None => cmd.output().await.map_err(spawn_failed),
    }
}

/// First `limit` characters of a process stream, for logs.
pub fn excerpt(bytes: &[u8], limit: usize) -> String {
    String::from_utf8_lossy(bytes).chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates() {
        assert_eq!(excerpt(b"hello world", 5), "hello");
        assert_eq!(excerpt(b"", 5), "");
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let err = run("sigil-bot-no-such-program", &[], None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExternalService);
    }
}
