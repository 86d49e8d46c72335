//! Child-process invoker.
//!
//! Spawns gpg (or one of its helper tools) with piped streams, feeds stdin,
//! and drains stdout and stderr concurrently so that neither pipe can fill
//! up while we wait on the other.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{InvocationResult, Invoker, BASE_ARGS};
use crate::error::GpgError;

/// Raw output of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    /// Error-stream lines with their line endings removed.
    pub stderr_lines: Vec<String>,
}

/// Run `program` to completion, or kill it once `timeout` has elapsed.
///
/// Stdin is only opened when `input` is given; it is closed right after the
/// input is written.
#[instrument(skip_all, fields(program = %program.display(), timeout = ?timeout))]
pub async fn run_command(
    program: &Path,
    args: &[OsString],
    input: Option<&str>,
    timeout: Duration,
) -> Result<CommandOutput, GpgError> {
    let program_name = program.display().to_string();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| GpgError::Spawn {
        program: program_name.clone(),
        source,
    })?;

    let stdin = child.stdin.take();
    let mut child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| missing_pipe("stdout"))?;
    let child_stderr = child
        .stderr
        .take()
        .ok_or_else(|| missing_pipe("stderr"))?;

    let feed = async move {
        let (Some(mut stdin), Some(input)) = (stdin, input) else {
            return Ok(());
        };
        debug!(input_len = input.len(), "Writing input to stdin");
        match write_and_close(&mut stdin, input).await {
            // The child may exit without reading its input; its exit status
            // and status lines tell the real story.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("Child closed stdin before reading all input");
                Ok(())
            }
            other => other,
        }
    };

    let read_stdout = async move {
        let mut buf = Vec::new();
        child_stdout.read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    };

    let read_stderr = async move {
        let mut reader = BufReader::new(child_stderr);
        let mut lines = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok::<_, std::io::Error>(lines)
    };

    // `child` is only borrowed by this future, so it can still be killed
    // once the deadline passes.
    let run = async {
        let (fed, stdout, stderr_lines) = tokio::join!(feed, read_stdout, read_stderr);
        fed.map_err(|e| GpgError::io("failed to write to stdin", e))?;
        let stdout = stdout.map_err(|e| GpgError::io("failed to read stdout", e))?;
        let stderr_lines = stderr_lines.map_err(|e| GpgError::io("failed to read stderr", e))?;
        let status = child
            .wait()
            .await
            .map_err(|e| GpgError::io("failed to wait for process", e))?;
        Ok::<_, GpgError>((status, stdout, stderr_lines))
    };

    let outcome = tokio::time::timeout(timeout, run).await;
    let Ok(finished) = outcome else {
        warn!(?timeout, "Process timed out, killing it");
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill timed out process");
        }
        return Err(GpgError::Timeout {
            program: program_name,
            timeout,
        });
    };
    let (status, stdout, stderr_lines) = finished?;

    let output = CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr_lines,
    };

    debug!(
        exit_code = output.exit_code,
        stdout_len = output.stdout.len(),
        stderr_lines = output.stderr_lines.len(),
        "Process finished"
    );

    Ok(output)
}

async fn write_and_close<W>(stdin: &mut W, input: &str) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    stdin.write_all(input.as_bytes()).await?;
    stdin.flush().await?;
    stdin.shutdown().await
}

fn missing_pipe(name: &str) -> GpgError {
    GpgError::io(
        format!("failed to open {name}"),
        std::io::Error::new(ErrorKind::BrokenPipe, "pipe was not captured"),
    )
}

/// Invoker that spawns the real gpg executable.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    executable: PathBuf,
    home_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessInvoker {
    pub const fn new(executable: PathBuf, home_dir: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable,
            home_dir,
            timeout,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Full argument list: base flags, `--homedir` if overridden, then `args`.
    pub fn command_line(&self, args: &[OsString]) -> Vec<OsString> {
        let mut full: Vec<OsString> = BASE_ARGS.iter().map(OsString::from).collect();
        if let Some(home) = &self.home_dir {
            full.push("--homedir".into());
            full.push(home.clone().into_os_string());
        }
        full.extend(args.iter().cloned());
        full
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    #[instrument(skip_all, fields(exec = %self.executable.display()))]
    async fn invoke(
        &self,
        args: &[OsString],
        input: Option<&str>,
    ) -> Result<InvocationResult, GpgError> {
        debug!(?args, "Invoking gpg");

        let output = run_command(&self.executable, &self.command_line(args), input, self.timeout).await?;

        let result = InvocationResult::from_output(
            output.exit_code,
            String::from_utf8_lossy(&output.stdout).into_owned(),
            output.stderr_lines,
        );

        debug!(
            exit_code = result.exit_code,
            status_messages = result.status_messages.len(),
            "gpg finished"
        );

        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    use serial_test::serial;

    use super::*;
    use crate::status::StatusCode;

    /// Write an executable shell script standing in for gpg.
    fn fake_gpg(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("gpg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn invoker(exec: PathBuf, home: Option<PathBuf>) -> ProcessInvoker {
        ProcessInvoker::new(exec, home, Duration::from_secs(10))
    }

    #[test]
    fn test_command_line_orders_flags() {
        let inv = invoker("/usr/bin/gpg".into(), Some("/home/u/.gnupg".into()));
        let line = inv.command_line(&["--decrypt".into(), "/a b/c.gpg".into()]);
        let line: Vec<_> = line.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            line,
            [
                "--batch",
                "--no-tty",
                "--with-colons",
                "--status-fd",
                "2",
                "--exit-on-status-write-error",
                "--homedir",
                "/home/u/.gnupg",
                "--decrypt",
                "/a b/c.gpg",
            ]
        );
    }

    #[test]
    fn test_command_line_without_home() {
        let inv = invoker("/usr/bin/gpg".into(), None);
        let line = inv.command_line(&["--version".into()]);
        assert_eq!(line.len(), BASE_ARGS.len() + 1);
        assert!(!line.iter().any(|a| a == "--homedir"));
    }

    #[tokio::test]
    #[serial]
    async fn test_collects_partitioned_output() {
        let dir = tempfile::tempdir().unwrap();
        let exec = fake_gpg(
            dir.path(),
            r#"echo "gpg: encrypted with rsa4096 key" >&2
echo "[GNUPG:] NO_SECKEY 0xAABBCC" >&2
printf 'gpg: windows line\r\n' >&2
echo "[GNUPG:] DECRYPTION_FAILED" >&2
printf 'plain\ntext\n'
exit 2"#,
        );

        let result = invoker(exec, None).invoke(&[], None).await.unwrap();

        assert_eq!(result.exit_code, 2);
        assert_eq!(result.stdout, "plain\ntext\n");
        assert_eq!(
            result.stderr_lines,
            ["gpg: encrypted with rsa4096 key", "gpg: windows line"]
        );
        assert_eq!(result.status_messages.len(), 2);
        assert_eq!(result.status_messages[0].code, StatusCode::NoSeckey);
        assert_eq!(result.status_messages[0].payload.as_deref(), Some("0xAABBCC"));
        assert_eq!(result.status_messages[1].code, StatusCode::DecryptionFailed);
    }

    #[tokio::test]
    #[serial]
    async fn test_passes_arguments_unquoted() {
        let dir = tempfile::tempdir().unwrap();
        let exec = fake_gpg(dir.path(), r#"for a in "$@"; do echo "$a"; done"#);

        let result = invoker(exec, Some("/tmp/gnupg home".into()))
            .invoke(&["--decrypt".into(), "/tmp/my passwords/site.gpg".into()], None)
            .await
            .unwrap();

        let lines: Vec<_> = result.stdout.lines().collect();
        assert_eq!(&lines[..BASE_ARGS.len()], BASE_ARGS);
        assert_eq!(
            &lines[BASE_ARGS.len()..],
            [
                "--homedir",
                "/tmp/gnupg home",
                "--decrypt",
                "/tmp/my passwords/site.gpg"
            ]
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_feeds_input_and_closes_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let exec = fake_gpg(dir.path(), "cat");

        let result = invoker(exec, None)
            .invoke(&[], Some("hunter2\nusername: me\n"))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hunter2\nusername: me\n");
    }

    #[tokio::test]
    #[serial]
    async fn test_ignores_unread_input() {
        let dir = tempfile::tempdir().unwrap();
        let exec = fake_gpg(dir.path(), "echo '[GNUPG:] FAILURE encrypt 1' >&2\nexit 2");

        let input = "x".repeat(1 << 20);
        let result = invoker(exec, None).invoke(&[], Some(&input)).await.unwrap();

        assert_eq!(result.exit_code, 2);
        assert!(result.has_status(&StatusCode::Failure));
    }

    #[tokio::test]
    #[serial]
    async fn test_drains_large_output_on_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let exec = fake_gpg(
            dir.path(),
            r#"head -c 300000 /dev/zero | tr '\0' 'a'
i=0
while [ $i -lt 3000 ]; do
  echo "gpg: diagnostic line $i padded out to fill up the pipe buffer" >&2
  i=$((i+1))
done
echo "[GNUPG:] SUCCESS" >&2"#,
        );

        let result = invoker(exec, None).invoke(&[], None).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.len(), 300_000);
        assert_eq!(result.stderr_lines.len(), 3000);
        assert!(result.has_status(&StatusCode::Success));
    }

    #[tokio::test]
    #[serial]
    async fn test_kills_process_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let exec = fake_gpg(dir.path(), "exec sleep 30");

        let start = Instant::now();
        let err = ProcessInvoker::new(exec, None, Duration::from_millis(300))
            .invoke(&[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, GpgError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    #[serial]
    async fn test_spawn_failure_is_reported() {
        let err = invoker("/nonexistent/bin/gpg".into(), None)
            .invoke(&[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, GpgError::Spawn { .. }));
    }
}
