//! gpg-agent liveness and configuration.
//!
//! Decryption and secret-key listings go through gpg-agent. A wedged agent
//! makes gpg hang until the invocation times out, so operations that depend
//! on it probe the agent first and restart it when it does not answer.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::error::GpgError;
use crate::invoker::run_command;

/// Name of the agent's configuration file inside the gpg home directory.
pub const AGENT_CONFIG_FILE: &str = "gpg-agent.conf";

/// Locates and signals the gpg-agent serving one gpg home directory.
///
/// This is not a handle to the agent process itself; it only carries what
/// is needed to reach it through gpg's helper tools.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    install_dir: PathBuf,
    home_dir: PathBuf,
    probe_timeout: Duration,
    restart_unresponsive: bool,
}

impl AgentHandle {
    pub const fn new(
        install_dir: PathBuf,
        home_dir: PathBuf,
        probe_timeout: Duration,
        restart_unresponsive: bool,
    ) -> Self {
        Self {
            install_dir,
            home_dir,
            probe_timeout,
            restart_unresponsive,
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.home_dir.join(AGENT_CONFIG_FILE)
    }

    fn tool(&self, name: &str) -> PathBuf {
        tool_path(&self.install_dir, name)
    }

    fn homedir_args(&self) -> Vec<OsString> {
        vec!["--homedir".into(), self.home_dir.clone().into_os_string()]
    }

    /// Make sure the agent answers before an operation that needs it.
    ///
    /// An unresponsive agent is not an error: it is restarted if configured
    /// to, and otherwise only logged. Fails only when `gpg-connect-agent`
    /// is missing from the install directory.
    #[instrument(skip(self), fields(home = %self.home_dir.display()))]
    pub async fn ensure_responsive(&self) -> Result<(), GpgError> {
        let connect = self.tool("gpg-connect-agent");
        if !connect.exists() {
            return Err(GpgError::AgentToolMissing { path: connect });
        }

        if self.probe(&connect).await {
            debug!("gpg-agent is responsive");
            return Ok(());
        }

        if self.restart_unresponsive {
            warn!("gpg-agent is not responding, restarting it");
            self.restart().await;
        } else {
            warn!("gpg-agent is not responding");
        }
        Ok(())
    }

    async fn probe(&self, connect: &Path) -> bool {
        let mut args = self.homedir_args();
        args.push("GETINFO version".into());
        args.push("/bye".into());

        match run_command(connect, &args, None, self.probe_timeout).await {
            Ok(output) if output.exit_code == 0 => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                stdout.lines().any(|line| line.starts_with("OK"))
            }
            Ok(output) => {
                debug!(exit_code = output.exit_code, "Agent probe failed");
                false
            }
            Err(e) => {
                debug!(error = %e, "Agent probe failed");
                false
            }
        }
    }

    async fn restart(&self) {
        self.gpgconf(&["--kill", "gpg-agent"]).await;
        self.gpgconf(&["--launch", "gpg-agent"]).await;
    }

    /// Ask the running agent to re-read its configuration.
    pub async fn reload(&self) {
        self.gpgconf(&["--reload", "gpg-agent"]).await;
    }

    /// Run gpgconf, logging rather than returning failures.
    async fn gpgconf(&self, command: &[&str]) {
        let mut args = self.homedir_args();
        args.extend(command.iter().map(OsString::from));

        match run_command(&self.tool("gpgconf"), &args, None, self.probe_timeout).await {
            Ok(output) if output.exit_code == 0 => debug!(?command, "gpgconf succeeded"),
            Ok(output) => warn!(
                ?command,
                exit_code = output.exit_code,
                stderr = %output.stderr_lines.join("\n"),
                "gpgconf failed"
            ),
            Err(e) => warn!(?command, error = %e, "Failed to run gpgconf"),
        }
    }

    /// Write `entries` into the agent's configuration file.
    ///
    /// Existing lines for the same options are replaced, other lines are
    /// kept as they are, and new options are appended in sorted order. An
    /// empty value writes the bare option name. Returns whether the file
    /// content changed; calling this again with the same entries is a no-op.
    pub fn update_config(&self, entries: &HashMap<String, String>) -> Result<bool, GpgError> {
        let path = self.config_path();
        let existing = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(GpgError::io(
                    format!("failed to read {}", path.display()),
                    e,
                ))
            }
        };

        let sorted: BTreeMap<&str, &str> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let updated = merge_config(&existing, &sorted);
        if updated == existing {
            debug!(path = %path.display(), "Agent configuration already up to date");
            return Ok(false);
        }

        std::fs::create_dir_all(&self.home_dir).map_err(|e| {
            GpgError::io(format!("failed to create {}", self.home_dir.display()), e)
        })?;
        std::fs::write(&path, updated)
            .map_err(|e| GpgError::io(format!("failed to write {}", path.display()), e))?;

        info!(path = %path.display(), options = entries.len(), "Updated agent configuration");
        Ok(true)
    }
}

fn tool_path(install_dir: &Path, name: &str) -> PathBuf {
    install_dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
}

fn config_line(key: &str, value: &str) -> String {
    if value.is_empty() {
        key.to_string()
    } else {
        format!("{key} {value}")
    }
}

/// Merge options into gpg-agent.conf content (`option [value]` per line).
fn merge_config(existing: &str, entries: &BTreeMap<&str, &str>) -> String {
    let mut written: Vec<&str> = Vec::new();
    let mut out = String::new();

    for line in existing.lines() {
        let trimmed = line.trim_start();
        let key = trimmed.split_whitespace().next().unwrap_or_default();
        if trimmed.starts_with('#') {
            out.push_str(line);
        } else if let Some((&key, &value)) = entries.get_key_value(key) {
            if written.contains(&key) {
                continue;
            }
            written.push(key);
            out.push_str(&config_line(key, value));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    for (key, value) in entries {
        if !written.contains(key) {
            out.push_str(&config_line(key, value));
            out.push('\n');
        }
    }

    out
}

/// Find the gpg home directory through `gpgconf --list-dirs homedir`.
///
/// Returns `None` (after logging) when gpgconf is unavailable or fails.
pub async fn resolve_home_dir(install_dir: &Path, timeout: Duration) -> Option<PathBuf> {
    let gpgconf = tool_path(install_dir, "gpgconf");
    let args: Vec<OsString> = vec!["--list-dirs".into(), "homedir".into()];

    match run_command(&gpgconf, &args, None, timeout).await {
        Ok(output) if output.exit_code == 0 => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let line = stdout.lines().next().map(str::trim).unwrap_or_default();
            if line.is_empty() {
                warn!("gpgconf reported an empty home directory");
                return None;
            }
            Some(PathBuf::from(percent_decode(line)))
        }
        Ok(output) => {
            warn!(exit_code = output.exit_code, "gpgconf could not list the home directory");
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to run gpgconf");
            None
        }
    }
}

/// gpgconf percent-escapes `%` and `:` in directory names.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(byte) = raw
                .get(i + 1..i + 3)
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
