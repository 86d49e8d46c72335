//! High-level gpg operations.
//!
//! [`Gpg`] ties the pieces together: every operation builds its gpg
//! arguments, runs them through an [`Invoker`], and classifies the result.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::agent::{resolve_home_dir, AgentHandle};
use crate::classify::{classify_decrypt, classify_encrypt, ensure_exit_success};
use crate::config::Config;
use crate::error::GpgError;
use crate::invoker::{Invoker, ProcessInvoker};
use crate::keys::{parse_secret_keys, SecretKey};

/// Entry point for decrypting, encrypting and inspecting a gpg installation.
///
/// Calls are independent of each other; the only shared state is the
/// read-only executable and agent settings fixed at setup.
#[derive(Debug)]
pub struct Gpg<I = ProcessInvoker> {
    invoker: I,
    agent: Option<AgentHandle>,
}

impl Gpg<ProcessInvoker> {
    /// Set up from configuration.
    ///
    /// Fails right away when the gpg executable cannot be found. The agent
    /// helper is only enabled when gpg's home directory can be determined;
    /// configured agent options are pushed to it here.
    #[instrument(skip(config))]
    pub async fn from_config(config: &Config) -> Result<Self, GpgError> {
        let executable = resolve_executable(config.gpg_path.as_deref())?;
        let install_dir = executable
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        info!(executable = %executable.display(), "Using gpg");

        let home_dir = match &config.gnupg_home {
            Some(home) => Some(home.clone()),
            None => resolve_home_dir(&install_dir, config.agent.probe_timeout()).await,
        };
        let agent = match home_dir {
            Some(home) => {
                debug!(home = %home.display(), "gpg home directory");
                Some(AgentHandle::new(
                    install_dir,
                    home,
                    config.agent.probe_timeout(),
                    config.agent.restart_unresponsive,
                ))
            }
            None => {
                warn!("Could not determine gpg home directory, agent handling disabled");
                None
            }
        };

        let invoker = ProcessInvoker::new(executable, config.gnupg_home.clone(), config.timeout());
        let gpg = Self::new(invoker, agent);

        if let Some(entries) = &config.agent.config {
            gpg.update_agent_config(entries).await?;
        }

        Ok(gpg)
    }
}

impl<I: Invoker> Gpg<I> {
    pub const fn new(invoker: I, agent: Option<AgentHandle>) -> Self {
        Self { invoker, agent }
    }

    pub const fn agent(&self) -> Option<&AgentHandle> {
        self.agent.as_ref()
    }

    async fn ensure_agent(&self) -> Result<(), GpgError> {
        match &self.agent {
            Some(agent) => agent.ensure_responsive().await,
            None => Ok(()),
        }
    }

    /// Decrypt a file and return its plaintext.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn decrypt(&self, path: &Path) -> Result<String, GpgError> {
        self.ensure_agent().await?;

        let args = [OsString::from("--decrypt"), path.into()];
        let result = self.invoker.invoke(&args, None).await?;
        classify_decrypt(&result)?;

        debug!(plaintext_len = result.stdout.len(), "Decrypted file");
        Ok(result.stdout)
    }

    /// Decrypt `source` into `destination`.
    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    pub async fn decrypt_to_file(&self, source: &Path, destination: &Path) -> Result<(), GpgError> {
        self.ensure_agent().await?;

        let mut args = output(destination);
        args.push("--decrypt".into());
        args.push(source.into());
        let result = self.invoker.invoke(&args, None).await?;
        classify_decrypt(&result)
    }

    /// Encrypt `data` for `recipients` and write it to `destination`.
    ///
    /// An existing file at `destination` is only replaced once gpg writes
    /// the new ciphertext; a failed run leaves it untouched.
    #[instrument(skip(self, data), fields(destination = %destination.display(), data_len = data.len()))]
    pub async fn encrypt(
        &self,
        data: &str,
        destination: &Path,
        recipients: &[String],
    ) -> Result<(), GpgError> {
        let mut args = output_and_recipients(destination, recipients);
        args.push("--encrypt".into());
        let result = self.invoker.invoke(&args, Some(data)).await?;
        classify_encrypt(&result)
    }

    /// Encrypt the file at `source` for `recipients` into `destination`.
    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    pub async fn encrypt_file(
        &self,
        source: &Path,
        destination: &Path,
        recipients: &[String],
    ) -> Result<(), GpgError> {
        let mut args = output_and_recipients(destination, recipients);
        args.push("--encrypt".into());
        args.push(source.into());
        let result = self.invoker.invoke(&args, None).await?;
        classify_encrypt(&result)
    }

    /// First line of `gpg --version`.
    pub async fn get_version(&self) -> Result<String, GpgError> {
        let result = self.invoker.invoke(&[OsString::from("--version")], None).await?;
        ensure_exit_success(&result)?;
        Ok(result.stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Secret keys known to gpg.
    pub async fn list_secret_keys(&self) -> Result<Vec<SecretKey>, GpgError> {
        self.ensure_agent().await?;

        let result = self
            .invoker
            .invoke(&[OsString::from("--list-secret-keys")], None)
            .await?;
        ensure_exit_success(&result)?;
        Ok(parse_secret_keys(&result.stdout))
    }

    /// Warm up gpg-agent by listing secret keys.
    ///
    /// Fails with [`GpgError::NoSecretKeys`] when there are none, since
    /// nothing could be decrypted with this installation.
    pub async fn start_agent(&self) -> Result<(), GpgError> {
        let keys = self.list_secret_keys().await?;
        if keys.is_empty() {
            return Err(GpgError::NoSecretKeys);
        }
        info!(secret_keys = keys.len(), "gpg-agent ready");
        Ok(())
    }

    /// Push options into gpg-agent.conf and reload the agent if they changed.
    ///
    /// Does nothing when no agent could be located at setup.
    pub async fn update_agent_config(&self, entries: &HashMap<String, String>) -> Result<(), GpgError> {
        let Some(agent) = &self.agent else {
            debug!("No agent configured, skipping configuration update");
            return Ok(());
        };
        if agent.update_config(entries)? {
            agent.reload().await;
        }
        Ok(())
    }
}

/// `--output` for `destination`, letting gpg replace an existing file.
fn output(destination: &Path) -> Vec<OsString> {
    vec![
        OsString::from("--yes"),
        OsString::from("--output"),
        destination.into(),
    ]
}

fn output_and_recipients(destination: &Path, recipients: &[String]) -> Vec<OsString> {
    let mut args = output(destination);
    for recipient in recipients {
        args.push("--recipient".into());
        args.push(recipient.into());
    }
    args
}

/// Use the configured executable, or find `gpg` on `PATH`.
pub fn resolve_executable(configured: Option<&Path>) -> Result<PathBuf, GpgError> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(GpgError::ExecutableNotFound {
            path: path.to_path_buf(),
        });
    }

    let name = format!("gpg{}", std::env::consts::EXE_SUFFIX);
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(&name))
                .find(|candidate| candidate.is_file())
        })
        .ok_or_else(|| GpgError::ExecutableNotFound { path: name.into() })
}
