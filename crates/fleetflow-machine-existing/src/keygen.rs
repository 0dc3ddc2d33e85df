//! ssh-keygen wrapper
//!
//! Generates client keypairs by running `ssh-keygen` into a throwaway
//! directory and reading both halves back.

use async_trait::async_trait;
use fleetflow_machine::{KeyGenerator, KeyPair, MachineError};
use std::process::Stdio;
use tokio::process::Command;

const KEY_FILE: &str = "id_ed25519";

/// [`KeyGenerator`] backed by the `ssh-keygen` binary
#[derive(Debug, Clone)]
pub struct SshKeygen {
    program: String,
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::new()
    }
}

impl SshKeygen {
    pub fn new() -> Self {
        Self {
            program: "ssh-keygen".to_string(),
        }
    }

    /// Use a different ssh-keygen binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn create_key_pair(&self, comment: &str) -> fleetflow_machine::Result<KeyPair> {
        let dir = tempfile::Builder::new()
            .prefix("fleetflow-keygen-")
            .tempdir()?;
        let key_path = dir.path().join(KEY_FILE);

        tracing::debug!("Running: {} -t ed25519 -C {:?}", self.program, comment);

        let output = Command::new(&self.program)
            .args(["-q", "-t", "ed25519", "-N", "", "-C", comment, "-f"])
            .arg(&key_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MachineError::KeyGeneration(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MachineError::KeyGeneration(stderr.trim().to_string()));
        }

        let private_key = tokio::fs::read_to_string(&key_path).await?;
        let public_key = tokio::fs::read_to_string(key_path.with_extension("pub")).await?;

        Ok(KeyPair {
            private_key,
            public_key: public_key.trim().to_string(),
        })
    }
}
