//! Machine backend trait definition

use crate::check::CheckResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Machine backend abstraction trait
///
/// Every kind of machine (cloud VM, container, existing host) implements this
/// trait so the reconciliation loop can drive them the same way. All
/// operations must be safe to re-run after the process restarts between any
/// two calls.
#[async_trait]
pub trait MachineBackend: Send {
    /// Declared definition the backend is created from
    type Definition: Send + Sync;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Backend type stored in the state file (e.g., "existing")
    fn backend_type(&self) -> &str;

    /// Logical machine name
    fn name(&self) -> &str;

    /// Provisioning marker; `None` until the first successful create
    fn vm_id(&self) -> Option<&str>;

    /// Bring the machine in line with its definition
    async fn create(
        &mut self,
        defn: &Self::Definition,
        options: CreateOptions,
    ) -> Result<(), Self::Error>;

    /// Observe the machine
    async fn check(&mut self) -> Result<CheckResult, Self::Error>;

    /// Tear the machine down. Returns whether the caller may forget the record.
    async fn destroy(&mut self, wipe: bool) -> Result<bool, Self::Error>;

    /// Activate a configuration, returning the activation exit code
    async fn switch_to_configuration(
        &mut self,
        method: SwitchMethod,
        sync: bool,
        command: Option<&str>,
    ) -> Result<i32, Self::Error>;

    /// Host name or address ssh connects to
    fn ssh_name(&self) -> Result<String, Self::Error>;

    /// Private key ssh should use, if any
    fn ssh_private_key_file(&mut self) -> Result<Option<PathBuf>, Self::Error>;

    /// Flags ssh should be invoked with
    fn ssh_flags(&mut self) -> Result<Vec<String>, Self::Error>;

    /// Configuration fragment the backend contributes to the machine's system
    fn physical_spec(&self) -> serde_json::Value;
}

/// Flags accepted by [`MachineBackend::create`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Verify the real resource against the recorded state
    pub check: bool,

    /// Permit rebooting the machine
    pub allow_reboot: bool,

    /// Permit replacing a machine that has disappeared
    pub allow_recreate: bool,
}

/// How a pushed configuration is activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchMethod {
    /// Activate now and make it the boot default
    Switch,
    /// Make it the boot default only
    Boot,
    /// Activate now without touching the boot default
    Test,
    /// Report what activation would do
    DryActivate,
}

impl std::fmt::Display for SwitchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchMethod::Switch => write!(f, "switch"),
            SwitchMethod::Boot => write!(f, "boot"),
            SwitchMethod::Test => write!(f, "test"),
            SwitchMethod::DryActivate => write!(f, "dry-activate"),
        }
    }
}
