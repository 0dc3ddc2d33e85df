//! Existing-machine backend implementation
//!
//! FleetFlow cannot create or destroy these hosts. "Creating" one records a
//! provisioning marker (and optionally a dedicated SSH keypair); destroying
//! one only lets the caller forget the record.

use crate::definition::ExistingMachineDefinition;
use crate::error::{ExistingError, Precondition, Result};
use crate::state::ExistingMachineState;
use crate::BACKEND_TYPE;
use async_trait::async_trait;
use fleetflow_machine::{
    CheckResult, ConfigurationPusher, CreateOptions, KeyGenerator, MachineBackend,
    MachineChecker, MachineContext, ReachabilityProbe, RecordStore, ResourceRecord, SshAccess,
    StateManager, SwitchMethod,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// The capabilities an [`ExistingMachine`] delegates to
#[derive(Clone)]
pub struct Collaborators {
    pub keygen: Arc<dyn KeyGenerator>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub checker: Arc<dyn MachineChecker>,
    pub pusher: Arc<dyn ConfigurationPusher>,
}

/// A host the operator already runs, managed by FleetFlow
pub struct ExistingMachine {
    ctx: MachineContext,
    state: ExistingMachineState,
    ctx_dirty: bool,
    record: ResourceRecord,
    store: RecordStore,
    collaborators: Collaborators,
    /// Holds materialized private keys; removed on drop
    key_dir: Option<TempDir>,
}

impl ExistingMachine {
    /// Load a machine's record from the state file, or start a fresh one
    pub async fn open(
        manager: &StateManager,
        name: &str,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let deployment_id = manager.deployment_id().await?;
        let store = manager.record(name, BACKEND_TYPE);
        let record = store.load().await?;

        tracing::debug!("Opened existing machine {}", name);

        Ok(Self {
            ctx: MachineContext::from_record(&record, deployment_id),
            state: ExistingMachineState::from_record(&record),
            ctx_dirty: false,
            record,
            store,
            collaborators,
            key_dir: None,
        })
    }

    pub fn context(&self) -> &MachineContext {
        &self.ctx
    }

    pub fn state(&self) -> &ExistingMachineState {
        &self.state
    }

    /// Persist pending changes
    pub async fn flush(&mut self) -> Result<()> {
        if !self.state.is_dirty() && !self.ctx_dirty {
            return Ok(());
        }

        let mut record = self.record.clone();
        self.ctx.store_into(&mut record)?;
        self.state.flush_into(&mut record)?;
        self.store.save(&record).await?;

        self.record = record;
        self.ctx_dirty = false;
        tracing::debug!("Flushed state of {}", self.ctx.name());
        Ok(())
    }

    fn ssh_access(&mut self) -> Result<SshAccess> {
        let host = self.ssh_name()?;
        Ok(SshAccess {
            target: self.ctx.ssh_target(&host),
            flags: self.ssh_flags()?,
        })
    }

    /// Write the generated private key where ssh can read it
    ///
    /// Blocking I/O: the ssh accessors of [`MachineBackend`] are synchronous.
    fn write_ssh_private_key(&mut self, key: &str) -> Result<PathBuf> {
        let dir = match self.key_dir.take() {
            Some(dir) => dir,
            None => tempfile::Builder::new().prefix("fleetflow-ssh-").tempdir()?,
        };
        let path = dir.path().join(format!("id-{}", self.ctx.name()));
        self.key_dir = Some(dir);

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(key.as_bytes())?;

        Ok(path)
    }
}

#[async_trait]
impl MachineBackend for ExistingMachine {
    type Definition = ExistingMachineDefinition;
    type Error = ExistingError;

    fn backend_type(&self) -> &str {
        BACKEND_TYPE
    }

    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn vm_id(&self) -> Option<&str> {
        self.state.vm_id()
    }

    async fn create(
        &mut self,
        defn: &ExistingMachineDefinition,
        _options: CreateOptions,
    ) -> Result<()> {
        if defn.name() != self.ctx.name() {
            return Err(ExistingError::InvalidConfig(format!(
                "definition for '{}' applied to machine '{}'",
                defn.name(),
                self.ctx.name()
            )));
        }

        self.ctx.set_common_state(&defn.common);
        self.ctx_dirty = true;
        self.state.set_addresses(&defn.target_host, defn.public_ipv4.as_deref());

        if self.state.vm_id().is_none() {
            if self.ctx.provision_ssh_key() && !self.state.has_key_pair() {
                tracing::info!("Generating new SSH key pair for {}", self.ctx.name());
                let comment = format!("FleetFlow client key for {}", self.ctx.name());
                let key_pair = self.collaborators.keygen.create_key_pair(&comment).await?;
                self.state.set_key_pair(key_pair);
                // The pair must survive a crash before the marker is assigned
                self.flush().await?;
            }

            let vm_id = format!("{}-{}", self.ctx.deployment_id(), self.ctx.name());
            self.state.assign_vm_id(vm_id.clone());
            tracing::info!("Registered existing machine {} as {}", self.ctx.name(), vm_id);
        }

        self.flush().await
    }

    async fn check(&mut self) -> Result<CheckResult> {
        let mut res = CheckResult::new();

        if self.state.vm_id().is_none() {
            res.exists = Some(false);
            return Ok(res);
        }
        res.exists = Some(true);

        let Some(host) = self.state.target_host().map(str::to_string) else {
            tracing::warn!("{} is registered without a target host", self.ctx.name());
            res.is_up = Some(false);
            res.add_message("no target host recorded; run create to refresh it");
            return Ok(res);
        };
        let is_up = self
            .collaborators
            .probe
            .ping(&host, self.ctx.ssh_port())
            .await;
        res.is_up = Some(is_up);

        if is_up {
            let access = self.ssh_access()?;
            self.collaborators
                .checker
                .check(&self.ctx, &access, &mut res)
                .await?;
        } else {
            tracing::info!("{} ({}) is not reachable", self.ctx.name(), host);
        }

        Ok(res)
    }

    async fn destroy(&mut self, wipe: bool) -> Result<bool> {
        tracing::info!(
            "Forgetting existing machine {} (wipe={}); the host itself is left untouched",
            self.ctx.name(),
            wipe
        );
        Ok(true)
    }

    async fn switch_to_configuration(
        &mut self,
        method: SwitchMethod,
        sync: bool,
        command: Option<&str>,
    ) -> Result<i32> {
        let access = self.ssh_access()?;
        let code = self
            .collaborators
            .pusher
            .switch_to_configuration(&mut self.ctx, &access, method, sync, command)
            .await?;

        if code != 0 {
            tracing::warn!(
                "Activation ({}) on {} exited with {}",
                method,
                self.ctx.name(),
                code
            );
            return Ok(code);
        }

        self.ctx_dirty = true;
        if self.state.mark_public_key_deployed() {
            tracing::debug!("Public key of {} is deployed", self.ctx.name());
        }
        self.flush().await?;
        Ok(code)
    }

    fn ssh_name(&self) -> Result<String> {
        self.state
            .target_host()
            .map(str::to_string)
            .ok_or_else(|| ExistingError::PreconditionFailed {
                machine: self.ctx.name().to_string(),
                precondition: Precondition::TargetHostUnset,
            })
    }

    fn ssh_private_key_file(&mut self) -> Result<Option<PathBuf>> {
        if let Some(path) = self.ctx.ssh_private_key_file() {
            return Ok(Some(path.to_path_buf()));
        }

        match self.state.ssh_private_key().map(str::to_string) {
            Some(key) => self.write_ssh_private_key(&key).map(Some),
            None => Ok(None),
        }
    }

    fn ssh_flags(&mut self) -> Result<Vec<String>> {
        let mut flags = self.ctx.base_ssh_flags();

        // Host keys are only trusted on first use once our own key is in place
        if self.state.vm_id().is_some()
            && self.ctx.cur_toplevel().is_some()
            && self.state.ssh_public_key_deployed()
        {
            flags.push("-o".to_string());
            flags.push("StrictHostKeyChecking=accept-new".to_string());

            if let Some(key_file) = self.ssh_private_key_file()? {
                flags.push("-i".to_string());
                flags.push(key_file.display().to_string());
            }
        }

        Ok(flags)
    }

    fn physical_spec(&self) -> serde_json::Value {
        match self.state.ssh_public_key() {
            Some(public_key) => serde_json::json!({
                "config": {
                    "users": {
                        "extraUsers": {
                            "root": {
                                "openssh": {
                                    "authorizedKeys": {
                                        "keys": [public_key]
                                    }
                                }
                            }
                        }
                    }
                }
            }),
            None => serde_json::json!({}),
        }
    }
}

/// State manager for the current project (`FLEET_STATE_DIR` or the working directory)
pub fn project_state() -> Result<StateManager> {
    Ok(StateManager::new(fleetflow_config::state_root()?))
}
