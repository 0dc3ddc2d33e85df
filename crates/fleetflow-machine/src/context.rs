//! Common machine context
//!
//! The part of a machine's state that does not depend on the backend: its
//! name, the deployment it belongs to, the SSH settings copied from the
//! definition and the toplevel configuration last pushed to it.

use crate::definition::{CommonDefinition, DEFAULT_SSH_PORT, DEFAULT_SSH_USER};
use crate::error::Result;
use crate::store::ResourceRecord;
use std::path::{Path, PathBuf};

const ATTR_TOPLEVEL: &str = "toplevel";
const ATTR_PROVISION_SSH_KEY: &str = "provisionSshKey";
const ATTR_SSH_PORT: &str = "sshPort";
const ATTR_SSH_USER: &str = "sshUser";
const ATTR_SSH_PRIVATE_KEY_FILE: &str = "sshPrivateKeyFile";

/// Seconds ssh waits for a connection before giving up
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct MachineContext {
    name: String,
    deployment_id: String,
    provision_ssh_key: bool,
    ssh_port: u16,
    ssh_user: String,
    ssh_private_key_file: Option<PathBuf>,
    cur_toplevel: Option<String>,
}

impl MachineContext {
    pub fn new(name: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deployment_id: deployment_id.into(),
            provision_ssh_key: false,
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_private_key_file: None,
            cur_toplevel: None,
        }
    }

    /// Restore the context from a persisted record
    pub fn from_record(record: &ResourceRecord, deployment_id: impl Into<String>) -> Self {
        let mut ctx = Self::new(&record.name, deployment_id);
        ctx.cur_toplevel = record.get_attribute(ATTR_TOPLEVEL);
        ctx.provision_ssh_key = record
            .get_attribute(ATTR_PROVISION_SSH_KEY)
            .unwrap_or(false);
        ctx.ssh_port = record.get_attribute(ATTR_SSH_PORT).unwrap_or(DEFAULT_SSH_PORT);
        if let Some(user) = record.get_attribute(ATTR_SSH_USER) {
            ctx.ssh_user = user;
        }
        ctx.ssh_private_key_file = record.get_attribute(ATTR_SSH_PRIVATE_KEY_FILE);
        ctx
    }

    /// Write the context back into a record
    pub fn store_into(&self, record: &mut ResourceRecord) -> Result<()> {
        record.set_optional(ATTR_TOPLEVEL, self.cur_toplevel.as_ref())?;
        record.set_attribute(
            ATTR_PROVISION_SSH_KEY,
            serde_json::json!(self.provision_ssh_key),
        );
        record.set_attribute(ATTR_SSH_PORT, serde_json::json!(self.ssh_port));
        record.set_attribute(ATTR_SSH_USER, serde_json::json!(self.ssh_user));
        record.set_optional(ATTR_SSH_PRIVATE_KEY_FILE, self.ssh_private_key_file.as_ref())?;
        Ok(())
    }

    /// Bookkeeping shared by every backend's create
    pub fn set_common_state(&mut self, defn: &CommonDefinition) {
        self.provision_ssh_key = defn.provision_ssh_key;
        self.ssh_port = defn.ssh_port;
        self.ssh_user = defn.ssh_user.clone();
        self.ssh_private_key_file = defn.ssh_private_key_file.clone();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn provision_ssh_key(&self) -> bool {
        self.provision_ssh_key
    }

    pub fn ssh_port(&self) -> u16 {
        self.ssh_port
    }

    pub fn ssh_user(&self) -> &str {
        &self.ssh_user
    }

    /// Configured private key override
    pub fn ssh_private_key_file(&self) -> Option<&Path> {
        self.ssh_private_key_file.as_deref()
    }

    /// Toplevel configuration last pushed successfully
    pub fn cur_toplevel(&self) -> Option<&str> {
        self.cur_toplevel.as_deref()
    }

    pub fn set_cur_toplevel(&mut self, toplevel: impl Into<String>) {
        self.cur_toplevel = Some(toplevel.into());
    }

    /// `user@host` as passed to ssh
    pub fn ssh_target(&self, host: &str) -> String {
        format!("{}@{}", self.ssh_user, host)
    }

    /// Flags every backend passes to ssh
    pub fn base_ssh_flags(&self) -> Vec<String> {
        let mut flags = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", SSH_CONNECT_TIMEOUT_SECS),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if self.ssh_port != DEFAULT_SSH_PORT {
            flags.push("-p".to_string());
            flags.push(self.ssh_port.to_string());
        }
        flags
    }
}
