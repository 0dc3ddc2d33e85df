//! Persisted state of an existing machine
//!
//! A typed view over the machine's attribute record. Setters mark the state
//! dirty; nothing reaches the state file until it is flushed.

use crate::error::Result;
use fleetflow_machine::{KeyPair, ResourceRecord};

const ATTR_VM_ID: &str = "vmId";
const ATTR_TARGET_HOST: &str = "targetHost";
const ATTR_PUBLIC_IPV4: &str = "publicIpv4";
const ATTR_SSH_PRIVATE_KEY: &str = "existing.sshPrivateKey";
const ATTR_SSH_PUBLIC_KEY: &str = "existing.sshPublicKey";
const ATTR_SSH_PUBLIC_KEY_DEPLOYED: &str = "existing.sshPublicKeyDeployed";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingMachineState {
    vm_id: Option<String>,
    target_host: Option<String>,
    public_ipv4: Option<String>,
    key_pair: Option<KeyPair>,
    ssh_public_key_deployed: bool,
    dirty: bool,
}

impl ExistingMachineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project a persisted record into the typed state
    pub fn from_record(record: &ResourceRecord) -> Self {
        let vm_id = record
            .get_attribute::<String>(ATTR_VM_ID)
            .filter(|id| !id.is_empty());

        let private_key: Option<String> = record.get_attribute(ATTR_SSH_PRIVATE_KEY);
        let public_key: Option<String> = record.get_attribute(ATTR_SSH_PUBLIC_KEY);
        let key_pair = match (private_key, public_key) {
            (Some(private_key), Some(public_key)) => Some(KeyPair {
                private_key,
                public_key,
            }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "Record {} holds only half of an SSH keypair, discarding it",
                    record.name
                );
                None
            }
        };

        let ssh_public_key_deployed = key_pair.is_some()
            && record
                .get_attribute(ATTR_SSH_PUBLIC_KEY_DEPLOYED)
                .unwrap_or(false);

        Self {
            vm_id,
            target_host: record.get_attribute(ATTR_TARGET_HOST),
            public_ipv4: record.get_attribute(ATTR_PUBLIC_IPV4),
            key_pair,
            ssh_public_key_deployed,
            dirty: false,
        }
    }

    /// Write the state into a record and clear the dirty flag
    pub fn flush_into(&mut self, record: &mut ResourceRecord) -> Result<()> {
        record.set_optional(ATTR_VM_ID, self.vm_id.as_ref())?;
        record.set_optional(ATTR_TARGET_HOST, self.target_host.as_ref())?;
        record.set_optional(ATTR_PUBLIC_IPV4, self.public_ipv4.as_ref())?;
        record.set_optional(
            ATTR_SSH_PRIVATE_KEY,
            self.key_pair.as_ref().map(|k| &k.private_key),
        )?;
        record.set_optional(
            ATTR_SSH_PUBLIC_KEY,
            self.key_pair.as_ref().map(|k| &k.public_key),
        )?;
        record.set_attribute(
            ATTR_SSH_PUBLIC_KEY_DEPLOYED,
            serde_json::json!(self.ssh_public_key_deployed),
        );
        self.dirty = false;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn vm_id(&self) -> Option<&str> {
        self.vm_id.as_deref()
    }

    pub fn target_host(&self) -> Option<&str> {
        self.target_host.as_deref()
    }

    pub fn public_ipv4(&self) -> Option<&str> {
        self.public_ipv4.as_deref()
    }

    pub fn ssh_private_key(&self) -> Option<&str> {
        self.key_pair.as_ref().map(|k| k.private_key.as_str())
    }

    pub fn ssh_public_key(&self) -> Option<&str> {
        self.key_pair.as_ref().map(|k| k.public_key.as_str())
    }

    pub fn has_key_pair(&self) -> bool {
        self.key_pair.is_some()
    }

    pub fn ssh_public_key_deployed(&self) -> bool {
        self.ssh_public_key_deployed
    }

    /// Mirror the declared addresses
    pub fn set_addresses(&mut self, target_host: &str, public_ipv4: Option<&str>) {
        if self.target_host.as_deref() != Some(target_host) {
            self.target_host = Some(target_host.to_string());
            self.dirty = true;
        }
        if self.public_ipv4.as_deref() != public_ipv4 {
            self.public_ipv4 = public_ipv4.map(str::to_string);
            self.dirty = true;
        }
    }

    pub fn set_key_pair(&mut self, key_pair: KeyPair) {
        self.key_pair = Some(key_pair);
        self.ssh_public_key_deployed = false;
        self.dirty = true;
    }

    /// Assign the provisioning marker. An existing marker is never replaced.
    pub fn assign_vm_id(&mut self, vm_id: impl Into<String>) -> bool {
        if self.vm_id.is_some() {
            return false;
        }
        self.vm_id = Some(vm_id.into());
        self.dirty = true;
        true
    }

    /// Record that a configuration carrying the public key was activated.
    ///
    /// Returns `false` (and changes nothing) when no public key is stored.
    pub fn mark_public_key_deployed(&mut self) -> bool {
        if self.key_pair.is_none() {
            return false;
        }
        if !self.ssh_public_key_deployed {
            self.ssh_public_key_deployed = true;
            self.dirty = true;
        }
        true
    }
}
