//! Common machine definition
//!
//! Settings every backend understands, parsed from the children of a
//! `machine "<name>" { ... }` KDL node. Backends parse their own keys first and
//! hand everything else to [`CommonDefinition::apply_child`].

use crate::error::{MachineError, Result};
use kdl::KdlNode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_USER: &str = "root";

/// Backend-independent part of a machine definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonDefinition {
    /// Logical machine name (unique within a deployment)
    pub name: String,

    /// Generate a dedicated SSH keypair for this machine on first create
    pub provision_ssh_key: bool,

    pub ssh_port: u16,

    pub ssh_user: String,

    /// Private key file that overrides any generated key
    pub ssh_private_key_file: Option<PathBuf>,
}

impl CommonDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provision_ssh_key: false,
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_private_key_file: None,
        }
    }

    /// Read the machine name from the node's first argument
    pub fn from_node(node: &KdlNode) -> Result<Self> {
        let name = first_string(node).ok_or_else(|| {
            MachineError::InvalidConfig(format!("{} requires a name", node.name().value()))
        })?;
        Ok(Self::new(name))
    }

    /// Apply a child node if it is a common setting.
    ///
    /// Returns `false` when the key is not a common setting.
    pub fn apply_child(&mut self, child: &KdlNode) -> Result<bool> {
        match child.name().value() {
            "provision_ssh_key" | "provision-ssh-key" => {
                // A bare `provision-ssh-key` node means true
                self.provision_ssh_key = match child.entries().first() {
                    Some(entry) => entry.value().as_bool().ok_or_else(|| {
                        MachineError::InvalidConfig(format!(
                            "{}: provision-ssh-key must be a boolean",
                            self.name
                        ))
                    })?,
                    None => true,
                };
            }
            "ssh_port" | "ssh-port" => {
                let port = child
                    .entries()
                    .first()
                    .and_then(|e| e.value().as_integer())
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or_else(|| {
                        MachineError::InvalidConfig(format!(
                            "{}: ssh-port must be an integer between 0 and 65535",
                            self.name
                        ))
                    })?;
                self.ssh_port = port;
            }
            "ssh_user" | "ssh-user" => {
                if let Some(user) = first_string(child) {
                    self.ssh_user = user;
                }
            }
            "ssh_private_key_file" | "ssh-private-key-file" => {
                self.ssh_private_key_file = first_string(child).map(PathBuf::from);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// First argument of a node as a string
pub fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}
