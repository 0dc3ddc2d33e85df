//! `machine` node parsing
//!
//! ```kdl
//! machine "web-01" {
//!     backend "existing"
//!     target-host "web-01.example.net"
//!     public-ipv4 "203.0.113.7"
//!     provision-ssh-key #true
//! }
//! ```

use crate::error::{ExistingError, Result};
use crate::BACKEND_TYPE;
use fleetflow_machine::definition::first_string;
use fleetflow_machine::CommonDefinition;
use kdl::{KdlDocument, KdlNode};
use std::collections::HashSet;
use std::path::Path;

const MACHINE_NODE: &str = "machine";

/// Declared definition of a machine that already exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingMachineDefinition {
    pub common: CommonDefinition,

    /// Address used to reach the machine
    pub target_host: String,

    /// Informational public address, never used to connect
    pub public_ipv4: Option<String>,
}

impl ExistingMachineDefinition {
    pub fn new(name: impl Into<String>, target_host: impl Into<String>) -> Self {
        Self {
            common: CommonDefinition::new(name),
            target_host: target_host.into(),
            public_ipv4: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.common.name
    }
}

/// Parse a single `machine` node
pub fn parse_machine(node: &KdlNode) -> Result<ExistingMachineDefinition> {
    let mut common = CommonDefinition::from_node(node)?;
    let mut target_host = None;
    let mut public_ipv4 = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "backend" => {
                    let backend = first_string(child).unwrap_or_default();
                    if backend != BACKEND_TYPE {
                        return Err(ExistingError::InvalidConfig(format!(
                            "machine '{}' uses backend '{}', not '{}'",
                            common.name, backend, BACKEND_TYPE
                        )));
                    }
                }
                "target_host" | "target-host" => {
                    target_host = first_string(child);
                }
                "public_ipv4" | "public-ipv4" => {
                    public_ipv4 = first_string(child);
                }
                _ => {
                    if !common.apply_child(child)? {
                        tracing::warn!(
                            "machine '{}': ignoring unknown setting '{}'",
                            common.name,
                            child.name().value()
                        );
                    }
                }
            }
        }
    }

    let target_host = target_host
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ExistingError::MissingRequiredField {
            machine: common.name.clone(),
            field: "target-host",
        })?;

    Ok(ExistingMachineDefinition {
        common,
        target_host,
        public_ipv4,
    })
}

/// Backend a `machine` node declares; nodes without one are existing hosts
fn declared_backend(node: &KdlNode) -> String {
    node.children()
        .and_then(|children| children.get("backend"))
        .and_then(first_string)
        .unwrap_or_else(|| BACKEND_TYPE.to_string())
}

/// Parse every existing-host `machine` node of a deployment document
pub fn parse_deployment(content: &str) -> Result<Vec<ExistingMachineDefinition>> {
    let doc: KdlDocument = content.parse()?;

    let mut seen = HashSet::new();
    let mut machines = Vec::new();

    for node in doc.nodes() {
        if node.name().value() != MACHINE_NODE {
            continue;
        }
        if declared_backend(node) != BACKEND_TYPE {
            continue;
        }

        let defn = parse_machine(node)?;
        if !seen.insert(defn.name().to_string()) {
            return Err(ExistingError::InvalidConfig(format!(
                "machine '{}' is declared more than once",
                defn.name()
            )));
        }
        machines.push(defn);
    }

    tracing::debug!("Parsed {} existing machine(s)", machines.len());
    Ok(machines)
}

/// Read and parse a deployment file
pub async fn load_deployment(path: impl AsRef<Path>) -> Result<Vec<ExistingMachineDefinition>> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_deployment(&content)
}

/// Locate the project's deployment file and parse it
pub async fn discover_deployment() -> Result<Vec<ExistingMachineDefinition>> {
    let path = fleetflow_config::find_deployment_file()?;
    tracing::debug!("Using deployment file {}", path.display());
    load_deployment(path).await
}
