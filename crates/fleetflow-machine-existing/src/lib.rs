//! Existing-machine backend for FleetFlow
//!
//! Manages hosts the operator already runs (bare metal, a VPS bought by hand,
//! a box under the desk). FleetFlow never creates or destroys them; it only
//! tracks whether a host has been registered, which credentials reach it and
//! when host-key checking may be relaxed.
//!
//! # Lifecycle
//!
//! - `create` mirrors the declared addresses and, the first time only,
//!   generates an SSH keypair (if requested) and assigns the provisioning
//!   marker `<deployment-id>-<name>`.
//! - `check` probes the SSH port and runs the generic check only when the host
//!   answers.
//! - `switch_to_configuration` delegates to the push pipeline and marks the
//!   public key deployed once an activation succeeds.
//! - `destroy` always succeeds and touches nothing.
//!
//! # Example
//!
//! ```ignore
//! use fleetflow_machine::{CreateOptions, MachineBackend, StateManager};
//! use fleetflow_machine_existing::{discover_deployment, Collaborators, ExistingMachine};
//!
//! let manager = StateManager::new(".");
//! for defn in discover_deployment().await? {
//!     let mut machine = ExistingMachine::open(&manager, defn.name(), collaborators.clone()).await?;
//!     machine.create(&defn, CreateOptions::default()).await?;
//!     let res = machine.check().await?;
//!     println!("{}: up={:?}", defn.name(), res.is_up);
//! }
//! ```

pub mod definition;
pub mod error;
pub mod keygen;
pub mod probe;
pub mod provider;
pub mod state;

/// Backend type recorded in the state file and accepted in `backend` nodes
pub const BACKEND_TYPE: &str = "existing";

pub use definition::{
    discover_deployment, load_deployment, parse_deployment, parse_machine,
    ExistingMachineDefinition,
};
pub use error::{ExistingError, Precondition, Result};
pub use keygen::SshKeygen;
pub use probe::TcpProbe;
pub use provider::{project_state, Collaborators, ExistingMachine};
pub use state::ExistingMachineState;
