//! FleetFlow Machine Backends
//!
//! This crate provides the provider-independent half of FleetFlow's machine
//! management: every machine backend (cloud VM, container, or a host the
//! operator already runs) is driven through the same lifecycle and persists
//! its state through the same store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            reconciliation loop (caller)          │
//! │     create → check … → switch → destroy          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               fleetflow-machine                  │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   trait MachineBackend { ... }            │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────────────┐     │
//! │  │ Common Defn  │  │ State Store (.json)  │     │
//! │  └──────────────┘  └──────────────────────┘     │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │ KeyGenerator / ReachabilityProbe /        │   │
//! │  │ MachineChecker / ConfigurationPusher      │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼────────┐
//! │   existing     │
//! │   backend      │
//! └────────────────┘
//! ```

pub mod backend;
pub mod check;
pub mod collaborators;
pub mod context;
pub mod definition;
pub mod error;
pub mod store;

// Re-exports
pub use backend::{CreateOptions, MachineBackend, SwitchMethod};
pub use check::CheckResult;
pub use collaborators::{
    ConfigurationPusher, KeyGenerator, KeyPair, MachineChecker, ReachabilityProbe, SshAccess,
};
pub use context::MachineContext;
pub use definition::CommonDefinition;
pub use error::{MachineError, Result};
pub use store::{LockGuard, RecordStore, ResourceRecord, StateFile, StateManager};
