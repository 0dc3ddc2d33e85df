//! Result of a machine check

use serde::{Deserialize, Serialize};

/// Observed reality of a machine, filled in by a backend's check and the
/// generic [`MachineChecker`](crate::MachineChecker).
///
/// `None` means "not determined", which is different from a negative answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the backend considers the machine provisioned
    pub exists: Option<bool>,

    /// Whether the machine answered the reachability probe
    pub is_up: Option<bool>,

    /// Whether the running configuration matches the last pushed toplevel
    pub configuration_converged: Option<bool>,

    /// Units reported as failed by the generic check
    pub failed_units: Vec<String>,

    /// Free-form notes for the operator
    pub messages: Vec<String>,
}

impl CheckResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// True when the machine exists, is up and nothing was reported broken
    pub fn is_healthy(&self) -> bool {
        self.exists == Some(true)
            && self.is_up == Some(true)
            && self.configuration_converged != Some(false)
            && self.failed_units.is_empty()
    }
}
