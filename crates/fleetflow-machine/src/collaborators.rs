//! Capabilities a backend delegates to
//!
//! Key generation, reachability probing, the generic machine check and the
//! configuration push pipeline live outside the backends. Backends hold them
//! as trait objects and compose their results.

use crate::backend::SwitchMethod;
use crate::check::CheckResult;
use crate::context::MachineContext;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// A generated SSH keypair in OpenSSH text format
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// How to reach a machine over ssh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshAccess {
    /// `user@host`
    pub target: String,

    /// Flags passed to ssh before the target
    pub flags: Vec<String>,
}

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Generate a fresh keypair labelled with `comment`
    async fn create_key_pair(&self, comment: &str) -> Result<KeyPair>;
}

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Whether `host:port` accepts connections. Must return within a bounded
    /// time; failure is an observation, not an error.
    async fn ping(&self, host: &str, port: u16) -> bool;
}

/// Generic liveness and convergence check run against reachable machines
#[async_trait]
pub trait MachineChecker: Send + Sync {
    async fn check(
        &self,
        ctx: &MachineContext,
        access: &SshAccess,
        res: &mut CheckResult,
    ) -> Result<()>;
}

/// The pipeline that activates a built configuration on a machine.
///
/// Returns the activation exit code (`0` on success). Implementations record
/// the activated toplevel with [`MachineContext::set_cur_toplevel`].
#[async_trait]
pub trait ConfigurationPusher: Send + Sync {
    async fn switch_to_configuration(
        &self,
        ctx: &mut MachineContext,
        access: &SshAccess,
        method: SwitchMethod,
        sync: bool,
        command: Option<&str>,
    ) -> Result<i32>;
}
