use async_trait::async_trait;
use fleetflow_machine::{
    CheckResult, ConfigurationPusher, KeyGenerator, KeyPair, MachineChecker, MachineContext,
    ReachabilityProbe, SshAccess, StateManager, SwitchMethod,
};
use fleetflow_machine_existing::{Collaborators, ExistingMachine};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TOPLEVEL: &str = "/nix/store/0000-nixos-system-web-01";

#[derive(Default)]
pub struct CountingKeygen {
    pub calls: AtomicUsize,
}

#[async_trait]
impl KeyGenerator for CountingKeygen {
    async fn create_key_pair(&self, comment: &str) -> fleetflow_machine::Result<KeyPair> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(KeyPair {
            private_key: format!("PRIVATE-{}\n", n),
            public_key: format!("ssh-ed25519 KEY{} {}", n, comment),
        })
    }
}

#[derive(Default)]
pub struct ScriptedProbe {
    pub up: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn ping(&self, _host: &str, _port: u16) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.up.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct CountingChecker {
    pub calls: AtomicUsize,
}

#[async_trait]
impl MachineChecker for CountingChecker {
    async fn check(
        &self,
        _ctx: &MachineContext,
        _access: &SshAccess,
        res: &mut CheckResult,
    ) -> fleetflow_machine::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        res.configuration_converged = Some(true);
        Ok(())
    }
}

/// Returns `code` and records the toplevel on success
#[derive(Default)]
pub struct ScriptedPusher {
    pub code: AtomicI32,
    pub calls: AtomicUsize,
    pub last_access: Mutex<Option<SshAccess>>,
}

#[async_trait]
impl ConfigurationPusher for ScriptedPusher {
    async fn switch_to_configuration(
        &self,
        ctx: &mut MachineContext,
        access: &SshAccess,
        _method: SwitchMethod,
        _sync: bool,
        _command: Option<&str>,
    ) -> fleetflow_machine::Result<i32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_access.lock().unwrap() = Some(access.clone());
        let code = self.code.load(Ordering::SeqCst);
        if code == 0 {
            ctx.set_cur_toplevel(TOPLEVEL);
        }
        Ok(code)
    }
}

pub struct TestFleet {
    pub root: TempDir,
    pub manager: StateManager,
    pub keygen: Arc<CountingKeygen>,
    pub probe: Arc<ScriptedProbe>,
    pub checker: Arc<CountingChecker>,
    pub pusher: Arc<ScriptedPusher>,
}

impl TestFleet {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let manager = StateManager::new(root.path());
        Self {
            root,
            manager,
            keygen: Arc::new(CountingKeygen::default()),
            probe: Arc::new(ScriptedProbe::default()),
            checker: Arc::new(CountingChecker::default()),
            pusher: Arc::new(ScriptedPusher::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            keygen: self.keygen.clone(),
            probe: self.probe.clone(),
            checker: self.checker.clone(),
            pusher: self.pusher.clone(),
        }
    }

    pub async fn open(&self, name: &str) -> ExistingMachine {
        ExistingMachine::open(&self.manager, name, self.collaborators())
            .await
            .unwrap()
    }

    pub fn keygen_calls(&self) -> usize {
        self.keygen.calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe.calls.load(Ordering::SeqCst)
    }

    pub fn checker_calls(&self) -> usize {
        self.checker.calls.load(Ordering::SeqCst)
    }

    pub fn set_up(&self, up: bool) {
        self.probe.up.store(up, Ordering::SeqCst);
    }

    pub fn set_push_result(&self, code: i32) {
        self.pusher.code.store(code, Ordering::SeqCst);
    }
}
