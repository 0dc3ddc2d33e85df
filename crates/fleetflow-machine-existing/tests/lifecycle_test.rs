mod common;

use common::{TOPLEVEL, TestFleet};
use fleetflow_machine::{CreateOptions, MachineBackend, ResourceRecord, StateFile, SwitchMethod};
use fleetflow_machine_existing::{
    ExistingError, ExistingMachineDefinition, Precondition, parse_deployment,
};
use std::path::PathBuf;

const ACCEPT_NEW: &str = "StrictHostKeyChecking=accept-new";

fn web(provision_ssh_key: bool) -> ExistingMachineDefinition {
    let mut defn = ExistingMachineDefinition::new("web-01", "10.0.0.5");
    defn.public_ipv4 = Some("203.0.113.7".to_string());
    defn.common.provision_ssh_key = provision_ssh_key;
    defn
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;

    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    let vm_id = machine.vm_id().unwrap().to_string();
    let public_key = machine.state().ssh_public_key().unwrap().to_string();

    let deployment_id = fleet.manager.deployment_id().await.unwrap();
    assert_eq!(vm_id, format!("{}-web-01", deployment_id));

    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    assert_eq!(machine.vm_id(), Some(vm_id.as_str()));
    assert_eq!(machine.state().ssh_public_key(), Some(public_key.as_str()));
    assert_eq!(fleet.keygen_calls(), 1);
}

#[tokio::test]
async fn test_create_survives_reopen() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    let before = machine.state().clone();
    drop(machine);

    let mut reopened = fleet.open("web-01").await;
    assert_eq!(reopened.state(), &before);

    let options = CreateOptions {
        check: true,
        allow_reboot: true,
        allow_recreate: true,
    };
    reopened.create(&web(true), options).await.unwrap();
    assert_eq!(reopened.vm_id(), before.vm_id());
    assert_eq!(fleet.keygen_calls(), 1);
}

#[tokio::test]
async fn test_create_refreshes_addresses() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(false), CreateOptions::default()).await.unwrap();
    let vm_id = machine.vm_id().unwrap().to_string();

    let mut moved = web(false);
    moved.target_host = "10.0.0.99".to_string();
    moved.public_ipv4 = None;
    machine.create(&moved, CreateOptions::default()).await.unwrap();

    assert_eq!(machine.vm_id(), Some(vm_id.as_str()));
    assert_eq!(machine.state().target_host(), Some("10.0.0.99"));
    assert_eq!(machine.state().public_ipv4(), None);

    let reopened = fleet.open("web-01").await;
    assert_eq!(reopened.ssh_name().unwrap(), "10.0.0.99");
}

#[tokio::test]
async fn test_create_without_key_provisioning() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(false), CreateOptions::default()).await.unwrap();

    assert!(machine.vm_id().is_some());
    assert!(machine.state().ssh_private_key().is_none());
    assert!(machine.state().ssh_public_key().is_none());
    assert_eq!(fleet.keygen_calls(), 0);
    assert_eq!(machine.physical_spec(), serde_json::json!({}));
}

#[tokio::test]
async fn test_create_resumes_after_interrupted_provisioning() {
    let fleet = TestFleet::new();

    // Keypair persisted, marker never assigned
    let mut state = StateFile::new();
    state.set_record(
        ResourceRecord::new("web-01", "existing")
            .with_attribute("targetHost", serde_json::json!("10.0.0.5"))
            .with_attribute("existing.sshPrivateKey", serde_json::json!("PRIVATE-0\n"))
            .with_attribute(
                "existing.sshPublicKey",
                serde_json::json!("ssh-ed25519 KEY0 earlier"),
            ),
    );
    fleet.manager.save(&state).await.unwrap();

    let mut machine = fleet.open("web-01").await;
    assert!(machine.vm_id().is_none());

    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    assert!(machine.vm_id().is_some());
    assert_eq!(
        machine.state().ssh_public_key(),
        Some("ssh-ed25519 KEY0 earlier")
    );
    assert_eq!(fleet.keygen_calls(), 0);
}

#[tokio::test]
async fn test_create_after_interrupted_save_keeps_marker() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    let vm_id = machine.vm_id().unwrap().to_string();
    drop(machine);

    // Died while the state file was set aside
    let dir = fleet.root.path().join(".fleetflow");
    std::fs::rename(dir.join("state.json"), dir.join("state.json.backup")).unwrap();

    let mut machine = fleet.open("web-01").await;
    assert_eq!(machine.vm_id(), Some(vm_id.as_str()));

    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    assert_eq!(machine.vm_id(), Some(vm_id.as_str()));
    assert_eq!(fleet.keygen_calls(), 1);
}

#[tokio::test]
async fn test_create_rejects_foreign_definition() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;

    let other = ExistingMachineDefinition::new("db-01", "10.0.0.6");
    let err = machine
        .create(&other, CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExistingError::InvalidConfig(_)));
    assert!(machine.vm_id().is_none());
}

#[tokio::test]
async fn test_check_before_create_never_probes() {
    let fleet = TestFleet::new();
    fleet.set_up(true);
    let mut machine = fleet.open("web-01").await;

    let res = machine.check().await.unwrap();
    assert_eq!(res.exists, Some(false));
    assert_eq!(res.is_up, None);
    assert_eq!(fleet.probe_calls(), 0);
    assert_eq!(fleet.checker_calls(), 0);
}

#[tokio::test]
async fn test_check_unreachable_skips_generic_check() {
    let fleet = TestFleet::new();
    fleet.set_up(false);
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(false), CreateOptions::default()).await.unwrap();

    let res = machine.check().await.unwrap();
    assert_eq!(res.exists, Some(true));
    assert_eq!(res.is_up, Some(false));
    assert_eq!(fleet.probe_calls(), 1);
    assert_eq!(fleet.checker_calls(), 0);
}

#[tokio::test]
async fn test_check_without_target_host_reports_down() {
    let fleet = TestFleet::new();
    fleet.set_up(true);

    let mut state = StateFile::new();
    state.set_record(
        ResourceRecord::new("web-01", "existing")
            .with_attribute("vmId", serde_json::json!("d1-web-01")),
    );
    fleet.manager.save(&state).await.unwrap();

    let mut machine = fleet.open("web-01").await;
    let res = machine.check().await.unwrap();
    assert_eq!(res.exists, Some(true));
    assert_eq!(res.is_up, Some(false));
    assert!(!res.messages.is_empty());
    assert_eq!(fleet.probe_calls(), 0);
    assert_eq!(fleet.checker_calls(), 0);
}

#[tokio::test]
async fn test_check_reachable_runs_generic_check() {
    let fleet = TestFleet::new();
    fleet.set_up(true);
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(false), CreateOptions::default()).await.unwrap();

    let res = machine.check().await.unwrap();
    assert_eq!(res.exists, Some(true));
    assert_eq!(res.is_up, Some(true));
    assert_eq!(res.configuration_converged, Some(true));
    assert!(res.is_healthy());
    assert_eq!(fleet.checker_calls(), 1);
}

#[tokio::test]
async fn test_trust_escalation_ordering() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    let base = machine.context().base_ssh_flags();

    // Fresh record
    assert_eq!(machine.ssh_flags().unwrap(), base);

    // Registered with a key, nothing pushed yet
    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    assert_eq!(machine.ssh_flags().unwrap(), base);

    // First push still connects with the base flags
    let code = machine
        .switch_to_configuration(SwitchMethod::Switch, true, None)
        .await
        .unwrap();
    assert_eq!(code, 0);
    let first_access = fleet.pusher.last_access.lock().unwrap().clone().unwrap();
    assert_eq!(first_access.flags, base);
    assert_eq!(first_access.target, "root@10.0.0.5");

    assert!(machine.state().ssh_public_key_deployed());
    assert_eq!(machine.context().cur_toplevel(), Some(TOPLEVEL));

    let flags = machine.ssh_flags().unwrap();
    assert_eq!(&flags[..base.len()], base.as_slice());
    assert_eq!(flags[base.len()], "-o");
    assert_eq!(flags[base.len() + 1], ACCEPT_NEW);
    assert_eq!(flags[base.len() + 2], "-i");

    let key_file = PathBuf::from(&flags[base.len() + 3]);
    let written = std::fs::read_to_string(&key_file).unwrap();
    assert_eq!(Some(written.as_str()), machine.state().ssh_private_key());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&key_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn test_deployed_without_toplevel_keeps_base_flags() {
    let fleet = TestFleet::new();

    // Deployed flag persisted, but no configuration recorded
    let mut state = StateFile::new();
    state.set_record(
        ResourceRecord::new("web-01", "existing")
            .with_attribute("vmId", serde_json::json!("d1-web-01"))
            .with_attribute("targetHost", serde_json::json!("10.0.0.5"))
            .with_attribute("existing.sshPrivateKey", serde_json::json!("PRIVATE"))
            .with_attribute("existing.sshPublicKey", serde_json::json!("ssh-ed25519 K"))
            .with_attribute("existing.sshPublicKeyDeployed", serde_json::json!(true)),
    );
    fleet.manager.save(&state).await.unwrap();

    let mut machine = fleet.open("web-01").await;
    assert!(machine.state().ssh_public_key_deployed());
    assert!(!machine.ssh_flags().unwrap().contains(&ACCEPT_NEW.to_string()));
}

#[tokio::test]
async fn test_deployed_without_marker_keeps_base_flags() {
    for vm_id in [None, Some("")] {
        let fleet = TestFleet::new();

        let mut record = ResourceRecord::new("web-01", "existing")
            .with_attribute("toplevel", serde_json::json!(TOPLEVEL))
            .with_attribute("targetHost", serde_json::json!("10.0.0.5"))
            .with_attribute("existing.sshPrivateKey", serde_json::json!("PRIVATE"))
            .with_attribute("existing.sshPublicKey", serde_json::json!("ssh-ed25519 K"))
            .with_attribute("existing.sshPublicKeyDeployed", serde_json::json!(true));
        if let Some(id) = vm_id {
            record = record.with_attribute("vmId", serde_json::json!(id));
        }
        let mut state = StateFile::new();
        state.set_record(record);
        fleet.manager.save(&state).await.unwrap();

        let mut machine = fleet.open("web-01").await;
        assert!(machine.context().cur_toplevel().is_some());
        assert!(machine.state().ssh_public_key_deployed());
        assert!(machine.vm_id().is_none());

        let base = machine.context().base_ssh_flags();
        assert_eq!(machine.ssh_flags().unwrap(), base);
    }
}

#[tokio::test]
async fn test_failed_push_leaves_state_untouched() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    let before = fleet.manager.load().await.unwrap();

    fleet.set_push_result(4);
    let code = machine
        .switch_to_configuration(SwitchMethod::Switch, true, Some("/run/custom-activate"))
        .await
        .unwrap();

    assert_eq!(code, 4);
    assert!(!machine.state().ssh_public_key_deployed());

    let after = fleet.manager.load().await.unwrap();
    assert_eq!(
        after.get_record("web-01").unwrap().attributes,
        before.get_record("web-01").unwrap().attributes
    );
}

#[tokio::test]
async fn test_successful_push_is_persisted() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    machine
        .switch_to_configuration(SwitchMethod::Boot, false, None)
        .await
        .unwrap();
    drop(machine);

    let mut reopened = fleet.open("web-01").await;
    assert!(reopened.state().ssh_public_key_deployed());
    assert_eq!(reopened.context().cur_toplevel(), Some(TOPLEVEL));
    assert!(reopened.ssh_flags().unwrap().contains(&ACCEPT_NEW.to_string()));
}

#[tokio::test]
async fn test_push_without_key_never_marks_deployed() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(false), CreateOptions::default()).await.unwrap();

    let code = machine
        .switch_to_configuration(SwitchMethod::Switch, true, None)
        .await
        .unwrap();
    assert_eq!(code, 0);
    assert!(!machine.state().ssh_public_key_deployed());
    assert_eq!(
        machine.ssh_flags().unwrap(),
        machine.context().base_ssh_flags()
    );
}

#[tokio::test]
async fn test_destroy_is_a_no_op() {
    let fleet = TestFleet::new();

    let mut fresh = fleet.open("db-01").await;
    assert!(fresh.destroy(false).await.unwrap());
    assert!(fresh.destroy(true).await.unwrap());

    let mut machine = fleet.open("web-01").await;
    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    let before = machine.state().clone();

    assert!(machine.destroy(true).await.unwrap());
    assert!(machine.destroy(false).await.unwrap());
    assert_eq!(machine.state(), &before);

    let reopened = fleet.open("web-01").await;
    assert_eq!(reopened.state(), &before);
}

#[tokio::test]
async fn test_ssh_name_requires_create() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;

    match machine.ssh_name() {
        Err(ExistingError::PreconditionFailed {
            machine: name,
            precondition,
        }) => {
            assert_eq!(name, "web-01");
            assert_eq!(precondition, Precondition::TargetHostUnset);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    assert!(
        machine
            .switch_to_configuration(SwitchMethod::Switch, true, None)
            .await
            .is_err()
    );
    assert_eq!(fleet.pusher.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_private_key_precedence() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;

    // No key at all
    assert_eq!(machine.ssh_private_key_file().unwrap(), None);

    // Generated key is materialized
    machine.create(&web(true), CreateOptions::default()).await.unwrap();
    let generated = machine.ssh_private_key_file().unwrap().unwrap();
    assert!(generated.exists());

    // Configured file wins
    let mut with_override = web(true);
    with_override.common.ssh_private_key_file = Some(PathBuf::from("/etc/fleetflow/id_web"));
    machine
        .create(&with_override, CreateOptions::default())
        .await
        .unwrap();
    assert_eq!(
        machine.ssh_private_key_file().unwrap(),
        Some(PathBuf::from("/etc/fleetflow/id_web"))
    );
}

#[tokio::test]
async fn test_physical_spec_carries_public_key() {
    let fleet = TestFleet::new();
    let mut machine = fleet.open("web-01").await;
    machine.create(&web(true), CreateOptions::default()).await.unwrap();

    let spec = machine.physical_spec();
    let keys = spec
        .pointer("/config/users/extraUsers/root/openssh/authorizedKeys/keys")
        .unwrap()
        .as_array()
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].as_str(), machine.state().ssh_public_key());
}

#[tokio::test]
async fn test_deployment_file_drives_fleet() {
    let fleet = TestFleet::new();
    let machines = parse_deployment(
        r#"
        machine "web-01" {
            target-host "10.0.0.5"
            provision-ssh-key #true
        }
        machine "db-01" {
            target-host "10.0.0.6"
            ssh-port 2222
        }
        "#,
    )
    .unwrap();

    for defn in &machines {
        let mut machine = fleet.open(defn.name()).await;
        machine.create(defn, CreateOptions::default()).await.unwrap();
    }

    let state = fleet.manager.load().await.unwrap();
    assert_eq!(state.records_of_type("existing").len(), 2);
    assert_eq!(fleet.keygen_calls(), 1);

    let db = fleet.open("db-01").await;
    assert_eq!(db.context().ssh_port(), 2222);
    assert!(db.context().base_ssh_flags().contains(&"2222".to_string()));
}
