//! End-to-end scenarios against the in-process reference platform.
//!
//! Each test drives the dispatcher the way the transport would: one
//! request envelope in, one response envelope out, with all coordination
//! flowing through the conditional writes of the backing store.

use std::time::Duration;

use serde_json::json;

use warden_core::{Dispatcher, PlainBootstrap};
use warden_platform::{DeviceReport, LifecycleTransition, MemoryPlatform, Request, TracingProxy};
use warden_state::{
    HealthCheckRecord, PrimaryRecord, SettingKey, SyncState, VirtualMachine, VoteState,
};

fn vm(vm_id: &str, group: &str, ip: &str) -> VirtualMachine {
    VirtualMachine {
        vm_id: vm_id.to_string(),
        scaling_group_name: group.to_string(),
        primary_private_ip: ip.to_string(),
        primary_public_ip: None,
        virtual_network_id: "vnet-1".to_string(),
        subnet_id: "subnet-1".to_string(),
    }
}

/// A deployment with saved settings: primary-eligible group `sg-primary`
/// (doubling as the BYOL group), secondary group `sg-payg`.
fn deployment() -> MemoryPlatform {
    let platform = MemoryPlatform::new().unwrap();
    for (key, value) in [
        (SettingKey::DeploymentSettingsSaved, "true"),
        (SettingKey::PrimaryScalingGroupName, "sg-primary"),
        (SettingKey::ByolScalingGroupName, "sg-primary"),
        (SettingKey::PaygScalingGroupName, "sg-payg"),
        (SettingKey::HeartbeatInterval, "30"),
        (SettingKey::ElectionTimeout, "90"),
    ] {
        platform.seed_setting(key, value).unwrap();
    }
    platform
}

#[tokio::test]
async fn first_heartbeat_elects_the_only_primary_group_vm() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    platform.add_vm(vm("i-a", "sg-primary", "10.0.1.10"));
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-a", json!(30)), 0)
        .await;

    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "");

    let record = platform.store().get_primary_record().unwrap().unwrap();
    assert_eq!(record.vm_id, "i-a");
    assert_eq!(record.vote_state, VoteState::Done);

    let health = platform.store().get_health_record("i-a").unwrap().unwrap();
    assert_eq!(health.next_heartbeat_time, 30_000);
    assert_eq!(health.seq, 1);
    assert!(health.healthy);

    // The launch lifecycle action completed cleanly.
    let actions = platform.completed_lifecycle_actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, "launching");
    assert!(!actions[0].abandon);

    // The new primary's vm id was persisted as the initial credential.
    let password = platform
        .store()
        .get_setting(SettingKey::DefaultPassword.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(password.value, "i-a");
}

#[tokio::test]
async fn secondary_first_heartbeat_learns_the_primary() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    platform.add_vm(vm("i-a", "sg-primary", "10.0.1.10"));
    platform.add_vm(vm("i-b", "sg-payg", "10.0.2.20"));
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    // A becomes primary, then B reports for the first time.
    dispatcher
        .handle_at(&Request::heartbeat("i-a", json!(30)), 0)
        .await;
    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-b", json!(30)), 0)
        .await;

    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, r#"{"master-ip":"10.0.1.10"}"#);

    let health = platform.store().get_health_record("i-b").unwrap().unwrap();
    assert_eq!(health.primary_ip, "10.0.1.10");
}

#[tokio::test]
async fn silent_primary_is_replaced_by_a_reporting_secondary() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    let a = vm("i-a", "sg-primary", "10.0.1.10");
    let b = vm("i-b", "sg-primary", "10.0.1.11");
    platform.add_vm(a.clone());
    platform.add_vm(b.clone());
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    // A is the finalized primary but stopped reporting after t=0.
    let mut record = PrimaryRecord::candidate(&a, 91_000);
    record.vote_state = VoteState::Done;
    platform.store().create_primary_record(&record, None).unwrap();
    platform
        .store()
        .create_health_record(&HealthCheckRecord::first_heartbeat(&a, "10.0.1.10", 30, 0))
        .unwrap();

    // B has been reporting on time; its deadline at t=500_000 is open.
    let mut b_health = HealthCheckRecord::first_heartbeat(&b, "10.0.1.10", 30, 471_000);
    b_health.seq = 17;
    platform.store().create_health_record(&b_health).unwrap();

    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-b", json!(30)), 500_000)
        .await;

    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, r#"{"master-ip":"10.0.1.11"}"#);

    // B owns a finalized record now.
    let record = platform.store().get_primary_record().unwrap().unwrap();
    assert_eq!(record.vm_id, "i-b");
    assert_eq!(record.vote_state, VoteState::Done);

    // A was moved out of sync and terminated.
    let a_health = platform.store().get_health_record("i-a").unwrap().unwrap();
    assert_eq!(a_health.sync_state, SyncState::OutOfSync);
    assert!(!a_health.healthy);
    assert_eq!(platform.terminated_vms(), vec!["i-a".to_string()]);

    // B's record tracked the accepted heartbeat.
    let b_health = platform.store().get_health_record("i-b").unwrap().unwrap();
    assert_eq!(b_health.seq, 18);
    assert_eq!(b_health.primary_ip, "10.0.1.11");
}

#[tokio::test]
async fn candidate_race_produces_exactly_one_finalized_primary() {
    let platform = deployment();
    platform.seed_setting(SettingKey::ElectionNoWait, "true").unwrap();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    let b = vm("i-b", "sg-primary", "10.0.1.11");
    let c = vm("i-c", "sg-primary", "10.0.1.12");
    platform.add_vm(b.clone());
    platform.add_vm(c.clone());
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    // B's in-flight handler placed the pending vote first; C's conditional
    // create has already lost by the time its handler observes the record.
    let pending = PrimaryRecord::candidate(&b, 91_000);
    platform.store().create_primary_record(&pending, None).unwrap();

    // C reports while the vote is pending: with no-wait it neither waits
    // nor learns a primary ip.
    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-c", json!(30)), 1_000)
        .await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "");
    let c_health = platform.store().get_health_record("i-c").unwrap().unwrap();
    assert_eq!(c_health.primary_ip, "");

    // B's handler resumes and finalizes its own vote.
    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-b", json!(30)), 2_000)
        .await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "");

    let record = platform.store().get_primary_record().unwrap().unwrap();
    assert_eq!(record.vm_id, "i-b");
    assert_eq!(record.vote_state, VoteState::Done);

    // C picks up the finalized primary on its next heartbeat.
    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-c", json!(30)), 20_000)
        .await;
    assert_eq!(resp.body, r#"{"master-ip":"10.0.1.11"}"#);
}

#[tokio::test]
async fn license_re_request_is_idempotent_through_bootstrap() {
    let platform = deployment();
    platform.seed_setting(SettingKey::EnableHybridLicensing, "true").unwrap();
    platform.seed_setting(SettingKey::AssetStorageName, "assets").unwrap();
    platform
        .seed_setting(SettingKey::LicenseStorageKeyPrefix, "licenses")
        .unwrap();
    platform.add_license_blob("assets", "licenses", "f1.lic", "LICENSE-ONE");
    platform.add_license_blob("assets", "licenses", "f2.lic", "LICENSE-TWO");
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    platform.add_vm(vm("i-a", "sg-primary", "10.0.1.10"));
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    let first = dispatcher.handle_at(&Request::bootstrap("i-a"), 1_000).await;
    assert_eq!(first.status, 200);
    assert!(first.secret);
    assert!(first.body.contains("LICENSE-ONE"));

    let usage = platform.store().list_license_usage("fortigate").unwrap();
    assert_eq!(usage.len(), 1);
    let assigned = usage[0].checksum.clone();

    // The same VM bootstrapping again gets the same license and no new
    // usage row.
    let second = dispatcher.handle_at(&Request::bootstrap("i-a"), 5_000).await;
    assert!(second.body.contains("LICENSE-ONE"));

    let usage = platform.store().list_license_usage("fortigate").unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].checksum, assigned);
}

#[tokio::test]
async fn license_recycled_from_out_of_sync_holder_through_bootstrap() {
    let platform = deployment();
    platform.seed_setting(SettingKey::EnableHybridLicensing, "true").unwrap();
    platform.seed_setting(SettingKey::AssetStorageName, "assets").unwrap();
    platform
        .seed_setting(SettingKey::LicenseStorageKeyPrefix, "licenses")
        .unwrap();
    platform.seed_setting(SettingKey::LicenseGracePeriod, "600").unwrap();
    platform.add_license_blob("assets", "licenses", "f1.lic", "LICENSE-ONE");
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;

    let a = vm("i-a", "sg-primary", "10.0.1.10");
    let b = vm("i-b", "sg-primary", "10.0.1.11");
    platform.add_vm(a.clone());
    platform.add_vm(b.clone());
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    // A bootstraps, takes the only license, then drops out of sync.
    dispatcher.handle_at(&Request::bootstrap("i-a"), 0).await;
    let mut a_health = HealthCheckRecord::first_heartbeat(&a, "10.0.1.10", 30, 0);
    a_health.healthy = false;
    a_health.sync_state = SyncState::OutOfSync;
    platform.store().create_health_record(&a_health).unwrap();

    // B bootstraps past the grace period and inherits F1.
    let resp = dispatcher
        .handle_at(&Request::bootstrap("i-b"), 1_000_000)
        .await;
    assert_eq!(resp.status, 200);
    assert!(resp.body.contains("LICENSE-ONE"));

    let usage = platform.store().list_license_usage("fortigate").unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].vm_id, "i-b");
}

#[tokio::test]
async fn exhausted_pool_reports_no_license_available() {
    let platform = deployment();
    platform.seed_setting(SettingKey::EnableHybridLicensing, "true").unwrap();
    platform.seed_setting(SettingKey::AssetStorageName, "assets").unwrap();
    platform
        .seed_setting(SettingKey::LicenseStorageKeyPrefix, "licenses")
        .unwrap();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    platform.add_vm(vm("i-a", "sg-primary", "10.0.1.10"));
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    let resp = dispatcher.handle_at(&Request::bootstrap("i-a"), 1_000).await;
    assert_eq!(resp.status, 500);
    assert_eq!(resp.body, "No license available");
}

#[tokio::test]
async fn out_of_sync_vm_is_absorbed_until_removed() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    let a = vm("i-a", "sg-payg", "10.0.2.20");
    platform.add_vm(a.clone());
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    let mut health = HealthCheckRecord::first_heartbeat(&a, "10.0.1.10", 30, 0);
    health.healthy = false;
    health.sync_state = SyncState::OutOfSync;
    health.seq = 4;
    platform.store().create_health_record(&health).unwrap();

    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-a", json!(30)), 1_000_000)
        .await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "");

    // Nothing about the record moved.
    let after = platform.store().get_health_record("i-a").unwrap().unwrap();
    assert_eq!(after, health);
}

#[tokio::test]
async fn very_late_heartbeats_end_in_shutdown() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    let a = vm("i-a", "sg-primary", "10.0.1.10");
    let b = vm("i-b", "sg-payg", "10.0.2.20");
    platform.add_vm(a.clone());
    platform.add_vm(b.clone());
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    // A is the healthy primary; B joins, then reports ever later.
    dispatcher.handle_at(&Request::heartbeat("i-a", json!(30)), 0).await;
    dispatcher.handle_at(&Request::heartbeat("i-b", json!(30)), 0).await;
    // Keep A fresh so B's lateness is the only problem.
    dispatcher.handle_at(&Request::heartbeat("i-a", json!(30)), 29_000).await;

    // B's deadlines: 30s interval, 2s allowance, 3-loss budget.
    let r1 = dispatcher.handle_at(&Request::heartbeat("i-b", json!(30)), 40_000).await;
    assert_eq!(r1.body, "");
    let r2 = dispatcher.handle_at(&Request::heartbeat("i-b", json!(30)), 70_000).await;
    assert_eq!(r2.body, "");
    dispatcher.handle_at(&Request::heartbeat("i-a", json!(30)), 58_000).await;
    dispatcher.handle_at(&Request::heartbeat("i-a", json!(30)), 87_000).await;

    let r3 = dispatcher.handle_at(&Request::heartbeat("i-b", json!(30)), 100_000).await;
    assert_eq!(r3.status, 200);
    assert_eq!(r3.body, r#"{"action":"shutdown"}"#);

    let health = platform.store().get_health_record("i-b").unwrap().unwrap();
    assert_eq!(health.sync_state, SyncState::OutOfSync);
    assert!(platform.terminated_vms().contains(&"i-b".to_string()));
}

#[tokio::test]
async fn monotone_seq_and_strictly_increasing_deadlines() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    platform.add_vm(vm("i-a", "sg-primary", "10.0.1.10"));
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    let mut last_deadline = 0;
    for n in 0..8u64 {
        let t = n * 29_000;
        let resp = dispatcher
            .handle_at(&Request::heartbeat("i-a", json!(30)), t)
            .await;
        assert_eq!(resp.status, 200);

        let health = platform.store().get_health_record("i-a").unwrap().unwrap();
        assert_eq!(health.seq, n + 1);
        assert!(health.next_heartbeat_time > last_deadline);
        last_deadline = health.next_heartbeat_time;
    }
}

#[tokio::test]
async fn interval_replacement_and_use_existing_sentinel() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    platform.add_vm(vm("i-a", "sg-primary", "10.0.1.10"));
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    dispatcher.handle_at(&Request::heartbeat("i-a", json!(30)), 0).await;

    // Replace the interval: the next deadline stretches to 60s out.
    dispatcher.handle_at(&Request::heartbeat("i-a", json!(60)), 29_000).await;
    let health = platform.store().get_health_record("i-a").unwrap().unwrap();
    assert_eq!(health.heartbeat_interval, 60);
    assert_eq!(health.next_heartbeat_time, 89_000);

    // The sentinel keeps whatever is stored.
    dispatcher
        .handle_at(&Request::heartbeat("i-a", json!("use-existing")), 88_000)
        .await;
    let health = platform.store().get_health_record("i-a").unwrap().unwrap();
    assert_eq!(health.heartbeat_interval, 60);
    assert_eq!(health.next_heartbeat_time, 148_000);
}

#[tokio::test]
async fn device_telemetry_lands_on_the_health_record() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    platform.add_vm(vm("i-a", "sg-primary", "10.0.1.10"));
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    dispatcher.handle_at(&Request::heartbeat("i-a", json!(30)), 0).await;

    let report = DeviceReport {
        sync_time: Some(28_500),
        sync_fail_time: None,
        sync_status: Some("in_sync".to_string()),
        is_primary: true,
        checksum: Some("abc123".to_string()),
    };
    let req = Request::heartbeat("i-a", json!(30)).with_device_report(report);
    dispatcher.handle_at(&req, 29_000).await;

    let health = platform.store().get_health_record("i-a").unwrap().unwrap();
    assert_eq!(health.device_sync_time, Some(28_500));
    assert_eq!(health.device_sync_status.as_deref(), Some("in_sync"));
    assert!(health.device_is_primary);
    assert_eq!(health.device_checksum.as_deref(), Some("abc123"));
    assert_eq!(health.send_time, 29_000);
}

#[tokio::test]
async fn election_timeout_removes_the_reporting_vm() {
    let platform = deployment();
    // A budget below the waiter floor forces the timeout path at once.
    let proxy = TracingProxy::new(Duration::from_millis(100));
    let strategy = PlainBootstrap;
    let a = vm("i-a", "sg-primary", "10.0.1.10");
    platform.add_vm(a.clone());
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-a", json!(30)), 0)
        .await;

    assert_eq!(resp.status, 500);
    assert!(resp.body.contains("election wait expired"));
    assert_eq!(platform.terminated_vms(), vec!["i-a".to_string()]);
    assert!(platform.store().get_health_record("i-a").unwrap().is_none());
}

#[tokio::test]
async fn terminating_lifecycle_frees_the_primary_role() {
    let platform = deployment();
    let proxy = TracingProxy::unbounded();
    let strategy = PlainBootstrap;
    let a = vm("i-a", "sg-primary", "10.0.1.10");
    let b = vm("i-b", "sg-primary", "10.0.1.11");
    platform.add_vm(a.clone());
    platform.add_vm(b.clone());
    let dispatcher = Dispatcher::new(&platform, &proxy, &strategy);

    dispatcher.handle_at(&Request::heartbeat("i-a", json!(30)), 0).await;
    dispatcher.handle_at(&Request::heartbeat("i-b", json!(30)), 0).await;

    // The platform announces A's scale-in.
    let resp = dispatcher
        .handle_at(
            &Request::lifecycle("i-a", LifecycleTransition::Terminating),
            10_000,
        )
        .await;
    assert_eq!(resp.status, 200);
    assert!(platform.store().get_primary_record().unwrap().is_none());

    // B's next heartbeat takes over the role.
    let resp = dispatcher
        .handle_at(&Request::heartbeat("i-b", json!(30)), 29_000)
        .await;
    assert_eq!(resp.body, r#"{"master-ip":"10.0.1.11"}"#);
    let record = platform.store().get_primary_record().unwrap().unwrap();
    assert_eq!(record.vm_id, "i-b");
    assert_eq!(record.vote_state, VoteState::Done);
}
