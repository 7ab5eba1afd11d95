//! Integration tests for the execution engine.
//!
//! Each procedure runs against recording fakes; the tests check step
//! ordering, short-circuiting on the first failure, the taxonomy member each
//! failure maps to, and that reporting never changes an outcome.

mod support;

use drover_id::InstanceUuid;
use drover_launcher::{Delivery, NetworkingMode};
use drover_payloads::{
    DeleteFailureReason, RestartFailureReason, StartFailureReason, StopFailureReason,
};
use rstest::rstest;

use support::{report, step, vm_config, Harness, NODE_ADDR};

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn test_restart_with_networking() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    let config = vm_config(instance, true);

    h.engine(NetworkingMode::Enabled)
        .restart(&h.instance_dir(instance), h.vm.as_ref(), &config)
        .await
        .unwrap();

    assert_eq!(
        h.log.calls(),
        vec![step::VNIC_BUILD, step::VNIC_CREATE, step::START_VM]
    );
    assert_eq!(
        h.vm.starts(),
        vec![("vnic-3390740c".to_string(), NODE_ADDR.parse().unwrap())]
    );
    assert!(h.reports().is_empty());
}

#[tokio::test]
async fn test_restart_without_networking_never_creates_vnic() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    let config = vm_config(instance, true);

    h.engine(NetworkingMode::Disabled)
        .restart(&h.instance_dir(instance), h.vm.as_ref(), &config)
        .await
        .unwrap();

    assert_eq!(h.log.calls(), vec![step::START_VM]);
    assert_eq!(h.vm.starts()[0].0, "");
}

#[rstest]
#[case::build(step::VNIC_BUILD, RestartFailureReason::InstanceCorrupt, vec![step::VNIC_BUILD])]
#[case::create(step::VNIC_CREATE, RestartFailureReason::NetworkFailure, vec![step::VNIC_BUILD, step::VNIC_CREATE])]
#[case::start(step::START_VM, RestartFailureReason::LaunchFailure, vec![step::VNIC_BUILD, step::VNIC_CREATE, step::START_VM])]
#[tokio::test]
async fn test_restart_failure_mapping(
    #[case] failing: &'static str,
    #[case] reason: RestartFailureReason,
    #[case] calls: Vec<&'static str>,
) {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    h.log.fail(failing);

    let err = h
        .engine(NetworkingMode::Enabled)
        .restart(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, true))
        .await
        .unwrap_err();

    assert_eq!(err.reason, reason);
    assert_eq!(h.log.calls(), calls);
}

#[tokio::test]
async fn test_restart_vnic_failure_reports_once() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    h.log.fail(step::VNIC_CREATE);

    let err = h
        .engine(NetworkingMode::Enabled)
        .restart(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, true))
        .await
        .unwrap_err();

    assert_eq!(err.send(&h.reporter, instance).await, Delivery::Sent);
    assert_eq!(
        h.reports(),
        vec![report("restart_failure", instance, "network_failure")]
    );
    assert_eq!(h.log.count(step::START_VM), 0);
}

#[tokio::test]
async fn test_restart_launch_failure_without_networking() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    h.log.fail(step::START_VM);

    let err = h
        .engine(NetworkingMode::Disabled)
        .restart(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, false))
        .await
        .unwrap_err();

    assert_eq!(err.reason, RestartFailureReason::LaunchFailure);
    assert_eq!(h.log.count(step::VNIC_BUILD), 0);
    assert_eq!(h.log.count(step::VNIC_CREATE), 0);
}

#[tokio::test]
async fn test_restart_missing_network_section_is_corrupt() {
    let h = Harness::new();
    let instance = InstanceUuid::new();

    let err = h
        .engine(NetworkingMode::Enabled)
        .restart(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, false))
        .await
        .unwrap_err();

    assert_eq!(err.reason, RestartFailureReason::InstanceCorrupt);
    assert_eq!(h.log.count(step::START_VM), 0);
}

// ============================================================================
// Reporting
// ============================================================================

#[tokio::test]
async fn test_send_skipped_when_disconnected() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    h.channel.set_connected(false);
    h.log.fail(step::START_VM);

    let err = h
        .engine(NetworkingMode::Disabled)
        .restart(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, false))
        .await
        .unwrap_err();

    assert_eq!(err.send(&h.reporter, instance).await, Delivery::Skipped);
    assert_eq!(h.channel.attempts(), 0);
}

#[tokio::test]
async fn test_send_failure_leaves_result_unchanged() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    h.channel.set_failing(true);
    h.log.fail(step::START_VM);

    let err = h
        .engine(NetworkingMode::Disabled)
        .restart(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, false))
        .await
        .unwrap_err();

    assert_eq!(err.send(&h.reporter, instance).await, Delivery::Failed);
    assert_eq!(h.channel.attempts(), 1);
    assert_eq!(err.reason, RestartFailureReason::LaunchFailure);
}

// ============================================================================
// Start
// ============================================================================

#[tokio::test]
async fn test_start_with_networking() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    let dir = h.instance_dir(instance);

    h.engine(NetworkingMode::Enabled)
        .start(&dir, h.vm.as_ref(), &vm_config(instance, true))
        .await
        .unwrap();

    assert_eq!(
        h.log.calls(),
        vec![
            step::CREATE_IMAGE,
            step::VNIC_BUILD,
            step::VNIC_CREATE,
            step::START_VM
        ]
    );
    assert!(dir.join("instance.yaml").exists());
}

#[rstest]
#[case::image(step::CREATE_IMAGE, StartFailureReason::ImageFailure, vec![step::CREATE_IMAGE])]
#[case::build(step::VNIC_BUILD, StartFailureReason::InvalidData, vec![step::CREATE_IMAGE, step::VNIC_BUILD, step::DELETE_IMAGE])]
#[case::create(step::VNIC_CREATE, StartFailureReason::NetworkFailure, vec![step::CREATE_IMAGE, step::VNIC_BUILD, step::VNIC_CREATE, step::DELETE_IMAGE])]
#[case::start(step::START_VM, StartFailureReason::LaunchFailure, vec![step::CREATE_IMAGE, step::VNIC_BUILD, step::VNIC_CREATE, step::START_VM, step::VNIC_DESTROY, step::DELETE_IMAGE])]
#[tokio::test]
async fn test_start_failure_cleans_up(
    #[case] failing: &'static str,
    #[case] reason: StartFailureReason,
    #[case] calls: Vec<&'static str>,
) {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    let dir = h.instance_dir(instance);
    h.log.fail(failing);

    let err = h
        .engine(NetworkingMode::Enabled)
        .start(&dir, h.vm.as_ref(), &vm_config(instance, true))
        .await
        .unwrap_err();

    assert_eq!(err.reason, reason);
    assert_eq!(h.log.calls(), calls);
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_start_without_networking() {
    let h = Harness::new();
    let instance = InstanceUuid::new();

    h.engine(NetworkingMode::Disabled)
        .start(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, true))
        .await
        .unwrap();

    assert_eq!(h.log.calls(), vec![step::CREATE_IMAGE, step::START_VM]);
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_stop() {
    let h = Harness::new();
    let instance = InstanceUuid::new();

    h.engine(NetworkingMode::Enabled)
        .stop(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, true))
        .await
        .unwrap();

    assert_eq!(h.log.calls(), vec![step::STOP_VM]);
}

#[tokio::test]
async fn test_stop_failure() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    h.log.fail(step::STOP_VM);

    let err = h
        .engine(NetworkingMode::Enabled)
        .stop(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, true))
        .await
        .unwrap_err();

    assert_eq!(err.reason, StopFailureReason::ShutdownFailure);
    err.send(&h.reporter, instance).await;
    assert_eq!(
        h.reports(),
        vec![report("stop_failure", instance, "shutdown_failure")]
    );
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_running_instance() {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    let dir = h.instance_dir(instance);
    let config = vm_config(instance, true);
    config.save(&dir).await.unwrap();

    h.engine(NetworkingMode::Enabled)
        .delete(&dir, h.vm.as_ref(), &config, true)
        .await
        .unwrap();

    assert_eq!(
        h.log.calls(),
        vec![
            step::STOP_VM,
            step::DELETE_IMAGE,
            step::VNIC_BUILD,
            step::VNIC_DESTROY
        ]
    );
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_delete_stopped_instance_skips_shutdown() {
    let h = Harness::new();
    let instance = InstanceUuid::new();

    h.engine(NetworkingMode::Disabled)
        .delete(&h.instance_dir(instance), h.vm.as_ref(), &vm_config(instance, false), false)
        .await
        .unwrap();

    assert_eq!(h.log.calls(), vec![step::DELETE_IMAGE]);
}

#[rstest]
#[case::shutdown(step::STOP_VM, DeleteFailureReason::ShutdownFailure, vec![step::STOP_VM])]
#[case::image(step::DELETE_IMAGE, DeleteFailureReason::StorageFailure, vec![step::STOP_VM, step::DELETE_IMAGE])]
#[case::build(step::VNIC_BUILD, DeleteFailureReason::NetworkFailure, vec![step::STOP_VM, step::DELETE_IMAGE, step::VNIC_BUILD])]
#[case::destroy(step::VNIC_DESTROY, DeleteFailureReason::NetworkFailure, vec![step::STOP_VM, step::DELETE_IMAGE, step::VNIC_BUILD, step::VNIC_DESTROY])]
#[tokio::test]
async fn test_delete_failure_mapping(
    #[case] failing: &'static str,
    #[case] reason: DeleteFailureReason,
    #[case] calls: Vec<&'static str>,
) {
    let h = Harness::new();
    let instance = InstanceUuid::new();
    let dir = h.instance_dir(instance);
    let config = vm_config(instance, true);
    config.save(&dir).await.unwrap();
    h.log.fail(failing);

    let err = h
        .engine(NetworkingMode::Enabled)
        .delete(&dir, h.vm.as_ref(), &config, true)
        .await
        .unwrap_err();

    assert_eq!(err.reason, reason);
    assert_eq!(h.log.calls(), calls);
    assert!(dir.exists());
}
