//! Tests for the post-creation address wait.

use std::time::Duration;

use super::*;
use crate::compute::InstanceRecord;

const POLL: Duration = Duration::from_millis(1);

fn record(state: &str, ip: Option<&str>) -> InstanceRecord {
    InstanceRecord {
        id: MACHINE.to_owned(),
        name: String::from("web-1"),
        primary_ip: ip.map(str::to_owned),
        state: state.to_owned(),
    }
}

#[tokio::test]
async fn create_waits_for_address() {
    let api = api().with_ip_on_create("165.225.1.2");
    let mut controller = controller(&api).with_wait(POLL, Duration::from_secs(1));

    controller
        .create(AddressWait::Poll)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(controller.cached_address(), Some("165.225.1.2"));
}

#[tokio::test]
async fn wait_retries_until_address_appears() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "running", Some("165.225.1.2"));
    api.script_instance(
        MACHINE,
        [record("provisioning", None), record("provisioning", Some(""))],
    );
    api.fail_next(
        Operation::GetInstance,
        ApiError::Transport(String::from("timeout")),
    );
    let mut controller = attached(&api).with_wait(POLL, Duration::from_secs(1));

    let address = controller
        .wait_for_address()
        .await
        .unwrap_or_else(|err| panic!("wait: {err}"));

    assert_eq!(address, "165.225.1.2");
    let fetches = api
        .calls()
        .iter()
        .filter(|call| matches!(call, ApiCall::GetInstance(_)))
        .count();
    assert_eq!(fetches, 4);
}

#[tokio::test]
async fn wait_times_out_without_address() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "provisioning", None);
    let mut controller = attached(&api).with_wait(POLL, Duration::from_millis(20));

    let Err(err) = controller.wait_for_address().await else {
        panic!("wait should time out");
    };
    let ControllerError::Timeout { machine_id, .. } = err else {
        panic!("expected Timeout error");
    };
    assert_eq!(machine_id.as_str(), MACHINE);
}

#[tokio::test]
async fn create_timeout_keeps_identifier() {
    let api = api();
    let mut controller = controller(&api).with_wait(POLL, Duration::from_millis(20));

    let Err(err) = controller.create(AddressWait::Poll).await else {
        panic!("create should time out");
    };
    assert!(matches!(err, ControllerError::Timeout { .. }), "{err:?}");
    assert!(controller.machine_id().is_some());
}
