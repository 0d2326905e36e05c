//! Unit tests for the lifecycle controller.

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{ApiCall, FakeComputeApi, Operation};

mod wait;

const MACHINE: &str = "b6979942-7d5d-4fe6-a2ec-b812e950625a";

fn host() -> HostIdentity {
    HostIdentity::new("web-1", ".trireme", "root")
}

#[fixture]
fn api() -> FakeComputeApi {
    FakeComputeApi::new()
        .with_image(
            "aaa-111",
            "debian-8",
            "20150702",
            "2015-07-02T15:50:58Z",
        )
        .with_package("pkg-001", "k4-highcpu-kvm-250M")
}

fn controller(api: &FakeComputeApi) -> MachineController<FakeComputeApi> {
    MachineController::new(
        api.clone(),
        host(),
        MachineSettings::new("debian-8", "k4-highcpu-kvm-250M"),
    )
}

fn attached(api: &FakeComputeApi) -> MachineController<FakeComputeApi> {
    MachineController::attach(
        api.clone(),
        host(),
        MachineSettings::new("aaa-111", "k4-highcpu-kvm-250M"),
        MachineId::from(MACHINE),
    )
}

#[rstest]
#[tokio::test]
async fn preflight_normalises_image(api: FakeComputeApi) {
    let mut controller = controller(&api);

    controller
        .preflight_check()
        .await
        .unwrap_or_else(|err| panic!("preflight: {err}"));

    assert_eq!(controller.image(), "aaa-111");
    assert!(!api.saw_mutation());
}

#[rstest]
#[tokio::test]
async fn preflight_reports_unreachable_endpoint(api: FakeComputeApi) {
    api.fail_next(Operation::Ping, ApiError::Transport(String::from("connection refused")));
    let mut controller = controller(&api);

    let Err(err) = controller.preflight_check().await else {
        panic!("preflight should fail");
    };
    assert!(matches!(err, ControllerError::Connectivity { .. }), "{err:?}");
    assert_eq!(api.calls(), vec![ApiCall::Ping]);
}

#[rstest]
#[tokio::test]
async fn preflight_rejects_unknown_package(api: FakeComputeApi) {
    let mut controller = MachineController::new(
        api.clone(),
        host(),
        MachineSettings::new("debian-8", "g4-bogus"),
    );

    let Err(err) = controller.preflight_check().await else {
        panic!("preflight should fail");
    };
    assert!(
        matches!(
            err,
            ControllerError::Resolution(ResolutionError::PackageNotFound { ref reference })
                if reference == "g4-bogus"
        ),
        "{err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn create_submits_resolved_image(api: FakeComputeApi) {
    let mut controller = controller(&api);

    let machine_id = controller
        .create(AddressWait::Skip)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(controller.machine_id(), Some(&machine_id));
    let create_call = api
        .calls()
        .into_iter()
        .find_map(|call| match call {
            ApiCall::CreateInstance(request) => Some(request),
            _ => None,
        })
        .unwrap_or_else(|| panic!("create should reach the API"));
    assert_eq!(create_call.image_id, "aaa-111");
    assert_eq!(create_call.name, "web-1");
    assert_eq!(create_call.package, "k4-highcpu-kvm-250M");
}

#[rstest]
#[tokio::test]
async fn create_after_preflight_resolves_once(api: FakeComputeApi) {
    let mut controller = controller(&api);
    controller
        .preflight_check()
        .await
        .unwrap_or_else(|err| panic!("preflight: {err}"));
    controller
        .create(AddressWait::Skip)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    let lookups = api
        .calls()
        .iter()
        .filter(|call| matches!(call, ApiCall::GetImage(_) | ApiCall::ListImages(_)))
        .count();
    assert_eq!(lookups, 2, "one exact lookup and one catalog search");
}

#[rstest]
#[tokio::test]
async fn create_refuses_second_machine(api: FakeComputeApi) {
    let mut controller = attached(&api);

    let Err(err) = controller.create(AddressWait::Skip).await else {
        panic!("create should fail");
    };
    assert!(matches!(err, ControllerError::AlreadyCreated { .. }), "{err:?}");
    assert!(!api.saw_mutation());
}

#[rstest]
#[tokio::test]
async fn create_surfaces_rejection(api: FakeComputeApi) {
    api.fail_next(
        Operation::CreateInstance,
        ApiError::Rejected {
            status: 409,
            code: String::from("QuotaExceeded"),
            message: String::from("machine quota reached"),
        },
    );
    let mut controller = controller(&api);

    let Err(err) = controller.create(AddressWait::Skip).await else {
        panic!("create should fail");
    };
    assert!(matches!(err, ControllerError::Create { .. }), "{err:?}");
    assert_eq!(controller.machine_id(), None);
}

#[rstest]
#[case("running", LifecycleState::Running)]
#[case("provisioning", LifecycleState::Starting)]
#[case("stopped", LifecycleState::Stopped)]
#[case("failed", LifecycleState::Error)]
#[tokio::test]
async fn state_maps_remote_state(#[case] remote: &str, #[case] expected: LifecycleState) {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", remote, None);
    let controller = attached(&api);

    let state = controller
        .state()
        .await
        .unwrap_or_else(|err| panic!("state: {err}"));
    assert_eq!(state, expected);
}

#[tokio::test]
async fn state_reports_unknown_vocabulary() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "hibernating", None);
    let controller = attached(&api);

    let Err(err) = controller.state().await else {
        panic!("unknown state should be reported");
    };
    let ControllerError::UnknownState { state, machine_id } = err else {
        panic!("expected UnknownState error");
    };
    assert_eq!(state, "hibernating");
    assert_eq!(machine_id.as_str(), MACHINE);
}

#[tokio::test]
async fn state_is_idempotent() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "running", None);
    let controller = attached(&api);

    let first = controller.state().await.ok();
    let second = controller.state().await.ok();
    assert_eq!(first, Some(LifecycleState::Running));
    assert_eq!(first, second);
}

#[rstest]
#[tokio::test]
async fn operations_need_a_machine(api: FakeComputeApi) {
    let mut controller = controller(&api);

    assert!(matches!(controller.state().await, Err(ControllerError::NoMachine)));
    assert!(matches!(controller.start().await, Err(ControllerError::NoMachine)));
    assert!(matches!(controller.address().await, Err(ControllerError::NoMachine)));
    assert!(matches!(controller.remove().await, Err(ControllerError::NoMachine)));
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn address_is_cached() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "running", Some("165.225.1.2"));
    let mut controller = attached(&api);

    for _ in 0..2 {
        let address = controller
            .address()
            .await
            .unwrap_or_else(|err| panic!("address: {err}"));
        assert_eq!(address.as_deref(), Some("165.225.1.2"));
    }
    assert_eq!(api.calls(), vec![ApiCall::GetInstance(MACHINE.to_owned())]);
    assert_eq!(controller.cached_address(), Some("165.225.1.2"));
}

#[tokio::test]
async fn missing_address_is_not_cached() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "provisioning", None);
    let mut controller = attached(&api);

    let address = controller
        .address()
        .await
        .unwrap_or_else(|err| panic!("address: {err}"));
    assert_eq!(address, None);

    api.set_primary_ip(MACHINE, Some("165.225.1.2"));
    let address = controller
        .address()
        .await
        .unwrap_or_else(|err| panic!("address: {err}"));
    assert_eq!(address.as_deref(), Some("165.225.1.2"));
}

#[tokio::test]
async fn kill_is_a_graceful_stop() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "running", None);
    let controller = attached(&api);

    controller
        .kill()
        .await
        .unwrap_or_else(|err| panic!("kill: {err}"));

    assert_eq!(api.calls(), vec![ApiCall::StopInstance(MACHINE.to_owned())]);
}

#[tokio::test]
async fn power_failures_pass_through() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "stopped", None);
    api.fail_next(
        Operation::StartInstance,
        ApiError::Transport(String::from("connection reset")),
    );
    let controller = attached(&api);

    let Err(err) = controller.start().await else {
        panic!("start should fail");
    };
    let ControllerError::Remote { operation, source, .. } = err else {
        panic!("expected Remote error");
    };
    assert_eq!(operation, "start");
    assert_eq!(source, ApiError::Transport(String::from("connection reset")));
    assert_eq!(api.calls().len(), 1, "no internal retry");
}

#[tokio::test]
async fn remove_releases_identity() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "running", Some("165.225.1.2"));
    let mut controller = attached(&api);

    let removed = controller
        .remove()
        .await
        .unwrap_or_else(|err| panic!("remove: {err}"));

    assert_eq!(removed.as_str(), MACHINE);
    assert_eq!(controller.machine_id(), None);
    assert!(api.machine(MACHINE).is_none());
    assert!(matches!(controller.stop().await, Err(ControllerError::NoMachine)));
}

#[tokio::test]
async fn failed_remove_keeps_identity() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "running", None);
    api.fail_next(
        Operation::DeleteInstance,
        ApiError::Auth(String::from("invalid signature")),
    );
    let mut controller = attached(&api);

    assert!(controller.remove().await.is_err());
    assert_eq!(controller.machine_id().map(MachineId::as_str), Some(MACHINE));
}

#[tokio::test]
async fn docker_url_requires_running_machine() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "stopped", Some("165.225.1.2"));
    let mut controller = attached(&api);

    let Err(err) = controller.docker_url().await else {
        panic!("docker url should need a running machine");
    };
    assert!(
        matches!(err, ControllerError::NotRunning { state: LifecycleState::Stopped, .. }),
        "{err:?}"
    );

    api.set_state(MACHINE, "running");
    let url = controller
        .docker_url()
        .await
        .unwrap_or_else(|err| panic!("docker url: {err}"));
    assert_eq!(url, "tcp://165.225.1.2:2376");
}
