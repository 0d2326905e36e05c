//! Unit tests for the `trireme` CLI binary implementation.

use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::rstest;

use trireme::test_support::FakeComputeApi;
use trireme::{HostIdentity, LifecycleState};

use super::*;

const MACHINE: &str = "b6979942-7d5d-4fe6-a2ec-b812e950625a";

#[derive(Default)]
struct MemoryStore {
    record: Mutex<Option<PersistedMachine>>,
}

impl MemoryStore {
    fn record(&self) -> Option<PersistedMachine> {
        self.record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ConfigWriter for MemoryStore {
    fn current_machine_id(&self) -> Result<Option<String>, ConfigStoreError> {
        Ok(self.record().map(|record| record.machine_id))
    }

    fn write_machine(&self, machine: &PersistedMachine) -> Result<Utf8PathBuf, ConfigStoreError> {
        *self
            .record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(machine.clone());
        Ok(Utf8PathBuf::from("trireme.toml"))
    }

    fn clear_machine(&self) -> Result<Option<Utf8PathBuf>, ConfigStoreError> {
        let mut guard = self
            .record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.take().map(|_| Utf8PathBuf::from("trireme.toml")))
    }
}

fn config() -> TritonConfig {
    TritonConfig {
        account: String::from("acme"),
        key_id: String::from("de:ad:be:ef"),
        key_path: Some(String::from("/home/acme/.ssh/id_rsa")),
        key_material: None,
        url: String::from("https://us-east-1.api.joyent.com"),
        image: String::from("debian-8"),
        package: String::from("k4-highcpu-kvm-250M"),
        ssh_user: String::from("root"),
        machine_name: Some(String::from("web-1")),
        machine_id: None,
        store_path: String::from(".trireme"),
        openssl_bin: String::from("openssl"),
    }
}

fn new_controller(api: &FakeComputeApi) -> MachineController<FakeComputeApi> {
    MachineController::new(
        api.clone(),
        HostIdentity::new("web-1", ".trireme", "root"),
        MachineSettings::new("debian-8", "k4-highcpu-kvm-250M"),
    )
}

fn attached_controller(api: &FakeComputeApi) -> MachineController<FakeComputeApi> {
    MachineController::attach(
        api.clone(),
        HostIdentity::new("web-1", ".trireme", "root"),
        MachineSettings::new("aaa-111", "k4-highcpu-kvm-250M"),
        MachineId::from(MACHINE),
    )
}

async fn run(
    controller: &mut MachineController<FakeComputeApi>,
    store: &MemoryStore,
    cli: Cli,
) -> (Result<i32, CliError>, String, String) {
    let mut out = Vec::new();
    let mut err_out = Vec::new();
    let result = run_command(controller, store, cli, &mut out, &mut err_out).await;
    (
        result,
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err_out).into_owned(),
    )
}

#[test]
fn parse_override_trims_and_accepts_nonempty_values() {
    let parsed = parse_override("--image", "  debian-8@20150702  ")
        .unwrap_or_else(|err| panic!("expected override to parse: {err}"));
    assert_eq!(parsed, "debian-8@20150702");
}

#[test]
fn parse_override_rejects_empty_or_whitespace_values() {
    let Err(err) = parse_override("--package", "   ") else {
        panic!("whitespace override should fail");
    };
    assert!(
        matches!(err, CliError::InvalidOverride { field: "--package", .. }),
        "unexpected error: {err}"
    );
}

#[test]
fn apply_create_overrides_updates_config() {
    let mut config = config();
    let args = CreateCommand {
        name: Some(String::from(" db-1 ")),
        image: Some(String::from("ca291f66")),
        package: None,
        no_wait: true,
    };

    apply_create_overrides(&mut config, &args)
        .unwrap_or_else(|err| panic!("expected overrides to apply: {err}"));

    assert_eq!(config.machine_name.as_deref(), Some("db-1"));
    assert_eq!(config.image, "ca291f66");
    assert_eq!(config.package, "k4-highcpu-kvm-250M");
}

#[test]
fn config_record_lists_persisted_fields() {
    let mut config = config();
    config.machine_id = Some(MACHINE.to_owned());
    let mut out = Vec::new();

    write_config_record(&mut out, &config).unwrap_or_else(|err| panic!("write: {err}"));

    let rendered = String::from_utf8_lossy(&out);
    assert!(rendered.contains("account: acme"), "{rendered}");
    assert!(rendered.contains("key_path: /home/acme/.ssh/id_rsa"), "{rendered}");
    assert!(rendered.contains(&format!("machine_id: {MACHINE}")), "{rendered}");
}

#[tokio::test]
async fn create_records_machine() {
    let api = FakeComputeApi::new()
        .with_image("aaa-111", "debian-8", "20150702", "2015-07-02T15:50:58Z")
        .with_package("pkg-001", "k4-highcpu-kvm-250M")
        .with_ip_on_create("165.225.1.2");
    let store = MemoryStore::default();
    let mut controller = new_controller(&api);

    let (result, out, _) = run(&mut controller, &store, Cli::Create(CreateCommand::default())).await;

    assert!(matches!(result, Ok(0)), "{result:?}");
    let record = store
        .record()
        .unwrap_or_else(|| panic!("machine should be recorded"));
    assert_eq!(record.image, "aaa-111");
    assert_eq!(record.machine_name, "web-1");
    assert_eq!(out.trim(), record.machine_id);
}

#[tokio::test]
async fn create_address_timeout_still_records_machine() {
    let api = FakeComputeApi::new()
        .with_image("aaa-111", "debian-8", "20150702", "2015-07-02T15:50:58Z")
        .with_package("pkg-001", "k4-highcpu-kvm-250M");
    let store = MemoryStore::default();
    let mut controller =
        new_controller(&api).with_wait(Duration::from_millis(1), Duration::from_millis(10));

    let (result, out, _) = run(&mut controller, &store, Cli::Create(CreateCommand::default())).await;

    assert!(
        matches!(result, Err(CliError::Controller(ControllerError::Timeout { .. }))),
        "{result:?}"
    );
    assert!(out.is_empty());
    let machine_id = controller
        .machine_id()
        .cloned()
        .unwrap_or_else(|| panic!("controller should keep the machine"));
    let record = store
        .record()
        .unwrap_or_else(|| panic!("timed-out machine should be recorded"));
    assert_eq!(record.machine_id, machine_id.as_str());
    assert_eq!(record.image, "aaa-111");
}

#[tokio::test]
async fn create_failing_preflight_records_nothing() {
    let api = FakeComputeApi::new().with_package("pkg-001", "k4-highcpu-kvm-250M");
    let store = MemoryStore::default();
    let mut controller = new_controller(&api);

    let (result, _, _) = run(&mut controller, &store, Cli::Create(CreateCommand::default())).await;

    assert!(matches!(result, Err(CliError::Controller(_))), "{result:?}");
    assert!(!api.saw_mutation());
    assert_eq!(store.record(), None);
}

#[rstest]
#[case("running", "Running")]
#[case("shutting_down", "Stopping")]
#[tokio::test]
async fn state_prints_lifecycle_state(#[case] remote: &str, #[case] expected: &str) {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", remote, None);
    let mut controller = attached_controller(&api);

    let (result, out, _) = run(&mut controller, &MemoryStore::default(), Cli::State).await;

    assert!(matches!(result, Ok(0)), "{result:?}");
    assert_eq!(out.trim(), expected);
}

#[tokio::test]
async fn unknown_state_prints_error_and_diagnostic() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "hibernating", None);
    let mut controller = attached_controller(&api);

    let (result, out, err_out) = run(&mut controller, &MemoryStore::default(), Cli::State).await;

    assert!(matches!(result, Ok(1)), "{result:?}");
    assert_eq!(out.trim(), LifecycleState::Error.as_str());
    assert!(err_out.contains("unknown state 'hibernating'"), "{err_out}");
}

#[tokio::test]
async fn rm_forgets_recorded_machine() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "stopped", None);
    let store = MemoryStore::default();
    store
        .write_machine(&PersistedMachine {
            machine_id: MACHINE.to_owned(),
            machine_name: String::from("web-1"),
            image: String::from("aaa-111"),
            package: String::from("k4-highcpu-kvm-250M"),
        })
        .unwrap_or_else(|err| panic!("seed store: {err}"));
    let mut controller = attached_controller(&api);

    let (result, out, _) = run(&mut controller, &store, Cli::Rm).await;

    assert!(matches!(result, Ok(0)), "{result:?}");
    assert_eq!(out.trim(), MACHINE);
    assert_eq!(store.record(), None);
    assert!(api.machine(MACHINE).is_none());
}

#[tokio::test]
async fn ip_without_address_is_an_error() {
    let api = FakeComputeApi::new().with_machine(MACHINE, "web-1", "provisioning", None);
    let mut controller = attached_controller(&api);

    let (result, out, _) = run(&mut controller, &MemoryStore::default(), Cli::Ip).await;

    assert!(
        matches!(result, Err(CliError::Controller(ControllerError::NoAddress { .. }))),
        "{result:?}"
    );
    assert!(out.is_empty());
}

#[test]
fn write_error_writes_cli_error() {
    let mut buf = Vec::new();
    let err = CliError::Config(String::from("missing Triton account"));
    write_error(&mut buf, &err);
    let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
    assert!(
        rendered.contains("configuration error: missing Triton account"),
        "rendered: {rendered}"
    );
}
