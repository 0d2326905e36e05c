//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::compute::{
    ApiError, ApiFuture, ComputeApi, CreateInstanceRequest, CreatedInstance, ImageCatalogEntry,
    ImageFilter, InstanceRecord, PackageInfo,
};

/// Operations exposed by [`ComputeApi`], used to script failures.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// [`ComputeApi::ping`].
    Ping,
    /// [`ComputeApi::get_image`].
    GetImage,
    /// [`ComputeApi::list_images`].
    ListImages,
    /// [`ComputeApi::get_package`].
    GetPackage,
    /// [`ComputeApi::create_instance`].
    CreateInstance,
    /// [`ComputeApi::get_instance`].
    GetInstance,
    /// [`ComputeApi::start_instance`].
    StartInstance,
    /// [`ComputeApi::stop_instance`].
    StopInstance,
    /// [`ComputeApi::reboot_instance`].
    RebootInstance,
    /// [`ComputeApi::delete_instance`].
    DeleteInstance,
}

/// Records a single call made through [`FakeComputeApi`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApiCall {
    /// Liveness check.
    Ping,
    /// Exact image lookup.
    GetImage(String),
    /// Catalog search.
    ListImages(ImageFilter),
    /// Package lookup.
    GetPackage(String),
    /// Machine creation.
    CreateInstance(CreateInstanceRequest),
    /// Machine fetch.
    GetInstance(String),
    /// Machine start.
    StartInstance(String),
    /// Machine stop.
    StopInstance(String),
    /// Machine reboot.
    RebootInstance(String),
    /// Machine deletion.
    DeleteInstance(String),
}

impl ApiCall {
    const fn operation(&self) -> Operation {
        match self {
            Self::Ping => Operation::Ping,
            Self::GetImage(_) => Operation::GetImage,
            Self::ListImages(_) => Operation::ListImages,
            Self::GetPackage(_) => Operation::GetPackage,
            Self::CreateInstance(_) => Operation::CreateInstance,
            Self::GetInstance(_) => Operation::GetInstance,
            Self::StartInstance(_) => Operation::StartInstance,
            Self::StopInstance(_) => Operation::StopInstance,
            Self::RebootInstance(_) => Operation::RebootInstance,
            Self::DeleteInstance(_) => Operation::DeleteInstance,
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    images: Vec<ImageCatalogEntry>,
    packages: Vec<PackageInfo>,
    machines: BTreeMap<String, InstanceRecord>,
    scripted_records: HashMap<String, VecDeque<InstanceRecord>>,
    failures: HashMap<Operation, VecDeque<ApiError>>,
    ip_on_create: Option<String>,
    created: usize,
    calls: Vec<ApiCall>,
}

/// In-memory [`ComputeApi`] with a seeded catalog and scripted failures.
///
/// Clones share state, so a test can keep a handle for assertions while the
/// controller owns another.
#[derive(Clone, Debug, Default)]
pub struct FakeComputeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeComputeApi {
    /// Creates an empty fake with no images, packages, or machines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an image to the catalog.
    #[must_use]
    pub fn with_image(self, id: &str, name: &str, version: &str, published_at: &str) -> Self {
        self.lock().images.push(ImageCatalogEntry {
            id: id.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
            published_at: published_at.to_owned(),
        });
        self
    }

    /// Adds a package that can be looked up by name or identifier.
    #[must_use]
    pub fn with_package(self, id: &str, name: &str) -> Self {
        self.lock().packages.push(PackageInfo {
            id: id.to_owned(),
            name: name.to_owned(),
        });
        self
    }

    /// Seeds an existing machine, as if created by an earlier invocation.
    #[must_use]
    pub fn with_machine(self, id: &str, name: &str, state: &str, primary_ip: Option<&str>) -> Self {
        self.lock().machines.insert(
            id.to_owned(),
            InstanceRecord {
                id: id.to_owned(),
                name: name.to_owned(),
                primary_ip: primary_ip.map(str::to_owned),
                state: state.to_owned(),
            },
        );
        self
    }

    /// Assigns `ip` to machines as soon as they are created.
    #[must_use]
    pub fn with_ip_on_create(self, ip: &str) -> Self {
        self.lock().ip_on_create = Some(ip.to_owned());
        self
    }

    /// Queues an error returned by the next call to `operation`.
    pub fn fail_next(&self, operation: Operation, error: ApiError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Queues records returned by successive `get_instance` calls for `id`
    /// before the stored record is used again.
    pub fn script_instance(&self, id: &str, records: impl IntoIterator<Item = InstanceRecord>) {
        self.lock()
            .scripted_records
            .entry(id.to_owned())
            .or_default()
            .extend(records);
    }

    /// Overwrites the remote state string of a stored machine.
    pub fn set_state(&self, id: &str, state: &str) {
        if let Some(machine) = self.lock().machines.get_mut(id) {
            state.clone_into(&mut machine.state);
        }
    }

    /// Overwrites the primary address of a stored machine.
    pub fn set_primary_ip(&self, id: &str, ip: Option<&str>) {
        if let Some(machine) = self.lock().machines.get_mut(id) {
            machine.primary_ip = ip.map(str::to_owned);
        }
    }

    /// Returns the stored record for `id`, if any.
    #[must_use]
    pub fn machine(&self, id: &str) -> Option<InstanceRecord> {
        self.lock().machines.get(id).cloned()
    }

    /// Returns a snapshot of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Returns `true` when any call of a mutating kind was recorded.
    #[must_use]
    pub fn saw_mutation(&self) -> bool {
        self.lock().calls.iter().any(|call| {
            matches!(
                call,
                ApiCall::CreateInstance(_)
                    | ApiCall::StartInstance(_)
                    | ApiCall::StopInstance(_)
                    | ApiCall::RebootInstance(_)
                    | ApiCall::DeleteInstance(_)
            )
        })
    }

    fn record(&self, call: ApiCall) -> Result<(), ApiError> {
        let mut state = self.lock();
        let operation = call.operation();
        state.calls.push(call);
        match state
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn update_machine(
        &self,
        id: &str,
        update: impl FnOnce(&mut InstanceRecord),
    ) -> Result<(), ApiError> {
        let mut state = self.lock();
        let machine = state
            .machines
            .get_mut(id)
            .ok_or_else(|| not_found("machine", id))?;
        update(machine);
        Ok(())
    }
}

fn not_found(resource: &str, id: &str) -> ApiError {
    ApiError::NotFound {
        resource: resource.to_owned(),
        id: id.to_owned(),
    }
}

impl ComputeApi for FakeComputeApi {
    fn ping(&self) -> ApiFuture<'_, ()> {
        Box::pin(async move { self.record(ApiCall::Ping) })
    }

    fn get_image<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ImageCatalogEntry> {
        Box::pin(async move {
            self.record(ApiCall::GetImage(id.to_owned()))?;
            self.lock()
                .images
                .iter()
                .find(|image| image.id == id)
                .cloned()
                .ok_or_else(|| not_found("image", id))
        })
    }

    fn list_images<'a>(
        &'a self,
        filter: &'a ImageFilter,
    ) -> ApiFuture<'a, Vec<ImageCatalogEntry>> {
        Box::pin(async move {
            self.record(ApiCall::ListImages(filter.clone()))?;
            Ok(self
                .lock()
                .images
                .iter()
                .filter(|image| filter.matches(image))
                .cloned()
                .collect())
        })
    }

    fn get_package<'a>(&'a self, reference: &'a str) -> ApiFuture<'a, PackageInfo> {
        Box::pin(async move {
            self.record(ApiCall::GetPackage(reference.to_owned()))?;
            self.lock()
                .packages
                .iter()
                .find(|package| package.id == reference || package.name == reference)
                .cloned()
                .ok_or_else(|| not_found("package", reference))
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ApiFuture<'a, CreatedInstance> {
        Box::pin(async move {
            self.record(ApiCall::CreateInstance(request.clone()))?;
            let mut state = self.lock();
            state.created += 1;
            let id = format!("{:08x}-0000-4000-8000-000000000000", state.created);
            let primary_ip = state.ip_on_create.clone();
            state.machines.insert(
                id.clone(),
                InstanceRecord {
                    id: id.clone(),
                    name: request.name.clone(),
                    primary_ip,
                    state: String::from("provisioning"),
                },
            );
            Ok(CreatedInstance { id })
        })
    }

    fn get_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, InstanceRecord> {
        Box::pin(async move {
            self.record(ApiCall::GetInstance(id.to_owned()))?;
            let mut state = self.lock();
            if let Some(record) = state
                .scripted_records
                .get_mut(id)
                .and_then(VecDeque::pop_front)
            {
                return Ok(record);
            }
            state
                .machines
                .get(id)
                .cloned()
                .ok_or_else(|| not_found("machine", id))
        })
    }

    fn start_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.record(ApiCall::StartInstance(id.to_owned()))?;
            self.update_machine(id, |machine| machine.state = String::from("running"))
        })
    }

    fn stop_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.record(ApiCall::StopInstance(id.to_owned()))?;
            self.update_machine(id, |machine| machine.state = String::from("stopped"))
        })
    }

    fn reboot_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.record(ApiCall::RebootInstance(id.to_owned()))?;
            self.update_machine(id, |machine| machine.state = String::from("running"))
        })
    }

    fn delete_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.record(ApiCall::DeleteInstance(id.to_owned()))?;
            self.lock()
                .machines
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| not_found("machine", id))
        })
    }
}
