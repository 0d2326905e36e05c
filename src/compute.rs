//! Abstraction over the remote compute API consumed by the lifecycle
//! controller and the identifier resolver.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Image state universe used when searching the catalog by name.
pub const ALL_IMAGE_STATES: &str = "all";

/// Immutable snapshot of one image catalog entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageCatalogEntry {
    /// Exact image identifier.
    pub id: String,
    /// Image name (for example `debian-8`).
    pub name: String,
    /// Image version (for example `20150702`).
    pub version: String,
    /// Publication timestamp in RFC 3339 form, exactly as reported remotely.
    pub published_at: String,
}

/// Filter applied when listing the image catalog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageFilter {
    /// Image state universe to search (`all` for every visible state).
    pub state: String,
    /// Optional exact name constraint.
    pub name: Option<String>,
    /// Optional exact version constraint.
    pub version: Option<String>,
}

impl ImageFilter {
    /// Returns a filter covering every visible image state with no name or
    /// version constraint.
    #[must_use]
    pub fn all_states() -> Self {
        Self {
            state: ALL_IMAGE_STATES.to_owned(),
            name: None,
            version: None,
        }
    }

    /// Narrows the filter to entries matching both `name` and `version`.
    #[must_use]
    pub fn name_and_version(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.version = Some(version.into());
        self
    }

    /// Returns `true` when `entry` satisfies the name and version constraints.
    /// The state universe is the server's concern and is not checked here.
    #[must_use]
    pub fn matches(&self, entry: &ImageCatalogEntry) -> bool {
        self.name.as_ref().is_none_or(|name| *name == entry.name)
            && self
                .version
                .as_ref()
                .is_none_or(|version| *version == entry.version)
    }
}

/// Package (instance size) returned by a package lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageInfo {
    /// Exact package identifier.
    pub id: String,
    /// Package name (for example `k4-highcpu-kvm-250M`).
    pub name: String,
}

/// Remote view of a single machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRecord {
    /// Exact machine identifier.
    pub id: String,
    /// Display name chosen at creation.
    pub name: String,
    /// Primary network address, absent until the remote side assigns one.
    pub primary_ip: Option<String>,
    /// Provider-specific state string (for example `running`).
    pub state: String,
}

/// Result of a successful creation call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedInstance {
    /// Exact identifier assigned by the remote API.
    pub id: String,
}

/// Parameters submitted to the remote API to create a machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateInstanceRequest {
    /// Display name for the machine.
    pub name: String,
    /// Exact image identifier.
    pub image_id: String,
    /// Package name or identifier.
    pub package: String,
}

impl CreateInstanceRequest {
    /// Starts a builder for a [`CreateInstanceRequest`].
    #[must_use]
    pub fn builder() -> CreateInstanceRequestBuilder {
        CreateInstanceRequestBuilder::default()
    }

    /// Validates the request, naming the first empty field.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MissingField`] when any field is empty.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.name.is_empty() {
            return Err(RequestError::MissingField(String::from("name")));
        }
        if self.image_id.is_empty() {
            return Err(RequestError::MissingField(String::from("image_id")));
        }
        if self.package.is_empty() {
            return Err(RequestError::MissingField(String::from("package")));
        }
        Ok(())
    }
}

/// Builder for [`CreateInstanceRequest`] that trims and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateInstanceRequestBuilder {
    name: String,
    image_id: String,
    package: String,
}

impl CreateInstanceRequestBuilder {
    /// Sets the machine display name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the exact image identifier.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.image_id = value.into();
        self
    }

    /// Sets the package reference.
    #[must_use]
    pub fn package(mut self, value: impl Into<String>) -> Self {
        self.package = value.into();
        self
    }

    /// Builds and validates the request, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MissingField`] when any field is empty.
    pub fn build(self) -> Result<CreateInstanceRequest, RequestError> {
        let request = CreateInstanceRequest {
            name: self.name.trim().to_owned(),
            image_id: self.image_id.trim().to_owned(),
            package: self.package.trim().to_owned(),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Raised when a creation request is incomplete.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// A required field is empty.
    #[error("missing or empty field: {0}")]
    MissingField(String),
}

/// Errors reported by a [`ComputeApi`] implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The referenced resource does not exist.
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// Resource kind (`image`, `package`, `machine`).
        resource: String,
        /// Identifier used for the lookup.
        id: String,
    },
    /// The remote API refused the request.
    #[error("remote API rejected request with status {status} ({code}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Provider error code (for example `QuotaExceeded`).
        code: String,
        /// Provider error message.
        message: String,
    },
    /// Credentials were refused or requests could not be signed.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Future returned by compute API operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Machine, image, and package operations offered by the remote compute API.
pub trait ComputeApi {
    /// Liveness check.
    fn ping(&self) -> ApiFuture<'_, ()>;

    /// Looks an image up by exact identifier.
    fn get_image<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ImageCatalogEntry>;

    /// Lists catalog entries matching `filter`.
    fn list_images<'a>(&'a self, filter: &'a ImageFilter)
    -> ApiFuture<'a, Vec<ImageCatalogEntry>>;

    /// Looks a package up by name or exact identifier.
    fn get_package<'a>(&'a self, reference: &'a str) -> ApiFuture<'a, PackageInfo>;

    /// Creates a machine and returns its exact identifier.
    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ApiFuture<'a, CreatedInstance>;

    /// Fetches the current remote record of a machine.
    fn get_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, InstanceRecord>;

    /// Boots a stopped machine.
    fn start_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;

    /// Gracefully stops a machine.
    fn stop_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;

    /// Reboots a machine.
    fn reboot_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;

    /// Deletes a machine.
    fn delete_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;
}
