//! Triton CloudAPI implementation of the compute API.

mod error;
mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, DATE};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::compute::{
    ApiError, ApiFuture, ComputeApi, CreateInstanceRequest, CreatedInstance, ImageCatalogEntry,
    ImageFilter, InstanceRecord, PackageInfo,
};
use crate::credentials::{RequestSigner, SIGNATURE_ALGORITHM};
use error::Target;
use types::{CreateMachineBody, ImageBody, MachineBody, PackageBody};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "~8";
const API_VERSION_HEADER: &str = "Api-Version";

/// Formats `signature` as a CloudAPI `Authorization` header value.
#[must_use]
pub fn authorization_header(account: &str, key_id: &str, signature: &str) -> String {
    format!(
        "Signature keyId=\"/{account}/keys/{key_id}\",algorithm=\"{SIGNATURE_ALGORITHM}\",headers=\"date\",signature=\"{signature}\""
    )
}

/// HTTPS client for the Triton CloudAPI.
#[derive(Clone)]
pub struct TritonClient {
    http: reqwest::Client,
    base_url: Url,
    account: String,
    signer: Arc<dyn RequestSigner>,
}

impl TritonClient {
    /// Constructs a client for `account` at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] when `base_url` is not an absolute
    /// HTTP(S) URL or the HTTP client cannot be built.
    pub fn new(
        base_url: impl AsRef<str>,
        account: impl Into<String>,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, ApiError> {
        let raw = base_url.as_ref().trim_end_matches('/');
        let parsed = Url::parse(raw)
            .map_err(|err| ApiError::Transport(format!("invalid CloudAPI URL '{raw}': {err}")))?;
        if parsed.cannot_be_a_base() {
            return Err(ApiError::Transport(format!(
                "invalid CloudAPI URL '{raw}': not a base URL"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| error::transport(&err))?;
        Ok(Self {
            http,
            base_url: parsed,
            account: account.into(),
            signer,
        })
    }

    /// Appends each segment percent-encoded, so references cannot escape
    /// their collection.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        if let Some(segment) = segments
            .iter()
            .find(|segment| matches!(**segment, "" | "." | ".."))
        {
            return Err(ApiError::Rejected {
                status: 400,
                code: String::from("InvalidArgument"),
                message: format!("'{segment}' is not a valid identifier"),
            });
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Transport(format!("invalid CloudAPI URL '{}'", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn account_url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut path = Vec::with_capacity(segments.len() + 1);
        path.push(self.account.as_str());
        path.extend_from_slice(segments);
        self.endpoint(&path)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, ApiError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let signature = self
            .signer
            .sign(&format!("date: {date}"))
            .await
            .map_err(|err| ApiError::Auth(err.to_string()))?;
        debug!("{method} {url}");
        Ok(self
            .http
            .request(method, url)
            .header(DATE, date.as_str())
            .header(
                AUTHORIZATION,
                authorization_header(&self.account, self.signer.key_id(), &signature),
            )
            .header(ACCEPT, "application/json")
            .header(API_VERSION_HEADER, API_VERSION))
    }

    async fn send(&self, builder: RequestBuilder, target: Target<'_>) -> Result<Vec<u8>, ApiError> {
        let response = builder.send().await.map_err(|err| error::transport(&err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| error::transport(&err))?;
        if status.is_success() {
            return Ok(body.to_vec());
        }
        Err(error::from_status(status, &body, target))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        target: Target<'_>,
    ) -> Result<T, ApiError> {
        let body = self.send(builder, target).await?;
        serde_json::from_slice(&body).map_err(|err| error::decode(&err))
    }

    async fn machine_action(&self, id: &str, action: &str) -> Result<(), ApiError> {
        let url = self.account_url(&["machines", id])?;
        let builder = self
            .request(Method::POST, url)
            .await?
            .query(&[("action", action)]);
        self.send(builder, Target::new("machine", id)).await?;
        Ok(())
    }
}

impl ComputeApi for TritonClient {
    fn ping(&self) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let url = self.endpoint(&["--ping"])?;
            let target = url.to_string();
            let builder = self.request(Method::GET, url).await?;
            self.send(builder, Target::new("endpoint", &target)).await?;
            Ok(())
        })
    }

    fn get_image<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ImageCatalogEntry> {
        Box::pin(async move {
            let url = self.account_url(&["images", id])?;
            let builder = self.request(Method::GET, url).await?;
            let body: ImageBody = self.fetch(builder, Target::new("image", id)).await?;
            Ok(body.into())
        })
    }

    fn list_images<'a>(
        &'a self,
        filter: &'a ImageFilter,
    ) -> ApiFuture<'a, Vec<ImageCatalogEntry>> {
        Box::pin(async move {
            let url = self.account_url(&["images"])?;
            let mut query = vec![("state", filter.state.as_str())];
            if let Some(name) = filter.name.as_deref() {
                query.push(("name", name));
            }
            if let Some(version) = filter.version.as_deref() {
                query.push(("version", version));
            }
            let builder = self.request(Method::GET, url).await?.query(&query);
            let body: Vec<ImageBody> = self.fetch(builder, Target::new("image", "")).await?;
            Ok(body.into_iter().map(ImageCatalogEntry::from).collect())
        })
    }

    fn get_package<'a>(&'a self, reference: &'a str) -> ApiFuture<'a, PackageInfo> {
        Box::pin(async move {
            let url = self.account_url(&["packages", reference])?;
            let builder = self.request(Method::GET, url).await?;
            let body: PackageBody = self
                .fetch(builder, Target::new("package", reference))
                .await?;
            Ok(body.into())
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ApiFuture<'a, CreatedInstance> {
        Box::pin(async move {
            let url = self.account_url(&["machines"])?;
            let payload = CreateMachineBody {
                name: &request.name,
                image: &request.image_id,
                package: &request.package,
            };
            let builder = self.request(Method::POST, url).await?.json(&payload);
            let body: MachineBody = self
                .fetch(builder, Target::new("machine", &request.name))
                .await?;
            Ok(body.into())
        })
    }

    fn get_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, InstanceRecord> {
        Box::pin(async move {
            let url = self.account_url(&["machines", id])?;
            let builder = self.request(Method::GET, url).await?;
            let body: MachineBody = self.fetch(builder, Target::new("machine", id)).await?;
            Ok(body.into())
        })
    }

    fn start_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.machine_action(id, "start"))
    }

    fn stop_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.machine_action(id, "stop"))
    }

    fn reboot_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.machine_action(id, "reboot"))
    }

    fn delete_instance<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.account_url(&["machines", id])?;
            let builder = self.request(Method::DELETE, url).await?;
            self.send(builder, Target::new("machine", id)).await?;
            Ok(())
        })
    }
}
