//! CloudAPI wire types and their conversion into compute API values.

use serde::{Deserialize, Serialize};

use crate::compute::{CreatedInstance, ImageCatalogEntry, InstanceRecord, PackageInfo};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ImageBody {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    #[serde(default)]
    pub(super) version: String,
    #[serde(default)]
    pub(super) published_at: Option<String>,
}

impl From<ImageBody> for ImageCatalogEntry {
    fn from(value: ImageBody) -> Self {
        Self {
            id: value.id,
            name: value.name,
            version: value.version,
            published_at: value.published_at.unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct PackageBody {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
}

impl From<PackageBody> for PackageInfo {
    fn from(value: PackageBody) -> Self {
        Self {
            id: value.id,
            name: value.name,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct MachineBody {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    #[serde(default)]
    pub(super) state: String,
    #[serde(default, rename = "primaryIp")]
    pub(super) primary_ip: Option<String>,
}

impl From<MachineBody> for InstanceRecord {
    fn from(value: MachineBody) -> Self {
        Self {
            id: value.id,
            name: value.name,
            primary_ip: value.primary_ip.filter(|ip| !ip.is_empty()),
            state: value.state,
        }
    }
}

impl From<MachineBody> for CreatedInstance {
    fn from(value: MachineBody) -> Self {
        Self { id: value.id }
    }
}

#[derive(Serialize)]
pub(super) struct CreateMachineBody<'a> {
    pub(super) name: &'a str,
    pub(super) image: &'a str,
    pub(super) package: &'a str,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub(super) struct ErrorBody {
    #[serde(default)]
    pub(super) code: String,
    #[serde(default)]
    pub(super) message: String,
}
