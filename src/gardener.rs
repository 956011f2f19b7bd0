//! Typed views of the Gardener resources the CLI reads and patches.
//!
//! The objects are fetched as `DynamicObject`s and converted into these
//! structs, so only the fields the CLI needs are modelled.

use k8s_openapi::api::networking::v1::IPBlock;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, ObjectMeta};
use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CREATED_BY_ANNOTATION: &str = "gardener.cloud/created-by";
pub const GARDEN_NAMESPACE: &str = "garden";
pub const GARDEN_PROJECT: &str = "garden";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum GardenerKind {
    Project,
    Seed,
    Shoot,
    ManagedSeed,
    CloudProfile,
    SecretBinding,
    Bastion,
}

impl GardenerKind {
    pub fn api_resource(self) -> ApiResource {
        let (group, version, kind, plural) = match self {
            Self::Project => ("core.gardener.cloud", "v1beta1", "Project", "projects"),
            Self::Seed => ("core.gardener.cloud", "v1beta1", "Seed", "seeds"),
            Self::Shoot => ("core.gardener.cloud", "v1beta1", "Shoot", "shoots"),
            Self::CloudProfile => (
                "core.gardener.cloud",
                "v1beta1",
                "CloudProfile",
                "cloudprofiles",
            ),
            Self::SecretBinding => (
                "core.gardener.cloud",
                "v1beta1",
                "SecretBinding",
                "secretbindings",
            ),
            Self::ManagedSeed => (
                "seedmanagement.gardener.cloud",
                "v1alpha1",
                "ManagedSeed",
                "managedseeds",
            ),
            Self::Bastion => ("operations.gardener.cloud", "v1alpha1", "Bastion", "bastions"),
        };
        ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Seed => "seed",
            Self::Shoot => "shoot",
            Self::ManagedSeed => "managed seed",
            Self::CloudProfile => "cloud profile",
            Self::SecretBinding => "secret binding",
            Self::Bastion => "bastion",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ProjectSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Project {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.spec.namespace.as_deref()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

impl Seed {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Shoot {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ShootSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ShootStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_profile_name: Option<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub provider: ShootProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_binding_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShootProvider {
    #[serde(rename = "type", default)]
    pub type_: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootStatus {
    #[serde(default, rename = "technicalID", skip_serializing_if = "Option::is_none")]
    pub technical_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advertised_addresses: Vec<AdvertisedAddress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvertisedAddress {
    pub name: String,
    pub url: String,
}

impl Shoot {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn seed_name(&self) -> Option<&str> {
        self.spec.seed_name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn technical_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.technical_id.as_deref())
    }

    /// Preferred API server address: `external`, then the first advertised one.
    pub fn api_server_url(&self) -> Option<&str> {
        let addresses = &self.status.as_ref()?.advertised_addresses;
        addresses
            .iter()
            .find(|address| address.name == "external")
            .or_else(|| addresses.first())
            .map(|address| address.url.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagedSeed {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ManagedSeedSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagedSeedSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<ShootReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShootReference {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudProfile {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CloudProfileSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProfileSpec {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBinding {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub secret_ref: SecretReference,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bastion {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: BastionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BastionStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BastionSpec {
    #[serde(default)]
    pub shoot_ref: ShootReference,
    #[serde(default, rename = "sshPublicKey")]
    pub ssh_public_key: String,
    #[serde(default)]
    pub ingress: Vec<BastionIngressPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionIngressPolicy {
    pub ip_block: IPBlock,
}

impl BastionIngressPolicy {
    pub fn from_cidr(cidr: &str) -> Self {
        Self {
            ip_block: IPBlock {
                cidr: cidr.to_string(),
                ..IPBlock::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BastionStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Bastion {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn created_by(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(CREATED_BY_ANNOTATION))
            .map(String::as_str)
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status
                .conditions
                .iter()
                .any(|condition| condition.type_ == "BastionReady" && condition.status == "True")
        })
    }

    pub fn ingress_cidrs(&self) -> Vec<&str> {
        self.spec
            .ingress
            .iter()
            .map(|policy| policy.ip_block.cidr.as_str())
            .collect()
    }
}
