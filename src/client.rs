use crate::config::Garden;
use crate::error::{Error, Result, classify};
use crate::gardener::{
    Bastion, CloudProfile, GARDEN_NAMESPACE, GardenerKind, ManagedSeed, Project, SecretBinding,
    Seed, Shoot,
};
use crate::kubeconfig::ClientConfig;
use crate::target::{ShootScope, ShootSelector};
use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait GardenClient: Send + Sync {
    async fn get_project(&self, name: &str) -> Result<Project>;
    async fn get_project_by_namespace(&self, namespace: &str) -> Result<Project>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn get_seed(&self, name: &str) -> Result<Seed>;
    async fn list_seeds(&self) -> Result<Vec<Seed>>;
    async fn list_shoots(&self, selector: &ShootSelector) -> Result<Vec<Shoot>>;
    /// Shoot backing a managed seed; `NotFound` for seeds that are not managed.
    async fn get_shoot_of_managed_seed(&self, seed_name: &str) -> Result<Shoot>;
    async fn get_secret_binding(&self, namespace: &str, name: &str) -> Result<SecretBinding>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;
    async fn get_cloud_profile(&self, name: &str) -> Result<CloudProfile>;
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;
    async fn list_bastions(&self, namespace: &str) -> Result<Vec<Bastion>>;
    async fn patch_bastion(&self, old: &Bastion, new: &Bastion) -> Result<()>;
    async fn create_token_review(&self, token: &str) -> Result<String>;

    async fn find_shoot(&self, selector: &ShootSelector) -> Result<Shoot> {
        let mut shoots = self.list_shoots(selector).await?;
        let name = selector.name.clone().unwrap_or_default();
        match shoots.len() {
            0 => Err(Error::not_found("shoot", name)),
            1 => Ok(shoots.remove(0)),
            _ => Err(Error::Ambiguous {
                what: format!("shoot {name:?}"),
                candidates: shoots
                    .iter()
                    .map(|shoot| format!("{}/{}", shoot.namespace(), shoot.name()))
                    .collect(),
            }),
        }
    }
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn garden_client(&self, garden: &Garden) -> Result<Arc<dyn GardenClient>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KubeClientFactory;

#[async_trait]
impl ClientFactory for KubeClientFactory {
    async fn garden_client(&self, garden: &Garden) -> Result<Arc<dyn GardenClient>> {
        let client = ClientConfig::for_garden(garden)?.client().await?;
        Ok(Arc::new(KubeGardenClient::new(client)))
    }
}

#[derive(Clone)]
pub struct KubeGardenClient {
    client: Client,
}

impl KubeGardenClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: GardenerKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    async fn get<T>(&self, kind: GardenerKind, namespace: Option<&str>, name: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let object = self
            .api(kind, namespace)
            .get(name)
            .await
            .map_err(|error| {
                classify(kind.label(), name, format!("get {} {name}", kind.label()), error)
            })?;
        from_dynamic(object)
    }

    async fn list<T>(
        &self,
        kind: GardenerKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let list = self
            .api(kind, namespace)
            .list(params)
            .await
            .map_err(|error| Error::upstream(format!("list {}s", kind.label()), error))?;
        list.items.into_iter().map(from_dynamic).collect()
    }
}

#[async_trait]
impl GardenClient for KubeGardenClient {
    async fn get_project(&self, name: &str) -> Result<Project> {
        self.get(GardenerKind::Project, None, name).await
    }

    async fn get_project_by_namespace(&self, namespace: &str) -> Result<Project> {
        self.list_projects()
            .await?
            .into_iter()
            .find(|project| project.namespace() == Some(namespace))
            .ok_or_else(|| Error::not_found("project for namespace", namespace))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.list(GardenerKind::Project, None, &ListParams::default())
            .await
    }

    async fn get_seed(&self, name: &str) -> Result<Seed> {
        self.get(GardenerKind::Seed, None, name).await
    }

    async fn list_seeds(&self) -> Result<Vec<Seed>> {
        self.list(GardenerKind::Seed, None, &ListParams::default())
            .await
    }

    async fn list_shoots(&self, selector: &ShootSelector) -> Result<Vec<Shoot>> {
        let mut params = ListParams::default();
        if let Some(fields) = selector.field_selector() {
            params = params.fields(&fields);
        }

        let namespace = match &selector.scope {
            ShootScope::Project(project) => {
                let project = self.get_project(project).await?;
                let namespace = project.namespace().map(str::to_string).ok_or_else(|| {
                    Error::Validation(format!("project {:?} has no namespace", project.name()))
                })?;
                Some(namespace)
            }
            ShootScope::Seed(_) | ShootScope::All => None,
        };

        debug!(?selector, ?namespace, "listing shoots");
        self.list(GardenerKind::Shoot, namespace.as_deref(), &params)
            .await
    }

    async fn get_shoot_of_managed_seed(&self, seed_name: &str) -> Result<Shoot> {
        let managed_seed: ManagedSeed = self
            .get(GardenerKind::ManagedSeed, Some(GARDEN_NAMESPACE), seed_name)
            .await?;
        let shoot_name = managed_seed
            .spec
            .shoot
            .map(|shoot| shoot.name)
            .ok_or_else(|| Error::not_found("shoot of managed seed", seed_name))?;
        self.get(GardenerKind::Shoot, Some(GARDEN_NAMESPACE), &shoot_name)
            .await
    }

    async fn get_secret_binding(&self, namespace: &str, name: &str) -> Result<SecretBinding> {
        self.get(GardenerKind::SecretBinding, Some(namespace), name)
            .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|error| {
            classify("secret", name, format!("get secret {namespace}/{name}"), error)
        })
    }

    async fn get_cloud_profile(&self, name: &str) -> Result<CloudProfile> {
        self.get(GardenerKind::CloudProfile, None, name).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|error| {
            classify("config map", name, format!("get config map {namespace}/{name}"), error)
        })
    }

    async fn list_bastions(&self, namespace: &str) -> Result<Vec<Bastion>> {
        self.list(GardenerKind::Bastion, Some(namespace), &ListParams::default())
            .await
    }

    async fn patch_bastion(&self, old: &Bastion, new: &Bastion) -> Result<()> {
        let patch = serde_json::json!({
            "spec": {
                "ingress": new.spec.ingress,
            }
        });
        debug!(
            bastion = old.name(),
            from = ?old.ingress_cidrs(),
            to = ?new.ingress_cidrs(),
            "patching bastion ingress"
        );

        let _ = self
            .api(GardenerKind::Bastion, Some(old.namespace()))
            .patch(old.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|error| {
                classify(
                    "bastion",
                    old.name(),
                    format!("patch bastion {}/{}", old.namespace(), old.name()),
                    error,
                )
            })?;
        Ok(())
    }

    async fn create_token_review(&self, token: &str) -> Result<String> {
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                ..TokenReviewSpec::default()
            },
            ..TokenReview::default()
        };
        let api: Api<TokenReview> = Api::all(self.client.clone());
        let created = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|error| Error::upstream("create token review", error))?;

        created
            .status
            .and_then(|status| status.user)
            .and_then(|user| user.username)
            .filter(|username| !username.is_empty())
            .ok_or(Error::UnresolvableIdentity)
    }
}

fn from_dynamic<T>(object: DynamicObject) -> Result<T>
where
    T: DeserializeOwned,
{
    let value =
        serde_json::to_value(object).map_err(|error| Error::serialization("decode object", error))?;
    serde_json::from_value(value).map_err(|error| Error::serialization("decode object", error))
}
