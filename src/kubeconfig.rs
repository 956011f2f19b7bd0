use crate::config::Garden;
use crate::error::{Error, Result};
use crate::gardener::Shoot;
use crate::session::Session;
use crate::target::write_atomically;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const GARDENLOGIN_EXTENSION: &str = "client.authentication.k8s.io/exec";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    kubeconfig: Kubeconfig,
}

impl ClientConfig {
    pub fn for_garden(garden: &Garden) -> Result<Self> {
        let path = garden.kubeconfig_path();
        let mut kubeconfig = Kubeconfig::read_from(&path).map_err(|error| {
            Error::Configuration(format!(
                "failed to load kubeconfig {} of garden {}: {error}",
                path.display(),
                garden.identity
            ))
        })?;

        if let Some(context) = &garden.context {
            if !kubeconfig.contexts.iter().any(|named| &named.name == context) {
                return Err(Error::Configuration(format!(
                    "context {context:?} of garden {} does not exist in {}",
                    garden.identity,
                    path.display()
                )));
            }
            kubeconfig.current_context = Some(context.clone());
        }

        Ok(Self { kubeconfig })
    }

    /// Shoot kubeconfig authenticating through the `gardenlogin` credential plugin.
    pub fn for_shoot(
        shoot: &Shoot,
        ca_bundle: Option<&str>,
        garden_identity: &str,
    ) -> Result<Self> {
        let server = shoot.api_server_url().ok_or_else(|| {
            Error::Validation(format!(
                "shoot {}/{} has no advertised API server address yet",
                shoot.namespace(),
                shoot.name()
            ))
        })?;
        let name = shoot
            .technical_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}--{}", shoot.namespace(), shoot.name()));

        let mut cluster = json!({
            "server": server,
            "extensions": [{
                "name": GARDENLOGIN_EXTENSION,
                "extension": {
                    "shootRef": {"namespace": shoot.namespace(), "name": shoot.name()},
                    "gardenClusterIdentity": garden_identity,
                }
            }]
        });
        if let Some(ca_bundle) = ca_bundle {
            cluster["certificate-authority-data"] = json!(BASE64.encode(ca_bundle));
        }

        let document = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{"name": name, "cluster": cluster}],
            "users": [{
                "name": name,
                "user": {
                    "exec": {
                        "apiVersion": "client.authentication.k8s.io/v1beta1",
                        "command": "kubectl",
                        "args": ["gardenlogin", "get-client-certificate"],
                        "provideClusterInfo": true,
                    }
                }
            }],
            "contexts": [{
                "name": name,
                "context": {"cluster": name, "user": name, "namespace": "default"}
            }],
            "current-context": name,
        });

        let kubeconfig = serde_json::from_value(document)
            .map_err(|error| Error::serialization("build shoot kubeconfig", error))?;
        Ok(Self { kubeconfig })
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        let current = self.kubeconfig.current_context.clone();
        if let Some(context) = self
            .kubeconfig
            .contexts
            .iter_mut()
            .find(|named| Some(&named.name) == current.as_ref())
            .and_then(|named| named.context.as_mut())
        {
            context.namespace = Some(namespace.to_string());
        }
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.current_context()
            .and_then(|context| context.namespace.as_deref())
    }

    pub fn current_auth_info(&self) -> Option<&AuthInfo> {
        let user = self.current_context()?.user.as_deref()?;
        self.kubeconfig
            .auth_infos
            .iter()
            .find(|named| named.name == user)
            .and_then(|named| named.auth_info.as_ref())
    }

    fn current_context(&self) -> Option<&kube::config::Context> {
        let current = self.kubeconfig.current_context.as_deref()?;
        self.kubeconfig
            .contexts
            .iter()
            .find(|named| named.name == current)
            .and_then(|named| named.context.as_ref())
    }

    pub async fn client(&self) -> Result<Client> {
        let config = Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions::default(),
        )
        .await
        .map_err(|error| Error::Configuration(format!("invalid kubeconfig: {error}")))?;
        Client::try_from(config).map_err(|error| Error::upstream("create kubernetes client", error))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.kubeconfig)
            .map_err(|error| Error::serialization("render kubeconfig", error))
    }
}

/// Writes `config` into the session directory and returns the path to export.
///
/// With `link` the fixed `kubeconfig.yaml` symlink is repointed at the new
/// file and its path is returned instead.
pub fn write_client_config(
    session: &Session,
    config: &ClientConfig,
    link: bool,
) -> Result<PathBuf> {
    let raw = config.to_yaml()?;
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    let path = session.kubeconfig_file(&digest[..16]);
    write_atomically(&path, raw.as_bytes())?;
    debug!(path = %path.display(), "materialized kubeconfig");

    if !link {
        return Ok(path);
    }

    let link_path = session.kubeconfig_symlink();
    repoint_symlink(&path, &link_path)?;
    Ok(link_path)
}

pub fn remove_symlink(session: &Session) -> Result<()> {
    let link_path = session.kubeconfig_symlink();
    match fs::remove_file(&link_path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(Error::persistence(link_path, error)),
    }
}

#[cfg(unix)]
fn repoint_symlink(file: &Path, link_path: &Path) -> Result<()> {
    let target = file.file_name().map(PathBuf::from).unwrap_or_else(|| file.to_path_buf());
    let staging = link_path.with_file_name(format!(".kubeconfig.{}.yaml", uuid::Uuid::new_v4()));
    std::os::unix::fs::symlink(&target, &staging)
        .map_err(|source| Error::persistence(&staging, source))?;
    fs::rename(&staging, link_path).map_err(|source| {
        let _ = fs::remove_file(&staging);
        Error::persistence(link_path, source)
    })
}

#[cfg(not(unix))]
fn repoint_symlink(file: &Path, link_path: &Path) -> Result<()> {
    let contents = fs::read(file).map_err(|source| Error::persistence(file, source))?;
    write_atomically(link_path, &contents)
}
