use super::{Target, TargetFlags, TargetProvider};
use crate::access::{AccessRestrictionMessages, check_access_restrictions};
use crate::client::{ClientFactory, GardenClient};
use crate::config::{Config, Garden};
use crate::error::{Error, Result};
use crate::gardener::Shoot;
use crate::kubeconfig::{self, ClientConfig};
use crate::session::Session;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads, mutates and materializes the session's target.
///
/// Normal commands get a manager whose provider layers the command-line
/// flags over `target.yaml`; completion callbacks get one reading the file
/// only.
pub struct Manager {
    config: Arc<Config>,
    session: Session,
    provider: Box<dyn TargetProvider>,
    flags: TargetFlags,
    clients: Arc<dyn ClientFactory>,
}

impl Manager {
    pub fn new(
        config: Arc<Config>,
        session: Session,
        provider: Box<dyn TargetProvider>,
        flags: TargetFlags,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            config,
            session,
            provider,
            flags,
            clients,
        }
    }

    pub fn configuration(&self) -> &Config {
        &self.config
    }

    pub fn session_dir(&self) -> &Path {
        self.session.dir()
    }

    pub fn target_flags(&self) -> &TargetFlags {
        &self.flags
    }

    pub fn current_target(&self) -> Result<Target> {
        self.provider.read()
    }

    pub async fn garden_client(&self, garden_name: &str) -> Result<Arc<dyn GardenClient>> {
        let garden = self.config.garden(garden_name)?;
        self.clients.garden_client(garden).await
    }

    pub async fn target_garden(&self, name: &str) -> Result<()> {
        let garden = self.config.garden(name)?;
        self.persist(&Target::new(&garden.identity, "", "", "")).await
    }

    pub async fn target_project(&self, name: &str) -> Result<()> {
        let current = self.current_target()?;
        let client = self.client_for(&current).await?;
        client.get_project(name).await?;

        let target = current.with_project_name(name).with_shoot_name("");
        self.persist(&target).await
    }

    pub async fn target_seed(&self, name: &str) -> Result<()> {
        let current = self.current_target()?;
        let client = self.client_for(&current).await?;
        client.get_seed(name).await?;

        let target = current.with_seed_name(name).with_shoot_name("");
        self.persist(&target).await
    }

    /// Targets a shoot. Without project or seed context the owning project
    /// is derived from the shoot's namespace.
    pub async fn target_shoot(&self, name: &str) -> Result<()> {
        let current = self.current_target()?;
        let client = self.client_for(&current).await?;

        let wanted = current.with_shoot_name(name);
        let shoot = client.find_shoot(&wanted.as_list_option()).await?;

        let target = if current.project_name().is_empty() && current.seed_name().is_empty() {
            let project = client.get_project_by_namespace(shoot.namespace()).await?;
            debug!(shoot = name, project = project.name(), "resolved owning project");
            wanted.with_project_name(project.name())
        } else {
            wanted
        };

        self.persist(&target.with_control_plane(false)).await
    }

    pub async fn unset_target_garden(&self) -> Result<String> {
        let current = self.current_target()?;
        if current.garden_name().is_empty() {
            return Err(Error::no_garden_targeted());
        }

        self.persist(&Target::default()).await?;
        Ok(current.garden_name().to_string())
    }

    pub async fn unset_target_project(&self) -> Result<String> {
        let current = self.current_target()?;
        if current.project_name().is_empty() {
            return Err(Error::Validation("no project targeted".to_string()));
        }

        self.persist(&current.with_project_name("").with_shoot_name(""))
            .await?;
        Ok(current.project_name().to_string())
    }

    pub async fn unset_target_seed(&self) -> Result<String> {
        let current = self.current_target()?;
        if current.seed_name().is_empty() {
            return Err(Error::Validation("no seed targeted".to_string()));
        }

        self.persist(&current.with_seed_name("").with_shoot_name(""))
            .await?;
        Ok(current.seed_name().to_string())
    }

    pub async fn unset_target_shoot(&self) -> Result<String> {
        let current = self.current_target()?;
        if current.shoot_name().is_empty() {
            return Err(Error::no_shoot_targeted());
        }

        self.persist(&current.with_shoot_name("")).await?;
        Ok(current.shoot_name().to_string())
    }

    pub async fn target_control_plane(&self) -> Result<()> {
        let current = self.current_target()?;
        if current.shoot_name().is_empty() {
            return Err(Error::no_shoot_targeted());
        }

        self.persist(&current.with_control_plane(true)).await
    }

    pub async fn unset_target_control_plane(&self) -> Result<()> {
        let current = self.current_target()?;
        if !current.control_plane() {
            return Err(Error::Validation("control plane is not targeted".to_string()));
        }

        self.persist(&current.with_control_plane(false)).await
    }

    pub async fn client_config(&self, target: &Target) -> Result<ClientConfig> {
        target.validate()?;
        if target.garden_name().is_empty() {
            return Err(Error::no_garden_targeted());
        }
        let garden = self.config.garden(target.garden_name())?;

        if !target.shoot_name().is_empty() {
            let client = self.clients.garden_client(garden).await?;
            let shoot = client.find_shoot(&target.as_list_option()).await?;
            if !target.control_plane() {
                return shoot_client_config(client.as_ref(), garden, &shoot).await;
            }

            let seed_name = shoot.seed_name().ok_or_else(|| {
                Error::Validation(format!("shoot {:?} is not scheduled to a seed", shoot.name()))
            })?;
            let namespace = shoot.technical_id().ok_or_else(|| {
                Error::Validation(format!("shoot {:?} has no technical ID yet", shoot.name()))
            })?;
            let seed_shoot = client.get_shoot_of_managed_seed(seed_name).await?;
            let config = shoot_client_config(client.as_ref(), garden, &seed_shoot).await?;
            return Ok(config.with_namespace(namespace));
        }

        if !target.seed_name().is_empty() {
            let client = self.clients.garden_client(garden).await?;
            let seed_shoot = client.get_shoot_of_managed_seed(target.seed_name()).await?;
            return shoot_client_config(client.as_ref(), garden, &seed_shoot).await;
        }

        let config = ClientConfig::for_garden(garden)?;
        if target.project_name().is_empty() {
            return Ok(config);
        }

        let client = self.clients.garden_client(garden).await?;
        let project = client.get_project(target.project_name()).await?;
        Ok(match project.namespace() {
            Some(namespace) => config.with_namespace(namespace),
            None => config,
        })
    }

    pub fn write_client_config(&self, config: &ClientConfig) -> Result<PathBuf> {
        kubeconfig::write_client_config(&self.session, config, self.config.link_kubeconfig)
    }

    pub fn kubeconfig_symlink(&self) -> PathBuf {
        self.session.kubeconfig_symlink()
    }

    pub async fn access_restrictions(&self, target: &Target) -> Result<AccessRestrictionMessages> {
        if target.shoot_name().is_empty() {
            return Ok(AccessRestrictionMessages::default());
        }
        let client = self.client_for(target).await?;
        let shoot = client.find_shoot(&target.as_list_option()).await?;
        self.access_restrictions_of(target.garden_name(), &shoot)
    }

    pub fn access_restrictions_of(
        &self,
        garden_name: &str,
        shoot: &Shoot,
    ) -> Result<AccessRestrictionMessages> {
        let garden = self.config.garden(garden_name)?;
        Ok(check_access_restrictions(&garden.access_restrictions, shoot))
    }

    pub fn garden_names(&self) -> Result<Vec<String>> {
        Ok(self.config.garden_names())
    }

    pub async fn project_names(&self) -> Result<Vec<String>> {
        self.project_names_for_target(&self.current_target()?).await
    }

    pub async fn seed_names(&self) -> Result<Vec<String>> {
        self.seed_names_for_target(&self.current_target()?).await
    }

    pub async fn shoot_names(&self) -> Result<Vec<String>> {
        self.shoot_names_for_target(&self.current_target()?).await
    }

    pub async fn project_names_for_target(&self, target: &Target) -> Result<Vec<String>> {
        let client = self.client_for(target).await?;
        let names = client
            .list_projects()
            .await?
            .iter()
            .map(|project| project.name().to_string())
            .collect();
        Ok(sorted(names))
    }

    pub async fn seed_names_for_target(&self, target: &Target) -> Result<Vec<String>> {
        let client = self.client_for(target).await?;
        let names = client
            .list_seeds()
            .await?
            .iter()
            .map(|seed| seed.name().to_string())
            .collect();
        Ok(sorted(names))
    }

    pub async fn shoot_names_for_target(&self, target: &Target) -> Result<Vec<String>> {
        let client = self.client_for(target).await?;
        let names = client
            .list_shoots(&target.with_shoot_name("").as_list_option())
            .await?
            .iter()
            .map(|shoot| shoot.name().to_string())
            .collect();
        Ok(sorted(names))
    }

    pub(super) async fn client_for(&self, target: &Target) -> Result<Arc<dyn GardenClient>> {
        if target.garden_name().is_empty() {
            return Err(Error::no_garden_targeted());
        }
        self.garden_client(target.garden_name()).await
    }

    /// Validates and writes `target`. In symlink mode the kubeconfig and its
    /// link are updated first so `target.yaml` is only replaced once they are.
    pub(super) async fn persist(&self, target: &Target) -> Result<()> {
        target.validate()?;

        if self.config.link_kubeconfig {
            if target.garden_name().is_empty() {
                kubeconfig::remove_symlink(&self.session)?;
            } else {
                let config = self.client_config(target).await?;
                kubeconfig::write_client_config(&self.session, &config, true)?;
            }
        }

        self.provider.write(target)?;

        info!(%target, "target updated");
        Ok(())
    }
}

async fn shoot_client_config(
    client: &dyn GardenClient,
    garden: &Garden,
    shoot: &Shoot,
) -> Result<ClientConfig> {
    let ca_name = format!("{}.ca-cluster", shoot.name());
    let ca_bundle = match client.get_config_map(shoot.namespace(), &ca_name).await {
        Ok(config_map) => config_map
            .data
            .and_then(|data| data.get("ca.crt").cloned()),
        Err(error) if error.is_not_found() => {
            warn!(shoot = shoot.name(), "cluster CA not published, using system roots");
            None
        }
        Err(error) => return Err(error),
    };
    ClientConfig::for_shoot(shoot, ca_bundle.as_deref(), &garden.identity)
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names.dedup();
    names
}
