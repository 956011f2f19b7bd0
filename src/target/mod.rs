mod manager;
mod pattern;
mod provider;

pub use manager::Manager;
pub use provider::{DynamicTargetProvider, FilesystemTargetProvider, TargetProvider};
pub(crate) use provider::write_atomically;

#[cfg(test)]
pub(crate) use manager::testing;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Hierarchical address of a cluster: garden, then project or seed, then shoot.
///
/// Values are immutable; the `with_*` methods return modified copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    garden: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    seed: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    shoot: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    control_plane: bool,
}

impl Target {
    pub fn new(
        garden: impl Into<String>,
        project: impl Into<String>,
        seed: impl Into<String>,
        shoot: impl Into<String>,
    ) -> Self {
        Self {
            garden: garden.into(),
            project: project.into(),
            seed: seed.into(),
            shoot: shoot.into(),
            control_plane: false,
        }
    }

    pub fn garden_name(&self) -> &str {
        &self.garden
    }

    pub fn project_name(&self) -> &str {
        &self.project
    }

    pub fn seed_name(&self) -> &str {
        &self.seed
    }

    pub fn shoot_name(&self) -> &str {
        &self.shoot
    }

    pub fn control_plane(&self) -> bool {
        self.control_plane
    }

    pub fn is_empty(&self) -> bool {
        self.garden.is_empty()
            && self.project.is_empty()
            && self.seed.is_empty()
            && self.shoot.is_empty()
    }

    pub fn with_garden_name(&self, name: &str) -> Self {
        Self {
            garden: name.to_string(),
            ..self.clone()
        }
    }

    pub fn with_project_name(&self, name: &str) -> Self {
        let seed = if name.is_empty() {
            self.seed.clone()
        } else {
            String::new()
        };
        Self {
            project: name.to_string(),
            seed,
            ..self.clone()
        }
    }

    pub fn with_seed_name(&self, name: &str) -> Self {
        let project = if name.is_empty() {
            self.project.clone()
        } else {
            String::new()
        };
        Self {
            seed: name.to_string(),
            project,
            ..self.clone()
        }
    }

    pub fn with_shoot_name(&self, name: &str) -> Self {
        Self {
            shoot: name.to_string(),
            control_plane: self.control_plane && !name.is_empty(),
            ..self.clone()
        }
    }

    pub fn with_control_plane(&self, control_plane: bool) -> Self {
        Self {
            control_plane,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.garden.is_empty()
            && (!self.project.is_empty() || !self.seed.is_empty() || !self.shoot.is_empty())
        {
            return Err(Error::Validation(
                "a project, seed or shoot can only be targeted together with a garden".to_string(),
            ));
        }
        if !self.project.is_empty() && !self.seed.is_empty() {
            return Err(Error::Validation(
                "a project and a seed cannot be targeted at the same time".to_string(),
            ));
        }
        if self.control_plane && self.shoot.is_empty() {
            return Err(Error::Validation(
                "the control plane can only be targeted together with a shoot".to_string(),
            ));
        }
        Ok(())
    }

    pub fn as_list_option(&self) -> ShootSelector {
        let scope = if !self.project.is_empty() {
            ShootScope::Project(self.project.clone())
        } else if !self.seed.is_empty() {
            ShootScope::Seed(self.seed.clone())
        } else {
            ShootScope::All
        };
        ShootSelector {
            scope,
            name: Some(self.shoot.clone()).filter(|name| !name.is_empty()),
        }
    }

    /// `--garden … --project|--seed … --shoot …` flags that address this target.
    pub fn as_flags(&self) -> String {
        let mut flags = vec![format!("--garden {}", self.garden)];
        if !self.project.is_empty() {
            flags.push(format!("--project {}", self.project));
        }
        if !self.seed.is_empty() {
            flags.push(format!("--seed {}", self.seed));
        }
        if !self.shoot.is_empty() {
            flags.push(format!("--shoot {}", self.shoot));
        }
        flags.join(" ")
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        for (level, value) in [
            ("garden", &self.garden),
            ("project", &self.project),
            ("seed", &self.seed),
            ("shoot", &self.shoot),
        ] {
            if !value.is_empty() {
                parts.push(format!("{level}:{value}"));
            }
        }
        if self.control_plane {
            parts.push("control-plane".to_string());
        }
        if parts.is_empty() {
            return write!(f, "<none>");
        }
        write!(f, "{}", parts.join(" / "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShootScope {
    All,
    Project(String),
    Seed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShootSelector {
    pub scope: ShootScope,
    pub name: Option<String>,
}

impl ShootSelector {
    pub fn named(name: &str) -> Self {
        Self {
            scope: ShootScope::All,
            name: Some(name.to_string()),
        }
    }

    pub fn field_selector(&self) -> Option<String> {
        let mut fields = Vec::new();
        if let Some(name) = &self.name {
            fields.push(format!("metadata.name={name}"));
        }
        if let ShootScope::Seed(seed) = &self.scope {
            fields.push(format!("spec.seedName={seed}"));
        }
        if fields.is_empty() {
            None
        } else {
            Some(fields.join(","))
        }
    }
}

/// Target overrides given on the command line. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetFlags {
    garden: String,
    project: String,
    seed: String,
    shoot: String,
    control_plane: bool,
    confirm_access_restriction: bool,
}

impl TargetFlags {
    pub fn new(
        garden: impl Into<String>,
        project: impl Into<String>,
        seed: impl Into<String>,
        shoot: impl Into<String>,
        control_plane: bool,
    ) -> Self {
        Self {
            garden: garden.into(),
            project: project.into(),
            seed: seed.into(),
            shoot: shoot.into(),
            control_plane,
            confirm_access_restriction: false,
        }
    }

    pub fn with_confirm_access_restriction(mut self, confirm: bool) -> Self {
        self.confirm_access_restriction = confirm;
        self
    }

    pub fn shoot_name(&self) -> &str {
        &self.shoot
    }

    pub fn confirm_access_restriction(&self) -> bool {
        self.confirm_access_restriction
    }

    /// True when no target override was given. The confirm bit is not an override.
    pub fn is_empty(&self) -> bool {
        self.garden.is_empty()
            && self.project.is_empty()
            && self.seed.is_empty()
            && self.shoot.is_empty()
            && !self.control_plane
    }

    /// The flags alone address a project or seed (and maybe a shoot).
    pub fn is_complete_target(&self) -> bool {
        !self.garden.is_empty() && (self.project.is_empty() != self.seed.is_empty())
    }

    pub fn to_target(&self) -> Target {
        Target::new(&self.garden, &self.project, &self.seed, &self.shoot)
            .with_control_plane(self.control_plane && !self.shoot.is_empty())
    }

    /// Layers the flags over `persisted`, moving up the hierarchy when
    /// `--garden` is given.
    pub fn overlay(&self, persisted: &Target) -> Target {
        if self.is_empty() {
            return persisted.clone();
        }
        if self.is_complete_target() {
            return self.to_target();
        }

        let mut target = persisted.clone();
        if !self.garden.is_empty() {
            target = Target::new(&self.garden, "", "", "");
        }
        if !self.project.is_empty() {
            target = target.with_project_name(&self.project).with_shoot_name("");
        }
        if !self.seed.is_empty() {
            target = target.with_seed_name(&self.seed).with_shoot_name("");
        }
        if !self.shoot.is_empty() {
            target = target.with_shoot_name(&self.shoot);
        }
        if self.control_plane {
            target = target.with_control_plane(true);
        }
        target
    }

    /// Overlay used while completing flags: keeps the persisted project/seed
    /// context unless `--garden` replaces the whole target.
    pub fn completion_overlay(&self, persisted: &Target) -> Target {
        let base = if self.garden.is_empty() {
            persisted.clone()
        } else {
            Target::new(&self.garden, "", "", "")
        };
        if !self.project.is_empty() {
            base.with_project_name(&self.project)
        } else if !self.seed.is_empty() {
            base.with_seed_name(&self.seed)
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_shapes() -> Vec<Target> {
        vec![
            Target::default(),
            Target::new("g", "", "", ""),
            Target::new("g", "p", "", ""),
            Target::new("g", "", "s", ""),
            Target::new("g", "p", "", "sh"),
            Target::new("g", "", "s", "sh"),
            Target::new("g", "", "", "sh"),
            Target::new("g", "p", "", "sh").with_control_plane(true),
        ]
    }

    #[test]
    fn mutators_preserve_project_seed_exclusivity() {
        for target in all_shapes() {
            for next in [
                target.with_garden_name("g2"),
                target.with_project_name("p2"),
                target.with_seed_name("s2"),
                target.with_shoot_name("x"),
                target.with_project_name(""),
                target.with_seed_name(""),
                target.with_shoot_name(""),
            ] {
                assert!(
                    next.project_name().is_empty() || next.seed_name().is_empty(),
                    "{next:?}"
                );
                if !target.garden_name().is_empty() {
                    assert!(next.validate().is_ok(), "{next:?}");
                }
            }
        }
    }

    #[test]
    fn with_project_name_is_idempotent_and_clears() {
        let target = Target::new("g", "", "s", "sh");
        let once = target.with_project_name("p");
        assert_eq!(once, once.with_project_name("p"));
        assert_eq!(once.seed_name(), "");
        assert_eq!(once.with_project_name("").project_name(), "");
    }

    #[test]
    fn clearing_shoot_clears_control_plane() {
        let target = Target::new("g", "p", "", "sh").with_control_plane(true);
        assert!(!target.with_shoot_name("").control_plane());
        assert!(target.with_shoot_name("other").control_plane());
    }

    #[test]
    fn validation_rejects_broken_combinations() {
        assert!(Target::new("", "", "", "sh").validate().is_err());
        assert!(Target::new("", "p", "", "").validate().is_err());
        assert!(Target::new("g", "p", "s", "").validate().is_err());
        assert!(Target::new("g", "p", "", "").with_control_plane(true).validate().is_err());
        assert!(Target::default().validate().is_ok());
        assert!(Target::default().is_empty());
    }

    #[test]
    fn persisted_document_round_trips() {
        for target in all_shapes() {
            let raw = serde_yaml::to_string(&target).unwrap();
            let back: Target = serde_yaml::from_str(&raw).unwrap();
            assert_eq!(back, target);
        }

        let target = Target::new("g", "p", "", "sh").with_control_plane(true);
        let raw = serde_yaml::to_string(&target).unwrap();
        assert!(raw.contains("controlPlane: true"));
        assert!(!raw.contains("seed"));
    }

    #[test]
    fn list_option_follows_scope() {
        let by_project = Target::new("g", "p", "", "sh").as_list_option();
        assert_eq!(by_project.scope, ShootScope::Project("p".to_string()));
        assert_eq!(by_project.field_selector().as_deref(), Some("metadata.name=sh"));

        let by_seed = Target::new("g", "", "s", "sh").as_list_option();
        assert_eq!(
            by_seed.field_selector().as_deref(),
            Some("metadata.name=sh,spec.seedName=s")
        );

        assert_eq!(
            Target::new("g", "", "", "").as_list_option(),
            ShootSelector {
                scope: ShootScope::All,
                name: None,
            }
        );
    }

    #[test]
    fn garden_flag_moves_up_the_hierarchy() {
        let persisted = Target::new("g1", "p1", "", "sh1");
        let flags = TargetFlags::new("g2", "", "", "", false);
        assert_eq!(flags.overlay(&persisted), Target::new("g2", "", "", ""));

        let flags = TargetFlags::new("g2", "", "", "sh2", false);
        assert_eq!(flags.overlay(&persisted), Target::new("g2", "", "", "sh2"));
    }

    #[test]
    fn partial_flags_override_persisted_fields() {
        let persisted = Target::new("g1", "p1", "", "sh1");

        let flags = TargetFlags::new("", "", "", "sh2", false);
        assert_eq!(flags.overlay(&persisted), Target::new("g1", "p1", "", "sh2"));

        let flags = TargetFlags::new("", "", "s1", "", false);
        assert_eq!(flags.overlay(&persisted), Target::new("g1", "", "s1", ""));

        let flags = TargetFlags::new("", "", "", "", true);
        assert!(flags.overlay(&persisted).control_plane());

        let flags = TargetFlags::default().with_confirm_access_restriction(true);
        assert_eq!(flags.overlay(&persisted), persisted);
    }

    #[test]
    fn complete_flags_ignore_the_file() {
        let persisted = Target::new("g1", "p1", "", "sh1");
        let flags = TargetFlags::new("g2", "", "s2", "sh2", false);
        assert_eq!(flags.overlay(&persisted), Target::new("g2", "", "s2", "sh2"));
    }

    #[test]
    fn completion_overlay_keeps_project_context() {
        let persisted = Target::new("g1", "p1", "", "sh1");
        let flags = TargetFlags::new("", "", "", "sh2", false);
        assert_eq!(flags.completion_overlay(&persisted), persisted);

        let flags = TargetFlags::new("", "", "s1", "", false);
        assert_eq!(flags.completion_overlay(&persisted), Target::new("g1", "", "s1", "sh1"));
    }

    #[test]
    fn completion_overlay_applies_project_after_garden_reset() {
        let persisted = Target::new("g1", "p1", "", "sh1");
        let flags = TargetFlags::new("g2", "p2", "", "", false);
        assert_eq!(flags.completion_overlay(&persisted), Target::new("g2", "p2", "", ""));

        let flags = TargetFlags::new("g2", "", "s2", "", false);
        assert_eq!(flags.completion_overlay(&persisted), Target::new("g2", "", "s2", ""));

        let flags = TargetFlags::new("g2", "", "", "", false);
        assert_eq!(flags.completion_overlay(&persisted), Target::new("g2", "", "", ""));
    }
}
