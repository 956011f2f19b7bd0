use super::{Manager, ShootScope, ShootSelector, Target};
use crate::client::GardenClient;
use crate::config::Config;
use crate::error::{Error, Result};
use regex::Regex;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PatternMatch {
    garden: String,
    project: Option<String>,
    namespace: Option<String>,
    shoot: Option<String>,
}

#[derive(Debug, Clone)]
struct Candidate {
    target: Target,
    label: String,
}

impl Candidate {
    fn new(target: Target) -> Self {
        let label = path_label(&target);
        Self { target, label }
    }

    fn shoot(target: Target, namespace: &str) -> Self {
        let label = format!("{} (namespace {namespace})", path_label(&target));
        Self { target, label }
    }
}

fn path_label(target: &Target) -> String {
    [
        target.garden_name(),
        target.project_name(),
        target.seed_name(),
        target.shoot_name(),
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("/")
}

impl Manager {
    /// Targets whatever `value` uniquely identifies.
    ///
    /// Configured garden patterns are tried first, then `/`-separated paths
    /// of one to three segments. An input with several interpretations fails
    /// with `Ambiguous` and leaves the target untouched.
    pub async fn target_match_pattern(&self, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::Validation("target pattern must not be empty".to_string()));
        }

        let current = self.current_target()?;
        let configured =
            match_configured_patterns(self.configuration(), value, current.garden_name())?;
        let target = match configured {
            Some(found) => {
                debug!(?found, "configured pattern matched");
                self.resolve_pattern_match(found).await?
            }
            None => {
                let candidates = self.path_candidates(value, &current).await?;
                pick_unique(value, candidates)?
            }
        };

        info!(pattern = value, %target, "pattern resolved");
        self.persist(&target).await
    }

    async fn resolve_pattern_match(&self, found: PatternMatch) -> Result<Target> {
        let garden = Target::default().with_garden_name(&found.garden);
        let client = self.client_for(&garden).await?;

        let project = match (found.project, found.namespace) {
            (Some(project), _) => Some(client.get_project(&project).await?.name().to_string()),
            (None, Some(namespace)) => Some(
                client
                    .get_project_by_namespace(&namespace)
                    .await?
                    .name()
                    .to_string(),
            ),
            (None, None) => None,
        };

        let Some(shoot) = found.shoot else {
            return Ok(garden.with_project_name(project.as_deref().unwrap_or_default()));
        };

        match project {
            Some(project) => {
                let target = garden.with_project_name(&project).with_shoot_name(&shoot);
                client.find_shoot(&target.as_list_option()).await?;
                Ok(target)
            }
            None => {
                let found = client.find_shoot(&ShootSelector::named(&shoot)).await?;
                let owner = client.get_project_by_namespace(found.namespace()).await?;
                Ok(garden.with_project_name(owner.name()).with_shoot_name(&shoot))
            }
        }
    }

    async fn path_candidates(&self, value: &str, current: &Target) -> Result<Vec<Candidate>> {
        let segments = split_path(value)?;
        let config = self.configuration();

        match segments.as_slice() {
            [garden, middle, shoot] => {
                let garden = config.garden(garden)?.identity.clone();
                self.level_candidates(&garden, middle, Some(shoot)).await
            }
            [first, second] => {
                let mut candidates = Vec::new();
                if let Ok(garden) = config.garden(first) {
                    let garden = garden.identity.clone();
                    candidates.extend(self.level_candidates(&garden, second, None).await?);
                }
                if !current.garden_name().is_empty() {
                    candidates.extend(
                        self.level_candidates(current.garden_name(), first, Some(second))
                            .await?,
                    );
                }
                Ok(candidates)
            }
            [name] => self.name_candidates(current, name).await,
            _ => Ok(Vec::new()),
        }
    }

    async fn level_candidates(
        &self,
        garden: &str,
        level: &str,
        shoot: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        let base = Target::new(garden, "", "", "");
        let client = self.client_for(&base).await?;

        let (is_project, is_seed) = futures::try_join!(
            exists(client.get_project(level)),
            exists(client.get_seed(level)),
        )?;

        let mut scopes = Vec::new();
        if is_project {
            scopes.push(base.with_project_name(level));
        }
        if is_seed {
            scopes.push(base.with_seed_name(level));
        }

        let Some(shoot) = shoot else {
            return Ok(scopes.into_iter().map(Candidate::new).collect());
        };

        let mut candidates = Vec::new();
        for scope in scopes {
            let target = scope.with_shoot_name(shoot);
            candidates.extend(shoot_candidates(client.as_ref(), &target).await?);
        }
        Ok(candidates)
    }

    /// A single segment: shoots in the current context win over projects
    /// and seeds, which win over gardens.
    async fn name_candidates(&self, current: &Target, name: &str) -> Result<Vec<Candidate>> {
        let gardens = || {
            self.configuration()
                .garden(name)
                .map(|garden| vec![Candidate::new(Target::new(&garden.identity, "", "", ""))])
                .unwrap_or_default()
        };
        if current.garden_name().is_empty() {
            return Ok(gardens());
        }

        let client = self.client_for(current).await?;
        let scoped = current.with_shoot_name(name).with_control_plane(false);
        let shoots = match scoped.as_list_option().scope {
            ShootScope::All => {
                let mut candidates = Vec::new();
                for shoot in client.list_shoots(&ShootSelector::named(name)).await? {
                    let owner = client.get_project_by_namespace(shoot.namespace()).await?;
                    let target = scoped.with_project_name(owner.name());
                    candidates.push(Candidate::shoot(target, shoot.namespace()));
                }
                candidates
            }
            _ => shoot_candidates(client.as_ref(), &scoped).await?,
        };
        if !shoots.is_empty() {
            return Ok(shoots);
        }

        let levels = self
            .level_candidates(current.garden_name(), name, None)
            .await?;
        if !levels.is_empty() {
            return Ok(levels);
        }

        Ok(gardens())
    }
}

async fn shoot_candidates(client: &dyn GardenClient, target: &Target) -> Result<Vec<Candidate>> {
    let shoots = client.list_shoots(&target.as_list_option()).await?;
    Ok(shoots
        .iter()
        .map(|shoot| Candidate::shoot(target.clone(), shoot.namespace()))
        .collect())
}

async fn exists<T>(lookup: impl Future<Output = Result<T>>) -> Result<bool> {
    match lookup.await {
        Ok(_) => Ok(true),
        Err(error) if error.is_not_found() => Ok(false),
        Err(error) => Err(error),
    }
}

/// Tries every garden's patterns; with several matching gardens the
/// currently targeted one wins.
fn match_configured_patterns(
    config: &Config,
    value: &str,
    current_garden: &str,
) -> Result<Option<PatternMatch>> {
    let mut matches = Vec::new();
    for garden in &config.gardens {
        for pattern in &garden.patterns {
            let regex = Regex::new(pattern).map_err(|error| {
                Error::Configuration(format!(
                    "invalid pattern {pattern:?} of garden {}: {error}",
                    garden.identity
                ))
            })?;
            let Some(captures) = regex.captures(value) else {
                continue;
            };

            let group = |name: &str| {
                captures
                    .name(name)
                    .map(|m| m.as_str().to_string())
                    .filter(|value| !value.is_empty())
            };
            matches.push(PatternMatch {
                garden: garden.identity.clone(),
                project: group("project"),
                namespace: group("namespace"),
                shoot: group("shoot"),
            });
            break;
        }
    }

    if matches.len() <= 1 {
        return Ok(matches.pop());
    }
    if let Some(index) = matches.iter().position(|found| found.garden == current_garden) {
        return Ok(Some(matches.swap_remove(index)));
    }
    Err(Error::Ambiguous {
        what: format!("pattern {value:?}"),
        candidates: matches.into_iter().map(|found| found.garden).collect(),
    })
}

fn split_path(value: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = value.split('/').collect();
    if segments.len() > 3 || segments.iter().any(|segment| segment.trim().is_empty()) {
        return Err(Error::Validation(format!(
            "invalid target {value:?}: expected NAME, A/B or GARDEN/PROJECT-OR-SEED/SHOOT"
        )));
    }
    Ok(segments)
}

fn pick_unique(value: &str, mut candidates: Vec<Candidate>) -> Result<Target> {
    match candidates.len() {
        0 => Err(Error::not_found("target", value)),
        1 => Ok(candidates.remove(0).target),
        _ => Err(Error::Ambiguous {
            what: format!("target {value:?}"),
            candidates: candidates.into_iter().map(|candidate| candidate.label).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::testing::{fixture, sample_garden};

    #[test]
    fn paths_are_validated() {
        assert_eq!(split_path("a/b/c").unwrap(), vec!["a", "b", "c"]);
        assert!(split_path("a//c").is_err());
        assert!(split_path("a/b/c/d").is_err());
        assert!(split_path("/a").is_err());
    }

    #[test]
    fn configured_patterns_prefer_current_garden() {
        let mut config = Config::default();
        for identity in ["g1", "g2"] {
            config.gardens.push(crate::config::Garden {
                identity: identity.to_string(),
                patterns: vec!["^(?P<project>[a-z]+)-(?P<shoot>[a-z]+)$".to_string()],
                ..Default::default()
            });
        }

        let found = match_configured_patterns(&config, "dev-web", "g2")
            .unwrap()
            .unwrap();
        assert_eq!(found.garden, "g2");
        assert_eq!(found.project.as_deref(), Some("dev"));
        assert_eq!(found.shoot.as_deref(), Some("web"));

        assert!(matches!(
            match_configured_patterns(&config, "dev-web", "").unwrap_err(),
            Error::Ambiguous { .. }
        ));
        assert_eq!(match_configured_patterns(&config, "DEV", "").unwrap(), None);
    }

    #[test]
    fn broken_pattern_is_a_configuration_error() {
        let config = Config {
            gardens: vec![crate::config::Garden {
                identity: "g".to_string(),
                patterns: vec!["(".to_string()],
                ..Default::default()
            }],
            ..Config::default()
        };
        assert!(matches!(
            match_configured_patterns(&config, "x", "").unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[tokio::test]
    async fn configured_pattern_targets_shoot() {
        let fixture = fixture(sample_garden(), false);
        let manager = fixture.manager();

        manager.target_match_pattern("shoot--prod1--api").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "prod1", "", "api"));

        manager.target_match_pattern("namespace:garden-prod2").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "prod2", "", ""));
    }

    #[tokio::test]
    async fn full_path_targets_shoot() {
        let fixture = fixture(sample_garden(), false);
        let manager = fixture.manager();

        manager.target_match_pattern("my/prod2/web").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "prod2", "", "web"));

        manager.target_match_pattern("mygarden/gcp-us1/web").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "", "gcp-us1", "web"));

        assert!(manager
            .target_match_pattern("mygarden/prod2/api")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn two_segments_cover_both_readings() {
        let fixture = fixture(sample_garden(), false);
        let manager = fixture.manager();

        manager.target_match_pattern("mygarden/prod1").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "prod1", "", ""));

        manager.target_match_pattern("aws-eu1/api").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "", "aws-eu1", "api"));
    }

    #[tokio::test]
    async fn single_name_prefers_shoots() {
        let fixture = fixture(sample_garden(), false);
        let manager = fixture.manager();

        manager.target_match_pattern("mygarden").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "", "", ""));

        manager.target_match_pattern("api").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "prod1", "", "api"));

        manager.target_match_pattern("prod2").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "prod2", "", ""));

        manager.target_match_pattern("web").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("mygarden", "prod2", "", "web"));

        manager.target_match_pattern("other").await.unwrap();
        assert_eq!(fixture.persisted(), Target::new("other", "", "", ""));
    }

    #[tokio::test]
    async fn ambiguous_name_leaves_target_untouched() {
        let fixture = fixture(sample_garden(), false);
        let manager = fixture.manager();
        manager.target_garden("mygarden").await.unwrap();

        match manager.target_match_pattern("web").await.unwrap_err() {
            Error::Ambiguous { candidates, .. } => {
                assert_eq!(
                    candidates,
                    vec![
                        "mygarden/prod1/web (namespace garden-prod1)",
                        "mygarden/prod2/web (namespace garden-prod2)",
                    ]
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(fixture.persisted(), Target::new("mygarden", "", "", ""));

        assert!(manager.target_match_pattern("nothing").await.unwrap_err().is_not_found());
        assert!(manager.target_match_pattern(" ").await.is_err());
    }
}
