use crate::gardener::Shoot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRestriction {
    /// Key of the shoot's seed selector label.
    pub key: String,
    #[serde(default)]
    pub notify_if: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<AccessRestrictionOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRestrictionOption {
    /// Key of a shoot annotation.
    pub key: String,
    #[serde(default)]
    pub notify_if: bool,
    #[serde(default)]
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRestrictionMessage {
    pub header: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRestrictionMessages(pub Vec<AccessRestrictionMessage>);

impl AccessRestrictionMessages {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for AccessRestrictionMessages {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut lines = Vec::new();
        for message in &self.0 {
            lines.push(message.header.clone());
            lines.extend(message.items.iter().map(|item| format!("* {item}")));
        }

        let width = lines.iter().map(|line| line.chars().count()).max().unwrap_or(0);
        let title = " Access Restriction ";
        let rule_width = width.max(title.len()) + 2;
        writeln!(f, "┌─{title}{}┐", "─".repeat(rule_width - title.len() - 1))?;
        for line in &lines {
            writeln!(
                f,
                "│ {line}{} │",
                " ".repeat(rule_width - 2 - line.chars().count())
            )?;
        }
        write!(f, "└{}┘", "─".repeat(rule_width))
    }
}

/// Evaluates the garden's restrictions against the shoot's seed selector
/// labels; matching options are read from the shoot annotations.
pub fn check_access_restrictions(
    restrictions: &[AccessRestriction],
    shoot: &Shoot,
) -> AccessRestrictionMessages {
    let Some(match_labels) = shoot
        .spec
        .seed_selector
        .as_ref()
        .and_then(|selector| selector.match_labels.as_ref())
    else {
        return AccessRestrictionMessages::default();
    };
    let empty = BTreeMap::new();
    let annotations = shoot.metadata.annotations.as_ref().unwrap_or(&empty);

    let messages = restrictions
        .iter()
        .filter(|restriction| flag_matches(match_labels, &restriction.key, restriction.notify_if))
        .map(|restriction| AccessRestrictionMessage {
            header: restriction.msg.clone(),
            items: restriction
                .options
                .iter()
                .filter(|option| flag_matches(annotations, &option.key, option.notify_if))
                .map(|option| option.msg.clone())
                .collect(),
        })
        .collect();

    AccessRestrictionMessages(messages)
}

fn flag_matches(values: &BTreeMap<String, String>, key: &str, notify_if: bool) -> bool {
    let Some(value) = values.get(key) else {
        return false;
    };
    let enabled = value.trim().eq_ignore_ascii_case("true");
    enabled == notify_if
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gardener::{Shoot, ShootSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    fn restricted_shoot(label: &str, annotation: Option<&str>) -> Shoot {
        Shoot {
            metadata: ObjectMeta {
                name: Some("prod".to_string()),
                namespace: Some("garden-prod1".to_string()),
                annotations: annotation.map(|value| {
                    BTreeMap::from([(
                        "support.gardener.cloud/eu-access-for-cluster-addons".to_string(),
                        value.to_string(),
                    )])
                }),
                ..ObjectMeta::default()
            },
            spec: ShootSpec {
                seed_selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        "seed.gardener.cloud/eu-access".to_string(),
                        label.to_string(),
                    )])),
                    ..LabelSelector::default()
                }),
                ..ShootSpec::default()
            },
            status: None,
        }
    }

    fn restrictions() -> Vec<AccessRestriction> {
        vec![AccessRestriction {
            key: "seed.gardener.cloud/eu-access".to_string(),
            notify_if: true,
            msg: "Do not access this cluster from outside the EU".to_string(),
            options: vec![AccessRestrictionOption {
                key: "support.gardener.cloud/eu-access-for-cluster-addons".to_string(),
                notify_if: false,
                msg: "no personal data allowed in addons".to_string(),
            }],
        }]
    }

    #[test]
    fn matching_label_produces_message_with_options() {
        let messages =
            check_access_restrictions(&restrictions(), &restricted_shoot("true", Some("false")));
        assert_eq!(messages.0.len(), 1);
        assert_eq!(messages.0[0].items, vec!["no personal data allowed in addons"]);

        let rendered = messages.to_string();
        assert!(rendered.contains("Access Restriction"));
        assert!(rendered.contains("* no personal data allowed in addons"));
    }

    #[test]
    fn non_matching_label_produces_nothing() {
        assert!(
            check_access_restrictions(&restrictions(), &restricted_shoot("false", None)).is_empty()
        );

        let mut shoot = restricted_shoot("true", None);
        shoot.spec.seed_selector = None;
        assert!(check_access_restrictions(&restrictions(), &shoot).is_empty());
    }

    #[test]
    fn missing_annotation_skips_option() {
        let messages = check_access_restrictions(&restrictions(), &restricted_shoot("true", None));
        assert_eq!(messages.0.len(), 1);
        assert!(messages.0[0].items.is_empty());
    }
}
