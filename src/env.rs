use crate::access::AccessRestrictionMessages;
use crate::error::{Error, Result};
use crate::gardener::{CloudProfile, GARDEN_PROJECT};
use crate::session::create_private_dir;
use crate::target::{Manager, Target};
use clap::ValueEnum;
use k8s_openapi::api::core::v1::Secret;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const BINARY_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

impl Shell {
    pub fn export(self, name: &str, value: &str) -> String {
        let value = self.quote(value);
        match self {
            Self::Bash | Self::Zsh => format!("export {name}={value};"),
            Self::Fish => format!("set -gx {name} {value};"),
            Self::Powershell => format!("$Env:{name} = {value};"),
        }
    }

    pub fn unset(self, name: &str) -> String {
        match self {
            Self::Bash | Self::Zsh => format!("unset {name};"),
            Self::Fish => format!("set -e {name};"),
            Self::Powershell => format!("Remove-Item -ErrorAction SilentlyContinue Env:\\{name};"),
        }
    }

    pub fn variable(self, name: &str) -> String {
        match self {
            Self::Powershell => format!("$Env:{name}"),
            _ => format!("\"${name}\""),
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            Self::Powershell => "PS> ",
            _ => "$ ",
        }
    }

    pub fn eval_command(self, command: &str) -> String {
        match self {
            Self::Bash | Self::Zsh => format!("eval \"$({command})\""),
            Self::Fish => format!("eval ({command})"),
            Self::Powershell => format!("& {command} | Invoke-Expression"),
        }
    }

    pub fn print(self, line: &str) -> String {
        match self {
            Self::Powershell => format!("Write-Output {};", self.quote(line)),
            _ => format!("printf '%s\\n' {};", self.quote(line)),
        }
    }

    pub fn comment(self, text: &str) -> String {
        text.lines()
            .map(|line| format!("# {line}").trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn quote(self, value: &str) -> String {
        match self {
            Self::Bash | Self::Zsh => format!("'{}'", value.replace('\'', r"'\''")),
            Self::Fish => format!("'{}'", value.replace('\\', r"\\").replace('\'', r"\'")),
            Self::Powershell => format!("'{}'", value.replace('\'', "''")),
        }
    }
}

impl Display for Shell {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
            Self::Powershell => "powershell",
        };
        f.write_str(name)
    }
}

pub async fn kubectl_env(manager: &Manager, shell: Shell, unset: bool) -> Result<String> {
    let target = manager.current_target()?;
    let link = manager.configuration().link_kubeconfig;

    let mut lines = Vec::new();
    if unset {
        lines.push(shell.unset("KUBECONFIG"));
        lines.push(usage_hint(shell, "kubectl-env -u", "reset the kubectl configuration"));
        return Ok(lines.join("\n"));
    }

    let filename = if link {
        let symlink = manager.kubeconfig_symlink();
        if !target.is_empty() && std::fs::symlink_metadata(&symlink).is_err() {
            return Err(Error::Validation(format!(
                "symlink to targeted cluster does not exist: {}",
                symlink.display()
            )));
        }
        symlink
    } else {
        if target.garden_name().is_empty() {
            return Err(Error::no_garden_targeted());
        }
        let config = manager.client_config(&target).await?;
        manager.write_client_config(&config)?
    };

    lines.push(shell.export("KUBECONFIG", &filename.display().to_string()));
    lines.push(usage_hint(shell, "kubectl-env", "configure kubectl"));
    Ok(lines.join("\n"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Aws,
    Azure,
    Gcp,
    Alicloud,
    Openstack,
    Hcloud,
}

impl ProviderKind {
    pub fn parse(provider_type: &str) -> Result<Self> {
        match provider_type {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            "alicloud" => Ok(Self::Alicloud),
            "openstack" => Ok(Self::Openstack),
            "hcloud" => Ok(Self::Hcloud),
            other => Err(Error::Validation(format!(
                "cloud provider {other:?} is not supported"
            ))),
        }
    }

    pub fn cli(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "az",
            Self::Gcp => "gcloud",
            Self::Alicloud => "aliyun",
            Self::Openstack => "openstack",
            Self::Hcloud => "hcloud",
        }
    }

    pub fn required_secret_fields(self) -> &'static [&'static str] {
        match self {
            Self::Aws => &["accessKeyID", "secretAccessKey"],
            Self::Azure => &["clientID", "clientSecret", "tenantID", "subscriptionID"],
            Self::Gcp => &["serviceaccount.json"],
            Self::Alicloud => &["accessKeyID", "accessKeySecret"],
            Self::Openstack => &["domainName", "tenantName", "username", "password"],
            Self::Hcloud => &["hcloudToken"],
        }
    }

    pub fn config_dir_needed(self) -> bool {
        matches!(self, Self::Azure | Self::Gcp)
    }

    fn script(self, shell: Shell, input: &ProviderInput<'_>) -> Result<ProviderScript> {
        let field = |name: &str| input.secret.get(name).cloned().unwrap_or_default();
        let config_dir = input
            .config_dir
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        let mut script = ProviderScript::default();

        match self {
            Self::Aws => {
                script.set("AWS_ACCESS_KEY_ID", field("accessKeyID"));
                script.set("AWS_SECRET_ACCESS_KEY", field("secretAccessKey"));
                script.set("AWS_DEFAULT_REGION", input.region.to_string());
            }
            Self::Azure => {
                script.set("AZURE_CONFIG_DIR", config_dir);
                script.login.push(format!(
                    "az login --service-principal --username {} --password {} --tenant {};",
                    shell.quote(&field("clientID")),
                    shell.quote(&field("clientSecret")),
                    shell.quote(&field("tenantID")),
                ));
                script.login.push(format!(
                    "az account set --subscription {};",
                    shell.quote(&field("subscriptionID"))
                ));
                script.logout.push(format!(
                    "az logout --username {};",
                    shell.quote(&field("clientID"))
                ));
            }
            Self::Gcp => {
                let account = GcpServiceAccount::parse(&field("serviceaccount.json"))?;
                script.set("CLOUDSDK_CONFIG", config_dir);
                script.set("GOOGLE_CREDENTIALS", account.json);
                script.set("CLOUDSDK_CORE_PROJECT", account.project_id);
                script.set("CLOUDSDK_COMPUTE_REGION", input.region.to_string());
                let credentials = shell.variable("GOOGLE_CREDENTIALS");
                let email = shell.quote(&account.client_email);
                script.login.push(match shell {
                    Shell::Powershell => format!(
                        "{credentials} | gcloud auth activate-service-account {email} --key-file=-;"
                    ),
                    _ => format!(
                        "printf '%s' {credentials} | gcloud auth activate-service-account {email} --key-file=-;"
                    ),
                });
                script
                    .logout
                    .push(format!("gcloud auth revoke {email} --verbosity=error;"));
            }
            Self::Alicloud => {
                script.set("ALIBABA_CLOUD_ACCESS_KEY_ID", field("accessKeyID"));
                script.set("ALIBABA_CLOUD_ACCESS_KEY_SECRET", field("accessKeySecret"));
                script.set("ALIBABA_CLOUD_REGION_ID", input.region.to_string());
            }
            Self::Openstack => {
                let auth_url = keystone_url(input.cloud_profile, input.region)?;
                script.set("OS_IDENTITY_API_VERSION", "3".to_string());
                script.set("OS_AUTH_VERSION", "3".to_string());
                script.set("OS_AUTH_STRATEGY", "keystone".to_string());
                script.set("OS_AUTH_URL", auth_url);
                script.set("OS_TENANT_NAME", field("tenantName"));
                script.set("OS_PROJECT_DOMAIN_NAME", field("domainName"));
                script.set("OS_USER_DOMAIN_NAME", field("domainName"));
                script.set("OS_USERNAME", field("username"));
                script.set("OS_PASSWORD", field("password"));
                script.set("OS_REGION_NAME", input.region.to_string());
            }
            Self::Hcloud => {
                script.set("HCLOUD_TOKEN", field("hcloudToken"));
            }
        }

        Ok(script)
    }
}

struct ProviderInput<'a> {
    region: &'a str,
    secret: &'a BTreeMap<String, String>,
    cloud_profile: &'a CloudProfile,
    config_dir: Option<&'a Path>,
}

#[derive(Debug, Default)]
struct ProviderScript {
    variables: Vec<(&'static str, String)>,
    login: Vec<String>,
    logout: Vec<String>,
}

impl ProviderScript {
    fn set(&mut self, name: &'static str, value: String) {
        self.variables.push((name, value));
    }

    fn render(&self, shell: Shell, unset: bool) -> Vec<String> {
        if unset {
            let mut lines = self.logout.clone();
            lines.extend(self.variables.iter().map(|(name, _)| shell.unset(name)));
            return lines;
        }

        let mut lines: Vec<String> = self
            .variables
            .iter()
            .map(|(name, value)| shell.export(name, value))
            .collect();
        lines.extend(self.login.iter().cloned());
        lines
    }
}

struct GcpServiceAccount {
    project_id: String,
    client_email: String,
    json: String,
}

impl GcpServiceAccount {
    fn parse(raw: &str) -> Result<Self> {
        let credentials: Map<String, Value> = serde_json::from_str(raw)
            .map_err(|error| Error::serialization("parse serviceaccount.json", error))?;
        let text = |key: &str| {
            credentials
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Validation(format!("serviceaccount.json has no {key:?}")))
        };

        Ok(Self {
            project_id: text("project_id")?,
            client_email: text("client_email")?,
            json: serde_json::to_string(&credentials)
                .map_err(|error| Error::serialization("render serviceaccount.json", error))?,
        })
    }
}

/// Keystone URL for `region`, falling back to the profile-wide URL.
fn keystone_url(cloud_profile: &CloudProfile, region: &str) -> Result<String> {
    let profile_name = cloud_profile.metadata.name.as_deref().unwrap_or_default();
    let config = cloud_profile.spec.provider_config.as_ref();

    let regional = config
        .and_then(|config| config.get("keystoneURLs"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|entry| entry.get("region").and_then(Value::as_str) == Some(region))
        .and_then(|entry| entry.get("url"))
        .and_then(Value::as_str);
    let default = config
        .and_then(|config| config.get("keystoneURL"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty());

    regional.or(default).map(str::to_string).ok_or_else(|| {
        Error::Validation(format!(
            "cannot find keystone URL for region {region:?} in cloud profile {profile_name:?}"
        ))
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderEnvOptions {
    pub shell: Shell,
    pub unset: bool,
    pub force: bool,
}

/// Script configuring the cloud provider CLI for the targeted shoot.
///
/// A shoot with access restrictions that was named through `--shoot` is
/// refused unless the access was confirmed; the output then only prints the
/// restrictions and how to confirm.
pub async fn provider_env(manager: &Manager, options: ProviderEnvOptions) -> Result<String> {
    let mut target = manager.current_target()?;
    if target.garden_name().is_empty() {
        return Err(Error::no_garden_targeted());
    }
    let client = manager.garden_client(target.garden_name()).await?;

    if target.shoot_name().is_empty() && !target.seed_name().is_empty() {
        let shoot = client
            .get_shoot_of_managed_seed(target.seed_name())
            .await
            .map_err(|error| match error {
                Error::NotFound { .. } => Error::Validation(format!(
                    "cannot generate cloud provider CLI configuration script for non-managed seed {:?}",
                    target.seed_name()
                )),
                other => other,
            })?;
        target = target
            .with_project_name(GARDEN_PROJECT)
            .with_shoot_name(shoot.name());
    }
    if target.shoot_name().is_empty() {
        return Err(Error::no_shoot_targeted());
    }

    let shoot = client.find_shoot(&target.as_list_option()).await?;
    let binding_name = shoot.spec.secret_binding_name.as_deref().ok_or_else(|| {
        Error::Validation(format!("shoot {:?} has no secret binding", shoot.name()))
    })?;
    let binding = client
        .get_secret_binding(shoot.namespace(), binding_name)
        .await?;
    let secret_namespace = binding
        .secret_ref
        .namespace
        .as_deref()
        .unwrap_or(shoot.namespace());
    let secret = client
        .get_secret(secret_namespace, &binding.secret_ref.name)
        .await?;
    let profile_name = shoot.spec.cloud_profile_name.as_deref().ok_or_else(|| {
        Error::Validation(format!("shoot {:?} has no cloud profile", shoot.name()))
    })?;
    let cloud_profile = client.get_cloud_profile(profile_name).await?;

    let messages = manager.access_restrictions_of(target.garden_name(), &shoot)?;
    let flags = manager.target_flags();
    let confirmed = options.force || flags.confirm_access_restriction();
    if !messages.is_empty() && !flags.shoot_name().is_empty() && !confirmed {
        warn!(shoot = shoot.name(), "access restrictions need confirmation");
        return Ok(refusal(options.shell, &messages, &target));
    }

    let kind = ProviderKind::parse(&shoot.spec.provider.type_)?;
    let secret = secret_fields(&secret);
    let missing: Vec<&str> = kind
        .required_secret_fields()
        .iter()
        .copied()
        .filter(|field| !secret.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(Error::Validation(format!(
            "secret {:?} lacks the {} field(s): {}",
            binding.secret_ref.name,
            kind.cli(),
            missing.join(", ")
        )));
    }

    let config_dir = if kind.config_dir_needed() && !options.unset {
        let dir = provider_config_dir(manager.session_dir(), kind);
        create_private_dir(&dir)?;
        Some(dir)
    } else {
        None
    };
    debug!(provider = kind.cli(), %target, "rendering provider environment");

    let script = kind.script(
        options.shell,
        &ProviderInput {
            region: &shoot.spec.region,
            secret: &secret,
            cloud_profile: &cloud_profile,
            config_dir: config_dir.as_deref(),
        },
    )?;

    let mut lines = Vec::new();
    if !messages.is_empty() {
        lines.push(options.shell.comment(&messages.to_string()));
    }
    lines.extend(script.render(options.shell, options.unset));
    let (args, action) = if options.unset {
        ("provider-env -u", format!("reset the {} configuration", kind.cli()))
    } else {
        ("provider-env", format!("configure {}", kind.cli()))
    };
    lines.push(usage_hint(options.shell, args, &action));
    Ok(lines.join("\n"))
}

fn refusal(shell: Shell, messages: &AccessRestrictionMessages, target: &Target) -> String {
    let rerun = format!("{BINARY_NAME} {} provider-env --force {shell}", target.as_flags());
    let mut lines: Vec<String> = messages
        .to_string()
        .lines()
        .map(|line| shell.print(line))
        .collect();
    for line in [
        "The cloud provider CLI configuration script can only be generated if you confirm the access despite the existing restrictions.",
        "Use the --force flag to confirm the access.",
    ] {
        lines.push(shell.print(line));
    }
    lines.push(shell.print(&format!("{}{}", shell.prompt(), shell.eval_command(&rerun))));
    lines.join("\n")
}

fn secret_fields(secret: &Secret) -> BTreeMap<String, String> {
    let mut fields: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(key, value)| (key.clone(), String::from_utf8_lossy(&value.0).into_owned()))
        .collect();
    if let Some(string_data) = &secret.string_data {
        fields.extend(string_data.clone());
    }
    fields
}

fn provider_config_dir(session_dir: &Path, kind: ProviderKind) -> PathBuf {
    session_dir.join(".config").join(kind.cli())
}

fn usage_hint(shell: Shell, args: &str, action: &str) -> String {
    shell.comment(&format!(
        "Run this command to {action} for your shell:\n{}",
        shell.eval_command(&format!("{BINARY_NAME} {args} {shell}"))
    ))
}
