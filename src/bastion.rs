use crate::client::GardenClient;
use crate::clock::{Clock, human_age};
use crate::error::{Error, Result};
use crate::gardener::{Bastion, BastionIngressPolicy, Shoot};
use crate::kubeconfig::ClientConfig;
use crate::target::{Manager, Target};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use kube::config::AuthInfo;
use secrecy::ExposeSecret;
use std::fs;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Username the garden authenticates the given credentials as.
///
/// A bearer token is reviewed by the API server; a client certificate is
/// trusted for its subject common name.
pub async fn current_user(
    client: &dyn GardenClient,
    auth_info: Option<&AuthInfo>,
) -> Result<String> {
    let Some(auth_info) = auth_info else {
        return Err(Error::UnresolvableIdentity);
    };

    if let Some(token) = bearer_token(auth_info)? {
        debug!("resolving identity through token review");
        return client.create_token_review(&token).await;
    }

    if let Some(certificate) = client_certificate(auth_info)? {
        debug!("resolving identity from client certificate");
        return common_name(&certificate);
    }

    Err(Error::UnresolvableIdentity)
}

fn bearer_token(auth_info: &AuthInfo) -> Result<Option<String>> {
    if let Some(token) = &auth_info.token {
        let token = token.expose_secret().trim();
        if !token.is_empty() {
            return Ok(Some(token.to_string()));
        }
    }

    match &auth_info.token_file {
        Some(path) => {
            let token =
                fs::read_to_string(path).map_err(|source| Error::persistence(path, source))?;
            Ok(Some(token.trim().to_string()).filter(|token| !token.is_empty()))
        }
        None => Ok(None),
    }
}

fn client_certificate(auth_info: &AuthInfo) -> Result<Option<Vec<u8>>> {
    if let Some(data) = &auth_info.client_certificate_data {
        let decoded = BASE64.decode(data.trim()).map_err(|error| {
            Error::Configuration(format!("invalid client-certificate-data: {error}"))
        })?;
        return Ok(Some(decoded));
    }

    match &auth_info.client_certificate {
        Some(path) => fs::read(path)
            .map(Some)
            .map_err(|source| Error::persistence(path, source)),
        None => Ok(None),
    }
}

fn common_name(certificate: &[u8]) -> Result<String> {
    let der = match x509_parser::pem::parse_x509_pem(certificate) {
        Ok((_, pem)) => pem.contents,
        Err(_) => certificate.to_vec(),
    };
    let (_, parsed) = x509_parser::parse_x509_certificate(&der)
        .map_err(|error| Error::Configuration(format!("invalid client certificate: {error}")))?;

    parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|name| name.as_str().ok())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or(Error::UnresolvableIdentity)
}

pub struct BastionScope {
    client: Arc<dyn GardenClient>,
    auth_info: Option<AuthInfo>,
    shoot: Shoot,
}

impl BastionScope {
    pub fn new(client: Arc<dyn GardenClient>, auth_info: Option<AuthInfo>, shoot: Shoot) -> Self {
        Self {
            client,
            auth_info,
            shoot,
        }
    }

    pub async fn for_current_target(manager: &Manager) -> Result<Self> {
        Self::for_target(manager, &manager.current_target()?).await
    }

    pub async fn for_target(manager: &Manager, target: &Target) -> Result<Self> {
        if target.shoot_name().is_empty() {
            return Err(Error::no_shoot_targeted());
        }

        let garden = manager.configuration().garden(target.garden_name())?;
        let auth_info = ClientConfig::for_garden(garden)?.current_auth_info().cloned();
        let client = manager.garden_client(target.garden_name()).await?;
        let shoot = client.find_shoot(&target.as_list_option()).await?;

        Ok(Self::new(client, auth_info, shoot))
    }

    pub async fn current_user(&self) -> Result<String> {
        current_user(self.client.as_ref(), self.auth_info.as_ref()).await
    }

    /// Bastions of the shoot, in API list order.
    pub async fn bastions(&self) -> Result<Vec<Bastion>> {
        let bastions = self.client.list_bastions(self.shoot.namespace()).await?;
        Ok(bastions
            .into_iter()
            .filter(|bastion| bastion.spec.shoot_ref.name == self.shoot.name())
            .collect())
    }

    pub async fn own_bastions(&self) -> Result<(String, Vec<Bastion>)> {
        let user = self.current_user().await?;
        let bastions = self
            .bastions()
            .await?
            .into_iter()
            .filter(|bastion| bastion.created_by() == Some(user.as_str()))
            .collect();
        Ok((user, bastions))
    }

    fn shoot_path(&self) -> String {
        format!("{}/{}", self.shoot.namespace(), self.shoot.name())
    }
}

pub struct SshPatchOptions {
    cidrs: Vec<String>,
    bastion_name: Option<String>,
    clock: Arc<dyn Clock>,
    bastion: Option<Bastion>,
}

impl SshPatchOptions {
    pub fn new(cidrs: Vec<String>, bastion_name: Option<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cidrs,
            bastion_name,
            clock,
            bastion: None,
        }
    }

    #[cfg(test)]
    pub fn bastion(&self) -> Option<&Bastion> {
        self.bastion.as_ref()
    }

    /// Resolves the bastion to patch. Returns the notice to show when the
    /// bastion was picked automatically.
    pub async fn complete(&mut self, scope: &BastionScope) -> Result<Option<String>> {
        if let Some(name) = &self.bastion_name {
            let bastion = scope
                .bastions()
                .await?
                .into_iter()
                .find(|bastion| bastion.name() == name)
                .ok_or_else(|| Error::not_found("bastion", name.clone()))?;
            self.bastion = Some(bastion);
            return Ok(None);
        }

        let (user, mut own) = scope.own_bastions().await?;
        let bastion = match own.len() {
            0 => {
                return Err(Error::NoBastionFound {
                    user,
                    shoot: scope.shoot_path(),
                });
            }
            1 => own.remove(0),
            _ => {
                return Err(Error::AmbiguousBastion {
                    candidates: own.iter().map(|bastion| bastion.name().to_string()).collect(),
                });
            }
        };

        let age = human_age(self.clock.as_ref(), bastion.metadata.creation_timestamp.as_ref());
        let notice = format!(
            "Auto-selected bastion {} created {age} ago targeting shoot {}",
            bastion.name(),
            scope.shoot_path()
        );
        self.bastion = Some(bastion);
        Ok(Some(notice))
    }

    pub fn validate(&self) -> Result<()> {
        if self.bastion.is_none() {
            return Err(Error::Validation("no bastion selected".to_string()));
        }
        if self.cidrs.is_empty() {
            return Err(Error::Validation("at least one --cidr is required".to_string()));
        }
        for cidr in &self.cidrs {
            validate_cidr(cidr)?;
        }
        Ok(())
    }

    pub async fn run(&self, scope: &BastionScope) -> Result<Bastion> {
        self.validate()?;
        let Some(old) = &self.bastion else {
            return Err(Error::Validation("no bastion selected".to_string()));
        };

        let mut new = old.clone();
        new.spec.ingress = self
            .cidrs
            .iter()
            .map(|cidr| BastionIngressPolicy::from_cidr(cidr))
            .collect();

        scope.client.patch_bastion(old, &new).await?;
        info!(bastion = new.name(), cidrs = ?self.cidrs, "patched bastion ingress");
        Ok(new)
    }
}

fn validate_cidr(cidr: &str) -> Result<()> {
    let invalid = || Error::Validation(format!("invalid CIDR {cidr:?}, expected ADDRESS/PREFIX"));

    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let address: IpAddr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if address.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok(())
}

pub async fn bastion_name_completions(
    scope: &BastionScope,
    clock: &dyn Clock,
    prefix: &str,
) -> Result<Vec<String>> {
    let (_, own) = scope.own_bastions().await?;
    Ok(own
        .iter()
        .filter(|bastion| bastion.name().starts_with(prefix))
        .map(|bastion| {
            let age = human_age(clock, bastion.metadata.creation_timestamp.as_ref());
            format!("{}\t created {age} ago", bastion.name())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{FakeGarden, shoot};
    use crate::clock::testing::FixedClock;
    use crate::gardener::CREATED_BY_ANNOTATION;
    use chrono::TimeZone;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::jiff::Timestamp;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;
    const CLIENT_CN_PEM: &str = include_str!("../testdata/client-cn.pem");

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.timestamp_opt(NOW, 0).unwrap()))
    }

    fn bastion(name: &str, shoot_name: &str, owner: &str, age_seconds: i64) -> Bastion {
        let mut bastion = Bastion::default();
        bastion.metadata.name = Some(name.to_string());
        bastion.metadata.namespace = Some("garden-prod1".to_string());
        bastion.metadata.annotations = Some(BTreeMap::from([(
            CREATED_BY_ANNOTATION.to_string(),
            owner.to_string(),
        )]));
        bastion.metadata.creation_timestamp =
            Some(Time(Timestamp::from_second(NOW - age_seconds).unwrap()));
        bastion.spec.shoot_ref.name = shoot_name.to_string();
        bastion.spec.ingress = vec![
            BastionIngressPolicy::from_cidr("10.0.0.0/8"),
            BastionIngressPolicy::from_cidr("192.168.0.0/16"),
        ];
        bastion
    }

    fn token_auth(token: &str) -> AuthInfo {
        serde_json::from_value(json!({ "token": token })).unwrap()
    }

    fn garden_with(bastions: Vec<Bastion>) -> Arc<FakeGarden> {
        Arc::new(FakeGarden {
            bastions: Mutex::new(bastions),
            tokens: BTreeMap::from([("alice-token".to_string(), "alice".to_string())]),
            ..FakeGarden::default()
        })
    }

    fn scope(garden: &Arc<FakeGarden>, auth_info: AuthInfo) -> BastionScope {
        BastionScope::new(
            garden.clone(),
            Some(auth_info),
            shoot("garden-prod1", "web", "aws-eu1"),
        )
    }

    #[tokio::test]
    async fn token_identity_comes_from_token_review() {
        let garden = garden_with(Vec::new());
        let user = current_user(garden.as_ref(), Some(&token_auth("alice-token")))
            .await
            .unwrap();
        assert_eq!(user, "alice");
        assert_eq!(*garden.token_reviews.lock().unwrap(), 1);

        let unknown = current_user(garden.as_ref(), Some(&token_auth("nope"))).await;
        assert!(matches!(unknown, Err(Error::UnresolvableIdentity)));
    }

    #[tokio::test]
    async fn certificate_identity_is_the_common_name() {
        let garden = garden_with(Vec::new());
        let auth: AuthInfo = serde_json::from_value(json!({
            "client-certificate-data": BASE64.encode(CLIENT_CN_PEM),
        }))
        .unwrap();

        let user = current_user(garden.as_ref(), Some(&auth)).await.unwrap();
        assert_eq!(user, "client-cn");
        assert_eq!(*garden.token_reviews.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn certificate_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.pem");
        fs::write(&path, CLIENT_CN_PEM).unwrap();
        let auth: AuthInfo = serde_json::from_value(json!({
            "client-certificate": path.display().to_string(),
        }))
        .unwrap();

        let user = current_user(garden_with(Vec::new()).as_ref(), Some(&auth))
            .await
            .unwrap();
        assert_eq!(user, "client-cn");
    }

    #[tokio::test]
    async fn anonymous_credentials_are_rejected() {
        let garden = garden_with(Vec::new());
        let empty = AuthInfo::default();
        assert!(matches!(
            current_user(garden.as_ref(), Some(&empty)).await,
            Err(Error::UnresolvableIdentity)
        ));
        assert!(matches!(
            current_user(garden.as_ref(), None).await,
            Err(Error::UnresolvableIdentity)
        ));
    }

    #[tokio::test]
    async fn auto_selects_the_only_own_bastion() {
        let garden = garden_with(vec![
            bastion("cli-bob", "web", "bob", 60),
            bastion("cli-alice", "web", "alice", 300),
            bastion("cli-alice-other-shoot", "api", "alice", 60),
        ]);
        let scope = scope(&garden, token_auth("alice-token"));

        let mut options = SshPatchOptions::new(vec!["1.2.3.4/32".to_string()], None, clock());
        let notice = options.complete(&scope).await.unwrap();
        assert_eq!(options.bastion().unwrap().name(), "cli-alice");
        assert_eq!(
            notice.as_deref(),
            Some("Auto-selected bastion cli-alice created 5m ago targeting shoot garden-prod1/web")
        );
    }

    #[tokio::test]
    async fn no_own_bastion_fails() {
        let garden = garden_with(vec![bastion("cli-bob", "web", "bob", 60)]);
        let scope = scope(&garden, token_auth("alice-token"));

        let mut options = SshPatchOptions::new(vec!["1.2.3.4/32".to_string()], None, clock());
        let error = options.complete(&scope).await.unwrap_err();
        assert!(error.to_string().contains("no bastions found"));
        assert!(matches!(error, Error::NoBastionFound { .. }));
    }

    #[tokio::test]
    async fn several_own_bastions_fail() {
        let garden = garden_with(vec![
            bastion("cli-1", "web", "alice", 60),
            bastion("cli-2", "web", "alice", 120),
        ]);
        let scope = scope(&garden, token_auth("alice-token"));

        let mut options = SshPatchOptions::new(vec!["1.2.3.4/32".to_string()], None, clock());
        match options.complete(&scope).await.unwrap_err() {
            Error::AmbiguousBastion { candidates } => {
                assert_eq!(candidates, vec!["cli-1", "cli-2"])
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(options.bastion().is_none());
    }

    #[tokio::test]
    async fn named_bastion_ignores_ownership() {
        let garden = garden_with(vec![bastion("cli-bob", "web", "bob", 60)]);
        let scope = scope(&garden, AuthInfo::default());

        let mut options = SshPatchOptions::new(
            vec!["1.2.3.4/32".to_string()],
            Some("cli-bob".to_string()),
            clock(),
        );
        assert_eq!(options.complete(&scope).await.unwrap(), None);
        assert_eq!(options.bastion().unwrap().name(), "cli-bob");

        let mut missing = SshPatchOptions::new(Vec::new(), Some("cli-x".to_string()), clock());
        assert!(missing.complete(&scope).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn patch_replaces_ingress() {
        let garden = garden_with(vec![bastion("cli-alice", "web", "alice", 60)]);
        let scope = scope(&garden, token_auth("alice-token"));

        let mut options = SshPatchOptions::new(vec!["1.2.3.4/32".to_string()], None, clock());
        options.complete(&scope).await.unwrap();
        let patched = options.run(&scope).await.unwrap();
        assert_eq!(patched.ingress_cidrs(), vec!["1.2.3.4/32"]);

        let stored = garden.bastions.lock().unwrap();
        assert_eq!(stored[0].ingress_cidrs(), vec!["1.2.3.4/32"]);
        let patches = garden.patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0.ingress_cidrs(), vec!["10.0.0.0/8", "192.168.0.0/16"]);
    }

    #[tokio::test]
    async fn validation_requires_bastion_and_cidrs() {
        let garden = garden_with(vec![bastion("cli-alice", "web", "alice", 60)]);
        let scope = scope(&garden, token_auth("alice-token"));

        let options = SshPatchOptions::new(vec!["1.2.3.4/32".to_string()], None, clock());
        assert!(matches!(options.validate(), Err(Error::Validation(_))));

        let mut options = SshPatchOptions::new(Vec::new(), None, clock());
        options.complete(&scope).await.unwrap();
        assert!(matches!(options.validate(), Err(Error::Validation(_))));
        assert!(options.run(&scope).await.is_err());
        assert!(garden.patches.lock().unwrap().is_empty());
    }

    #[test]
    fn cidrs_are_checked() {
        assert!(validate_cidr("1.2.3.4/32").is_ok());
        assert!(validate_cidr("2001:db8::/48").is_ok());
        assert!(validate_cidr("1.2.3.4").is_err());
        assert!(validate_cidr("1.2.3.4/33").is_err());
        assert!(validate_cidr("host/8").is_err());
    }

    #[tokio::test]
    async fn completions_list_own_bastions_in_order() {
        let garden = garden_with(vec![
            bastion("cli-b", "web", "alice", 7_200),
            bastion("cli-a", "web", "alice", 30),
            bastion("other", "web", "alice", 30),
            bastion("cli-bob", "web", "bob", 30),
        ]);
        let scope = scope(&garden, token_auth("alice-token"));
        let clock = FixedClock(Utc.timestamp_opt(NOW, 0).unwrap());

        let completions = bastion_name_completions(&scope, &clock, "cli-").await.unwrap();
        assert_eq!(completions, vec!["cli-b\t created 2h ago", "cli-a\t created 30s ago"]);
    }

    #[tokio::test]
    async fn scope_from_target_uses_garden_credentials() {
        use crate::target::testing::{fixture, sample_garden};

        let mut fake = sample_garden();
        fake.tokens = BTreeMap::from([("admin-token".to_string(), "admin".to_string())]);
        fake.bastions = Mutex::new(vec![bastion("cli-admin", "api", "admin", 60)]);
        let fixture = fixture(fake, false);
        let manager = fixture.manager();

        assert!(BastionScope::for_current_target(&manager).await.is_err());

        manager.target_garden("mygarden").await.unwrap();
        manager.target_shoot("api").await.unwrap();
        let scope = BastionScope::for_current_target(&manager).await.unwrap();
        assert_eq!(scope.current_user().await.unwrap(), "admin");

        let mut options = SshPatchOptions::new(vec!["10.1.0.0/16".to_string()], None, clock());
        options.complete(&scope).await.unwrap();
        assert_eq!(options.bastion().unwrap().name(), "cli-admin");
    }
}
