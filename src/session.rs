use crate::error::{Error, Result};
use regex::Regex;
use std::fs::DirBuilder;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

pub const ENV_SESSION_ID: &str = "GCTL_SESSION_ID";
pub const ENV_TERM_SESSION_ID: &str = "TERM_SESSION_ID";

const TARGET_FILENAME: &str = "target.yaml";
const KUBECONFIG_SYMLINK: &str = "kubeconfig.yaml";

static SESSION_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("session id pattern is valid")
});
static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-f0-9]{8}-[a-f0-9]{4}-4[a-f0-9]{3}-[89ab][a-f0-9]{3}-[a-f0-9]{12})")
        .expect("uuid pattern is valid")
});

/// Resolves the session id from `GCTL_SESSION_ID` or, failing that, from the
/// UUID embedded in `TERM_SESSION_ID`.
pub fn resolve_session_id<F>(lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_SESSION_ID) {
        if SESSION_ID_PATTERN.is_match(&value) {
            return Ok(value);
        }

        return Err(Error::Configuration(format!(
            "environment variable {ENV_SESSION_ID} must only contain alphanumeric characters, underscore and dash and have a minimum length of 1 and a maximum length of 128"
        )));
    }

    if let Some(value) = lookup(ENV_TERM_SESSION_ID)
        && let Some(found) = UUID_PATTERN.captures(&value.to_lowercase())
    {
        return Ok(found[1].to_string());
    }

    Err(Error::MissingSession)
}

pub fn resolve_session_id_from_env() -> Result<String> {
    resolve_session_id(|name| std::env::var(name).ok())
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    dir: PathBuf,
}

impl Session {
    pub fn create(temp_root: &Path, id: &str) -> Result<Self> {
        let dir = temp_root.join("garden").join(id);
        create_private_dir(&dir)?;

        debug!(session = id, dir = %dir.display(), "session directory ready");
        Ok(Self {
            id: id.to_string(),
            dir,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn target_file(&self) -> PathBuf {
        self.dir.join(TARGET_FILENAME)
    }

    pub fn kubeconfig_symlink(&self) -> PathBuf {
        self.dir.join(KUBECONFIG_SYMLINK)
    }

    pub fn kubeconfig_file(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("kubeconfig.{digest}.yaml"))
    }
}

pub(crate) fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .map_err(|source| Error::persistence(dir, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let env = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| env.get(name).cloned()
    }

    #[test]
    fn explicit_session_id_wins() {
        let id = resolve_session_id(lookup_from(&[
            (ENV_SESSION_ID, "my_session-1"),
            (ENV_TERM_SESSION_ID, "w0t0p0:8C2A3E1F-1B2C-4D3E-8F90-123456789ABC"),
        ]))
        .unwrap();
        assert_eq!(id, "my_session-1");
    }

    #[test]
    fn invalid_session_id_is_a_configuration_error() {
        let error = resolve_session_id(lookup_from(&[(ENV_SESSION_ID, "no/slashes")])).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));

        let too_long = "a".repeat(129);
        let error = resolve_session_id(lookup_from(&[(ENV_SESSION_ID, &too_long)])).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));

        let error = resolve_session_id(lookup_from(&[(ENV_SESSION_ID, "")])).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));

        let error =
            resolve_session_id(lookup_from(&[(ENV_SESSION_ID, "café-ß-١٢٣")])).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }

    #[test]
    fn term_session_uuid_is_extracted_lowercased() {
        let id = resolve_session_id(lookup_from(&[(
            ENV_TERM_SESSION_ID,
            "w0t0p0:8C2A3E1F-1B2C-4D3E-8F90-123456789ABC",
        )]))
        .unwrap();
        assert_eq!(id, "8c2a3e1f-1b2c-4d3e-8f90-123456789abc");
    }

    #[test]
    fn term_session_without_uuid_is_missing_session() {
        let error =
            resolve_session_id(lookup_from(&[(ENV_TERM_SESSION_ID, "not-a-uuid")])).unwrap_err();
        assert!(matches!(error, Error::MissingSession));

        let error = resolve_session_id(lookup_from(&[])).unwrap_err();
        assert!(matches!(error, Error::MissingSession));
    }

    #[test]
    fn distinct_sessions_get_distinct_private_directories() {
        let root = tempfile::tempdir().unwrap();
        let first = Session::create(root.path(), "s1").unwrap();
        let second = Session::create(root.path(), "s2").unwrap();

        assert_ne!(first.dir(), second.dir());
        assert_ne!(first.target_file(), second.target_file());
        assert!(first.dir().is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(first.dir()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
