use super::{Target, TargetFlags};
use crate::error::{Error, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait TargetProvider: Send + Sync {
    fn read(&self) -> Result<Target>;
    fn write(&self, target: &Target) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FilesystemTargetProvider {
    path: PathBuf,
}

impl FilesystemTargetProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TargetProvider for FilesystemTargetProvider {
    fn read(&self) -> Result<Target> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Target::default()),
            Err(error) => return Err(Error::persistence(&self.path, error)),
        };
        if raw.trim().is_empty() {
            return Ok(Target::default());
        }

        serde_yaml::from_str(&raw)
            .map_err(|error| Error::serialization(format!("parse {}", self.path.display()), error))
    }

    fn write(&self, target: &Target) -> Result<()> {
        target.validate()?;
        let raw = serde_yaml::to_string(target)
            .map_err(|error| Error::serialization("render target", error))?;
        write_atomically(&self.path, raw.as_bytes())?;
        debug!(path = %self.path.display(), %target, "persisted target");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DynamicTargetProvider {
    file: FilesystemTargetProvider,
    flags: TargetFlags,
}

impl DynamicTargetProvider {
    pub fn new(file: FilesystemTargetProvider, flags: TargetFlags) -> Self {
        Self { file, flags }
    }
}

impl TargetProvider for DynamicTargetProvider {
    fn read(&self) -> Result<Target> {
        if self.flags.is_complete_target() {
            return Ok(self.flags.to_target());
        }
        let persisted = self.file.read()?;
        Ok(self.flags.overlay(&persisted))
    }

    fn write(&self, target: &Target) -> Result<()> {
        self.file.write(target)
    }
}

/// Replaces `path` with `contents` via a temporary file in the same directory.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file =
        tempfile::NamedTempFile::new_in(dir).map_err(|source| Error::persistence(dir, source))?;
    file.write_all(contents)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|source| Error::persistence(file.path(), source))?;
    file.persist(path)
        .map_err(|error| Error::persistence(path, error.error))?;
    Ok(())
}
