//! Bundled deployment scripts and their materialization on disk.
//!
//! Scripts that ship with the program are read through a [`ResourceSource`]
//! and written into a deployment repository by a [`Bootstrapper`]. Every
//! write goes to a temporary file in the destination directory first and is
//! then renamed into place, so a reader never observes a half-written script
//! and a failed write never leaves something that looks complete.

use crate::error::BootstrapError;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// Name of the bundled helm deployment script.
pub const HELM_DEPLOY_SCRIPT: &str = "helm-deploy.sh";

/// Scripts compiled into the binary.
const EMBEDDED: &[(&str, &[u8])] = &[(
    HELM_DEPLOY_SCRIPT,
    include_bytes!("../resources/helm-deploy.sh"),
)];

/// Source of named byte resources.
pub trait ResourceSource: Send + Sync {
    /// Read a resource by name.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError::ResourceNotFound` if no resource has this name.
    fn read_resource(&self, name: &str) -> Result<Cow<'static, [u8]>, BootstrapError>;

    /// Names of all available resources.
    fn names(&self) -> Vec<String>;
}

/// Resources embedded in the binary at compile time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSource;

impl ResourceSource for EmbeddedSource {
    fn read_resource(&self, name: &str) -> Result<Cow<'static, [u8]>, BootstrapError> {
        EMBEDDED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, bytes)| Cow::Borrowed(*bytes))
            .ok_or_else(|| BootstrapError::ResourceNotFound {
                name: name.to_string(),
            })
    }

    fn names(&self) -> Vec<String> {
        EMBEDDED.iter().map(|(n, _)| (*n).to_string()).collect()
    }
}

/// In-memory resources, for tests and for embedding applications that
/// bundle their own scripts.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    resources: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a resource.
    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let mut resources = self
            .resources
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        resources.insert(name.into(), bytes.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl ResourceSource for MemorySource {
    fn read_resource(&self, name: &str) -> Result<Cow<'static, [u8]>, BootstrapError> {
        let resources = self
            .resources
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        resources
            .get(name)
            .map(|bytes| Cow::Owned(bytes.clone()))
            .ok_or_else(|| BootstrapError::ResourceNotFound {
                name: name.to_string(),
            })
    }

    fn names(&self) -> Vec<String> {
        let resources = self
            .resources
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut names: Vec<String> = resources.keys().cloned().collect();
        names.sort();
        names
    }
}

/// A resource written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedResource {
    /// Where the resource was written
    pub path: PathBuf,
    /// Number of bytes written
    pub len: u64,
    /// BLAKE3 digest of the content (hex)
    pub digest: String,
}

/// Writes bundled resources into destination directories.
#[derive(Clone)]
pub struct Bootstrapper {
    source: Arc<dyn ResourceSource>,
}

impl Bootstrapper {
    /// Create a bootstrapper backed by the embedded scripts.
    pub fn new() -> Self {
        Self::with_source(EmbeddedSource)
    }

    /// Create a bootstrapper with a custom source (useful for testing).
    pub fn with_source(source: impl ResourceSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// Names of the resources this bootstrapper can materialize.
    pub fn available(&self) -> Vec<String> {
        self.source.names()
    }

    /// Write `resource_name` into `destination_dir`, replacing any previous copy.
    ///
    /// Parent directories are created as needed. Materializing the same
    /// resource twice yields the same file.
    ///
    /// # Errors
    ///
    /// - `ResourceNotFound` if the resource is not bundled (nothing is written)
    /// - `WriteFailure` if the name escapes `destination_dir` or the file
    ///   cannot be written
    pub fn materialize(
        &self,
        resource_name: &str,
        destination_dir: &Path,
    ) -> Result<MaterializedResource, BootstrapError> {
        let relative = validate_relative(resource_name)
            .map_err(|e| BootstrapError::write(destination_dir.join(resource_name), e))?;
        let bytes = self.source.read_resource(resource_name)?;
        let path = destination_dir.join(relative);

        write_atomic(&path, &bytes, true)?;

        let digest = blake3::hash(&bytes).to_hex().to_string();
        log::debug!(
            "Materialized {} ({} bytes, blake3 {})",
            path.display(),
            bytes.len(),
            digest
        );

        Ok(MaterializedResource {
            path,
            len: bytes.len() as u64,
            digest,
        })
    }
}

impl Default for Bootstrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("resources", &self.source.names())
            .finish()
    }
}

/// Check that `name` is a relative path that stays inside its base directory.
pub(crate) fn validate_relative(name: &str) -> io::Result<&Path> {
    let path = Path::new(name);
    if name.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty path"));
    }
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path escapes its base directory: {name}"),
        ));
    }
    Ok(path)
}

/// Write `bytes` to `path` through a temporary file in the same directory.
///
/// The temporary file is deleted on every failure path; the destination is
/// only ever replaced by a fully written and synced file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], executable: bool) -> Result<(), BootstrapError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| BootstrapError::write(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| BootstrapError::write(path, e))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| BootstrapError::write(path, e))?;

    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o755))
            .map_err(|e| BootstrapError::write(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = executable;

    tmp.persist(path).map_err(|e| {
        let tmp_path = e.file.path().to_path_buf();
        if let Err(cleanup) = e.file.close() {
            log::warn!(
                "Could not remove temporary file {}: {}",
                tmp_path.display(),
                cleanup
            );
        }
        BootstrapError::write(path, e.error)
    })?;

    Ok(())
}
