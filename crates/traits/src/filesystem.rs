//! Reads stylesheet modules from disk, confined to a base directory.

use crate::resource::{ModuleBytes, ResourceError, ResourceProvider};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Loads modules relative to a base directory, normally the directory of the
/// principal stylesheet. Paths that would leave the directory are refused.
#[derive(Debug)]
pub struct FilesystemResourceProvider {
    base: PathBuf,
    /// `None` while the directory does not exist.
    canonical_base: Option<PathBuf>,
}

impl FilesystemResourceProvider {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref().to_path_buf();
        let canonical_base = base.canonicalize().ok();
        Self { base, canonical_base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn locate(&self, path: &str) -> Result<PathBuf, ResourceError> {
        let relative = Path::new(path);
        let escapes = relative.is_absolute()
            || relative.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(ResourceError::OutsideBase(path.to_string()));
        }

        let full = self.base.join(relative);
        // Symlinks can still point elsewhere once the file exists.
        if let (Ok(canonical), Some(base)) = (full.canonicalize(), &self.canonical_base)
            && !canonical.starts_with(base)
        {
            return Err(ResourceError::OutsideBase(path.to_string()));
        }
        Ok(full)
    }
}

impl ResourceProvider for FilesystemResourceProvider {
    fn load(&self, path: &str) -> Result<ModuleBytes, ResourceError> {
        let full = self.locate(path)?;
        log::debug!("Reading module '{}' from {}", path, full.display());
        match std::fs::read(&full) {
            Ok(bytes) => Ok(ModuleBytes::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ResourceError::NotFound(path.to_string())),
            Err(e) => Err(ResourceError::LoadFailed {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.locate(path).is_ok_and(|p| p.is_file())
    }

    fn describe(&self) -> String {
        format!("directory {}", self.base.display())
    }
}
