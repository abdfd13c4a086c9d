use crate::error::{ClassifierError, Result};
use crate::services::classifier::runtime::ModelRuntime;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Read-only source of packaged assets (the application bundle).
pub trait AssetBundle: Send + Sync {
    fn open(&self, name: &str) -> std::io::Result<Box<dyn Read + '_>>;
}

/// Assets shipped as plain files under a directory.
#[derive(Debug, Clone)]
pub struct DirBundle {
    root: PathBuf,
}

impl DirBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetBundle for DirBundle {
    fn open(&self, name: &str) -> std::io::Result<Box<dyn Read + '_>> {
        let file = File::open(self.root.join(name))?;
        Ok(Box::new(file))
    }
}

/// Assets compiled into the binary, e.g. with `include_bytes!`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedBundle {
    assets: HashMap<String, Cow<'static, [u8]>>,
}

impl EmbeddedBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(
        mut self,
        name: impl Into<String>,
        bytes: impl Into<Cow<'static, [u8]>>,
    ) -> Self {
        self.assets.insert(name.into(), bytes.into());
        self
    }
}

impl AssetBundle for EmbeddedBundle {
    fn open(&self, name: &str) -> std::io::Result<Box<dyn Read + '_>> {
        match self.assets.get(name) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.as_ref()))),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no embedded asset named {}", name),
            )),
        }
    }
}

/// Stages packaged model assets into a writable cache directory and loads them.
#[derive(Clone)]
pub struct ModelLoader {
    bundle: Arc<dyn AssetBundle>,
    cache_dir: PathBuf,
}

impl ModelLoader {
    pub fn new(bundle: impl AssetBundle + 'static, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundle: Arc::new(bundle),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn staged_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    /// A staged copy counts only if it exists and is non-empty.
    pub fn is_staged(&self, name: &str) -> bool {
        std::fs::metadata(self.staged_path(name))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Returns the path of the staged asset, copying it out of the bundle if needed.
    pub fn stage(&self, name: &str) -> Result<PathBuf> {
        check_asset_name(name)?;
        let dest = self.staged_path(name);

        if self.is_staged(name) {
            log::debug!("Reusing staged model {}", dest.display());
            return Ok(dest);
        }

        let mut source = self
            .bundle
            .open(name)
            .map_err(|source| ClassifierError::AssetMissing {
                name: name.to_string(),
                source,
            })?;

        std::fs::create_dir_all(&self.cache_dir).map_err(|source| ClassifierError::StorageWrite {
            path: self.cache_dir.clone(),
            source,
        })?;

        // Copy to a sibling and rename; an interrupted copy is never mistaken for a staged model.
        let partial = self.cache_dir.join(format!("{}.part", name));
        let copied = copy_into(&mut *source, &partial).and_then(|bytes| {
            std::fs::rename(&partial, &dest)?;
            Ok(bytes)
        });

        match copied {
            Ok(bytes) => {
                log::debug!("Staged model {} ({} bytes)", dest.display(), bytes);
                Ok(dest)
            }
            Err(source) => {
                if partial.exists() {
                    if let Err(e) = std::fs::remove_file(&partial) {
                        log::warn!("Failed to remove partial file {}: {}", partial.display(), e);
                    }
                }
                Err(ClassifierError::StorageWrite { path: dest, source })
            }
        }
    }

    /// Stages `name` and opens it with `runtime`.
    pub fn load<R: ModelRuntime + ?Sized>(&self, runtime: &R, name: &str) -> Result<R::Model> {
        let path = self.stage(name)?;
        runtime.load(&path)
    }
}

fn copy_into(source: &mut dyn Read, path: &Path) -> std::io::Result<u64> {
    let mut file = File::create(path)?;
    let bytes = std::io::copy(source, &mut file)?;
    file.flush()?;
    file.sync_all()?;
    Ok(bytes)
}

// Asset names are single file names; anything else would stage outside the cache dir.
fn check_asset_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ClassifierError::AssetMissing {
            name: name.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "asset name must be a plain file name",
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn bundle_with(name: &str, bytes: &[u8]) -> EmbeddedBundle {
        EmbeddedBundle::new().with_asset(name, bytes.to_vec())
    }

    #[test]
    fn stages_asset_verbatim() {
        let cache = tempfile::tempdir().unwrap();
        let loader = ModelLoader::new(bundle_with("model.onnx", b"weights"), cache.path());

        let path = loader.stage("model.onnx").unwrap();
        assert_eq!(path, cache.path().join("model.onnx"));
        assert_eq!(std::fs::read(&path).unwrap(), b"weights");
        assert!(!cache.path().join("model.onnx.part").exists());
    }

    #[test]
    fn second_stage_reuses_existing_copy() {
        let cache = tempfile::tempdir().unwrap();
        let assets = tempfile::tempdir().unwrap();
        std::fs::write(assets.path().join("model.onnx"), b"v1").unwrap();
        let loader = ModelLoader::new(DirBundle::new(assets.path()), cache.path());

        let first = loader.stage("model.onnx").unwrap();
        // A changed bundle must not be re-copied over a non-empty staged file.
        std::fs::write(assets.path().join("model.onnx"), b"v2").unwrap();
        let second = loader.stage("model.onnx").unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), b"v1");
    }

    #[test]
    fn empty_staged_file_is_replaced() {
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(cache.path().join("model.onnx"), b"").unwrap();
        let loader = ModelLoader::new(bundle_with("model.onnx", b"weights"), cache.path());

        assert!(!loader.is_staged("model.onnx"));
        let path = loader.stage("model.onnx").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"weights");
    }

    #[test]
    fn missing_asset_is_reported() {
        let cache = tempfile::tempdir().unwrap();
        let loader = ModelLoader::new(EmbeddedBundle::new(), cache.path());

        let err = loader.stage("model.onnx").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssetMissing);
        assert!(!cache.path().join("model.onnx").exists());
    }

    #[test]
    fn unwritable_cache_dir_is_storage_failure() {
        let cache = tempfile::tempdir().unwrap();
        // A regular file where the cache directory should be.
        let blocked = cache.path().join("blocked");
        std::fs::write(&blocked, b"not a directory").unwrap();
        let loader = ModelLoader::new(bundle_with("model.onnx", b"weights"), &blocked);

        let err = loader.stage("model.onnx").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageWriteFailure);
    }

    #[test]
    fn rejects_names_with_directories() {
        let cache = tempfile::tempdir().unwrap();
        let loader = ModelLoader::new(bundle_with("../model.onnx", b"weights"), cache.path());

        let err = loader.stage("../model.onnx").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssetMissing);
    }
}
