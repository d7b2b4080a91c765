use std::{
    fs,
    path::{Path, PathBuf},
};

use dvrun_model::ProcEnv;
use tracing::{info, warn};
use uuid::Uuid;

pub const COMPILER_CACHE_ENV: &str = "MS_COMPILER_CACHE_PATH";
pub const DEFAULT_CACHE_ROOT: &str = "/cache";

/// Throwaway compiler cache directory for one run.
///
/// Keeps operator caches out of the working directory; [`CompilerCache::remove`] deletes it once
/// the workers are gone.
#[derive(Debug)]
pub struct CompilerCache {
    path: PathBuf,
}

impl CompilerCache {
    /// Point the workers' compiler cache at a fresh directory under `root`.
    ///
    /// Leaves `ambient` untouched and returns `None` when it already names a cache directory or
    /// the directory cannot be created.
    pub fn prepare(root: &Path, ambient: &mut ProcEnv) -> Option<Self> {
        if let Some(existing) = ambient.get(COMPILER_CACHE_ENV) {
            info!(target: "dvrun.exec.cache", path = existing, "keeping configured compiler cache");
            return None;
        }

        let path = root.join(Uuid::new_v4().to_string());
        if let Err(e) = fs::create_dir_all(&path) {
            warn!(
                target: "dvrun.exec.cache",
                path = %path.display(),
                error = %e,
                "cannot create compiler cache; the framework default is used"
            );
            return None;
        }

        ambient.set(COMPILER_CACHE_ENV, path.to_string_lossy());
        info!(target: "dvrun.exec.cache", path = %path.display(), "compiler cache created");
        Some(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(self) {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => info!(target: "dvrun.exec.cache", path = %self.path.display(), "compiler cache removed"),
            Err(e) => warn!(
                target: "dvrun.exec.cache",
                path = %self.path.display(),
                error = %e,
                "failed to remove compiler cache"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempDir;

    #[tokio::test]
    async fn fresh_cache_is_exported_and_removed() {
        let tmp = TempDir::new("cache");
        let mut env = ProcEnv::new();

        let cache = CompilerCache::prepare(tmp.path(), &mut env).unwrap();
        let path = cache.path().to_path_buf();
        assert!(path.is_dir());
        assert!(path.starts_with(tmp.path()));
        assert_eq!(env.get(COMPILER_CACHE_ENV), Some(path.to_str().unwrap()));

        std::fs::write(path.join("kernel.o"), b"x").unwrap();
        cache.remove().await;
        assert!(!path.exists());
    }

    #[test]
    fn configured_cache_wins() {
        let tmp = TempDir::new("cache");
        let mut env: ProcEnv = [(COMPILER_CACHE_ENV, "/data/ms-cache")].into_iter().collect();

        assert!(CompilerCache::prepare(tmp.path(), &mut env).is_none());
        assert_eq!(env.get(COMPILER_CACHE_ENV), Some("/data/ms-cache"));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn unusable_root_leaves_env_alone() {
        let tmp = TempDir::new("cache");
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let mut env = ProcEnv::new();

        assert!(CompilerCache::prepare(&file, &mut env).is_none());
        assert!(env.get(COMPILER_CACHE_ENV).is_none());
    }
}
