use anyhow::{Context, Result};
use directories::BaseDirs;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_DISCOVERY_URL: &str = "https://srv.thpatch.net/";

#[derive(Debug, Clone)]
pub struct SetupPaths {
    pub root: PathBuf,
}

impl SetupPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(root_override: Option<&Path>) -> Result<Self> {
        let root = match root_override {
            Some(path) => path.to_path_buf(),
            None => env::current_dir().context("resolve working directory")?,
        };
        if !root.is_dir() {
            fs::create_dir_all(&root)
                .with_context(|| format!("create thcrap directory {}", root.display()))?;
        }
        Ok(Self::new(root))
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn logs_dir(&self) -> Result<PathBuf> {
        let local = self.root.join("logs");
        if fs::create_dir_all(&local).is_ok() {
            return Ok(local);
        }
        let base = BaseDirs::new().context("resolve home dir")?;
        let fallback = base.data_local_dir().join("thcrap-setup").join("logs");
        fs::create_dir_all(&fallback).context("create log dir")?;
        Ok(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_relative_to_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = SetupPaths::resolve(Some(dir.path())).expect("resolve");
        assert_eq!(paths.repos_dir(), dir.path().join("repos"));
        assert_eq!(paths.config_dir(), dir.path().join("config"));
        assert_eq!(paths.logs_dir().expect("logs"), dir.path().join("logs"));
    }

    #[test]
    fn missing_root_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("thcrap");
        SetupPaths::resolve(Some(&root)).expect("resolve");
        assert!(root.is_dir());
    }
}
