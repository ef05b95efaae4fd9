use crate::repo::Patch;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

const MAX_PATH_LEN: usize = 248;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub dat_dump: bool,
    #[serde(default)]
    pub patched_files_dump: bool,
    #[serde(default)]
    pub console: bool,
    #[serde(default)]
    pub patches: Vec<RunConfigPatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfigPatch {
    pub archive: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub dat_dump: bool,
    pub patched_files_dump: bool,
    pub console: bool,
}

impl RunConfig {
    pub fn new(archives: impl IntoIterator<Item = String>, flags: RunFlags) -> Self {
        Self {
            dat_dump: flags.dat_dump,
            patched_files_dump: flags.patched_files_dump,
            console: flags.console,
            patches: archives
                .into_iter()
                .map(|archive| RunConfigPatch { archive })
                .collect(),
        }
    }

    pub fn archives(&self) -> impl Iterator<Item = &str> {
        self.patches.iter().map(|patch| patch.archive.as_str())
    }

    pub fn load(config_dir: &Path, name: &str) -> Result<Self> {
        let path = runconfig_path(config_dir, name)?;
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read run configuration {}", path.display()))?;
        let config = serde_json::from_str(&raw).context("parse run configuration")?;
        Ok(config)
    }

    pub fn save(&self, config_dir: &Path, name: &str) -> Result<PathBuf> {
        let path = runconfig_path(config_dir, name)?;
        fs::create_dir_all(config_dir).context("create config dir")?;
        let raw = serde_json::to_string_pretty(self).context("serialize run configuration")?;
        fs::write(&path, raw)
            .with_context(|| format!("write run configuration {}", path.display()))?;
        Ok(path)
    }
}

pub fn runconfig_path(config_dir: &Path, name: &str) -> Result<PathBuf> {
    validate_config_name(config_dir, name)?;
    Ok(config_dir.join(format!("{name}.js")))
}

/// Longest name whose `<config_dir>/<name>.js` stays within the path limit
/// the patcher supports.
pub fn max_config_name_len(config_dir: &Path) -> usize {
    MAX_PATH_LEN.saturating_sub(config_dir.as_os_str().len() + "/.js".len())
}

pub fn validate_config_name(config_dir: &Path, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("configuration name is empty");
    }
    if name.contains(['/', '\\']) || name == "." || name.contains("..") {
        bail!("configuration name '{name}' is not a plain file name");
    }
    let max_len = max_config_name_len(config_dir);
    if name.chars().count() > max_len {
        bail!("configuration name is too long (at most {max_len} characters here)");
    }
    Ok(())
}

pub fn config_name_for(selection: &[&Patch]) -> String {
    selection
        .iter()
        .map(|patch| patch.id.strip_prefix("lang_").unwrap_or(patch.id.as_str()))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::repo;

    #[test]
    fn saved_document_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join("config");
        let config = RunConfig::new(
            ["a.zip".to_string(), "b.zip".to_string()],
            RunFlags::default(),
        );

        let path = config.save(&config_dir, "en").expect("save");
        assert_eq!(path, config_dir.join("en.js"));

        let raw = fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["dat_dump"], false);
        assert_eq!(value["patches"][0]["archive"], "a.zip");
        assert_eq!(value["patches"][1]["archive"], "b.zip");

        let loaded = RunConfig::load(&config_dir, "en").expect("load");
        assert_eq!(loaded, config);
        assert_eq!(loaded.archives().collect::<Vec<_>>(), vec!["a.zip", "b.zip"]);
    }

    #[test]
    fn save_overwrites_previous_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = RunConfig::new(
            ["a".to_string(), "b".to_string(), "c".to_string()],
            RunFlags {
                console: true,
                ..RunFlags::default()
            },
        );
        first.save(dir.path(), "de").expect("save");
        let second = RunConfig::new(["z".to_string()], RunFlags::default());
        second.save(dir.path(), "de").expect("save");

        assert_eq!(RunConfig::load(dir.path(), "de").expect("load"), second);
    }

    #[test]
    fn older_documents_default_missing_flags() {
        let config: RunConfig =
            serde_json::from_str(r#"{ "dat_dump": true, "patches": [{ "archive": "x/" }] }"#)
                .expect("parse");
        assert!(config.dat_dump);
        assert!(!config.patched_files_dump);
        assert!(!config.console);
    }

    #[test]
    fn rejects_path_like_names() {
        let config_dir = Path::new("/thcrap/config");
        assert!(validate_config_name(config_dir, "en-widescreen").is_ok());
        assert!(validate_config_name(config_dir, "").is_err());
        assert!(validate_config_name(config_dir, "../en").is_err());
        assert!(validate_config_name(config_dir, "a/b").is_err());
    }

    #[test]
    fn caps_name_length_by_config_dir() {
        let config_dir = Path::new("/thcrap/config");
        let max_len = max_config_name_len(config_dir);
        assert_eq!(max_len, 248 - "/thcrap/config/.js".len());
        assert!(validate_config_name(config_dir, &"a".repeat(max_len)).is_ok());
        let err = validate_config_name(config_dir, &"a".repeat(max_len + 1)).unwrap_err();
        assert!(err.to_string().contains("too long"));

        let dir = tempfile::tempdir().expect("tempdir");
        let long = "x".repeat(300);
        assert!(RunConfig::new(["a/".to_string()], RunFlags::default())
            .save(dir.path(), &long)
            .is_err());
    }

    #[test]
    fn config_name_strips_language_prefix() {
        let repos = vec![repo("thpatch", 0, &["lang_en", "widescreen"])];
        let selection: Vec<&Patch> = repos[0].patches.iter().collect();
        assert_eq!(config_name_for(&selection), "en-widescreen");
    }
}
