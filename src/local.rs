use crate::{
    config::SetupPaths,
    discovery::{self, Fetch},
    engine::{ConfigStore, Engine, LoadedPatch},
    error::EngineError,
    repo::{PatchDesc, RepoHandle, Repository},
};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// `repos/<id>/repo.js`. `patches` keeps the order the file declares.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoJs {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub neighbors: Vec<String>,
    #[serde(default)]
    pub patches: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct PatchJs {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

pub struct LocalEngine {
    paths: SetupPaths,
    fetch: Option<Box<dyn Fetch>>,
    repo_dirs: Vec<PathBuf>,
    stack: Vec<LoadedPatch>,
    settings: Option<Map<String, Value>>,
}

impl LocalEngine {
    pub fn new(paths: SetupPaths, fetch: Option<Box<dyn Fetch>>) -> Self {
        Self {
            paths,
            fetch,
            repo_dirs: Vec::new(),
            stack: Vec::new(),
            settings: None,
        }
    }

    pub fn paths(&self) -> &SetupPaths {
        &self.paths
    }

    fn scan_local(&mut self) -> Vec<Repository> {
        let repos_dir = self.paths.repos_dir();
        let Ok(entries) = fs::read_dir(&repos_dir) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            match load_repo_js(&dir.join("repo.js")) {
                Ok(repo_js) => found.push((repo_js, dir)),
                Err(err) => debug!("skipping {}: {err}", dir.display()),
            }
        }
        found.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        self.repo_dirs.clear();
        let mut repos = Vec::with_capacity(found.len());
        for (repo_js, dir) in found {
            let handle = RepoHandle(self.repo_dirs.len());
            self.repo_dirs.push(dir);
            let patches = repo_js
                .patches
                .into_iter()
                .map(|(id, title)| {
                    let title = title.as_str().map(str::to_string).unwrap_or_else(|| id.clone());
                    (id, title)
                })
                .collect::<Vec<_>>();
            let mut repo = Repository::new(
                repo_js.id.clone(),
                repo_js.title.unwrap_or(repo_js.id),
                handle,
                patches,
            );
            repo.contact = repo_js.contact;
            repo.servers = repo_js.servers;
            repos.push(repo);
        }
        repos
    }

    fn fetch_patch_js(
        &self,
        repo: &Repository,
        patch_id: &str,
        target: &Path,
    ) -> Result<(), String> {
        let Some(fetch) = &self.fetch else {
            return Err("patch.js not available locally (offline)".to_string());
        };
        if repo.servers.is_empty() {
            return Err("repository lists no servers".to_string());
        }

        let mut last_error = String::new();
        for server in &repo.servers {
            let url = discovery::join_url(server, &format!("{patch_id}/patch.js"));
            let raw = match fetch.get_text(&url) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("{err}");
                    last_error = err.to_string();
                    continue;
                }
            };
            if let Err(err) = serde_json::from_str::<Value>(&raw) {
                last_error = format!("{url}: {err}");
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| err.to_string())?;
            }
            fs::write(target, raw).map_err(|err| err.to_string())?;
            info!("fetched {url}");
            return Ok(());
        }
        Err(last_error)
    }

    fn settings_path(&self) -> PathBuf {
        self.paths.config_dir().join("config.js")
    }

    fn settings(&mut self) -> &mut Map<String, Value> {
        if self.settings.is_none() {
            let path = self.settings_path();
            let loaded = fs::read_to_string(&path)
                .ok()
                .and_then(|raw| match serde_json::from_str::<Map<String, Value>>(&raw) {
                    Ok(map) => Some(map),
                    Err(err) => {
                        warn!("ignoring malformed {}: {err}", path.display());
                        None
                    }
                })
                .unwrap_or_default();
            self.settings = Some(loaded);
        }
        self.settings.get_or_insert_with(Map::new)
    }

    fn set_setting(&mut self, key: &str, value: Value) -> Result<(), EngineError> {
        self.settings().insert(key.to_string(), value);
        let path = self.settings_path();
        let config_dir = self.paths.config_dir();
        fs::create_dir_all(&config_dir)
            .map_err(|err| EngineError::io("create config dir", &config_dir, err))?;
        let raw = serde_json::to_string_pretty(&*self.settings()).map_err(|source| {
            EngineError::Json {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, raw).map_err(|err| EngineError::io("write settings", &path, err))
    }
}

fn load_repo_js(path: &Path) -> Result<RepoJs, EngineError> {
    let raw = fs::read_to_string(path).map_err(|err| EngineError::io("read repo.js", path, err))?;
    serde_json::from_str(&raw).map_err(|source| EngineError::Json {
        path: path.to_path_buf(),
        source,
    })
}

impl Engine for LocalEngine {
    fn discover(&mut self, start_url: Option<&str>) -> Result<Vec<Repository>, EngineError> {
        if let (Some(url), Some(fetch)) = (start_url, self.fetch.as_deref()) {
            match discovery::mirror_repositories(fetch, url, &self.paths.repos_dir()) {
                Ok(ids) => info!("mirrored {} repositories from {url}", ids.len()),
                Err(err) => warn!("{err}; using local repositories only"),
            }
        }
        let repos = self.scan_local();
        info!("{} repositories available", repos.len());
        Ok(repos)
    }

    fn bootstrap(&mut self, repo: &Repository, desc: &PatchDesc) -> Result<String, EngineError> {
        let bootstrap_error = |reason: String| EngineError::Bootstrap {
            repo_id: repo.id.clone(),
            patch_id: desc.patch_id.clone(),
            reason,
        };

        let repo_dir = self
            .repo_dirs
            .get(repo.handle().0)
            .cloned()
            .ok_or_else(|| bootstrap_error("unknown repository handle".to_string()))?;
        let patch_js = repo_dir.join(&desc.patch_id).join("patch.js");
        if !patch_js.is_file() {
            self.fetch_patch_js(repo, &desc.patch_id, &patch_js)
                .map_err(bootstrap_error)?;
        }

        Ok(format!("repos/{}/{}/", repo.id, desc.patch_id))
    }

    fn parse_archive(&mut self, archive: &str) -> Result<LoadedPatch, EngineError> {
        let parse_error = |reason: String| EngineError::Parse {
            archive: archive.to_string(),
            reason,
        };

        let path = self.paths.root.join(archive).join("patch.js");
        let raw = fs::read_to_string(&path).map_err(|err| parse_error(err.to_string()))?;
        let patch_js: PatchJs =
            serde_json::from_str(&raw).map_err(|err| parse_error(err.to_string()))?;

        let dependencies = patch_js
            .dependencies
            .iter()
            .filter_map(|dep| {
                let parsed = PatchDesc::parse(dep);
                if parsed.is_none() {
                    warn!("ignoring malformed dependency '{dep}' in {archive}");
                }
                parsed
            })
            .collect();
        let id = patch_js.id.unwrap_or_else(|| {
            archive
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(archive)
                .to_string()
        });

        Ok(LoadedPatch {
            id,
            title: patch_js.title,
            archive: archive.to_string(),
            dependencies,
        })
    }

    fn stack_append(&mut self, patch: LoadedPatch) {
        self.stack.push(patch);
    }

    fn stack_clear(&mut self) {
        self.stack.clear();
    }

    fn stack(&self) -> &[LoadedPatch] {
        &self.stack
    }
}

impl ConfigStore for LocalEngine {
    fn get_bool(&mut self, key: &str, default: bool) -> bool {
        self.settings()
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    fn get_int(&mut self, key: &str, default: i64) -> i64 {
        self.settings()
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or(default)
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), EngineError> {
        self.set_setting(key, Value::Bool(value))
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<(), EngineError> {
        self.set_setting(key, Value::from(value))
    }
}
