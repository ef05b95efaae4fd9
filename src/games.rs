use anyhow::{Context, Result};
use log::warn;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

const GAMES_FILE: &str = "games.js";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GamesList {
    games: BTreeMap<String, PathBuf>,
}

impl GamesList {
    pub fn load(config_dir: &Path) -> Self {
        let path = config_dir.join(GAMES_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<BTreeMap<String, PathBuf>>(&raw) {
            Ok(games) => Self { games },
            Err(err) => {
                warn!("ignoring malformed {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, config_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(config_dir).context("create config dir")?;
        let path = config_dir.join(GAMES_FILE);
        let raw = serde_json::to_string_pretty(&self.games).context("serialize games list")?;
        fs::write(&path, raw).context("write games.js")?;
        Ok(path)
    }

    pub fn set(&mut self, game_id: &str, path: impl Into<PathBuf>) -> Option<PathBuf> {
        self.games.insert(game_id.to_string(), path.into())
    }

    pub fn remove(&mut self, game_id: &str) -> Option<PathBuf> {
        self.games.remove(game_id)
    }

    pub fn get(&self, game_id: &str) -> Option<&Path> {
        self.games.get(game_id).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.games
            .iter()
            .map(|(id, path)| (id.as_str(), path.as_path()))
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
