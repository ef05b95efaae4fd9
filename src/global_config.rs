use crate::{engine::ConfigStore, error::EngineError};
use anyhow::{bail, Context, Result};
use bitflags::bitflags;
use serde_json::Value;

const DESTINATION_MASK: i64 = 0xFFFF;
const TYPE_OFFSET: u32 = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShortcutDestinations: u16 {
        const DESKTOP = 1;
        const START_MENU = 2;
        const GAMES_FOLDER = 4;
        const THCRAP_FOLDER = 8;
    }
}

impl ShortcutDestinations {
    pub fn parse_list(value: &str) -> Result<Self> {
        let mut out = Self::empty();
        for name in value.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            out |= match name {
                "desktop" => Self::DESKTOP,
                "start_menu" | "startmenu" => Self::START_MENU,
                "games" | "games_folder" => Self::GAMES_FOLDER,
                "thcrap" | "thcrap_folder" => Self::THCRAP_FOLDER,
                "none" => Self::empty(),
                other => bail!("unknown shortcut destination '{other}'"),
            };
        }
        Ok(out)
    }

    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::DESKTOP) {
            names.push("desktop");
        }
        if self.contains(Self::START_MENU) {
            names.push("start_menu");
        }
        if self.contains(Self::GAMES_FOLDER) {
            names.push("games_folder");
        }
        if self.contains(Self::THCRAP_FOLDER) {
            names.push("thcrap_folder");
        }
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutType {
    Auto = 0,
    Shortcut = 1,
    WrapperAbsPath = 2,
    WrapperRelPath = 3,
}

impl ShortcutType {
    /// Unknown values fall back to plain shortcuts.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => ShortcutType::Auto,
            1 => ShortcutType::Shortcut,
            2 => ShortcutType::WrapperAbsPath,
            3 => ShortcutType::WrapperRelPath,
            _ => ShortcutType::Shortcut,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(ShortcutType::Auto),
            "shortcut" => Some(ShortcutType::Shortcut),
            "wrapper_abspath" | "wrapper-abspath" => Some(ShortcutType::WrapperAbsPath),
            "wrapper_relpath" | "wrapper-relpath" => Some(ShortcutType::WrapperRelPath),
            _ => value.parse::<i64>().ok().map(Self::from_raw),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShortcutType::Auto => "auto",
            ShortcutType::Shortcut => "shortcut",
            ShortcutType::WrapperAbsPath => "wrapper_abspath",
            ShortcutType::WrapperRelPath => "wrapper_relpath",
        }
    }
}

pub fn pack_shortcuts(destinations: ShortcutDestinations, kind: ShortcutType) -> i64 {
    i64::from(destinations.bits()) | ((kind as i64) << TYPE_OFFSET)
}

pub fn unpack_shortcuts(packed: i64) -> (ShortcutDestinations, ShortcutType) {
    let destinations = ShortcutDestinations::from_bits_retain((packed & DESTINATION_MASK) as u16);
    let kind = ShortcutType::from_raw(packed >> TYPE_OFFSET);
    (destinations, kind)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    pub background_updates: bool,
    pub time_between_updates: i64,
    pub update_at_exit: bool,
    pub update_others: bool,
    pub console: bool,
    pub use_wininet: bool,
    pub exception_detail: i64,
    pub codepage: i64,
    pub developer_mode: bool,
    pub shortcut_destinations: ShortcutDestinations,
    pub shortcut_type: ShortcutType,
}

impl GlobalConfig {
    pub fn load<S: ConfigStore + ?Sized>(store: &mut S) -> Self {
        let packed = store.get_int(
            "default_shortcut_destinations",
            pack_shortcuts(
                ShortcutDestinations::DESKTOP | ShortcutDestinations::START_MENU,
                ShortcutType::Auto,
            ),
        );
        let (shortcut_destinations, shortcut_type) = unpack_shortcuts(packed);

        Self {
            background_updates: store.get_bool("background_updates", false),
            time_between_updates: store.get_int("time_between_updates", 5),
            update_at_exit: store.get_bool("update_at_exit", false),
            update_others: store.get_bool("update_others", true),
            console: store.get_bool("console", false),
            use_wininet: store.get_bool("use_wininet", false),
            exception_detail: store.get_int("exception_detail", 1),
            codepage: store.get_int("codepage", 932),
            developer_mode: store.get_bool("developer_mode", false),
            shortcut_destinations,
            shortcut_type,
        }
    }

    pub fn save<S: ConfigStore + ?Sized>(&self, store: &mut S) -> Result<(), EngineError> {
        store.set_bool("background_updates", self.background_updates)?;
        store.set_int("time_between_updates", self.time_between_updates)?;
        store.set_bool("update_at_exit", self.update_at_exit)?;
        store.set_bool("update_others", self.update_others)?;
        store.set_bool("console", self.console)?;
        store.set_bool("use_wininet", self.use_wininet)?;
        store.set_int("exception_detail", self.exception_detail)?;
        store.set_int("codepage", self.codepage)?;
        store.set_bool("developer_mode", self.developer_mode)?;
        store.set_int(
            "default_shortcut_destinations",
            pack_shortcuts(self.shortcut_destinations, self.shortcut_type),
        )?;
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "background_updates" => self.background_updates = parse_bool(value)?,
            "time_between_updates" => self.time_between_updates = parse_int(value)?,
            "update_at_exit" => self.update_at_exit = parse_bool(value)?,
            "update_others" => self.update_others = parse_bool(value)?,
            "console" => self.console = parse_bool(value)?,
            "use_wininet" => self.use_wininet = parse_bool(value)?,
            "exception_detail" => self.exception_detail = parse_int(value)?,
            "codepage" => self.codepage = parse_int(value)?,
            "developer_mode" => self.developer_mode = parse_bool(value)?,
            "shortcut_destinations" => {
                self.shortcut_destinations = ShortcutDestinations::parse_list(value)?
            }
            "shortcut_type" => {
                self.shortcut_type = ShortcutType::parse(value)
                    .with_context(|| format!("unknown shortcut type '{value}'"))?
            }
            _ => bail!("unknown setting '{key}'"),
        }
        Ok(())
    }

    pub fn entries(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("background_updates", self.background_updates.into()),
            ("time_between_updates", self.time_between_updates.into()),
            ("update_at_exit", self.update_at_exit.into()),
            ("update_others", self.update_others.into()),
            ("console", self.console.into()),
            ("use_wininet", self.use_wininet.into()),
            ("exception_detail", self.exception_detail.into()),
            ("codepage", self.codepage.into()),
            ("developer_mode", self.developer_mode.into()),
            (
                "shortcut_destinations",
                self.shortcut_destinations.names().into(),
            ),
            ("shortcut_type", self.shortcut_type.as_str().into()),
        ]
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => bail!("expected a boolean, got '{value}'"),
    }
}

fn parse_int(value: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("expected an integer, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;

    #[test]
    fn packing_round_trips() {
        let destinations = ShortcutDestinations::DESKTOP | ShortcutDestinations::START_MENU;
        let packed = pack_shortcuts(destinations, ShortcutType::WrapperAbsPath);
        assert_eq!(packed, 3 | (2 << 16));

        let (unpacked, kind) = unpack_shortcuts(packed);
        assert_eq!(unpacked.bits(), 3);
        assert_eq!(kind as i64, 2);
    }

    #[test]
    fn defaults_when_store_is_empty() {
        let mut store = FakeEngine::default();
        let config = GlobalConfig::load(&mut store);

        assert!(!config.background_updates);
        assert_eq!(config.time_between_updates, 5);
        assert!(config.update_others);
        assert_eq!(config.exception_detail, 1);
        assert_eq!(config.codepage, 932);
        assert_eq!(
            config.shortcut_destinations,
            ShortcutDestinations::DESKTOP | ShortcutDestinations::START_MENU
        );
        assert_eq!(config.shortcut_type, ShortcutType::Auto);
    }

    #[test]
    fn out_of_range_shortcut_type_normalizes() {
        let mut store = FakeEngine::default();
        store.set_int("default_shortcut_destinations", 1 | (9 << 16)).expect("set");
        let config = GlobalConfig::load(&mut store);

        assert_eq!(config.shortcut_destinations, ShortcutDestinations::DESKTOP);
        assert_eq!(config.shortcut_type, ShortcutType::Shortcut);
    }

    #[test]
    fn save_writes_every_field() {
        let mut store = FakeEngine::default();
        let mut config = GlobalConfig::load(&mut store);
        config.set("codepage", "1252").expect("codepage");
        config.set("developer_mode", "yes").expect("developer_mode");
        config.set("shortcut_type", "wrapper_relpath").expect("shortcut_type");
        config.save(&mut store).expect("save");

        assert_eq!(store.config.len(), 10);
        assert_eq!(store.config["codepage"], 1252);
        assert_eq!(store.config["update_others"], true);
        assert_eq!(store.config["default_shortcut_destinations"], 3 | (3 << 16));
        assert_eq!(GlobalConfig::load(&mut store), config);
    }

    #[test]
    fn rejects_bad_settings() {
        let mut config = GlobalConfig::load(&mut FakeEngine::default());
        assert!(config.set("codepage", "shift-jis").is_err());
        assert!(config.set("console", "maybe").is_err());
        assert!(config.set("nope", "1").is_err());
        assert!(config.set("shortcut_destinations", "desktop,moon").is_err());
    }

    #[test]
    fn parses_destination_lists() {
        let parsed = ShortcutDestinations::parse_list("desktop, games").expect("parse");
        assert_eq!(
            parsed,
            ShortcutDestinations::DESKTOP | ShortcutDestinations::GAMES_FOLDER
        );
        assert_eq!(parsed.names(), vec!["desktop", "games_folder"]);
    }
}
