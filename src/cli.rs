use crate::{
    config::{SetupPaths, DEFAULT_DISCOVERY_URL},
    discovery::{Fetch, HttpFetch},
    engine::Engine,
    games::GamesList,
    global_config::{GlobalConfig, ShortcutDestinations, ShortcutType},
    local::LocalEngine,
    logging,
    repo::{Patch, PatchDesc, Repository},
    runconfig::{config_name_for, validate_config_name, RunConfig, RunFlags},
    stack::{prepare_stack, resolve_selection, StackReport},
};
use anyhow::{anyhow, bail, Context, Result};
use log::{error, info, warn, LevelFilter};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    fn level(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::Error,
            Verbosity::Normal => LevelFilter::Warn,
            Verbosity::Verbose => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    root: Option<PathBuf>,
    url: Option<String>,
    offline: bool,
    verbosity: Verbosity,
}

impl GlobalOptions {
    fn discovery_url(&self) -> Option<&str> {
        if self.offline {
            return None;
        }
        Some(self.url.as_deref().unwrap_or(DEFAULT_DISCOVERY_URL))
    }
}

enum CliCommand {
    Repos,
    Install(InstallOptions),
    Show(String),
    Settings(SettingsCommand),
    Games(GamesCommand),
    Help,
    Version,
}

struct InstallOptions {
    selection: Vec<PatchDesc>,
    config_name: Option<String>,
    flags: RunFlags,
}

enum SettingsCommand {
    Show,
    Set { key: String, value: String },
    Shortcuts { destinations: String, kind: String },
}

enum GamesCommand {
    List,
    Add { id: String, path: PathBuf },
    Remove(String),
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, tokens) = parse_global_options(&args)?;
    let command = parse_command(&tokens)?;
    match command {
        CliCommand::Help => {
            print_help();
            return Ok(());
        }
        CliCommand::Version => {
            println!("thcrap-setup v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let paths = SetupPaths::resolve(global.root.as_deref())?;
    if let Err(err) = paths
        .logs_dir()
        .and_then(|dir| logging::init(&dir, global.verbosity.level()))
    {
        eprintln!("Logging disabled: {err:#}");
    }
    info!("thcrap directory: {}", paths.root.display());

    let fetch: Option<Box<dyn Fetch>> = if global.offline {
        None
    } else {
        Some(Box::new(HttpFetch::new()))
    };
    let mut engine = LocalEngine::new(paths, fetch);
    let mut settings = GlobalConfig::load(&mut engine);

    run_command(&mut engine, &mut settings, command, &global)
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut global = GlobalOptions {
        format: OutputFormat::Text,
        root: None,
        url: None,
        offline: false,
        verbosity: Verbosity::Normal,
    };
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            global.format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow!("Unknown format: {value}"))?;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--root=") {
            global.root = Some(PathBuf::from(value));
            continue;
        }
        if let Some(value) = arg.strip_prefix("--url=") {
            global.url = Some(value.to_string());
            continue;
        }
        match arg.as_str() {
            "--format" => {
                let value = iter.next().context("--format requires a value")?;
                global.format = OutputFormat::parse(value)
                    .ok_or_else(|| anyhow!("Unknown format: {value}"))?;
            }
            "--root" => {
                let value = iter.next().context("--root requires a path")?;
                global.root = Some(PathBuf::from(value));
            }
            "--url" => {
                let value = iter.next().context("--url requires a value")?;
                global.url = Some(value.to_string());
            }
            "--offline" => global.offline = true,
            "-q" | "--quiet" => global.verbosity = Verbosity::Quiet,
            "-v" | "--verbose" => global.verbosity = Verbosity::Verbose,
            "-vv" | "--debug" => global.verbosity = Verbosity::Debug,
            _ => tokens.push(arg.to_string()),
        }
    }
    Ok((global, tokens))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = &tokens[1..];
    match head.as_str() {
        "help" | "--help" | "-h" => Ok(CliCommand::Help),
        "version" | "--version" | "-V" => Ok(CliCommand::Version),
        "repos" => Ok(CliCommand::Repos),
        "install" => parse_install(rest).map(CliCommand::Install),
        "show" => {
            let name = rest.first().context("show requires a configuration name")?;
            Ok(CliCommand::Show(name.to_string()))
        }
        "settings" => parse_settings(rest).map(CliCommand::Settings),
        "games" => parse_games(rest).map(CliCommand::Games),
        other => bail!("Unknown command: {other} (see 'thcrap-setup help')"),
    }
}

fn parse_install(args: &[String]) -> Result<InstallOptions> {
    let mut options = InstallOptions {
        selection: Vec::new(),
        config_name: None,
        flags: RunFlags::default(),
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = iter.next().context("--config requires a name")?;
                options.config_name = Some(value.to_string());
            }
            value if value.starts_with("--config=") => {
                options.config_name = Some(value.trim_start_matches("--config=").to_string());
            }
            "--dat-dump" => options.flags.dat_dump = true,
            "--patched-files-dump" => options.flags.patched_files_dump = true,
            "--console" => options.flags.console = true,
            value if value.starts_with('-') => bail!("Unknown install option: {value}"),
            value => {
                let desc = PatchDesc::parse(value)
                    .ok_or_else(|| anyhow!("Invalid patch selection: {value}"))?;
                options.selection.push(desc);
            }
        }
    }
    if options.selection.is_empty() {
        bail!("install requires at least one patch (repo/patch or patch)");
    }
    Ok(options)
}

fn parse_settings(args: &[String]) -> Result<SettingsCommand> {
    match args.first().map(String::as_str) {
        None | Some("show") => Ok(SettingsCommand::Show),
        Some("set") => {
            let key = args.get(1).context("settings set requires a key")?;
            let value = args.get(2).context("settings set requires a value")?;
            Ok(SettingsCommand::Set {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        Some("shortcuts") => {
            let destinations = args
                .get(1)
                .context("settings shortcuts requires destinations")?;
            let kind = args
                .get(2)
                .map(String::as_str)
                .unwrap_or("shortcut")
                .to_string();
            Ok(SettingsCommand::Shortcuts {
                destinations: destinations.to_string(),
                kind,
            })
        }
        Some(other) => bail!("Unknown settings command: {other} (use 'show', 'set' or 'shortcuts')"),
    }
}

fn parse_games(args: &[String]) -> Result<GamesCommand> {
    match args.first().map(String::as_str) {
        None | Some("list") => Ok(GamesCommand::List),
        Some("add") => {
            let id = args.get(1).context("games add requires a game id")?;
            let path = args.get(2).context("games add requires a path")?;
            Ok(GamesCommand::Add {
                id: id.to_string(),
                path: PathBuf::from(path),
            })
        }
        Some("remove") => {
            let id = args.get(1).context("games remove requires a game id")?;
            Ok(GamesCommand::Remove(id.to_string()))
        }
        Some(other) => bail!("Unknown games command: {other} (use 'list', 'add' or 'remove')"),
    }
}

fn run_command(
    engine: &mut LocalEngine,
    settings: &mut GlobalConfig,
    command: CliCommand,
    global: &GlobalOptions,
) -> Result<()> {
    match command {
        CliCommand::Repos => {
            let repos = engine
                .discover(global.discovery_url())
                .context("discover repositories")?;
            list_repos(&repos, global.format)
        }
        CliCommand::Install(options) => install(engine, options, global),
        CliCommand::Show(name) => {
            let config = RunConfig::load(&engine.paths().config_dir(), &name)?;
            show_runconfig(&name, &config, global.format)
        }
        CliCommand::Settings(command) => run_settings(engine, settings, command, global.format),
        CliCommand::Games(command) => run_games(engine, command, global.format),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

#[derive(Serialize)]
struct RepoListItem<'a> {
    id: &'a str,
    title: &'a str,
    contact: Option<&'a str>,
    patches: Vec<PatchListItem<'a>>,
}

#[derive(Serialize)]
struct PatchListItem<'a> {
    id: &'a str,
    title: &'a str,
}

fn list_repos(repos: &[Repository], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let items: Vec<RepoListItem> = repos
                .iter()
                .map(|repo| RepoListItem {
                    id: &repo.id,
                    title: &repo.title,
                    contact: repo.contact.as_deref(),
                    patches: repo
                        .patches
                        .iter()
                        .map(|patch| PatchListItem {
                            id: &patch.id,
                            title: &patch.title,
                        })
                        .collect(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if repos.is_empty() {
                println!("No repositories found.");
            }
            for repo in repos {
                println!("[{}] {}", repo.id, repo.title);
                if let Some(contact) = &repo.contact {
                    println!("    Contact: {contact}");
                }
                for patch in &repo.patches {
                    println!("    {:<24} {}", patch.id, patch.title);
                }
                println!();
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InstallSummary<'a> {
    config: &'a str,
    path: Option<String>,
    selected: Vec<&'a str>,
    archives: &'a [String],
    registered: usize,
    missing: Vec<String>,
}

struct InstallOutcome<'r> {
    name: String,
    selection: Vec<&'r Patch>,
    report: StackReport,
    saved: Option<PathBuf>,
}

fn install(engine: &mut LocalEngine, options: InstallOptions, global: &GlobalOptions) -> Result<()> {
    let config_dir = engine.paths().config_dir();
    if let Some(name) = &options.config_name {
        validate_config_name(&config_dir, name)?;
    }

    let repos = engine
        .discover(global.discovery_url())
        .context("discover repositories")?;
    let outcome = build_runconfig(engine, &repos, &config_dir, options)?;
    let InstallOutcome {
        name,
        selection,
        report,
        saved,
    } = outcome;

    match global.format {
        OutputFormat::Json => {
            let summary = InstallSummary {
                config: &name,
                path: saved.as_ref().map(|path| path.display().to_string()),
                selected: selection.iter().filter_map(|patch| patch.archive()).collect(),
                archives: &report.archives,
                registered: report.registered,
                missing: report
                    .missing
                    .iter()
                    .map(|missing| missing.dependency.to_string())
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            println!("Patch stack for '{name}':");
            for (index, patch) in engine.stack().iter().enumerate() {
                let title = patch.title.as_deref().unwrap_or(patch.id.as_str());
                println!("  {:>2}. {:<40} {title}", index + 1, patch.archive);
            }
            if let Some(path) = saved {
                println!("Saved {}", path.display());
            }
        }
    }
    Ok(())
}

fn build_runconfig<'r, E: Engine + ?Sized>(
    engine: &mut E,
    repos: &'r [Repository],
    config_dir: &Path,
    options: InstallOptions,
) -> Result<InstallOutcome<'r>> {
    let selection = resolve_selection(repos, &options.selection)?;
    let name = options
        .config_name
        .unwrap_or_else(|| config_name_for(&selection));
    validate_config_name(config_dir, &name)?;

    let report = prepare_stack(engine, repos, &selection).context("resolve patch stack")?;
    report_missing(&report);

    let config = RunConfig::new(report.archives.iter().cloned(), options.flags);
    let saved = match config.save(config_dir, &name) {
        Ok(path) => Some(path),
        Err(err) => {
            error!("{err:#}");
            eprintln!("Failed to write run configuration {name}: {err:#}");
            None
        }
    };

    Ok(InstallOutcome {
        name,
        selection,
        report,
        saved,
    })
}

fn report_missing(report: &StackReport) {
    if report.missing.is_empty() {
        return;
    }
    for missing in &report.missing {
        eprintln!(
            "Dependency '{}' of patch '{}' not met",
            missing.dependency, missing.patch
        );
    }
    eprintln!(
        "{} unmet dependencies. This configuration will most likely not work correctly!",
        report.missing.len()
    );
}

fn show_runconfig(name: &str, config: &RunConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => {
            println!("{name}");
            println!("  dat_dump: {}", config.dat_dump);
            println!("  patched_files_dump: {}", config.patched_files_dump);
            println!("  console: {}", config.console);
            for (index, archive) in config.archives().enumerate() {
                println!("  {:>2}. {archive}", index + 1);
            }
        }
    }
    Ok(())
}

fn run_settings(
    engine: &mut LocalEngine,
    settings: &mut GlobalConfig,
    command: SettingsCommand,
    format: OutputFormat,
) -> Result<()> {
    match command {
        SettingsCommand::Show => return print_settings(settings, format),
        SettingsCommand::Set { key, value } => settings.set(&key, &value)?,
        SettingsCommand::Shortcuts { destinations, kind } => {
            settings.shortcut_destinations = ShortcutDestinations::parse_list(&destinations)?;
            settings.shortcut_type = ShortcutType::parse(&kind)
                .ok_or_else(|| anyhow!("Unknown shortcut type: {kind}"))?;
        }
    }

    if let Err(err) = settings.save(engine) {
        error!("{err}");
        eprintln!("Failed to save settings: {err}");
        return Ok(());
    }
    print_settings(settings, format)
}

fn print_settings(settings: &GlobalConfig, format: OutputFormat) -> Result<()> {
    let entries = settings.entries();
    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            for (key, value) in entries {
                println!("{key:<24} {value}");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct GameListItem<'a> {
    id: &'a str,
    path: String,
}

fn run_games(engine: &LocalEngine, command: GamesCommand, format: OutputFormat) -> Result<()> {
    let config_dir = engine.paths().config_dir();
    let mut games = GamesList::load(&config_dir);

    let changed = match command {
        GamesCommand::List => false,
        GamesCommand::Add { id, path } => {
            if !path.exists() {
                warn!("{} does not exist", path.display());
            }
            if let Some(previous) = games.get(&id) {
                info!("replacing {id} ({})", previous.display());
            }
            games.set(&id, path);
            true
        }
        GamesCommand::Remove(id) => {
            if games.remove(&id).is_none() {
                bail!("Unknown game: {id}");
            }
            true
        }
    };

    if changed {
        if let Err(err) = games.save(&config_dir) {
            error!("{err:#}");
            eprintln!("Failed to write games.js ({err:#})");
        }
    }

    match format {
        OutputFormat::Json => {
            let items: Vec<GameListItem> = games
                .iter()
                .map(|(id, path)| GameListItem {
                    id,
                    path: path.display().to_string(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if games.is_empty() {
                println!("No games configured.");
                return Ok(());
            }
            for (id, path) in games.iter() {
                println!("{id:<12} {}", path.display());
            }
            println!("{} game(s)", games.len());
        }
    }
    Ok(())
}

fn print_help() {
    println!("thcrap-setup v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  thcrap-setup repos                        Discover and list repositories");
    println!("  thcrap-setup install <patch...> [opts]    Resolve patches and write a run configuration");
    println!("  thcrap-setup show <config>                Show a saved run configuration");
    println!("  thcrap-setup settings [show]              Show global settings");
    println!("  thcrap-setup settings set <key> <value>   Change one global setting");
    println!("  thcrap-setup settings shortcuts <dest,...> [type]");
    println!("                                            Default shortcut destinations and type");
    println!("  thcrap-setup games [list]                 List configured games");
    println!("  thcrap-setup games add <id> <path>        Add or update a game");
    println!("  thcrap-setup games remove <id>            Remove a game");
    println!();
    println!("Patches are given as <repo>/<patch> or <patch>.");
    println!();
    println!("Install options:");
    println!("  -c, --config <name>                       Configuration name (default: patch ids joined by '-')");
    println!("  --dat-dump                                Dump intermediate data");
    println!("  --patched-files-dump                      Dump patched files");
    println!("  --console                                 Show the log console");
    println!();
    println!("Global options:");
    println!("  --root <dir>                              thcrap directory (default: current directory)");
    println!("  --url <url>                               Repository discovery start URL");
    println!("  --offline                                 Only use local repositories");
    println!("  --format <json|text>                      Output format");
    println!("  -q, --quiet | -v, --verbose | --debug     Console log level");
    println!("  -h, --help                                Show help");
    println!("  -V, --version                             Show version");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::fake::FakeEngine, repo::repo};

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn global_options_are_stripped() {
        let (global, tokens) = parse_global_options(&args(&[
            "--format=json",
            "install",
            "--root",
            "/opt/thcrap",
            "thpatch/lang_en",
            "--offline",
        ]))
        .expect("parse");
        assert!(global.format == OutputFormat::Json);
        assert_eq!(global.root, Some(PathBuf::from("/opt/thcrap")));
        assert!(global.offline);
        assert_eq!(global.discovery_url(), None);
        assert_eq!(tokens, args(&["install", "thpatch/lang_en"]));
    }

    #[test]
    fn discovery_url_defaults_when_online() {
        let (global, _) = parse_global_options(&args(&["repos"])).expect("parse");
        assert_eq!(global.discovery_url(), Some(DEFAULT_DISCOVERY_URL));
    }

    #[test]
    fn parses_install_options() {
        let command = parse_command(&args(&[
            "install",
            "thpatch/lang_de",
            "widescreen",
            "--config=de-ws",
            "--dat-dump",
        ]))
        .expect("parse");
        let CliCommand::Install(options) = command else {
            panic!("expected install");
        };
        assert_eq!(
            options.selection,
            vec![
                PatchDesc::qualified("thpatch", "lang_de"),
                PatchDesc::relative("widescreen"),
            ]
        );
        assert_eq!(options.config_name.as_deref(), Some("de-ws"));
        assert!(options.flags.dat_dump);
        assert!(!options.flags.console);
    }

    fn install_options(selection: &[PatchDesc], config_name: Option<&str>) -> InstallOptions {
        InstallOptions {
            selection: selection.to_vec(),
            config_name: config_name.map(str::to_string),
            flags: RunFlags {
                console: true,
                ..RunFlags::default()
            },
        }
    }

    fn thpatch_engine() -> FakeEngine {
        FakeEngine::new(vec![
            repo("nmlgc", 0, &["base_tsa"]),
            repo("thpatch", 1, &["lang_en", "widescreen"]),
        ])
        .depends("thpatch", "lang_en", &["nmlgc/base_tsa"])
    }

    #[test]
    fn install_writes_runconfig_named_after_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join("config");
        let mut engine = thpatch_engine();
        let repos = engine.repos.clone();
        let options = install_options(
            &[PatchDesc::relative("lang_en"), PatchDesc::relative("widescreen")],
            None,
        );

        let outcome = build_runconfig(&mut engine, &repos, &config_dir, options).expect("install");

        assert_eq!(outcome.name, "en-widescreen");
        assert_eq!(outcome.saved, Some(config_dir.join("en-widescreen.js")));
        assert_eq!(
            outcome.selection[0].archive(),
            Some("repos/thpatch/lang_en/")
        );
        let saved = RunConfig::load(&config_dir, "en-widescreen").expect("load");
        assert!(saved.console);
        assert_eq!(
            saved.archives().collect::<Vec<_>>(),
            vec![
                "repos/nmlgc/base_tsa/",
                "repos/thpatch/lang_en/",
                "repos/thpatch/widescreen/",
            ]
        );
    }

    #[test]
    fn install_reports_failed_write_without_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join("config");
        std::fs::write(&config_dir, "not a directory").expect("write");
        let mut engine = thpatch_engine();
        let repos = engine.repos.clone();
        let options = install_options(&[PatchDesc::qualified("thpatch", "lang_en")], Some("en"));

        let outcome = build_runconfig(&mut engine, &repos, &config_dir, options).expect("install");

        assert_eq!(outcome.saved, None);
        assert_eq!(outcome.report.archives.len(), 2);
        assert!(config_dir.is_file());
    }

    #[test]
    fn install_requires_a_patch() {
        assert!(parse_command(&args(&["install", "--console"])).is_err());
        assert!(parse_command(&args(&["install", "a/b/c"])).is_err());
    }

    #[test]
    fn unknown_commands_are_errors() {
        assert!(parse_command(&args(&["frobnicate"])).is_err());
        assert!(parse_command(&args(&["settings", "reset"])).is_err());
        assert!(parse_command(&args(&["games", "add", "th06"])).is_err());
        assert!(matches!(parse_command(&[]), Ok(CliCommand::Help)));
    }
}
