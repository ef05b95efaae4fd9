use anyhow::{Context, Result};
use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Logger, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "thcrap-setup.log";
const ROLL_SIZE: u64 = 1024 * 1024;
const ROLL_COUNT: u32 = 3;

pub fn init(logs_dir: &Path, console_level: LevelFilter) -> Result<PathBuf> {
    let log_file = logs_dir.join(LOG_FILE);
    let pattern = logs_dir.join("thcrap-setup.{}.log");
    let roller = FixedWindowRoller::builder()
        .build(&pattern.to_string_lossy(), ROLL_COUNT)
        .context("build log roller")?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));

    let file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {M} - {m}{n}",
        )))
        .build(&log_file, Box::new(policy))
        .context("open log file")?;
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{h([{l}])} {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(console_level)))
                .build("stderr", Box::new(stderr)),
        )
        .logger(Logger::builder().build("ureq", LevelFilter::Warn))
        .logger(Logger::builder().build("rustls", LevelFilter::Warn))
        .build(
            Root::builder()
                .appender("file")
                .appender("stderr")
                .build(LevelFilter::Debug),
        )
        .context("build log config")?;

    log4rs::init_config(config).context("install logger")?;
    log::debug!("log file: {}", log_file.display());
    Ok(log_file)
}
