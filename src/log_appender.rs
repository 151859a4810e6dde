use anyhow::{anyhow, Context, Result};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::{
    roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Size at which the log file is rolled
const LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Compressed log files kept besides the active one
const LOG_FILE_COUNT: u32 = 3;

/// Parse a level name, falling back to `Info` for anything unknown
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::Info)
}

fn build_config(log_dir: &Path, level: LevelFilter) -> Result<Config> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{h({l})} {d(%Y-%m-%d %H:%M:%S)} {M} - {m}{n}")))
        .build();

    let pattern = log_dir.join("repofs.{}.log.gz");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| anyhow!("Log directory is not valid UTF-8: {}", log_dir.display()))?;
    let roller = FixedWindowRoller::builder()
        .base(1)
        .build(pattern, LOG_FILE_COUNT)?;
    let trigger = SizeTrigger::new(LOG_FILE_SIZE);
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} {M}::{m}{n}")))
        .build(log_dir.join("repofs.log"), Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .build(
            Root::builder()
                .appender("stdout")
                .appender("file")
                .build(level),
        )?;
    Ok(config)
}

/// Log to the console and to a size-rolled file in `log_dir`
pub fn setup_logging(log_dir: &Path, level: &str) -> Result<()> {
    let config = build_config(log_dir, parse_level(level))?;
    log4rs::init_config(config)?;
    Ok(())
}
