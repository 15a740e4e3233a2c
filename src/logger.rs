//! Global `tracing` subscriber setup.

use std::fs::File;
use std::path::Path;

use anyhow::Context;
use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{
    fmt::{time::OffsetTime, writer::BoxMakeWriter},
    FmtSubscriber,
};

/// Log everything to a new timestamped file under `log_dir`.
///
/// Fails if the file cannot be created or a global subscriber is already set.
pub fn init_logger(log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Could not create log directory {}", log_dir.display()))?;
    let path = log_dir.join(log_file_name()?);
    let file = File::create(&path)
        .with_context(|| format!("Could not create log file {}", path.display()))?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(local_timer()?)
        .with_writer(BoxMakeWriter::new(file))
        .finish();

    set_global_default(subscriber).context(
        "Could not set global default tracing subscriber. Disable file logs if one is already set.",
    )
}

/// Log `INFO` and above to stderr.
pub fn init_console_logger() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_timer(local_timer()?)
        .with_writer(std::io::stderr)
        .finish();

    set_global_default(subscriber).context("Could not set global default tracing subscriber.")
}

type LocalTimer = OffsetTime<Vec<format_description::BorrowedFormatItem<'static>>>;

fn local_timer() -> anyhow::Result<LocalTimer> {
    // the offset cannot be determined once other threads exist on some platforms
    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let format = format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")?;
    Ok(OffsetTime::new(offset, format))
}

fn log_file_name() -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]-[minute]-[second]_log.txt")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    Ok(now.format(&format)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_name_is_timestamped() {
        let name = log_file_name().unwrap();
        assert!(name.ends_with("_log.txt"));
        assert_eq!(name.len(), "2026-01-01_10-00-00_log.txt".len());
    }
}
