// 📝 Logging
// Minimal stderr backend for the `log` facade, used by both binaries

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};

pub const LOG_ENV: &str = "FORENSICS_LOG";

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!(
            "{} {:<5} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Level from `FORENSICS_LOG` (error|warn|info|debug|trace|off), `info` otherwise
pub fn level_from(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger. A second call only updates the level.
pub fn init() {
    let level = level_from(std::env::var(LOG_ENV).ok().as_deref());
    // set_logger fails only if a logger is already installed
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
