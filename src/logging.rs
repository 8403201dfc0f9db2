use log::{Level, LevelFilter, Metadata, Record};
use std::sync::OnceLock;
use std::time::Instant;

static BOOT_TIME: OnceLock<Instant> = OnceLock::new();

mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Logger that prints colored lines with a compact time-since-boot stamp
struct EnhancedLogger;

impl log::Log for EnhancedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = BOOT_TIME.get_or_init(Instant::now).elapsed();
        let ts_compact = compact_timestamp(elapsed.as_secs(), elapsed.subsec_millis());

        let (color, level_char) = match record.level() {
            Level::Error => (colors::BRIGHT_RED, 'E'),
            Level::Warn => (colors::BRIGHT_YELLOW, 'W'),
            Level::Info => (colors::BRIGHT_GREEN, 'I'),
            Level::Debug => (colors::BRIGHT_BLUE, 'D'),
            Level::Trace => (colors::GRAY, 'T'),
        };
        let module = short_module(record.module_path().unwrap_or("unknown"));

        // Console output (serial). ANSI colors are fine over serial.
        println!(
            "{}{} [{}] {:>12} | {}{}",
            color,
            ts_compact,
            level_char,
            module,
            record.args(),
            colors::RESET
        );
    }

    fn flush(&self) {}
}

fn compact_timestamp(seconds: u64, millis: u32) -> String {
    if seconds < 60 {
        format!("{:>3}.{:03}s", seconds, millis)
    } else if seconds < 3600 {
        format!("{:>2}m{:02}s", seconds / 60, seconds % 60)
    } else {
        format!("{:>2}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

// Last path segment, cut to the column width
fn short_module(path: &str) -> &str {
    let module = path.rsplit("::").next().unwrap_or(path);
    match module.char_indices().nth(12) {
        Some((idx, _)) => &module[..idx],
        None => module,
    }
}

static LOGGER: EnhancedLogger = EnhancedLogger;

/// Initialize the enhanced logger with colors and timestamps
pub fn init_logger() -> Result<(), log::SetLoggerError> {
    let _ = BOOT_TIME.set(Instant::now());
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Info);

    println!("{}┌─────────────────────────────────────────┐{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}│        ESP32 OTA Server Logger          │{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}└─────────────────────────────────────────┘{}", colors::BRIGHT_GREEN, colors::RESET);
    Ok(())
}

fn parse_level(level: &str) -> Option<LevelFilter> {
    let lf = match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => return None,
    };
    Some(lf)
}

/// Parse and set log level from a string; returns true if applied
pub fn set_max_level_from_str(level: &str) -> bool {
    match parse_level(level) {
        Some(lf) => {
            log::set_max_level(lf);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_switch_units() {
        assert_eq!(compact_timestamp(5, 42), "  5.042s");
        assert_eq!(compact_timestamp(125, 0), " 2m05s");
        assert_eq!(compact_timestamp(7260, 0), " 2h01m");
    }

    #[test]
    fn module_is_last_segment_truncated() {
        assert_eq!(short_module("ota_core::handler"), "handler");
        assert_eq!(short_module("a::very_long_module_name"), "very_long_mo");
        assert_eq!(short_module("main"), "main");
    }

    #[test]
    fn level_names() {
        assert_eq!(parse_level("WARNING"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("trace"), Some(LevelFilter::Trace));
        assert_eq!(parse_level("loud"), None);
    }
}
