use std::sync::OnceLock;

use console::style;
use log::{Level, LevelFilter, Metadata, Record};

use crate::env;

struct Logger {
    level: LevelFilter,
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with("hk_engine")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(record);
        let () = clx::progress::with_terminal_lock(|| eprintln!("{line}"));
    }

    fn flush(&self) {}
}

fn format_record(record: &Record) -> String {
    let prefix = match record.level() {
        Level::Error => style("hk-engine ERROR").red().bold(),
        Level::Warn => style("hk-engine WARN").yellow(),
        Level::Info => style("hk-engine").bold(),
        Level::Debug => style("hk-engine DEBUG").blue(),
        Level::Trace => style("hk-engine TRACE").dim(),
    }
    .for_stderr();
    format!("{prefix} {}", record.args())
}

/// Installs the stderr logger. `level` overrides `HK_LOG`.
pub fn init(level: Option<LevelFilter>) {
    let level = level.unwrap_or(*env::HK_LOG);
    let logger = LOGGER.get_or_init(|| Logger { level });
    if let Err(err) = log::set_logger(logger) {
        eprintln!("hk-engine: failed to initialize logger: {err}");
        return;
    }
    log::set_max_level(level);
}
