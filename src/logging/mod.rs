//! Logging setup.
//!
//! Records go through the `log` facade. [`init`] installs a logger that
//! prints through `env_logger` (filtered by `RUST_LOG`) and appends every
//! enabled record to the application log file.

mod writer;

pub use writer::LogWriter;

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use std::sync::Arc;

/// Timestamp format of log file lines.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Format a record as a log file line.
pub fn format_line(record: &Record<'_>) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        Local::now().format(TIMESTAMP_FORMAT),
        record.level(),
        record.target(),
        record.args()
    )
}

/// Tees records into the console logger and the file writer.
pub struct FileLogger {
    console: env_logger::Logger,
    file: Arc<LogWriter>,
    level: LevelFilter,
}

impl FileLogger {
    /// Build from an `env_logger` configuration. The file receives every
    /// record at or above `level`, independent of the console filter.
    pub fn new(console: env_logger::Logger, file: Arc<LogWriter>, level: LevelFilter) -> Self {
        Self {
            console,
            file,
            level,
        }
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level || self.console.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.console.matches(record) {
            self.console.log(record);
        }
        if record.level() <= self.level {
            self.file.append(format_line(record));
        }
    }

    fn flush(&self) {
        self.console.flush();
    }
}

/// Install the global logger writing to `file`.
///
/// Fails if a logger is already installed.
pub fn init(file: Arc<LogWriter>, level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let console = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .build();
    let max = console.filter().max(level);
    log::set_boxed_logger(Box::new(FileLogger::new(console, file, level)))?;
    log::set_max_level(max);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use tempfile::TempDir;

    #[test]
    fn test_file_receives_records_at_level() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let writer = Arc::new(LogWriter::open(&path, 16).unwrap());
        let console = env_logger::Builder::new()
            .filter_level(LevelFilter::Off)
            .build();
        let logger = FileLogger::new(console, Arc::clone(&writer), LevelFilter::Info);

        logger.log(
            &Record::builder()
                .level(Level::Info)
                .target("prop_editor::save")
                .args(format_args!("saved"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .target("prop_editor::shell")
                .args(format_args!("$ id -u"))
                .build(),
        );
        writer.close();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let fields: Vec<_> = lines[0].split('\t').collect();
        assert_eq!(&fields[1..], &["INFO", "prop_editor::save", "saved"]);
    }
}
