//! Kernel logging.
//!
//! Routes the `log` facade to the serial port. Debug builds log at debug
//! level, release builds at info.

use log::{LevelFilter, Log, Metadata, Record};

static LOGGER: SerialLogger = SerialLogger;

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::serial_println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the serial logger. Only the bootstrap CPU does this.
pub fn init(cpu_id: u32) {
    if cpu_id == 0 && log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
    }
}
