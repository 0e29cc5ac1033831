//! Global logging sink, playing the role of `logger.c`/`logger.h` in the
//! original source: a single, leveled, thread-safe (here: task-safe by
//! construction) destination every subsystem writes through.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
