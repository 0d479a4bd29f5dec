use std::{fs, path::Path};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;
pub mod writer;

pub use formatter::*;
pub use writer::*;

use crate::configs::LoggingConfig;

/// Builds the filter directive from config. `RUST_LOG` wins when set.
pub fn filter_directive(config: &LoggingConfig) -> String {
    let level = config.level.as_deref().unwrap_or("info");
    match config.filters.as_deref() {
        Some(filters) if !filters.is_empty() => format!("{},hyper=warn,{}", level, filters),
        _ => format!("{},hyper=warn", level),
    }
}

pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let stdout_layer = fmt::layer()
        .event_format(EventFormatter::new(true))
        .with_ansi(true);

    let file_layer = config.file.as_ref().map(|file| {
        if let Some(parent) = Path::new(&file.path).parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Failed to create log directory: {}", e);
            }
        }

        fmt::layer()
            .with_writer(CircularFileWriter::new(file.path.clone(), file.max_lines))
            .event_format(EventFormatter::new(false))
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}
