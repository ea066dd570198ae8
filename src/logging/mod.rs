//! Logging setup
//!
//! Library code logs through the `log` facade. Binaries and tests install a
//! backend once with [`init_logging`]; `RUST_LOG` still wins over the config.

pub mod config;

pub use config::LogConfig;

use std::io::Write;

use crate::config::ConfigError;

/// Install an `env_logger` backend configured from `config`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &LogConfig) -> Result<(), ConfigError> {
    let default_level = config.default_filter().map_err(ConfigError::validation)?;
    let features = config.feature_filters().map_err(ConfigError::validation)?;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level);
    for (module, level) in features {
        builder.filter_module(&module, level);
    }
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    let include_timestamp = config.include_timestamp;
    let include_module = config.include_module;
    builder.format(move |buf, record| {
        if include_timestamp {
            write!(buf, "{} ", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;
        }
        write!(buf, "{:<5} ", record.level())?;
        if include_module {
            write!(buf, "[{}] ", record.module_path().unwrap_or("unknown"))?;
        }
        writeln!(buf, "{}", record.args())
    });

    // A logger may already be installed by the host application or another test.
    let _ = builder.try_init();
    Ok(())
}
