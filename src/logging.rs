//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level when it is set, so a single run
//! can be made verbose without editing the method file.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Build the filter: `RUST_LOG` if present, otherwise `<crate>=<level>` with
/// everything else at `warn`.
pub fn env_filter(config: &ApplicationConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,rust_faims={}", config.log_level))
    })
}

/// Install the global subscriber.
///
/// Returns false if one was already installed (tests, repeated calls).
pub fn init_from_config(config: &ApplicationConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    let installed = if config.log_json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(
            app = %config.name,
            level = %config.log_level,
            json = config.log_json,
            "Logging initialised"
        );
    }
    installed
}
