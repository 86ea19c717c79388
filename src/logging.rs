use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level; repeated calls
/// are harmless (subsequent ones are ignored), which keeps test harnesses
/// simple.
pub fn init(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.log_json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}
