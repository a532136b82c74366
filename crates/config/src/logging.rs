//! Log initialization
//!
//! The embedding application calls this once at startup. JSON output is the
//! default so every event, stamped with its job-run span fields, stays
//! machine-parseable.

use tracing_subscriber::EnvFilter;

use crate::LoggingSettings;

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_new(&settings.filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_init_is_harmless() {
        let settings = LoggingSettings::default();
        init_logging(&settings);
        init_logging(&settings);
    }
}
