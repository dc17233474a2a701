use std::sync::Once;

use config::Environment;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Filter used by tests when `RUST_LOG` is not set.
const DEFAULT_TEST_FILTER: &str = "backfill=debug";

static TEST_TRACING: Once = Once::new();

/// Installs the global tracing subscriber for `app_name`.
///
/// Production emits JSON lines so that fields such as `table` and `chunk_id` stay machine
/// readable; development uses the compact human readable formatter.
pub fn init_tracing(app_name: &str, environment: Environment) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = match environment {
        Environment::Prod => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        Environment::Dev => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init(),
    };

    if result.is_ok() {
        tracing::info!(app_name, %environment, "tracing initialized");
    }

    result
}

/// Installs a test subscriber once per process, writing through the test harness capture.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
