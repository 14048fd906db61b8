//! Logging bootstrap
//!
//! The library only emits `tracing` events. Hosts that have no subscriber of
//! their own can install the stock formatter here.
use tracing::Level;

/// Installs a formatting subscriber at `INFO`. Does nothing if a global
/// subscriber is already set.
pub fn init() {
    init_with_level(Level::INFO);
}

pub fn init_with_level(level: Level) {
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// Routes `DEBUG` and up through the test harness's captured output.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}
