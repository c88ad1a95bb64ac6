//! Tracing subscriber setup for binaries and tests embedding the engine

use tracing_subscriber::EnvFilter;

/// Initialize a fmt subscriber honoring `RUST_LOG`, falling back to the
/// given filter. Safe to call more than once; later calls are no-ops.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("info");
        init("debug");
    }
}
