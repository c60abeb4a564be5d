use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// Verbosity comes from `RUST_LOG` and defaults to `info`. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();
}
