//! Tracing subscriber setup.

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise only this crate logs, at
/// `default_level`. Later calls are no-ops.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("engram={}", default_level)))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("engram=info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
