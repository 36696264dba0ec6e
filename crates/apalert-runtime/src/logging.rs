use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Filter comes from `APALERT_LOG`, then
/// `RUST_LOG`, defaulting to `info`.
pub fn init() {
    let filter = std::env::var("APALERT_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}
