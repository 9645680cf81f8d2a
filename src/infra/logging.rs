pub fn init() {
    // Initialize tracing subscriber once, honoring RUST_LOG if set.
    // Default to info level; allow override via RUST_LOG (e.g., "debug").
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Log a metrics-like line and feed the `metrics` facade (no-op until a
/// recorder is installed).
pub fn log_metric(scope: &'static str, metric: &'static str, value: f64) {
    tracing::info!(scope = scope, metric = metric, value = value, "metric");
    metrics::histogram!(metric, "scope" => scope).record(value);
}
