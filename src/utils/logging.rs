/// Map a level selector (`DEBUG`, `info`, `warning`, ...) to a tracing level.
///
/// Unknown selectors fall back to `INFO`. `CRITICAL` is accepted as an alias
/// of `ERROR` since deployments configured for the older workers still use it.
pub fn parse_level(selector: &str) -> tracing::Level {
    match selector.trim().to_lowercase().as_str() {
        "error" | "critical" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

/// Install the global fmt subscriber at the level named by `selector`.
///
/// Only the first call wins; later calls (tests, the config error path) are no-ops.
pub fn init(selector: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(selector))
        .with_target(false)
        .try_init();
}
