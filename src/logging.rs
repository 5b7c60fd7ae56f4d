use tracing::Level;

/// Process-wide tracing setup. `INVOX_LOG=debug` widens the filter; CLI
/// command output itself goes through `core::terminal`, so tracing stays on
/// the quiet side by default.
pub fn init() {
    let level = match std::env::var("INVOX_LOG").ok().as_deref() {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        _ => Level::INFO,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .try_init();
}
