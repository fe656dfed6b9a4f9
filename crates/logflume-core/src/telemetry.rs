//! Logging subsystem bootstrap shared by the service binaries.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `level` comes from the validated service config; noisy HTTP internals
/// are filtered out regardless of the requested level. Returns an error if
/// a subscriber was already installed (second call in the same process).
pub fn init_tracing(level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(format!("hyper=off,h2=off,{level}"))?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
