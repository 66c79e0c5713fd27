use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::EnvFilter;

/// Install a console subscriber filtered by `RUST_LOG`. Fails if a global subscriber is already set.
pub fn init_tracing() -> Result<(), TryInitError> {
    let filter = EnvFilter::from_default_env();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    tracing::info!("Tracing initialized");

    Ok(())
}
