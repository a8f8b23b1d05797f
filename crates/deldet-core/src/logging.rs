use crate::Result;

/// Initialize tracing for the service.
///
/// Default: info for our crates, warn for everything else. Override
/// with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,deldet=info,deldet_core=info,deldet_sqlite=info,deldet_telegram=info,deldet_webhook=info,{service_name}=info"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .init();

    Ok(())
}
