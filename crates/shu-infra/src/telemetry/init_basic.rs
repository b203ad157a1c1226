use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shu_core::{LogFormat, TelemetrySettings};

/// Initialize tracing for the worker process.
///
/// `RUST_LOG` wins over `settings.default_filter` when set.
pub fn init_telemetry(settings: &TelemetrySettings) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.default_filter))
        .unwrap_or_else(|_| "shu=debug".into());

    match settings.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?,
    }

    tracing::info!(
        environment = %settings.environment,
        format = ?settings.log_format,
        "Tracing initialized"
    );
    Ok(())
}

pub async fn shutdown_telemetry() {
    tracing::debug!("Telemetry shutdown");
}
