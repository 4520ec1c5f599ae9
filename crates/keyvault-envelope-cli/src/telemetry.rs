use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FORMAT_ENV: &str = "KEYVAULT_ENVELOPE_LOG_FORMAT";

/// Installs the stderr subscriber. Stdout carries command output only.
pub fn init() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
    let registry = tracing_subscriber::registry().with(env_filter);

    if json_requested() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    Ok(())
}

fn json_requested() -> bool {
    std::env::var(LOG_FORMAT_ENV)
        .map(|value| value.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
