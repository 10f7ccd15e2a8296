// Tracing initialization with a runtime-adjustable log level.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Whether `RUST_LOG` was set when tracing was initialized.
static ENV_FILTER_PINNED: OnceLock<bool> = OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    // RUST_LOG takes precedence over the provided level
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok());
    let _ = ENV_FILTER_PINNED.set(env_filter.is_some());
    let base_filter = env_filter.unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Apply the configured logging level. No-op when `RUST_LOG` is in charge.
pub fn apply_logging_level(level: &str) {
    if ENV_FILTER_PINNED.get().copied().unwrap_or(false) {
        tracing::debug!(level, "RUST_LOG is set, ignoring configured logging level");
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        match handle.modify(|f| *f = EnvFilter::new(level)) {
            Ok(()) => tracing::debug!(level, "logging level applied"),
            Err(e) => tracing::warn!(error = %e, "failed to apply logging level"),
        }
    }
}
