/*!
Observability infrastructure for keepsake.

Installs a `tracing` subscriber that renders the structured events emitted
at every recovery decision (compression fallback, storage degradation,
checksum fallback, backup eviction, repair, migration and rollback).
*/

use once_cell::sync::OnceCell;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::{KeepsakeError, Result};

static INITIALIZED: OnceCell<()> = OnceCell::new();

const DEFAULT_DIRECTIVE: &str = "keepsake=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global tracing subscriber
///
/// `json` selects machine-readable output; otherwise events are rendered in
/// a human-readable format. The filter honours `RUST_LOG` and falls back to
/// `keepsake=info`. Calling this more than once is a no-op.
pub fn init_observability(json: bool) -> Result<()> {
    INITIALIZED
        .get_or_try_init(|| {
            let result = if json {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(false);
                set_global_default(Registry::default().with(env_filter()).with(fmt_layer))
            } else {
                let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
                set_global_default(Registry::default().with(env_filter()).with(fmt_layer))
            };
            result.map_err(|e| {
                KeepsakeError::storage(format!("Failed to set global tracing subscriber: {e}"))
            })
        })
        .map(|_| {
            tracing::debug!("keepsake observability initialized");
        })
}

/// Initialize observability with default settings (human-readable output)
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}
