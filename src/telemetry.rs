// src/telemetry.rs
//! Tracing setup and log hygiene helpers.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_DEV_LOG: &str = "RECONCILE_DEV_LOG";

/// Dev logging gate: RECONCILE_DEV_LOG=1 AND dev env (debug build or
/// SHUTTLE_ENV in {local, development, dev}).
pub fn dev_logging_enabled() -> bool {
    let on = std::env::var(ENV_DEV_LOG).ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

/// Install a compact fmt subscriber when dev logging is on. Safe to call
/// more than once; later calls are no-ops.
pub fn init_dev_tracing() {
    if !dev_logging_enabled() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reconcile=debug,info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

/// Short, stable hash for values we must not log verbatim (client names).
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_hash_is_short_and_stable() {
        let a = anon_hash("Viewpoint Construction");
        assert_eq!(a.len(), 12);
        assert_eq!(a, anon_hash("Viewpoint Construction"));
        assert_ne!(a, anon_hash("Viewpoint Construction Inc"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
