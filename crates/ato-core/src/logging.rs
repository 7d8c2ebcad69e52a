//! Logging bootstrap for orchestrator binaries and test harnesses.

use std::sync::OnceLock;
use tracing::Level;

/// Environment variable consulted for the log level.
pub const LOG_ENV: &str = "ATO_LOG";

static ACTIVE_LEVEL: OnceLock<Level> = OnceLock::new();

/// Resolve a level string (`trace` through `error`, any case) to a
/// [`Level`]. Unset or unrecognized values fall back to `info`.
fn resolve_level(raw: Option<&str>) -> Level {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(Level::INFO)
}

/// Initialize process-level tracing output from [`LOG_ENV`].
///
/// Only the first call installs a subscriber; the level it resolved stays
/// active for the process lifetime and is returned to every caller. It is
/// intentionally best-effort and never errors, even when a test harness
/// has already installed its own subscriber.
pub fn init() -> Level {
    init_from_env(LOG_ENV)
}

/// Like [`init`], reading the level from an explicit environment variable.
///
/// Binaries that embed the engine under their own configuration namespace
/// pass their own variable name here.
pub fn init_from_env(var: &str) -> Level {
    *ACTIVE_LEVEL.get_or_init(|| {
        let raw = std::env::var(var).ok();
        let level = resolve_level(raw.as_deref());
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .try_init();
        level
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_level_known_values() {
        assert_eq!(resolve_level(Some("trace")), Level::TRACE);
        assert_eq!(resolve_level(Some("debug")), Level::DEBUG);
        assert_eq!(resolve_level(Some("WARN")), Level::WARN);
        assert_eq!(resolve_level(Some(" Error ")), Level::ERROR);
    }

    #[test]
    fn test_resolve_level_falls_back_to_info() {
        assert_eq!(resolve_level(None), Level::INFO);
        assert_eq!(resolve_level(Some("verbose")), Level::INFO);
        assert_eq!(resolve_level(Some("")), Level::INFO);
    }

    #[test]
    fn test_init_is_idempotent() {
        let first = init();
        let second = init();
        assert_eq!(first, second);
    }
}
