//! Process-wide logging configuration.
//!
//! Replaces the teacher's ad-hoc `println!`/`eprintln!` calls with a real
//! `log` + `env_logger` backend, initialised once from the configured
//! [`Verbosity`] level. Security events (ACL deny, exec invocation,
//! privilege drop) always log at `Warn` so they survive `--quiet`.

use std::sync::OnceLock;

/// Cumulative verbosity level selected by `-v`/`-vv`/`-vvv`/`--quiet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
    Trace,
}

impl Verbosity {
    fn level_filter(self) -> log::LevelFilter {
        match self {
            Verbosity::Quiet => log::LevelFilter::Warn,
            Verbosity::Normal => log::LevelFilter::Info,
            Verbosity::Verbose => log::LevelFilter::Debug,
            Verbosity::Debug => log::LevelFilter::Debug,
            Verbosity::Trace => log::LevelFilter::Trace,
        }
    }
}

static INIT: OnceLock<()> = OnceLock::new();

/// Initialise the global logger exactly once. Subsequent calls are no-ops,
/// matching the "init-once/teardown" replacement for a global mutable log
/// level called out in spec.md §9.
pub fn init(verbosity: Verbosity) {
    INIT.get_or_init(|| {
        env_logger::Builder::new()
            .filter_level(verbosity.level_filter())
            .format_timestamp_millis()
            .parse_env("RUST_LOG") // RUST_LOG can still narrow/widen for debugging
            .init();
    });
}

/// Log a security-relevant event (ACL deny, exec invocation, privilege
/// drop). These are never suppressed by `--quiet`.
pub fn security_event(operation: &str, detail: &str) {
    log::warn!(target: "swak::security", "{operation}: {detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_ordering_is_cumulative() {
        assert!(Verbosity::Quiet < Verbosity::Normal);
        assert!(Verbosity::Normal < Verbosity::Verbose);
        assert!(Verbosity::Verbose < Verbosity::Trace);
    }

    #[test]
    fn quiet_still_permits_warn_level() {
        assert_eq!(Verbosity::Quiet.level_filter(), log::LevelFilter::Warn);
    }
}
