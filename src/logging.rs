//! Thin facade over `slog`. The library never installs process-wide state:
//! components accept an optional `Logger` at construction and fall back to
//! `Discard`. `init` builds a terminal logger for binaries and tests that
//! want output.

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds a terminal logger writing to stderr at debug level.
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("malformed logger config");

    config.build_logger().expect("failed to build terminal logger")
}

/// The logger handed in by the caller, or a discarding root.
#[inline]
pub(crate) fn unwrap_or_discard(log: Option<&Logger>) -> Logger {
    match log {
        Some(log) => log.new(o!()),
        None => Logger::root(Discard, o!()),
    }
}
