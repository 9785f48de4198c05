use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const LOG_FILE: &str = "/var/log/ravstack/ravstack.log";

/// What the subscriber should show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub debug: bool,
    /// Also log to stderr. Off by default since stderr goes back to the
    /// Ironic conductor when running as the proxy.
    pub verbose: bool,
}

/// Default filter: ravstack crates at `debug` or `info`, dependencies at
/// `warn`. Overridden by `RUST_LOG`.
pub fn default_filter(debug: bool) -> String {
    format!("ravstack={},warn", if debug { "debug" } else { "info" })
}

fn open_log_file(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// Initialize the global tracing subscriber.
///
/// Call once at program startup. The log file is used only when it can be
/// opened for appending.
pub fn init(options: LogOptions) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(options.debug)));

    let stderr = options.verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });
    let file = open_log_file(Path::new(LOG_FILE)).map(|f| {
        fmt::layer()
            .with_writer(Mutex::new(f))
            .with_ansi(false)
            .with_target(true)
    });

    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr)
        .with(file)
        .try_init();
}

/// The SSH client address from an `SSH_CONNECTION` value, as `ip:port`.
/// Connections from the local host are shown empty.
pub fn ssh_peer(ssh_connection: &str) -> Option<String> {
    let mut parts = ssh_connection.split_whitespace();
    let addr = parts.next()?;
    let port = parts.next()?;
    let loopback = addr
        .parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false);
    Some(if loopback {
        String::new()
    } else {
        format!("{}:{}", addr, port)
    })
}
