//! tracing setup for the kiln binary

use tracing_subscriber::EnvFilter;

/// Environment variable holding a full filter directive, e.g. `kiln_build=debug`
pub const LOG_ENV: &str = "KILN_LOG";

/// Install the global subscriber
///
/// `KILN_LOG` wins when set; otherwise 0 = warn, 1 = info, 2+ = debug for the
/// kiln crates. Output goes to stderr so command output stays clean.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| default_filter(verbose));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn default_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    EnvFilter::new(format!(
        "kiln_cli={level},kiln_package={level},kiln_build={level},kiln_config={level}"
    ))
}
