//! Logger setup for the command-line tool.

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Map `-q` / `-v` counts to a level filter.
pub fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// Log to stderr. `RUST_LOG` still applies on top of the chosen level.
pub fn init_cli_logging(verbose: u8, quiet: bool) {
    let level = level_for(verbose, quiet);
    Builder::new()
        .target(Target::Stderr)
        .filter_level(level)
        .parse_env("RUST_LOG")
        .format_timestamp_secs()
        .format_module_path(false)
        .init();
    log::debug!("logging initialized with level: {:?}", level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0, false), LevelFilter::Info);
        assert_eq!(level_for(1, false), LevelFilter::Debug);
        assert_eq!(level_for(3, false), LevelFilter::Trace);
        assert_eq!(level_for(2, true), LevelFilter::Error);
    }
}
