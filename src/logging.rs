//! Logger setup.
//!
//! Output goes through the `log` facade to `env_logger`. The level comes from
//! the global `--quiet`/`--debug` flags; `RUST_LOG` can still refine it per
//! module.

use env_logger::Env;
use log::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    Quiet, // Warnings and errors only
    Info,  // Default: one line per conflict
    Debug, // Acquisition details, exit codes
    Trace,
}

impl From<u8> for VerbosityLevel {
    /// Maps the `-d` count.
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Info,
            1 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    pub fn from_flags(quiet: bool, debug: u8) -> Self {
        if quiet && debug == 0 {
            VerbosityLevel::Quiet
        } else {
            VerbosityLevel::from(debug)
        }
    }

    pub fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Installs the global logger. Must be called once, before anything logs.
pub fn init(verbosity: VerbosityLevel) {
    env_logger::Builder::from_env(Env::default())
        .filter_level(verbosity.to_log_level())
        .format_target(false)
        .init();
}
