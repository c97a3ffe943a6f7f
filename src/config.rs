//! Analysis configuration.

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest useful bound on loop walks: the optimistic pass plus one pass from
/// the real latch store.
pub const MIN_LOOP_PASSES: u32 = 2;

/// Global configuration for the interference analysis.
///
/// This structure exposes the knobs the surrounding engine used to keep in
/// global state. It is threaded explicitly into every pass.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Config {
    pub(crate) omit_checks: bool,
    pub(crate) program_single_threaded: bool,
    pub(crate) enable_verifier: bool,
    pub(crate) max_loop_passes: u32,
    pub(crate) progress_interval: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

impl Config {
    /// Creates a new configuration object with the default configuration
    /// specified.
    pub fn new() -> Config {
        Config {
            omit_checks: false,
            program_single_threaded: false,
            enable_verifier: true,
            max_loop_passes: 8,
            progress_interval: 1000,
        }
    }

    /// Configures whether run-time checks are omitted altogether, so that no
    /// instruction is ever reported as needing one. The analysis still runs
    /// and its per-context summaries stay available.
    ///
    /// By default this option is `false`.
    pub fn omit_checks(&mut self, omit: bool) -> &mut Self {
        self.omit_checks = omit;
        self
    }

    /// Configures whether the program is known to be single threaded. When
    /// enabled every read is classified as never needing a check and calls
    /// through unresolved function pointers are not treated as yield points.
    ///
    /// By default this option is `false`.
    pub fn program_single_threaded(&mut self, single: bool) -> &mut Self {
        self.program_single_threaded = single;
        self
    }

    /// Configures whether the context tree is verified before the analysis
    /// runs.
    ///
    /// By default this option is `true`.
    pub fn enable_verifier(&mut self, enable: bool) -> &mut Self {
        self.enable_verifier = enable;
        self
    }

    /// Configures how many times a loop that was not fully peeled may be
    /// walked before its header state is given up on and clobbered. Must be
    /// at least [`MIN_LOOP_PASSES`].
    ///
    /// By default this option is `8`.
    pub fn max_loop_passes(&mut self, passes: u32) -> &mut Self {
        self.max_loop_passes = passes;
        self
    }

    /// Configures how many contexts are walked between progress messages at
    /// the `debug` log level. Zero disables them.
    ///
    /// By default this option is `1000`.
    pub fn progress_interval(&mut self, interval: u64) -> &mut Self {
        self.progress_interval = interval;
        self
    }

    /// Are run-time checks omitted altogether?
    pub fn omits_checks(&self) -> bool {
        self.omit_checks
    }

    /// Is the program known to be single threaded?
    pub fn is_single_threaded(&self) -> bool {
        self.program_single_threaded
    }

    /// Check that the configured values make sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_loop_passes < MIN_LOOP_PASSES {
            return Err(ConfigError::TooFewLoopPasses(self.max_loop_passes));
        }
        Ok(())
    }
}

/// An invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Fewer loop passes than the optimistic pass plus one real pass.
    #[error("max_loop_passes must be at least {MIN_LOOP_PASSES}, got {0}")]
    TooFewLoopPasses(u32),
}
