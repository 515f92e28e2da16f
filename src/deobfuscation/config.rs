//! Configuration for the control flow deobfuscator.
//!
//! This module provides the settings controlling which passes run after branch solving
//! and the bounds applied to the search.

/// What to do with instructions the dead code eliminator finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadCodeMode {
    /// Replace dead instructions by `nop` (and strip them when enabled)
    #[default]
    Remove,
    /// Only report dead instructions, leaving the body unchanged
    Annotate,
}

/// Configuration for the deobfuscator.
///
/// Controls the post-processing passes and the limits of the fixpoint loop.
#[derive(Debug, Clone)]
pub struct DeobfuscationConfig {
    /// Handling of dead instructions (default: remove).
    pub dead_code: DeadCodeMode,

    /// Recompute the block layout after solving (default: true).
    pub repartition: bool,

    /// Remove `nop`s from blocks holding more than one instruction (default: true).
    pub strip_nops: bool,

    /// Log progress at `info` level (default: false).
    pub diagnostics: bool,

    /// Maximum number of paths enumerated for one dispatch (default: 4096).
    pub max_paths: usize,

    /// Maximum number of clean/solve rounds per method (default: 64).
    pub max_rounds: usize,

    /// Depth of the backward walk looking for duplicated values (default: 10).
    pub dup_walk_depth: usize,
}

impl Default for DeobfuscationConfig {
    fn default() -> Self {
        Self {
            dead_code: DeadCodeMode::Remove,
            repartition: true,
            strip_nops: true,
            diagnostics: false,
            max_paths: 4096,
            max_rounds: 64,
            dup_walk_depth: 10,
        }
    }
}

impl DeobfuscationConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that reports dead code without removing it.
    #[must_use]
    pub fn annotate_only() -> Self {
        Self {
            dead_code: DeadCodeMode::Annotate,
            ..Self::default()
        }
    }

    /// Creates a configuration that keeps the layout and the `nop`s untouched.
    ///
    /// Useful when the host maps offsets of the rewritten body back to the original one.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            repartition: false,
            strip_nops: false,
            ..Self::default()
        }
    }

    /// Sets the dead code handling.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_dead_code(mut self, mode: DeadCodeMode) -> Self {
        self.dead_code = mode;
        self
    }

    /// Enables or disables layout repartitioning.
    #[must_use]
    pub fn with_repartition(mut self, enable: bool) -> Self {
        self.repartition = enable;
        self
    }

    /// Enables or disables `nop` stripping.
    #[must_use]
    pub fn with_strip_nops(mut self, enable: bool) -> Self {
        self.strip_nops = enable;
        self
    }

    /// Enables or disables progress logging.
    #[must_use]
    pub fn with_diagnostics(mut self, enable: bool) -> Self {
        self.diagnostics = enable;
        self
    }

    /// Sets the search limits.
    ///
    /// # Arguments
    ///
    /// * `max_paths` - Maximum number of paths enumerated for one dispatch.
    /// * `max_rounds` - Maximum number of clean/solve rounds per method.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_limits(mut self, max_paths: usize, max_rounds: usize) -> Self {
        self.max_paths = max_paths;
        self.max_rounds = max_rounds;
        self
    }
}
