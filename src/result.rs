//! Result and error types representing the outcome of the analysis.

use crate::config::ConfigError;
use crate::ir::{Block, Context};
use crate::verifier::VerifierErrors;
use thiserror::Error;

/// An analysis error.
///
/// Conservative fallbacks are never errors: an operand the engine could not
/// resolve simply produces a run-time check. These variants all mean the input
/// tree or the caller broke a contract.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TentativeError {
    /// A list of tree verifier errors.
    ///
    /// This always represents a bug in the code that built the context tree.
    #[error("Verifier errors")]
    Verifier(#[from] VerifierErrors),

    /// The configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The tree has no entry context to start from.
    #[error("Context tree has no entry")]
    NoEntry,

    /// The analysis already ran; it must be reset before running again.
    #[error("Analysis already ran on this tree")]
    AlreadyRun,

    /// A context was entered while still being walked: the context tree has a
    /// cycle.
    #[error("Context {0} re-entered while in progress")]
    Reentrant(Context),

    /// Frame lists of different depth met at a join.
    #[error("Frame depth mismatch merging into {block} of {ctx}")]
    FrameMismatch {
        /// The context being walked.
        ctx: Context,
        /// The block where the stores met.
        block: Block,
    },

    /// No store reaches the first block of a context.
    #[error("No store reaches {block} of {ctx}")]
    MissingStore {
        /// The context being walked.
        ctx: Context,
        /// Its first block.
        block: Block,
    },
}

/// A convenient alias for a `Result` that uses `TentativeError` as the error
/// type.
pub type TentativeResult<T> = Result<T, TentativeError>;
