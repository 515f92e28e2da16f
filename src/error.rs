use thiserror::Error;

use crate::analysis::cfg::BlockId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Most of the "negative" answers the deobfuscator produces are not errors at all: a branch
/// whose condition depends on genuinely free input is reported as
/// [`crate::deobfuscation::SolveOutcome::Unsolved`], and an instruction whose operands cannot
/// be represented symbolically degrades to an unknown value. The variants below cover the
/// conditions that interrupt an operation.
///
/// # Error Categories
///
/// ## Control
/// - [`Error::Cancelled`] - Cooperative cancellation was observed
///
/// ## Translation and Graph Faults
/// - [`Error::Malformed`] - Inconsistent instruction stream or block layout
/// - [`Error::InvalidBlock`] - A stale or foreign block handle was used
/// - [`Error::InvariantViolation`] - Sources and successor links went out of sync
/// - [`Error::StackMismatch`] - Stack heights disagree where control flow joins
/// - [`Error::PathLimit`] - More paths between two blocks than the configured bound
///
/// ## Manual Resolution
/// - [`Error::UnresolvedSymbols`] - A formula still contains unassigned symbols
/// - [`Error::InvalidValue`] - A user supplied value could not be parsed
///
/// # Examples
///
/// ```rust,no_run
/// use dotflow::{Error, prelude::*};
///
/// # fn run(body: &mut MethodBody) {
/// let token = CancellationToken::new();
/// let config = DeobfuscationConfig::default();
/// let deobfuscator = ControlFlowDeobfuscator::new(&config, &token);
///
/// match deobfuscator.deobfuscate(body) {
///     Ok(stats) => println!("solved {} branches", stats.branches_solved),
///     Err(Error::Cancelled) => eprintln!("cancelled, graph is partially simplified"),
///     Err(e) => eprintln!("deobfuscation failed: {e}"),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The operation observed a cancellation request.
    ///
    /// Cancellation aborts the whole driver call immediately. Graph edits performed
    /// before the signal was observed are kept; there is no rollback.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The instruction stream or block graph is inconsistent.
    ///
    /// Raised while walking a block, for example when a switch terminator carries no
    /// targets. The driver catches this per block and treats the block as unsolved.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A block handle does not refer to a live block of this method body.
    #[error("Invalid block handle - {0}")]
    InvalidBlock(BlockId),

    /// A structural invariant of the block graph does not hold.
    ///
    /// Every fallthrough and target edge must be mirrored by an entry in the successor's
    /// source list. All graph edits keep this in sync, so this error indicates a defect.
    #[error("Block graph invariant violated - {0}")]
    InvariantViolation(String),

    /// Stack heights disagree at a control flow join.
    #[error("Stack height mismatch entering {block}: expected {expected}, found {found}")]
    StackMismatch {
        /// The block entered with inconsistent heights
        block: BlockId,
        /// The height recorded by the first predecessor
        expected: usize,
        /// The height arriving from another predecessor
        found: usize,
    },

    /// Path enumeration found more paths than it was allowed to return.
    ///
    /// The path set is incomplete, so nothing may be concluded from it. The switch
    /// resolver reports the dispatch as unsolved.
    #[error("More than {0} paths between the blocks")]
    PathLimit(usize),

    /// A manual solve was requested while symbols are still unassigned.
    #[error("Formula still contains unassigned symbols: {0:?}")]
    UnresolvedSymbols(Vec<String>),

    /// A user supplied value could not be parsed as a 32-bit integer.
    #[error("Invalid value - {0}")]
    InvalidValue(String),
}
