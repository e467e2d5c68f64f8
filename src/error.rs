use thiserror::Error;

macro_rules! pattern_mismatch {
    // Single string version
    ($msg:expr) => {
        crate::Error::PatternMismatch {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::PatternMismatch {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Resolution failures are local and non-fatal: a resolver that returns one of these simply
/// yields no new target, and the scheduler records the failure and moves on. Nothing is ever
/// written to the binary before every check of a resolution attempt has passed.
///
/// # Error Categories
///
/// ## Resolution Errors
/// - [`Error::UnresolvableValue`] - A required register or stack value is not a known constant
/// - [`Error::PatternMismatch`] - The expected obfuscation shape is absent
/// - [`Error::NegationMismatch`] - Two branch conditions are not logical opposites
/// - [`Error::OperandMismatch`] - Two branch conditions compare different operands
/// - [`Error::UnrecognizedExpression`] - The condition normalizer met an unsupported node
///
/// ## Patching Errors
/// - [`Error::InsufficientSpace`] - The synthesized bytes do not fit the available room
/// - [`Error::NotAConditionalBranch`] - A branch redirect was requested on another instruction
/// - [`Error::InvalidInstruction`] - The bytes at an address do not decode
/// - [`Error::Assembly`] - Instruction encoding failed
/// - [`Error::OutOfBounds`] - A read or write touched unmapped memory
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from goblin crate
///
/// # Examples
///
/// ```rust
/// use flowmend::Error;
///
/// fn describe(error: &Error) -> &'static str {
///     match error {
///         Error::InsufficientSpace { .. } => "patch does not fit",
///         Error::NegationMismatch { .. } | Error::OperandMismatch => "branches are not mirrored",
///         Error::PatternMismatch { .. } => "not an obfuscated site",
///         _ => "other",
///     }
/// }
/// # assert_eq!(describe(&Error::OperandMismatch), "branches are not mirrored");
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A register or stack value the resolver depends on is not a provable constant.
    #[error("Unresolvable value - {0}")]
    UnresolvableValue(String),

    /// The instruction sequence does not have the shape of a known obfuscation.
    ///
    /// Includes the source location where the mismatch was detected to tell the many
    /// precondition gates of the resolvers apart.
    ///
    /// # Fields
    ///
    /// * `message` - Which precondition failed
    /// * `file` - Source file where the mismatch was detected
    /// * `line` - Source line where the mismatch was detected
    #[error("Pattern mismatch - {file}:{line}: {message}")]
    PatternMismatch {
        /// The message to be printed for the PatternMismatch error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The two conditions of a mirrored branch pair are not a registered negation pair.
    #[error("Conditions {first} and {second} are not logical opposites")]
    NegationMismatch {
        /// Operation of the first branch's condition
        first: String,
        /// Operation of the second branch's condition
        second: String,
    },

    /// The two conditions of a mirrored branch pair compare different operands.
    #[error("Branch conditions compare different operands")]
    OperandMismatch,

    /// The synthesized instruction is longer than the room available at the patch site.
    #[error("Not enough space at 0x{address:x} - need {needed} bytes, have {available}")]
    InsufficientSpace {
        /// Address the patch was meant for
        address: u64,
        /// Length of the synthesized bytes
        needed: usize,
        /// Bytes available before the next instruction that must survive
        available: usize,
    },

    /// The condition normalizer met an expression kind it does not understand.
    #[error("Unrecognized expression - {0}")]
    UnrecognizedExpression(String),

    /// A branch redirect was requested for an instruction that is not a conditional branch.
    #[error("Instruction at 0x{0:x} is not a conditional branch")]
    NotAConditionalBranch(u64),

    /// The bytes at the given address do not decode to a valid instruction.
    #[error("Invalid instruction at 0x{0:x}")]
    InvalidInstruction(u64),

    /// Encoding an instruction failed.
    #[error("{0}")]
    Assembly(#[from] iced_x86::IcedError),

    /// A read or write touched memory that is not mapped by the view.
    #[error("Out of bound access at 0x{address:x} ({len} bytes)")]
    OutOfBounds {
        /// Start address of the access
        address: u64,
        /// Length of the access
        len: usize,
    },

    /// The configured address width is not supported.
    #[error("Unsupported address size {0}, must be 4 or 8")]
    InvalidAddressSize(usize),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while loading an image from disk.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns true for errors that describe an input which simply is not an
    /// obfuscated site, as opposed to a site whose recovery failed part-way.
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            Error::PatternMismatch { .. }
                | Error::NegationMismatch { .. }
                | Error::OperandMismatch
                | Error::UnrecognizedExpression(_)
        )
    }
}
