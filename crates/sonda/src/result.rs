//! Result and error types for Sonda.

use thiserror::Error;

/// Result type for Sonda operations
pub type SondaResult<T> = Result<T, SondaError>;

/// Errors that can occur in Sonda
#[derive(Debug, Error)]
pub enum SondaError {
    /// Input buffer is not a recognized unit
    #[error("Malformed unit: {reason}")]
    MalformedUnit {
        /// What was wrong with the buffer
        reason: String,
    },

    /// Unit format version outside the supported range
    #[error("Unsupported unit format version {version}")]
    UnsupportedVersion {
        /// Version found in the header
        version: u16,
    },

    /// The unit already contains the synthetic probe members
    #[error("Unit {name} is already instrumented")]
    AlreadyInstrumented {
        /// Name of the offending unit
        name: String,
    },

    /// Probe mode tag byte outside the known set
    #[error("Unknown probe mode tag {tag:#04x}")]
    UnknownProbeMode {
        /// Tag byte found in the data stream
        tag: u8,
    },

    /// Recorded probe data does not match the mode instrumentation emitted
    #[error("Probe mode mismatch: expected {expected}, got {actual}")]
    ProbeModeMismatch {
        /// Mode the consumer expected
        expected: String,
        /// Mode found in the data
        actual: String,
    },

    /// Probe data ended before the declared probe count was satisfied
    #[error("Unexpected end of probe data: need {needed} probes, have {available}")]
    UnexpectedEndOfData {
        /// Probes the unit declares
        needed: usize,
        /// Probes actually present
        available: usize,
    },

    /// Execution data is keyed by a different content hash
    #[error("Class id mismatch for {name}: expected {expected:#018x}, got {actual:#018x}")]
    ClassIdMismatch {
        /// Unit name
        name: String,
        /// Id the caller supplied
        expected: u64,
        /// Id recomputed from the original bytes
        actual: u64,
    },

    /// Execution data records are not mergeable
    #[error("Incompatible execution data for {name}: {reason}")]
    IncompatibleData {
        /// Unit name
        name: String,
        /// Why the records cannot be merged
        reason: String,
    },

    /// Instrumented output failed the stack/locals simulation
    #[error("Verification failed in {method}: {reason}")]
    VerificationFailed {
        /// Method name and descriptor
        method: String,
        /// Violated rule
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SondaError {
    /// Shorthand for a malformed-unit error.
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedUnit {
            reason: reason.into(),
        }
    }
}
