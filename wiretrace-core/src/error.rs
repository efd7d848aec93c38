//! Error types for wiretrace-core.

use thiserror::Error;

/// Run-fatal configuration errors, detected before any slice is
/// processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A per-pass cut vector does not match the declared pass count.
    #[error("cut vector `{name}` has {got} entries, expected {expected} (one per pass)")]
    PassLengthMismatch {
        /// Name of the offending option.
        name: &'static str,
        /// Entries found.
        got: usize,
        /// Declared pass count.
        expected: usize,
    },

    /// The pass count itself is unusable.
    #[error("pass count must be at least 1")]
    NoPasses,

    /// Angle-range boundaries must ascend and end at pi/2.
    #[error("angle ranges must be ascending and bounded by pi/2")]
    BadAngleRanges,

    /// A named scalar option is out of its valid domain.
    #[error("option `{name}` has invalid value {value}")]
    BadOption {
        /// Name of the offending option.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
}

/// Slice-fatal errors: the slice is marked invalid and skipped, other
/// slices are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SliceError {
    /// The slice contains no usable hits.
    #[error("slice {0} has no hits")]
    NoHits(i32),

    /// Hit list is not sorted by (plane, wire, tick).
    #[error("slice {slice} hits not sorted at index {index}")]
    UnsortedHits {
        /// Slice ID.
        slice: i32,
        /// First out-of-order hit index.
        index: usize,
    },

    /// Geometry has no entry for a plane referenced by the hits.
    #[error("slice {slice} references unknown plane code {plane}")]
    UnknownPlane {
        /// Slice ID.
        slice: i32,
        /// The unresolvable composite code.
        plane: u32,
    },
}
