//! Error type shared by registration and axis-search routines.

/// Failures surfaced by `ctalign` operations.
///
/// Precondition violations fail fast. Numerical degeneracy (empty volumes,
/// collinear parabola samples) never produces an error; it yields a
/// meaningless but finite-where-possible result instead.
#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    /// Fixed and moving volumes must have identical shapes.
    #[error("shape mismatch: fixed volume is {fixed:?}, moving volume is {moving:?}")]
    ShapeMismatch { fixed: [usize; 3], moving: [usize; 3] },

    /// The coarse-to-fine schedule only supports 1 or a power of two.
    #[error("subscale must be 1 or a power of two, got {0}")]
    InvalidSubscale(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A collaborator (reconstruction operator, intensity optimizer) failed.
    /// The error is passed through unchanged.
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

pub type Result<T, E = AlignError> = std::result::Result<T, E>;
