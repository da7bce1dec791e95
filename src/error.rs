use thiserror::Error;

/// Errors raised while building densities, stacking operators or driving a sampler.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RtoError {
    /// More than one covariance-like field was given, or a field other than the
    /// designated one was set.
    #[error("invalid parameterization: {0}")]
    InvalidParameterization(String),

    #[error("{which} matrix has to be symmetric")]
    AsymmetricMatrix { which: &'static str },

    #[error("the input matrix must be symmetric positive semidefinite ({detail})")]
    NotPositiveSemiDefinite { detail: String },

    /// The log-determinant is not available, so only unnormalized
    /// operations can be used.
    #[error("normalized density is unavailable: the factorization could not provide a log-determinant")]
    UndefinedNormalization,

    #[error("unsupported representation: {0}")]
    UnsupportedRepresentation(&'static str),

    #[error("all likelihood models need to be matrix-backed or none of them may be")]
    MixedOperatorType,

    #[error("gradient is not available for geometry {0}")]
    GeometryMismatch(String),

    #[error("sampler type in checkpoint ({found}) does not match the sampler ({expected})")]
    CheckpointTypeMismatch { expected: String, found: String },

    #[error("sampler key {0} is not set after initialization")]
    IncompleteInitialization(String),

    #[error("key {key} is not recognized by sampler {sampler}")]
    UnknownStateKey { sampler: String, key: String },

    #[error("state entry {key} does not match the stored kind of value")]
    InvalidStateValue { key: String },

    #[error("dimension mismatch in {context}: expected {expected}, got {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("cannot initialize sampler without a target density")]
    MissingTarget,

    #[error("the mean is given by a forward model and has to be evaluated first")]
    UnresolvedMean,

    #[error("model is not linear and has no adjoint")]
    NotLinear,

    #[error("matrix factorization failed: {0}")]
    Factorization(String),

    #[error("sparse storage failed: {0}")]
    Sparse(#[from] faer::sparse::FaerError),
}

pub type Result<T> = std::result::Result<T, RtoError>;

impl RtoError {
    pub(crate) fn dim(context: &'static str, expected: usize, found: usize) -> Self {
        RtoError::DimensionMismatch {
            context,
            expected,
            found,
        }
    }
}
