//! `ocirun_utils::error` is a module containing error utilities for the ocirun project.

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an ocirun-utils-related operation.
pub type OcirunUtilsResult<T> = Result<T, OcirunUtilsError>;

/// An error that occurred in one of the shared ocirun utilities.
#[derive(pretty_error_debug::Debug, Error)]
pub enum OcirunUtilsError {
    /// An error that occurred when validating or normalizing a path.
    #[error("path validation error: {0}")]
    PathValidation(String),

    /// An error that occurred when performing an IO operation.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Custom error.
    #[error("custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OcirunUtilsError {
    /// Creates a new custom error from anything that can be converted to an `anyhow::Error`.
    pub fn custom(error: impl Into<anyhow::Error>) -> OcirunUtilsError {
        OcirunUtilsError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
