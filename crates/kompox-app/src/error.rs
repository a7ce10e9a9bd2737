//! Error types for the converter

use kompox_workload::CompilationError;
use thiserror::Error;

use crate::provider::ProviderError;

/// Errors returned by [`crate::Converter`] phases.
///
/// A failed phase leaves the converter in the state it was in before the
/// call, so the caller can inspect warnings and retry with corrected input.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// A phase needs `convert` to have succeeded first
    #[error("convert has not been run")]
    NotConverted,

    /// `build` needs `bind_volumes` to have succeeded first
    #[error("volumes have not been bound")]
    NotBound,

    /// `convert` called twice
    #[error("already converted")]
    AlreadyConverted,

    /// `bind_volumes` called twice
    #[error("volumes already bound")]
    AlreadyBound,

    /// Any phase called after `build`
    #[error("manifests already built")]
    AlreadyBuilt,

    /// The provider driver could not resolve a volume class
    #[error("volume class for {volume}: {source}")]
    VolumeClass {
        /// Volume name
        volume: String,
        /// Driver failure
        #[source]
        source: ProviderError,
    },

    /// Fatal validation failure
    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

impl ConverterError {
    /// True for errors caused by calling phases out of order
    pub fn is_phase_error(&self) -> bool {
        matches!(
            self,
            Self::NotConverted
                | Self::NotBound
                | Self::AlreadyConverted
                | Self::AlreadyBound
                | Self::AlreadyBuilt
        )
    }
}
