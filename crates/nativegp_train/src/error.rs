use thiserror::Error;

/// Errors that stop a training run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Building or running native code failed.
    #[error(transparent)]
    Core(#[from] nativegp::Error),

    /// The options are inconsistent.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    /// No program had a finite loss, so nothing could be selected.
    #[error("population collapsed, no finite loss after {draws} tournaments")]
    PopulationCollapsed {
        /// Tournaments held without a single selection.
        draws: usize,
    },

    /// The worker threads could not be started.
    #[error("failed to build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Alias with this crate's [Error].
pub type Result<T> = std::result::Result<T, Error>;
