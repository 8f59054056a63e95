use thiserror::Error;

/// Top-level errors that can abort `main`.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}
