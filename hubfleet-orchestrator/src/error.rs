use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("no free slug for base '{0}'")]
    SlugExhausted(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
