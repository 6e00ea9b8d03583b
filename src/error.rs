use thiserror::Error;

use crate::models::Request;

/// Failures of the request / upload / voting workflow.
///
/// Variants map onto how the chat layer reacts: input errors get a correction,
/// duplicates are absorbed, `NotFound` is ignored, and infrastructure errors are
/// logged.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("`{0}` is not a valid DOI")]
    InvalidDoi(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("an open request for {} already exists ({})", .0.doi, .0.status)]
    DuplicateRequest(Box<Request>),

    #[error("this user already voted on the upload")]
    DuplicateVote,

    #[error("uploaders and requesters cannot vote on their own PDF")]
    SelfVoteForbidden,

    #[error("the upload has already been resolved")]
    AlreadyResolved,

    #[error("the request is no longer open")]
    RequestClosed,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Errors worth retrying: the event itself was fine, something underneath failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkflowError::Database(_) | WorkflowError::Pool(_) | WorkflowError::External(_)
        )
    }
}
