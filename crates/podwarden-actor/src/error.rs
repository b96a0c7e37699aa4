//! Actor and tunable error types.

use thiserror::Error;

/// Why a tunables update was refused. A refused update changes nothing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TunableError {
    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("invalid value `{value}` for `{field}`: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("precondition violated: {0}")]
    Precondition(String),
}

pub type TunableResult<T> = Result<T, TunableError>;

/// Errors from an admin ask.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("actor for {0} did not respond in time")]
    NoResponse(String),

    #[error("actor for {0} has shut down")]
    Closed(String),

    #[error("actor for {cluster} rejected the update: {source}")]
    Rejected {
        cluster: String,
        #[source]
        source: TunableError,
    },
}

pub type ActorResult<T> = Result<T, ActorError>;
