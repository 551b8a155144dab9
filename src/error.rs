use log::{error, warn};
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{self, status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::mongodb::Id;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error(
        "Capacity exceeded: {requested} new voters requested, {registered} of {max_voters} places taken"
    )]
    CapacityExceeded {
        max_voters: u32,
        registered: u32,
        requested: u32,
    },
    #[error("Voter has already voted on this ballot")]
    AlreadyVoted,
    #[error("Invalid answer: {0}")]
    InvalidAnswer(String),
    #[error("Question {0} does not belong to this ballot")]
    InvalidQuestion(Id),
    #[error("Option {option} does not belong to question {question}")]
    InvalidOption { question: Id, option: Id },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] DbError),
    #[error("Store unavailable: transaction abandoned after {0} attempts")]
    TransactionExhausted(u32),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidState(_) => "invalid_state",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::AlreadyVoted => "already_voted",
            Self::InvalidAnswer(_) => "invalid_answer",
            Self::InvalidQuestion(_) => "invalid_question",
            Self::InvalidOption { .. } => "invalid_option",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::StoreUnavailable(_) | Self::TransactionExhausted(_) => "store_unavailable",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) => Status::NotFound,
            Self::Forbidden(_) => Status::Forbidden,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::InvalidState(_)
            | Self::CapacityExceeded { .. }
            | Self::AlreadyVoted
            | Self::Conflict(_) => Status::Conflict,
            Self::InvalidAnswer(_) | Self::InvalidQuestion(_) | Self::InvalidOption { .. } => {
                Status::UnprocessableEntity
            }
            Self::BadRequest(_) => Status::BadRequest,
            Self::StoreUnavailable(_) | Self::TransactionExhausted(_) => {
                Status::ServiceUnavailable
            }
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

/// JSON body sent alongside every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ErrorBody {
    /// Body for a failure Rocket caught before any handler ran, such as a
    /// rejected request guard or an unparseable JSON payload.
    pub fn for_status(status: Status) -> Self {
        let error = match status.code {
            400 => "bad_request",
            401 => "unauthorized",
            403 => "forbidden",
            404 => "not_found",
            409 => "conflict",
            422 => "invalid_request",
            503 => "store_unavailable",
            _ => "error",
        };
        Self {
            error,
            message: status.reason_lossy().to_string(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{self}");
        } else {
            warn!("{self}");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        Custom(status, Json(body)).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_payload_errors_are_unprocessable() {
        let question = Id::new();
        let option = Id::new();
        for err in [
            Error::InvalidAnswer("neither option nor write-in".to_string()),
            Error::InvalidQuestion(question),
            Error::InvalidOption { question, option },
        ] {
            assert_eq!(err.status(), Status::UnprocessableEntity);
        }
    }

    #[test]
    fn lifecycle_errors_conflict() {
        assert_eq!(Error::AlreadyVoted.status(), Status::Conflict);
        assert_eq!(
            Error::InvalidState("ballot is completed".to_string()).status(),
            Status::Conflict
        );
        let full = Error::CapacityExceeded {
            max_voters: 2,
            registered: 2,
            requested: 1,
        };
        assert_eq!(full.status(), Status::Conflict);
        assert_eq!(full.kind(), "capacity_exceeded");
        assert!(full.to_string().contains("2 of 2 places taken"));
    }

    #[test]
    fn caught_statuses_have_kinds() {
        assert_eq!(ErrorBody::for_status(Status::Unauthorized).error, "unauthorized");
        assert_eq!(ErrorBody::for_status(Status::UnprocessableEntity).error, "invalid_request");
        assert_eq!(ErrorBody::for_status(Status::ImATeapot).error, "error");
    }

    #[test]
    fn exhausted_transactions_are_retryable() {
        let err = Error::TransactionExhausted(8);
        assert_eq!(err.status(), Status::ServiceUnavailable);
        assert_eq!(err.kind(), "store_unavailable");
    }
}
