use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

use super::id::ApiId;

/// A voter's complete submission for a ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVoteRequest {
    pub answers: Vec<Answer>,
}

/// An answer to one question: either an option or a write-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: Id,
    #[serde(default)]
    pub option_id: Option<Id>,
    #[serde(default)]
    pub write_in: Option<String>,
}

/// Acknowledgement of a recorded vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub ballot_id: ApiId,
    /// Number of answers recorded.
    pub answers: u32,
    pub cast_at: DateTime<Utc>,
}

/// Whether the caller has voted on a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterStatus {
    pub ballot_id: ApiId,
    pub voted: bool,
    pub voted_at: Option<DateTime<Utc>>,
}
