use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::common::status::BallotStatus;

use super::id::ApiId;

/// Tabulated results for a whole ballot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotResults {
    pub ballot_id: ApiId,
    pub status: BallotStatus,
    /// Roster size.
    pub registered_voters: u64,
    /// Roster entries that have voted.
    pub voted_voters: u64,
    /// Percentage of the roster that has voted.
    pub participation_rate: f64,
    /// Per-question results, in ballot order.
    pub questions: Vec<QuestionResults>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResults {
    pub question_id: ApiId,
    pub title: String,
    /// Every vote cast on this question, options and write-ins alike.
    pub total_votes: u64,
    pub options: Vec<OptionResult>,
    pub write_ins: WriteInResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub option_id: ApiId,
    pub text: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteInResult {
    pub count: u64,
    pub percentage: f64,
}

/// A persisted snapshot of a completed ballot's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDescription {
    pub ballot_id: ApiId,
    pub computed_at: DateTime<Utc>,
    pub rows: Vec<SnapshotEntry>,
}

/// One stored count: an option, or the write-in aggregate when `option_id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub question_id: ApiId,
    pub option_id: Option<ApiId>,
    pub write_in: bool,
    pub count: u64,
    pub percentage: f64,
}
