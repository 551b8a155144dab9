use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{self, serde_helpers::chrono_datetime_as_bson_datetime};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{common::status::BallotStatus, mongodb::Id},
};

/// Core ballot data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotCore {
    /// Ballot title.
    pub title: String,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// ID of the organizer who created the ballot, and the only one who may manage it.
    pub creator: Id,
    /// Planned opening time, as entered by the organizer.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_date: DateTime<Utc>,
    /// Planned closing time, as entered by the organizer.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_date: DateTime<Utc>,
    /// Lifecycle state.
    pub status: BallotStatus,
    /// Roster capacity.
    pub max_voters: u32,
    /// Number of roster entries. Only ever changed in the same transaction
    /// as the roster itself.
    pub registered_voters: u32,
    /// Number of roster entries that have voted. Bumped right after each
    /// vote commits; `reconcile_roster` recounts it from the roster.
    pub votes_received: u32,
    /// Bumped by every roster mutation, serialising them against each other.
    #[serde(default)]
    pub roster_version: u64,
    /// Questions, kept sorted by `order_index`.
    pub questions: Vec<Question>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
    /// When the ballot actually went live.
    #[serde(default)]
    pub started_at: Option<bson::DateTime>,
    /// When the ballot actually closed.
    #[serde(default)]
    pub ended_at: Option<bson::DateTime>,
    /// When the result snapshot was last written, if ever.
    #[serde(default)]
    pub snapshot_at: Option<bson::DateTime>,
}

impl BallotCore {
    /// Create a new draft ballot with an empty roster.
    pub fn new(
        title: String,
        description: Option<String>,
        creator: Id,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        max_voters: u32,
        questions: Vec<Question>,
    ) -> Self {
        let now = Utc::now();
        let mut ballot = Self {
            title,
            description,
            creator,
            start_date,
            end_date,
            status: BallotStatus::Draft,
            max_voters,
            registered_voters: 0,
            votes_received: 0,
            roster_version: 0,
            questions,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            snapshot_at: None,
        };
        ballot.sort_questions();
        ballot
    }

    /// Restore question and option order after a structural edit.
    /// The sort is stable, so equal indices keep their insertion order.
    pub fn sort_questions(&mut self) {
        self.questions.sort_by_key(|q| q.order_index);
        for question in &mut self.questions {
            question.options.sort_by_key(|o| o.order_index);
        }
    }

    /// Check that a vote could be cast on this ballot: it has questions, and
    /// each of them offers options or accepts a write-in.
    pub fn ensure_votable(&self) -> Result<()> {
        if self.questions.is_empty() {
            return Err(Error::InvalidState(
                "a ballot needs at least one question before it can start".to_string(),
            ));
        }
        match self
            .questions
            .iter()
            .find(|q| q.options.is_empty() && !q.allow_write_in)
        {
            Some(question) => Err(Error::InvalidState(format!(
                "question {:?} has no options and does not accept write-ins",
                question.title
            ))),
            None => Ok(()),
        }
    }

    pub fn question_mut(&mut self, question_id: Id) -> Option<&mut Question> {
        self.questions.iter_mut().find(|q| q.id == question_id)
    }
}

/// A ballot without an ID.
pub type NewBallot = BallotCore;

/// A ballot from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub ballot: BallotCore,
}

impl Deref for Ballot {
    type Target = BallotCore;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}

impl DerefMut for Ballot {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ballot
    }
}

/// A single question. Stored inline in its ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Unique ID.
    pub id: Id,
    /// Question text.
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Display position; ties are broken by insertion order.
    pub order_index: i32,
    /// Does this question accept free-text answers?
    pub allow_write_in: bool,
    /// Predefined answers, kept sorted by `order_index`.
    pub options: Vec<BallotOption>,
}

/// A predefined answer to a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotOption {
    /// Unique ID.
    pub id: Id,
    /// Display text.
    pub text: String,
    /// Display position; ties are broken by insertion order.
    pub order_index: i32,
}
