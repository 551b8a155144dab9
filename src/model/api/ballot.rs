use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{
        common::status::BallotStatus,
        db::ballot::{Ballot, BallotCore, BallotOption, Question},
        mongodb::Id,
    },
};

use super::id::ApiId;

/// A ballot specification, as submitted by an organizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotSpec {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Roster capacity.
    pub max_voters: u32,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
}

impl BallotSpec {
    /// Reject specs that could never form a usable ballot.
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        if self.end_date <= self.start_date {
            return Err(Error::BadRequest(
                "end date must be after start date".to_string(),
            ));
        }
        if self.questions.is_empty() {
            return Err(Error::BadRequest(
                "a ballot needs at least one question".to_string(),
            ));
        }
        self.questions.iter().try_for_each(QuestionSpec::validate)
    }

    /// Convert this spec into a draft ballot owned by `creator`, with fresh IDs.
    pub fn into_ballot(self, creator: Id) -> BallotCore {
        let questions = self
            .questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| q.into_question(i))
            .collect();
        BallotCore::new(
            self.title,
            self.description,
            creator,
            self.start_date,
            self.end_date,
            self.max_voters,
            questions,
        )
    }
}

/// A question specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Display position. Defaults to the position in the submitted list.
    #[serde(default)]
    pub order_index: Option<i32>,
    #[serde(default)]
    pub allow_write_in: bool,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
}

impl QuestionSpec {
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        self.options.iter().try_for_each(OptionSpec::validate)
    }

    /// Convert this spec into a question with a fresh ID, placed at
    /// `position` unless it gives its own index.
    pub fn into_question(self, position: usize) -> Question {
        Question {
            id: Id::new(),
            title: self.title,
            description: self.description,
            order_index: self.order_index.unwrap_or_else(|| index_for(position)),
            allow_write_in: self.allow_write_in,
            options: self
                .options
                .into_iter()
                .enumerate()
                .map(|(i, o)| o.into_option(i))
                .collect(),
        }
    }
}

/// An option specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSpec {
    pub text: String,
    #[serde(default)]
    pub order_index: Option<i32>,
}

impl OptionSpec {
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::BadRequest("option text must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn into_option(self, position: usize) -> BallotOption {
        BallotOption {
            id: Id::new(),
            text: self.text,
            order_index: self.order_index.unwrap_or_else(|| index_for(position)),
        }
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::BadRequest("title must not be empty".to_string()));
    }
    Ok(())
}

fn index_for(position: usize) -> i32 {
    i32::try_from(position).unwrap_or(i32::MAX)
}

/// A partial edit of ballot metadata. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BallotUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_voters: Option<u32>,
}

/// New question order: every existing question ID exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOrder {
    pub question_ids: Vec<Id>,
}

/// An API-friendly ballot description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotDescription {
    pub id: ApiId,
    pub title: String,
    pub description: Option<String>,
    pub creator: ApiId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: BallotStatus,
    pub max_voters: u32,
    pub registered_voters: u32,
    pub votes_received: u32,
    pub questions: Vec<QuestionDescription>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDescription {
    pub id: ApiId,
    pub title: String,
    pub description: Option<String>,
    pub order_index: i32,
    pub allow_write_in: bool,
    pub options: Vec<OptionDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDescription {
    pub id: ApiId,
    pub text: String,
    pub order_index: i32,
}

impl From<Ballot> for BallotDescription {
    fn from(ballot: Ballot) -> Self {
        let Ballot { id, ballot } = ballot;
        Self {
            id: id.into(),
            title: ballot.title,
            description: ballot.description,
            creator: ballot.creator.into(),
            start_date: ballot.start_date,
            end_date: ballot.end_date,
            status: ballot.status,
            max_voters: ballot.max_voters,
            registered_voters: ballot.registered_voters,
            votes_received: ballot.votes_received,
            questions: ballot.questions.into_iter().map(Into::into).collect(),
            created_at: ballot.created_at,
            updated_at: ballot.updated_at,
            started_at: ballot.started_at.map(|t| t.to_chrono()),
            ended_at: ballot.ended_at.map(|t| t.to_chrono()),
        }
    }
}

impl From<Question> for QuestionDescription {
    fn from(question: Question) -> Self {
        Self {
            id: question.id.into(),
            title: question.title,
            description: question.description,
            order_index: question.order_index,
            allow_write_in: question.allow_write_in,
            options: question
                .options
                .into_iter()
                .map(|o| OptionDescription {
                    id: o.id.into(),
                    text: o.text,
                    order_index: o.order_index,
                })
                .collect(),
        }
    }
}

/// Counts across all of an organizer's ballots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotsOverview {
    pub total: u32,
    pub draft: u32,
    pub live: u32,
    pub completed: u32,
    pub total_voters: u64,
    pub total_votes: u64,
}

impl BallotsOverview {
    pub fn add(&mut self, ballot: &Ballot) {
        self.total += 1;
        match ballot.status {
            BallotStatus::Draft => self.draft += 1,
            BallotStatus::Live => self.live += 1,
            BallotStatus::Completed => self.completed += 1,
        }
        self.total_voters += u64::from(ballot.registered_voters);
        self.total_votes += u64::from(ballot.votes_received);
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    use chrono::Duration;

    impl BallotSpec {
        /// Capacity 2; one fixed question and one that accepts write-ins.
        pub fn example() -> Self {
            let start_date = Utc::now();
            Self {
                title: "Committee election".to_string(),
                description: Some("Annual committee vote".to_string()),
                start_date,
                end_date: start_date + Duration::days(7),
                max_voters: 2,
                questions: vec![QuestionSpec::example1(), QuestionSpec::example2()],
            }
        }
    }

    impl QuestionSpec {
        pub fn example1() -> Self {
            Self {
                title: "Q1".to_string(),
                description: None,
                order_index: None,
                allow_write_in: false,
                options: vec![OptionSpec::example("A"), OptionSpec::example("B")],
            }
        }

        pub fn example2() -> Self {
            Self {
                title: "Chair".to_string(),
                description: Some("Who should chair the committee?".to_string()),
                order_index: None,
                allow_write_in: true,
                options: vec![
                    OptionSpec::example("Ada"),
                    OptionSpec::example("Grace"),
                    OptionSpec::example("Edsger"),
                ],
            }
        }
    }

    impl OptionSpec {
        pub fn example(text: &str) -> Self {
            Self {
                text: text.to_string(),
                order_index: None,
            }
        }
    }
}
