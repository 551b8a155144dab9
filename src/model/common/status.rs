use std::fmt::{Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// States in the ballot lifecycle. Transitions only ever move forwards:
/// `Draft -> Live -> Completed`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BallotStatus {
    /// Under construction; structure, metadata and roster may all change.
    Draft,
    /// Accepting votes. Voters may still be added but not removed.
    Live,
    /// Closed. Terminal.
    Completed,
}

/// A lifecycle transition requested by the ballot owner.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    End,
}

impl BallotStatus {
    /// The state reached by applying `transition`, if it is legal from here.
    pub fn apply(self, transition: Transition) -> Result<Self> {
        match (self, transition) {
            (Self::Draft, Transition::Start) => Ok(Self::Live),
            (Self::Live, Transition::End) => Ok(Self::Completed),
            (from, transition) => Err(Error::InvalidState(format!(
                "cannot {transition} a ballot that is {from}"
            ))),
        }
    }

    /// The only state `transition` may be applied from.
    pub fn source_of(transition: Transition) -> Self {
        match transition {
            Transition::Start => Self::Draft,
            Transition::End => Self::Live,
        }
    }

    /// Metadata, questions and options are editable only while drafting.
    pub fn ensure_editable(self) -> Result<()> {
        match self {
            Self::Draft => Ok(()),
            other => Err(Error::InvalidState(format!(
                "ballot is {other}; only draft ballots can be edited"
            ))),
        }
    }

    /// Voters may be enrolled until the ballot completes.
    pub fn ensure_enrolling(self) -> Result<()> {
        match self {
            Self::Draft | Self::Live => Ok(()),
            Self::Completed => Err(Error::InvalidState(
                "ballot is completed; the roster is closed".to_string(),
            )),
        }
    }

    /// Voters may only be removed before the ballot goes live.
    pub fn ensure_removable(self) -> Result<()> {
        match self {
            Self::Draft => Ok(()),
            other => Err(Error::InvalidState(format!(
                "ballot is {other}; voters can only be removed from draft ballots"
            ))),
        }
    }

    pub fn ensure_accepting_votes(self) -> Result<()> {
        match self {
            Self::Live => Ok(()),
            other => Err(Error::InvalidState(format!(
                "ballot is {other} and is not accepting votes"
            ))),
        }
    }
}

impl Display for BallotStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Live => "live",
            Self::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
        }
    }
}

impl From<BallotStatus> for Bson {
    fn from(status: BallotStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
