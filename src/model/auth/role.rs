use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// A kind of caller, having defined rights.
pub trait Role: Send + Sync + 'static {
    /// The rights a token needs to act in this role.
    const RIGHTS: Rights;
}

/// Different privilege levels. Higher levels include the lower ones.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Organizer = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Organizer => "organizer",
            }
        )
    }
}

/// Someone who creates and manages ballots.
pub struct Organizer;

impl Role for Organizer {
    const RIGHTS: Rights = Rights::Organizer;
}

/// Someone who votes on ballots they are enrolled in.
pub struct Voter;

impl Role for Voter {
    const RIGHTS: Rights = Rights::Voter;
}
