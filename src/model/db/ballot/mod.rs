mod base;
pub mod lifecycle;
pub mod queries;
pub mod structure;

pub use base::{Ballot, BallotCore, BallotOption, NewBallot, Question};
