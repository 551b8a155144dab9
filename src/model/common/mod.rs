//! Ballot rules that need no store access: lifecycle gating, answer
//! validation, enrollment planning and tabulation arithmetic.

pub mod answer;
pub mod enrollment;
pub mod status;
pub mod tally;
