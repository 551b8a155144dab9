pub mod ballot;
pub mod roster;
pub mod snapshot;
pub mod tabulation;
pub mod user;
pub mod vote;
