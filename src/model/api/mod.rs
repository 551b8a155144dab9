//! Request and response bodies.

pub mod ballot;
pub mod id;
pub mod results;
pub mod roster;
pub mod vote;

pub use id::ApiId;
