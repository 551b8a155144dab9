//! Identity of the caller, as asserted by the upstream identity provider.

mod role;
mod token;

pub use role::{Organizer, Rights, Role, Voter};
pub use token::{AuthToken, AUTH_TOKEN_COOKIE};

#[cfg(test)]
pub use token::examples;
