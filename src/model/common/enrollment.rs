use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest email address we will store.
const MAX_EMAIL_LEN: usize = 254;

/// What to do with a batch of voters that would overflow the roster.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityPolicy {
    /// Reject the whole batch.
    #[default]
    Reject,
    /// Admit voters in order until the roster is full, skip the rest.
    #[serde(rename = "fill")]
    FillToCapacity,
}

/// Why a candidate voter was not added.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Already on the roster for this ballot.
    AlreadyEnrolled,
    /// Appeared earlier in the same batch.
    Duplicate,
    /// The roster was full.
    CapacityExceeded,
    /// Blank or not an email address.
    InvalidEmail,
}

/// A candidate voter that was not added, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedVoter {
    pub email: String,
    pub reason: SkipReason,
}

/// The outcome of planning a batch enrollment against the current roster.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnrollmentPlan {
    /// Emails to insert, in request order.
    pub accepted: Vec<String>,
    pub skipped: Vec<SkippedVoter>,
}

/// Canonical form of an email address: trimmed and lower-cased. `None` if
/// it is blank or malformed.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    let valid = !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && email.len() <= MAX_EMAIL_LEN;
    valid.then_some(email)
}

/// A requested batch of voters, split into usable and unusable addresses.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    /// Canonical addresses, in request order.
    pub emails: Vec<String>,
    /// Addresses that could not be read, as submitted but trimmed.
    pub invalid: Vec<SkippedVoter>,
}

/// Normalise a batch. Malformed addresses are set aside rather than failing
/// the batch; an empty batch is a bad request.
pub fn normalize_emails(raw: &[String]) -> Result<NormalizedBatch> {
    if raw.is_empty() {
        return Err(Error::BadRequest(
            "at least one voter email is required".to_string(),
        ));
    }
    let mut batch = NormalizedBatch::default();
    for email in raw {
        match normalize_email(email) {
            Some(email) => batch.emails.push(email),
            None => batch.invalid.push(SkippedVoter {
                email: email.trim().to_string(),
                reason: SkipReason::InvalidEmail,
            }),
        }
    }
    Ok(batch)
}

/// Decide which of `candidates` join the roster.
///
/// `candidates` must already be normalised. `enrolled` holds the subset of
/// them that is already on the roster, and `registered` is the current
/// roster size.
pub fn plan_enrollment(
    candidates: &[String],
    enrolled: &HashSet<String>,
    registered: u32,
    max_voters: u32,
    policy: CapacityPolicy,
) -> Result<EnrollmentPlan> {
    let mut plan = EnrollmentPlan::default();
    let mut seen = HashSet::with_capacity(candidates.len());
    let mut fresh = Vec::new();

    for email in candidates {
        let reason = if enrolled.contains(email) {
            Some(SkipReason::AlreadyEnrolled)
        } else if !seen.insert(email.as_str()) {
            Some(SkipReason::Duplicate)
        } else {
            None
        };
        match reason {
            Some(reason) => plan.skipped.push(SkippedVoter {
                email: email.clone(),
                reason,
            }),
            None => fresh.push(email.clone()),
        }
    }

    let remaining = max_voters.saturating_sub(registered) as usize;
    if fresh.len() > remaining {
        match policy {
            CapacityPolicy::Reject => {
                return Err(Error::CapacityExceeded {
                    max_voters,
                    registered,
                    requested: u32::try_from(fresh.len()).unwrap_or(u32::MAX),
                });
            }
            CapacityPolicy::FillToCapacity => {
                let overflow = fresh.split_off(remaining);
                plan.skipped
                    .extend(overflow.into_iter().map(|email| SkippedVoter {
                        email,
                        reason: SkipReason::CapacityExceeded,
                    }));
            }
        }
    }

    plan.accepted = fresh;
    Ok(plan)
}
