use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::common::enrollment::{CapacityPolicy, SkippedVoter};

use super::id::ApiId;

/// A batch of voters to enroll on a ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddVotersRequest {
    pub emails: Vec<String>,
    /// Notify accepted voters once they are enrolled.
    #[serde(default)]
    pub send_invitations: bool,
    /// Overrides the server-wide capacity policy for this batch.
    #[serde(default)]
    pub capacity_policy: Option<CapacityPolicy>,
}

/// What happened to each voter in an enrollment batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVotersOutcome {
    pub added: u32,
    pub skipped: u32,
    pub added_emails: Vec<String>,
    pub skipped_details: Vec<SkippedVoter>,
    /// Roster size after the batch.
    pub registered_voters: u32,
}

/// One roster entry, as shown to the ballot owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterListing {
    pub id: ApiId,
    pub email: String,
    pub user_id: Option<ApiId>,
    /// Display name of the linked user account, if any.
    pub display_name: Option<String>,
    pub voted: bool,
    pub registered_at: DateTime<Utc>,
    pub voted_at: Option<DateTime<Utc>>,
}

/// Counter values after a roster reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterCounters {
    pub registered_voters: u32,
    pub votes_received: u32,
    /// Did either stored counter differ from the roster?
    pub corrected: bool,
}
