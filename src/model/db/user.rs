use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A user account, owned by the identity provider. Only ever read here: to
/// link new roster entries by email and to show display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    #[serde(rename = "_id")]
    pub id: Id,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}
