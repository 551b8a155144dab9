use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use log::{info, warn};
use mongodb::{
    bson::{self, doc, serde_helpers::chrono_datetime_as_bson_datetime, Bson, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    ClientSession,
};
use rocket::futures::{FutureExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{
        api::roster::{AddVotersOutcome, AddVotersRequest, RosterCounters, VoterListing},
        common::enrollment::{normalize_emails, plan_enrollment, CapacityPolicy, NormalizedBatch},
        db::{
            ballot::{queries::{check_owner, owned_ballot}, Ballot},
            user::UserAccount,
        },
        mongodb::{is_duplicate_key_error, Coll, Id, Store},
    },
    notifier::Notifier,
};

/// Core roster entry data, as stored in the database: one voter's
/// eligibility for one ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntryCore {
    /// The ballot this entry grants a vote on.
    pub ballot_id: Id,
    /// Linked user account, if the voter had one when enrolled or has voted since.
    pub user_id: Option<Id>,
    /// Normalised email; unique per ballot.
    pub email: String,
    /// Has this voter voted? Never reset once set.
    pub voted: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub voted_at: Option<bson::DateTime>,
}

impl RosterEntryCore {
    pub fn new(ballot_id: Id, email: String, user_id: Option<Id>) -> Self {
        Self {
            ballot_id,
            user_id,
            email,
            voted: false,
            registered_at: Utc::now(),
            voted_at: None,
        }
    }
}

/// A roster entry without an ID.
pub type NewRosterEntry = RosterEntryCore;

/// A roster entry from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub entry: RosterEntryCore,
}

impl Deref for RosterEntry {
    type Target = RosterEntryCore;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

impl DerefMut for RosterEntry {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry
    }
}

/// Filter selecting the caller's entry on a ballot's roster.
///
/// An entry matches on its linked account, or on the caller's email if the
/// entry has not been linked to any account yet.
pub fn caller_entry_filter(ballot_id: Id, user_id: Id, email: Option<&str>) -> Document {
    let mut identities = vec![Bson::Document(doc! {"user_id": user_id})];
    if let Some(email) = email {
        identities.push(Bson::Document(doc! {
            "email": email.trim().to_lowercase(),
            "user_id": Bson::Null,
        }));
    }
    doc! {
        "ballot_id": ballot_id,
        "$or": identities,
    }
}

/// Find the caller's roster entry for a ballot, if any.
pub async fn find_caller_entry(
    roster: &Coll<RosterEntry>,
    ballot_id: Id,
    user_id: Id,
    email: Option<&str>,
) -> Result<Option<RosterEntry>> {
    let filter = caller_entry_filter(ballot_id, user_id, email);
    Ok(roster.find_one(filter, None).await?)
}

/// Lock a ballot's roster for the rest of the transaction.
///
/// Every roster mutation bumps the ballot's `roster_version` before reading
/// anything, so two concurrent mutations of the same roster write-conflict
/// and one of them is retried against the other's committed result.
async fn lock_roster(
    ballots: &Coll<Ballot>,
    owner: Id,
    ballot_id: Id,
    session: &mut ClientSession,
) -> Result<Ballot> {
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let ballot = ballots
        .find_one_and_update_with_session(
            ballot_id.as_doc(),
            doc! {"$inc": {"roster_version": 1_i64}},
            options,
            session,
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("Ballot {ballot_id}")))?;
    check_owner(&ballot, owner)?;
    Ok(ballot)
}

/// Enroll a batch of voters.
///
/// Malformed emails, emails already on the roster, and repeats within the
/// batch are skipped; malformed ones are listed first.
/// What happens to voters beyond capacity depends on `policy`. The capacity
/// check and the insertions commit together, so concurrent batches can never
/// jointly overfill the roster.
pub async fn add_voters(
    store: &Store,
    notifier: &Notifier,
    default_policy: CapacityPolicy,
    owner: Id,
    ballot_id: Id,
    request: AddVotersRequest,
) -> Result<AddVotersOutcome> {
    let NormalizedBatch { emails, invalid } = normalize_emails(&request.emails)?;
    let policy = request.capacity_policy.unwrap_or(default_policy);

    let ballots = store.coll::<Ballot>();
    let roster = store.coll::<RosterEntry>();
    let new_entries = store.coll::<NewRosterEntry>();
    let users = store.coll::<UserAccount>();

    let (outcome, title) = store
        .transaction(|session| {
            let (ballots, roster, new_entries, users) = (
                ballots.clone(),
                roster.clone(),
                new_entries.clone(),
                users.clone(),
            );
            let (emails, invalid) = (emails.clone(), invalid.clone());
            async move {
                let ballot = lock_roster(&ballots, owner, ballot_id, session).await?;
                ballot.status.ensure_enrolling()?;

                let filter = doc! {"ballot_id": ballot_id, "email": {"$in": emails.clone()}};
                let mut cursor = roster.find_with_session(filter, None, session).await?;
                let enrolled: HashSet<String> = cursor
                    .stream(session)
                    .map_ok(|entry| entry.entry.email)
                    .try_collect()
                    .await?;

                let plan = plan_enrollment(
                    &emails,
                    &enrolled,
                    ballot.registered_voters,
                    ballot.max_voters,
                    policy,
                )?;

                let added = u32::try_from(plan.accepted.len()).unwrap_or(u32::MAX);
                if added > 0 {
                    // Link anyone who already has an account.
                    let filter = doc! {"email": {"$in": plan.accepted.clone()}};
                    let mut cursor = users.find_with_session(filter, None, session).await?;
                    let accounts: HashMap<String, Id> = cursor
                        .stream(session)
                        .map_ok(|user| (user.email.to_lowercase(), user.id))
                        .try_collect()
                        .await?;

                    let entries: Vec<NewRosterEntry> = plan
                        .accepted
                        .iter()
                        .map(|email| {
                            NewRosterEntry::new(ballot_id, email.clone(), accounts.get(email).copied())
                        })
                        .collect();
                    new_entries
                        .insert_many_with_session(entries, None, session)
                        .await
                        .map_err(|e| {
                            if is_duplicate_key_error(&e) {
                                Error::Conflict(format!(
                                    "a voter in this batch is already on the roster of ballot {ballot_id}"
                                ))
                            } else {
                                e.into()
                            }
                        })?;

                    let update = doc! {
                        "$inc": {"registered_voters": i64::from(added)},
                        "$set": {"updated_at": bson::DateTime::now()},
                    };
                    ballots
                        .update_one_with_session(ballot_id.as_doc(), update, None, session)
                        .await?;
                }

                let mut skipped_details = invalid;
                skipped_details.extend(plan.skipped);
                let skipped = u32::try_from(skipped_details.len()).unwrap_or(u32::MAX);
                let outcome = AddVotersOutcome {
                    added,
                    skipped,
                    added_emails: plan.accepted,
                    skipped_details,
                    registered_voters: ballot.registered_voters + added,
                };
                Ok((outcome, ballot.ballot.title))
            }
            .boxed()
        })
        .await?;

    info!(
        "Ballot {ballot_id}: enrolled {} voters, skipped {}, roster now {}",
        outcome.added, outcome.skipped, outcome.registered_voters
    );

    if request.send_invitations && !outcome.added_emails.is_empty() {
        notifier.dispatch_invitations(ballot_id, title, outcome.added_emails.clone());
    }

    Ok(outcome)
}

/// Remove a voter from a draft ballot's roster.
pub async fn remove_voter(store: &Store, owner: Id, ballot_id: Id, entry_id: Id) -> Result<()> {
    let ballots = store.coll::<Ballot>();
    let roster = store.coll::<RosterEntry>();

    let email = store
        .transaction(|session| {
            let (ballots, roster) = (ballots.clone(), roster.clone());
            async move {
                let ballot = lock_roster(&ballots, owner, ballot_id, session).await?;
                ballot.status.ensure_removable()?;

                let entry_filter = doc! {"_id": entry_id, "ballot_id": ballot_id};
                let entry = roster
                    .find_one_with_session(entry_filter.clone(), None, session)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("Voter entry {entry_id}")))?;
                if entry.voted {
                    return Err(Error::AlreadyVoted);
                }

                let mut delete_filter = entry_filter;
                delete_filter.insert("voted", false);
                let deleted = roster
                    .delete_one_with_session(delete_filter, None, session)
                    .await?;
                if deleted.deleted_count == 0 {
                    return Err(Error::AlreadyVoted);
                }

                let update = doc! {
                    "$inc": {"registered_voters": -1_i64},
                    "$set": {"updated_at": bson::DateTime::now()},
                };
                ballots
                    .update_one_with_session(ballot_id.as_doc(), update, None, session)
                    .await?;
                Ok(entry.entry.email)
            }
            .boxed()
        })
        .await?;

    info!("Ballot {ballot_id}: removed voter {email}");
    Ok(())
}

/// The roster of a ballot, ordered by email, with linked users' display names.
pub async fn list_voters(store: &Store, owner: Id, ballot_id: Id) -> Result<Vec<VoterListing>> {
    owned_ballot(&store.coll(), owner, ballot_id).await?;

    let options = FindOptions::builder().sort(doc! {"email": 1}).build();
    let entries: Vec<RosterEntry> = store
        .coll::<RosterEntry>()
        .find(doc! {"ballot_id": ballot_id}, options)
        .await?
        .try_collect()
        .await?;

    let user_ids: Vec<Id> = entries.iter().filter_map(|e| e.user_id).collect();
    let names: HashMap<Id, Option<String>> = if user_ids.is_empty() {
        HashMap::new()
    } else {
        store
            .coll::<UserAccount>()
            .find(doc! {"_id": {"$in": user_ids}}, None)
            .await?
            .map_ok(|user| (user.id, user.display_name))
            .try_collect()
            .await?
    };

    let listing = entries
        .into_iter()
        .map(|entry| {
            let display_name = entry
                .user_id
                .and_then(|id| names.get(&id).cloned().flatten());
            VoterListing {
                id: entry.id.into(),
                email: entry.entry.email,
                user_id: entry.entry.user_id.map(Into::into),
                display_name,
                voted: entry.entry.voted,
                registered_at: entry.entry.registered_at,
                voted_at: entry.entry.voted_at.map(|t| t.to_chrono()),
            }
        })
        .collect();
    Ok(listing)
}

/// Recount a ballot's denormalised roster counters from the roster itself.
pub async fn reconcile_roster(store: &Store, owner: Id, ballot_id: Id) -> Result<RosterCounters> {
    let ballots = store.coll::<Ballot>();
    let roster = store.coll::<RosterEntry>();

    let (counters, before) = store
        .transaction(|session| {
            let (ballots, roster) = (ballots.clone(), roster.clone());
            async move {
                let ballot = lock_roster(&ballots, owner, ballot_id, session).await?;
                let registered = roster
                    .count_documents_with_session(doc! {"ballot_id": ballot_id}, None, session)
                    .await?;
                let voted = roster
                    .count_documents_with_session(
                        doc! {"ballot_id": ballot_id, "voted": true},
                        None,
                        session,
                    )
                    .await?;
                let registered = u32::try_from(registered).unwrap_or(u32::MAX);
                let voted = u32::try_from(voted).unwrap_or(u32::MAX);
                let corrected =
                    registered != ballot.registered_voters || voted != ballot.votes_received;
                if corrected {
                    let update = doc! {
                        "$set": {
                            "registered_voters": i64::from(registered),
                            "votes_received": i64::from(voted),
                            "updated_at": bson::DateTime::now(),
                        }
                    };
                    ballots
                        .update_one_with_session(ballot_id.as_doc(), update, None, session)
                        .await?;
                }
                let counters = RosterCounters {
                    registered_voters: registered,
                    votes_received: voted,
                    corrected,
                };
                Ok((counters, (ballot.registered_voters, ballot.votes_received)))
            }
            .boxed()
        })
        .await?;

    if counters.corrected {
        warn!(
            "Ballot {ballot_id}: corrected roster counters from {before:?} to ({}, {})",
            counters.registered_voters, counters.votes_received
        );
    }
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_filter_matches_account_or_unlinked_email() {
        let ballot_id = Id::new();
        let user_id = Id::new();

        let filter = caller_entry_filter(ballot_id, user_id, Some(" Alice@X "));
        let identities = filter.get_array("$or").unwrap();
        assert_eq!(identities.len(), 2);
        let by_email = identities[1].as_document().unwrap();
        assert_eq!(by_email.get_str("email").unwrap(), "alice@x");
        assert_eq!(by_email.get("user_id"), Some(&Bson::Null));

        let filter = caller_entry_filter(ballot_id, user_id, None);
        assert_eq!(filter.get_array("$or").unwrap().len(), 1);
    }
}
