use std::ops::Deref;

use chrono::{DateTime, Utc};
use log::{info, warn};
use mongodb::{
    bson::{self, doc, serde_helpers::chrono_datetime_as_bson_datetime},
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use rocket::futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{
        api::vote::{CastVoteRequest, VoteReceipt, VoterStatus},
        common::answer::{validate_answers, Choice, ValidAnswer},
        db::{
            ballot::{queries::find_ballot, Ballot},
            roster::{caller_entry_filter, find_caller_entry, RosterEntry},
        },
        mongodb::{Id, Store},
    },
};

/// Core vote data, as stored in the database: one voter's answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    pub ballot_id: Id,
    pub question_id: Id,
    /// The chosen option. Exactly one of this and `write_in` is set.
    pub option_id: Option<Id>,
    /// Free-text answer; trimmed and non-empty when set.
    pub write_in: Option<String>,
    /// The roster entry of the voter who cast it.
    pub voter_entry_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl VoteCore {
    pub fn new(ballot_id: Id, voter_entry_id: Id, answer: ValidAnswer, cast_at: DateTime<Utc>) -> Self {
        let (option_id, write_in) = match answer.choice {
            Choice::Option(option) => (Some(option), None),
            Choice::WriteIn(text) => (None, Some(text)),
        };
        Self {
            ballot_id,
            question_id: answer.question_id,
            option_id,
            write_in,
            voter_entry_id,
            cast_at,
        }
    }
}

/// A vote without an ID.
pub type NewVote = VoteCore;

/// A vote from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}

/// The caller identified by their token, as seen by the vote engine.
#[derive(Debug, Clone, Copy)]
pub struct Caller<'a> {
    pub user_id: Id,
    pub email: Option<&'a str>,
}

/// Record a voter's complete set of answers.
///
/// The votes and the voter's `voted` flag are written in one transaction.
/// Of several concurrent submissions by the same voter, exactly one commits;
/// the rest see the flipped flag and fail with [`Error::AlreadyVoted`].
/// Distinct voters touch disjoint documents, so they never conflict.
pub async fn cast_vote(
    store: &Store,
    caller: Caller<'_>,
    ballot_id: Id,
    request: CastVoteRequest,
) -> Result<VoteReceipt> {
    let ballots = store.coll::<Ballot>();
    let roster = store.coll::<RosterEntry>();
    let votes = store.coll::<NewVote>();

    // Fail fast on anything that can be decided without writing.
    let ballot = find_ballot(&ballots, ballot_id).await?;
    ballot.status.ensure_accepting_votes()?;
    let entry = find_caller_entry(&roster, ballot_id, caller.user_id, caller.email)
        .await?
        .ok_or_else(|| not_on_roster(ballot_id))?;
    if entry.voted {
        return Err(Error::AlreadyVoted);
    }
    let answers = validate_answers(&ballot.questions, &request.answers)?;

    let entry_filter = caller_entry_filter(ballot_id, caller.user_id, caller.email);
    let user_id = caller.user_id;
    let cast_at = Utc::now();

    let entry_id = store
        .transaction(|session| {
            let (ballots, roster, votes) = (ballots.clone(), roster.clone(), votes.clone());
            let (answers, entry_filter) = (answers.clone(), entry_filter.clone());
            async move {
                let after = FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build();

                let current = ballots
                    .find_one_with_session(ballot_id.as_doc(), None, session)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("Ballot {ballot_id}")))?;
                current.status.ensure_accepting_votes()?;

                // Flip the voted flag; only one submission can see it unset.
                let mut filter = entry_filter.clone();
                filter.insert("voted", false);
                let update = doc! {
                    "$set": {
                        "voted": true,
                        "voted_at": bson::DateTime::from_chrono(cast_at),
                        "user_id": user_id,
                    }
                };
                let entry = roster
                    .find_one_and_update_with_session(filter, update, after, session)
                    .await?;
                let entry = match entry {
                    Some(entry) => entry,
                    None => {
                        let existing = roster
                            .find_one_with_session(entry_filter, None, session)
                            .await?;
                        return Err(match existing {
                            Some(_) => Error::AlreadyVoted,
                            None => not_on_roster(ballot_id),
                        });
                    }
                };

                let rows: Vec<NewVote> = answers
                    .into_iter()
                    .map(|answer| NewVote::new(ballot_id, entry.id, answer, cast_at))
                    .collect();
                votes.insert_many_with_session(rows, None, session).await?;
                Ok(entry.id)
            }
            .boxed()
        })
        .await?;

    info!(
        "Ballot {ballot_id}: recorded {} answers from voter entry {entry_id}",
        answers.len()
    );

    // Kept off the transaction: concurrent voters would all conflict on the
    // ballot document. `reconcile_roster` recounts it if this is lost.
    let counted = ballots
        .update_one(
            ballot_id.as_doc(),
            doc! {"$inc": {"votes_received": 1_i64}},
            None,
        )
        .await;
    if let Err(e) = counted {
        warn!("Ballot {ballot_id}: vote recorded but not counted: {e}");
    }
    Ok(VoteReceipt {
        ballot_id: ballot_id.into(),
        answers: u32::try_from(answers.len()).unwrap_or(u32::MAX),
        cast_at,
    })
}

/// The ballot definition, for a caller on its roster.
pub async fn voter_ballot(store: &Store, caller: Caller<'_>, ballot_id: Id) -> Result<Ballot> {
    let ballot = find_ballot(&store.coll(), ballot_id).await?;
    find_caller_entry(&store.coll(), ballot_id, caller.user_id, caller.email)
        .await?
        .ok_or_else(|| not_on_roster(ballot_id))?;
    Ok(ballot)
}

/// Whether the caller has voted on a ballot.
pub async fn voter_status(store: &Store, caller: Caller<'_>, ballot_id: Id) -> Result<VoterStatus> {
    find_ballot(&store.coll(), ballot_id).await?;
    let entry = find_caller_entry(&store.coll(), ballot_id, caller.user_id, caller.email)
        .await?
        .ok_or_else(|| not_on_roster(ballot_id))?;
    Ok(VoterStatus {
        ballot_id: ballot_id.into(),
        voted: entry.voted,
        voted_at: entry.voted_at.map(|t| t.to_chrono()),
    })
}

fn not_on_roster(ballot_id: Id) -> Error {
    Error::Forbidden(format!("Caller is not on the roster of ballot {ballot_id}"))
}
