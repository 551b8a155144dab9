use mongodb::{bson::doc, options::FindOptions, ClientSession};
use rocket::futures::TryStreamExt;

use crate::{
    error::{Error, Result},
    model::{api::ballot::BallotsOverview, mongodb::{Coll, Id}},
};

use super::Ballot;

/// Fetch a ballot, failing if it does not exist.
pub async fn find_ballot(ballots: &Coll<Ballot>, ballot_id: Id) -> Result<Ballot> {
    ballots
        .find_one(ballot_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Ballot {ballot_id}")))
}

/// Fetch a ballot on behalf of `owner`, failing if someone else created it.
pub async fn owned_ballot(ballots: &Coll<Ballot>, owner: Id, ballot_id: Id) -> Result<Ballot> {
    let ballot = find_ballot(ballots, ballot_id).await?;
    check_owner(&ballot, owner)?;
    Ok(ballot)
}

/// As [`owned_ballot`], reading inside a transaction.
pub async fn owned_ballot_in(
    ballots: &Coll<Ballot>,
    owner: Id,
    ballot_id: Id,
    session: &mut ClientSession,
) -> Result<Ballot> {
    let ballot = ballots
        .find_one_with_session(ballot_id.as_doc(), None, session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Ballot {ballot_id}")))?;
    check_owner(&ballot, owner)?;
    Ok(ballot)
}

pub fn check_owner(ballot: &Ballot, owner: Id) -> Result<()> {
    if ballot.creator == owner {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "Ballot {} belongs to another organizer",
            ballot.id
        )))
    }
}

/// All ballots created by `owner`, newest first.
pub async fn list_ballots(ballots: &Coll<Ballot>, owner: Id) -> Result<Vec<Ballot>> {
    let options = FindOptions::builder()
        .sort(doc! {"created_at": -1, "_id": -1})
        .build();
    let list = ballots
        .find(doc! {"creator": owner}, options)
        .await?
        .try_collect()
        .await?;
    Ok(list)
}

/// Totals across all ballots created by `owner`.
pub async fn overview(ballots: &Coll<Ballot>, owner: Id) -> Result<BallotsOverview> {
    let mut cursor = ballots.find(doc! {"creator": owner}, None).await?;
    let mut overview = BallotsOverview::default();
    while let Some(ballot) = cursor.try_next().await? {
        overview.add(&ballot);
    }
    Ok(overview)
}
