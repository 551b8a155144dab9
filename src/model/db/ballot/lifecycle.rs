use chrono::Utc;
use log::{info, warn};
use mongodb::{
    bson::{self, doc, Document},
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use rocket::futures::FutureExt;

use crate::{
    error::{Error, Result},
    model::{
        api::ballot::{BallotSpec, BallotUpdate},
        common::status::{BallotStatus, Transition},
        db::{roster::RosterEntry, snapshot::SnapshotScheduler},
        mongodb::{Id, Store},
    },
};

use super::{
    queries::{find_ballot, owned_ballot, owned_ballot_in},
    Ballot,
};

/// Create a draft ballot owned by `owner`.
pub async fn create_ballot(store: &Store, owner: Id, spec: BallotSpec) -> Result<Ballot> {
    spec.validate()?;
    let ballot = Ballot {
        id: Id::new(),
        ballot: spec.into_ballot(owner),
    };
    store.coll::<Ballot>().insert_one(&ballot, None).await?;
    info!(
        "Created ballot {} '{}' for organizer {owner}",
        ballot.id, ballot.title
    );
    Ok(ballot)
}

/// Edit the metadata of a draft ballot.
///
/// Capacity may not drop below the current roster size. The check is part
/// of the update filter, so a concurrent enrollment cannot slip past it.
pub async fn update_ballot(
    store: &Store,
    owner: Id,
    ballot_id: Id,
    update: BallotUpdate,
) -> Result<Ballot> {
    let ballots = store.coll::<Ballot>();
    let ballot = owned_ballot(&ballots, owner, ballot_id).await?;
    ballot.status.ensure_editable()?;

    let start_date = update.start_date.unwrap_or(ballot.start_date);
    let end_date = update.end_date.unwrap_or(ballot.end_date);
    if end_date <= start_date {
        return Err(Error::BadRequest(
            "end date must be after start date".to_string(),
        ));
    }

    let mut set = Document::new();
    if let Some(title) = update.title {
        if title.trim().is_empty() {
            return Err(Error::BadRequest("title must not be empty".to_string()));
        }
        set.insert("title", title);
    }
    if let Some(description) = update.description {
        set.insert("description", description);
    }
    set.insert("start_date", bson::DateTime::from_chrono(start_date));
    set.insert("end_date", bson::DateTime::from_chrono(end_date));
    set.insert("updated_at", bson::DateTime::from_chrono(Utc::now()));

    let mut filter = doc! {"_id": ballot_id, "status": BallotStatus::Draft};
    if let Some(max_voters) = update.max_voters {
        set.insert("max_voters", max_voters);
        filter.insert("registered_voters", doc! {"$lte": max_voters});
    }

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    match ballots
        .find_one_and_update(filter, doc! {"$set": set}, options)
        .await?
    {
        Some(updated) => Ok(updated),
        None => {
            // Work out which condition failed.
            let current = find_ballot(&ballots, ballot_id).await?;
            current.status.ensure_editable()?;
            Err(Error::InvalidState(format!(
                "ballot {ballot_id} already has {} voters registered",
                current.registered_voters
            )))
        }
    }
}

/// Delete a draft ballot together with its roster.
pub async fn delete_ballot(store: &Store, owner: Id, ballot_id: Id) -> Result<()> {
    let ballots = store.coll::<Ballot>();
    let roster = store.coll::<RosterEntry>();

    let removed_voters = store
        .transaction(|session| {
            let (ballots, roster) = (ballots.clone(), roster.clone());
            async move {
                let ballot = owned_ballot_in(&ballots, owner, ballot_id, session).await?;
                ballot.status.ensure_editable()?;
                ballots
                    .delete_one_with_session(ballot_id.as_doc(), None, session)
                    .await?;
                let removed = roster
                    .delete_many_with_session(doc! {"ballot_id": ballot_id}, None, session)
                    .await?;
                Ok(removed.deleted_count)
            }
            .boxed()
        })
        .await?;

    info!("Deleted ballot {ballot_id} and {removed_voters} roster entries");
    Ok(())
}

/// Open a draft ballot for voting.
pub async fn start_ballot(store: &Store, owner: Id, ballot_id: Id) -> Result<Ballot> {
    transition(store, owner, ballot_id, Transition::Start).await
}

/// Close a live ballot, then persist its results.
///
/// The snapshot is best effort: if writing it fails, the ballot still
/// closes and the snapshot is retried in the background.
pub async fn end_ballot(
    store: &Store,
    snapshots: &SnapshotScheduler,
    owner: Id,
    ballot_id: Id,
) -> Result<Ballot> {
    let ballot = transition(store, owner, ballot_id, Transition::End).await?;
    if let Err(e) = snapshots.persist_or_retry(store, ballot_id).await {
        warn!("Ballot {ballot_id} closed without a result snapshot: {e}");
    }
    Ok(ballot)
}

async fn transition(
    store: &Store,
    owner: Id,
    ballot_id: Id,
    transition: Transition,
) -> Result<Ballot> {
    let ballots = store.coll::<Ballot>();
    let ballot = owned_ballot(&ballots, owner, ballot_id).await?;
    let target = ballot.status.apply(transition)?;
    if transition == Transition::Start {
        ballot.ensure_votable()?;
    }

    let now = bson::DateTime::now();
    let mut set = doc! {
        "status": target,
        "updated_at": now,
    };
    match transition {
        Transition::Start => set.insert("started_at", now),
        Transition::End => set.insert("ended_at", now),
    };
    let filter = doc! {
        "_id": ballot_id,
        "status": BallotStatus::source_of(transition),
    };
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();

    match ballots
        .find_one_and_update(filter, doc! {"$set": set}, options)
        .await?
    {
        Some(updated) => {
            info!("Ballot {ballot_id} is now {target}");
            Ok(updated)
        }
        None => {
            // Someone else moved it first; report against the state they left.
            let current = find_ballot(&ballots, ballot_id).await?;
            current.status.apply(transition)?;
            Err(Error::Conflict(format!(
                "ballot {ballot_id} changed while it was being updated"
            )))
        }
    }
}

