use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    ballot::{Ballot, NewBallot},
    roster::{NewRosterEntry, RosterEntry},
    snapshot::SnapshotRow,
    user::UserAccount,
    vote::{NewVote, Vote},
};

use super::store::Store;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database from the managed [`Store`] and wrap it in a collection.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        req.guard::<&State<Store>>().await.map(|store| store.coll())
    }
}

// Ballot collections
const BALLOTS: &str = "ballots";
impl MongoCollection for Ballot {
    const NAME: &'static str = BALLOTS;
}
impl MongoCollection for NewBallot {
    const NAME: &'static str = BALLOTS;
}

// Roster collections
const ROSTER: &str = "ballot_voters";
impl MongoCollection for RosterEntry {
    const NAME: &'static str = ROSTER;
}
impl MongoCollection for NewRosterEntry {
    const NAME: &'static str = ROSTER;
}

// Vote collections
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}
impl MongoCollection for NewVote {
    const NAME: &'static str = VOTES;
}

// Result snapshot collection
const SNAPSHOTS: &str = "result_snapshots";
impl MongoCollection for SnapshotRow {
    const NAME: &'static str = SNAPSHOTS;
}

// User accounts are owned by the identity provider; we only read them.
const USERS: &str = "users";
impl MongoCollection for UserAccount {
    const NAME: &'static str = USERS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Ballot collection.
    let ballot_index = IndexModel::builder()
        .keys(doc! {"creator": 1, "status": 1})
        .build();
    Coll::<Ballot>::from_db(db)
        .create_index(ballot_index, None)
        .await?;

    // Roster collection: one entry per email per ballot.
    let roster_email_index = IndexModel::builder()
        .keys(doc! {"ballot_id": 1, "email": 1})
        .options(unique.clone())
        .build();
    let roster_user_index = IndexModel::builder()
        .keys(doc! {"ballot_id": 1, "user_id": 1})
        .build();
    Coll::<RosterEntry>::from_db(db)
        .create_indexes([roster_email_index, roster_user_index], None)
        .await?;

    // Vote collection: one vote per question per voter.
    let vote_index = IndexModel::builder()
        .keys(doc! {"ballot_id": 1, "question_id": 1, "voter_entry_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Snapshot collection.
    let snapshot_index = IndexModel::builder()
        .keys(doc! {"ballot_id": 1, "question_id": 1, "option_id": 1, "write_in": 1})
        .options(unique)
        .build();
    Coll::<SnapshotRow>::from_db(db)
        .create_index(snapshot_index, None)
        .await?;

    Ok(())
}
