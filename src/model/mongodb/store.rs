use std::time::Duration;

use log::{debug, trace, warn};
use mongodb::{
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{Acknowledgment, ReadConcern, SessionOptions, TransactionOptions, WriteConcern},
    Client, ClientSession, Database,
};
use rand::Rng;
use rocket::futures::future::BoxFuture;

use crate::error::{Error, Result};

use super::collection::{Coll, MongoCollection};

/// Default number of times a transaction is attempted before giving up.
pub const DEFAULT_TRANSACTION_ATTEMPTS: u32 = 8;

/// The persistent store: a MongoDB client plus the database we work in.
///
/// This is the only shared mutable resource in the server. Nothing about
/// ballots, rosters or votes is cached between requests.
#[derive(Clone)]
pub struct Store {
    client: Client,
    db: Database,
    transaction_attempts: u32,
}

impl Store {
    pub fn new(client: Client, db_name: &str) -> Self {
        let db = client.database(db_name);
        Self {
            client,
            db,
            transaction_attempts: DEFAULT_TRANSACTION_ATTEMPTS,
        }
    }

    /// Set how many times a conflicting transaction is retried.
    pub fn with_transaction_attempts(mut self, attempts: u32) -> Self {
        self.transaction_attempts = attempts.max(1);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get a handle on a typed collection.
    pub fn coll<T: MongoCollection>(&self) -> Coll<T> {
        Coll::from_db(&self.db)
    }

    /// Start a session whose reads all observe a single point in time.
    pub async fn snapshot_session(&self) -> Result<ClientSession> {
        let options = SessionOptions::builder().snapshot(true).build();
        Ok(self.client.start_session(Some(options)).await?)
    }

    /// Run `body` inside a multi-document transaction.
    ///
    /// `body` may be invoked several times: whenever the server aborts the
    /// transaction with a transient error (typically a write conflict with a
    /// concurrent transaction touching the same document) the whole unit is
    /// re-run from scratch against the newly committed state. Any error
    /// returned by `body` aborts the transaction, so no partial writes survive.
    ///
    /// Dropping the returned future drops the session, which aborts any
    /// transaction still in progress.
    pub async fn transaction<T, F>(&self, mut body: F) -> Result<T>
    where
        F: for<'s> FnMut(&'s mut ClientSession) -> BoxFuture<'s, Result<T>>,
    {
        let mut session = self.client.start_session(None).await?;

        for attempt in 1..=self.transaction_attempts {
            let options = TransactionOptions::builder()
                .read_concern(ReadConcern::snapshot())
                .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
                .build();
            session.start_transaction(options).await?;

            let error = match body(&mut session).await {
                Ok(value) => match commit(&mut session, self.transaction_attempts).await {
                    Ok(()) => return Ok(value),
                    Err(e) => Error::from(e),
                },
                Err(e) => {
                    // The server may already have aborted it for us.
                    if let Err(abort_err) = session.abort_transaction().await {
                        trace!("Abort after failed transaction body: {abort_err}");
                    }
                    e
                }
            };

            match error {
                Error::StoreUnavailable(ref e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
                    debug!("Transaction attempt {attempt} hit a transient error, retrying: {e}");
                    rocket::tokio::time::sleep(backoff(attempt)).await;
                }
                other => return Err(other),
            }
        }

        warn!(
            "Transaction abandoned after {} attempts",
            self.transaction_attempts
        );
        Err(Error::TransactionExhausted(self.transaction_attempts))
    }
}

/// Commit, retrying while the outcome of the commit itself is unknown.
async fn commit(session: &mut ClientSession, attempts: u32) -> mongodb::error::Result<()> {
    let mut remaining = attempts;
    loop {
        match session.commit_transaction().await {
            Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) && remaining > 1 => {
                debug!("Commit result unknown, retrying commit: {e}");
                remaining -= 1;
            }
            result => return result,
        }
    }
}

/// Longest delay between two attempts.
const MAX_BACKOFF_MS: u64 = 200;

/// Delay before the given retry: a random share of a window that doubles
/// with each attempt, so colliding transactions drift apart.
fn backoff(attempt: u32) -> Duration {
    let window = (5_u64 << attempt.min(6)).min(MAX_BACKOFF_MS);
    Duration::from_millis(rand::thread_rng().gen_range(window / 2..=window))
}
