use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, trace, warn};
use mongodb::bson::{doc, Bson};
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::{
        future::{BoxFuture, FutureExt},
        TryStreamExt,
    },
    tokio::sync::Mutex,
    Build, Rocket,
};

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        common::status::BallotStatus,
        db::ballot::Ballot,
        mongodb::{Id, Store},
    },
    scheduled_task::ScheduledTask,
};

use super::persist_snapshot;

/// Map from ballot IDs to pending snapshot retries.
type TaskMap = HashMap<Id, ScheduledTask<Result<()>>>;

/// Pending result snapshots: completed ballots whose automatic snapshot
/// failed, each retried on a timer until it succeeds.
pub struct SnapshotScheduler {
    tasks: Arc<Mutex<TaskMap>>,
    retry_interval: Duration,
}

impl SnapshotScheduler {
    /// Create an empty scheduler that retries failed snapshots after `retry_interval`.
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            tasks: Default::default(),
            retry_interval,
        }
    }

    /// Persist a snapshot now. If the store fails, schedule a retry and
    /// return the error.
    pub async fn persist_or_retry(&self, store: &Store, ballot_id: Id) -> Result<()> {
        let result = persist_snapshot(store, ballot_id).await;
        match result {
            Ok(()) => self.cancel(ballot_id).await,
            Err(ref e @ (Error::StoreUnavailable(_) | Error::TransactionExhausted(_))) => {
                error!("Result snapshot of ballot {ballot_id} failed: {e}");
                let retry_at = Utc::now() + self.retry_interval;
                self.schedule(store.clone(), ballot_id, retry_at).await;
            }
            Err(_) => {}
        }
        result
    }

    /// Schedule a snapshot for every completed ballot that lacks one.
    pub async fn schedule_pending(&self, store: &Store) -> Result<usize> {
        let filter = doc! {
            "status": BallotStatus::Completed,
            "snapshot_at": Bson::Null,
        };
        let pending: Vec<Ballot> = store
            .coll::<Ballot>()
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        let now = Utc::now();
        for ballot in &pending {
            self.schedule(store.clone(), ballot.id, now).await;
        }
        Ok(pending.len())
    }

    /// Drop any pending retry for the given ballot.
    async fn cancel(&self, ballot_id: Id) {
        if let Some(task) = self.tasks.lock().await.remove(&ballot_id) {
            task.cancel().await;
            trace!("Cancelled pending snapshot of ballot {ballot_id}");
        }
    }

    /// Schedule a snapshot attempt, replacing any already pending.
    async fn schedule(&self, store: Store, ballot_id: Id, run_at: DateTime<Utc>) {
        let attempt = Self::attempt(store, ballot_id, self.tasks.clone(), self.retry_interval);
        let mut tasks_locked = self.tasks.lock().await;
        if let Some(task) = tasks_locked.remove(&ballot_id) {
            task.cancel().await;
        }
        tasks_locked.insert(ballot_id, ScheduledTask::new(attempt, run_at));
    }

    /// One snapshot attempt, which reschedules itself on failure.
    /// Since this is a recursive async function, we must use `BoxFuture` to
    /// avoid an infinitely-recursive state machine.
    fn attempt(
        store: Store,
        ballot_id: Id,
        tasks: Arc<Mutex<TaskMap>>,
        retry_interval: Duration,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            debug!("Retrying result snapshot of ballot {ballot_id}");
            let result = persist_snapshot(&store, ballot_id).await;
            match result {
                Ok(()) => {
                    tasks.lock().await.remove(&ballot_id);
                    info!("Result snapshot of ballot {ballot_id} persisted on retry");
                }
                Err(ref e @ (Error::StoreUnavailable(_) | Error::TransactionExhausted(_))) => {
                    error!("Result snapshot of ballot {ballot_id} failed again: {e}");
                    let retry = Self::attempt(store, ballot_id, tasks.clone(), retry_interval);
                    let retry_at = Utc::now() + retry_interval;
                    tasks
                        .lock()
                        .await
                        .insert(ballot_id, ScheduledTask::new(retry, retry_at));
                    warn!(
                        "Snapshot of ballot {ballot_id} will be retried in {} seconds",
                        retry_interval.num_seconds()
                    );
                }
                Err(ref e) => {
                    tasks.lock().await.remove(&ballot_id);
                    error!("Giving up on result snapshot of ballot {ballot_id}: {e}");
                }
            }
            result
        }
        .boxed()
    }
}

/// A fairing that schedules snapshots for completed ballots that lack one
/// during Rocket ignition, and places a [`SnapshotScheduler`] into managed
/// state. This fairing depends on the [`Store`] and [`Config`] being in
/// managed state, and so must be attached after the fairings responsible.
pub struct SnapshotFairing;

#[rocket::async_trait]
impl Fairing for SnapshotFairing {
    fn info(&self) -> Info {
        Info {
            name: "Result Snapshots",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        info!("Scheduling pending result snapshots...");
        let retry_interval = match rocket.state::<Config>() {
            Some(config) => config.snapshot_retry_interval(),
            None => {
                error!("Config was not available when scheduling snapshots");
                return Err(rocket);
            }
        };
        let scheduler = SnapshotScheduler::new(retry_interval);
        let store = match rocket.state::<Store>() {
            Some(store) => store,
            None => {
                error!("Store was not available when scheduling snapshots");
                return Err(rocket);
            }
        };
        match scheduler.schedule_pending(store).await {
            Ok(count) => info!("...{count} result snapshots scheduled!"),
            Err(e) => {
                error!("Failed to schedule result snapshots: {e}");
                return Err(rocket);
            }
        }

        Ok(rocket.manage(scheduler))
    }
}
