mod scheduler;

pub use scheduler::{SnapshotFairing, SnapshotScheduler};

use chrono::{DateTime, Utc};
use log::debug;
use mongodb::{
    bson::{self, doc, serde_helpers::chrono_datetime_as_bson_datetime},
    options::FindOptions,
};
use rocket::futures::{FutureExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{
        api::results::{BallotResults, SnapshotDescription, SnapshotEntry},
        common::status::BallotStatus,
        db::{ballot::{queries::find_ballot, Ballot}, tabulation::compute_results},
        mongodb::{Id, Store},
    },
};

/// One persisted count: an option of a question, or the question's
/// write-in aggregate. Always reproducible from the vote rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub ballot_id: Id,
    pub question_id: Id,
    /// Absent for the write-in row.
    pub option_id: Option<Id>,
    pub write_in: bool,
    pub count: u64,
    pub percentage: f64,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub computed_at: DateTime<Utc>,
}

impl SnapshotRow {
    /// Flatten tabulated results into rows, in ballot order.
    pub fn from_results(results: &BallotResults, computed_at: DateTime<Utc>) -> Vec<Self> {
        let ballot_id = *results.ballot_id;
        results
            .questions
            .iter()
            .flat_map(|question| {
                let question_id = *question.question_id;
                let options = question.options.iter().map(move |option| Self {
                    ballot_id,
                    question_id,
                    option_id: Some(*option.option_id),
                    write_in: false,
                    count: option.count,
                    percentage: option.percentage,
                    computed_at,
                });
                let write_ins = Self {
                    ballot_id,
                    question_id,
                    option_id: None,
                    write_in: true,
                    count: question.write_ins.count,
                    percentage: question.write_ins.percentage,
                    computed_at,
                };
                options.chain(std::iter::once(write_ins))
            })
            .collect()
    }
}

impl From<SnapshotRow> for SnapshotEntry {
    fn from(row: SnapshotRow) -> Self {
        Self {
            question_id: row.question_id.into(),
            option_id: row.option_id.map(Into::into),
            write_in: row.write_in,
            count: row.count,
            percentage: row.percentage,
        }
    }
}

/// Recompute a completed ballot's results and replace its stored snapshot.
///
/// Idempotent: the old rows are deleted and the new ones inserted in one
/// transaction, so readers see either the old snapshot or the new one.
pub async fn persist_snapshot(store: &Store, ballot_id: Id) -> Result<()> {
    let ballot = find_ballot(&store.coll(), ballot_id).await?;
    if ballot.status != BallotStatus::Completed {
        return Err(Error::InvalidState(format!(
            "ballot {ballot_id} is {}; only completed ballots have snapshots",
            ballot.status
        )));
    }

    // Voting is closed, so nothing can change the counts from here on.
    let results = compute_results(store, ballot_id).await?;
    let computed_at = Utc::now();
    let rows = SnapshotRow::from_results(&results, computed_at);

    let ballots = store.coll::<Ballot>();
    let snapshots = store.coll::<SnapshotRow>();
    store
        .transaction(|session| {
            let (ballots, snapshots, rows) = (ballots.clone(), snapshots.clone(), rows.clone());
            async move {
                snapshots
                    .delete_many_with_session(doc! {"ballot_id": ballot_id}, None, session)
                    .await?;
                if !rows.is_empty() {
                    snapshots
                        .insert_many_with_session(rows, None, session)
                        .await?;
                }
                let update = doc! {
                    "$set": {"snapshot_at": bson::DateTime::from_chrono(computed_at)}
                };
                ballots
                    .update_one_with_session(ballot_id.as_doc(), update, None, session)
                    .await?;
                Ok(())
            }
            .boxed()
        })
        .await?;

    debug!(
        "Persisted result snapshot of ballot {ballot_id}: {} rows",
        rows.len()
    );
    Ok(())
}

/// The stored snapshot of a ballot's results.
pub async fn get_snapshot(store: &Store, ballot_id: Id) -> Result<SnapshotDescription> {
    let ballot = find_ballot(&store.coll(), ballot_id).await?;
    let computed_at = ballot
        .snapshot_at
        .ok_or_else(|| Error::not_found(format!("Result snapshot of ballot {ballot_id}")))?;

    let options = FindOptions::builder().sort(doc! {"_id": 1}).build();
    let rows: Vec<SnapshotRow> = store
        .coll::<SnapshotRow>()
        .find(doc! {"ballot_id": ballot_id}, options)
        .await?
        .try_collect()
        .await?;

    Ok(SnapshotDescription {
        ballot_id: ballot_id.into(),
        computed_at: computed_at.to_chrono(),
        rows: rows.into_iter().map(Into::into).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::common::tally::{tabulate, RosterCounts, VoteCount};

    #[test]
    fn one_row_per_option_plus_write_ins() {
        let ballot = Ballot::live_example();
        let question = &ballot.questions[1];
        let counts = [
            VoteCount {
                question_id: question.id,
                option_id: Some(question.options[0].id),
                write_in: false,
                count: 3,
            },
            VoteCount {
                question_id: question.id,
                option_id: None,
                write_in: true,
                count: 1,
            },
        ];
        let results = tabulate(&ballot, &counts, RosterCounts::default());
        let rows = SnapshotRow::from_results(&results, Utc::now());

        // Two options + write-ins, then three options + write-ins.
        assert_eq!(rows.len(), 3 + 4);
        let write_in = rows
            .iter()
            .find(|r| r.question_id == question.id && r.write_in)
            .unwrap();
        assert_eq!((write_in.count, write_in.percentage), (1, 25.0));
        assert_eq!(write_in.option_id, None);
        let first = rows
            .iter()
            .find(|r| r.option_id == Some(question.options[0].id))
            .unwrap();
        assert_eq!((first.count, first.percentage), (3, 75.0));
    }
}
