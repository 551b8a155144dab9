use mongodb::bson::{self, doc, Document};
use rocket::futures::TryStreamExt;

use crate::{
    error::{Error, Result},
    model::{
        api::results::BallotResults,
        common::{
            status::BallotStatus,
            tally::{tabulate, RosterCounts, VoteCount},
        },
        db::{
            ballot::{queries::find_ballot, Ballot},
            roster::{find_caller_entry, RosterEntry},
            vote::{Caller, Vote},
        },
        mongodb::{Id, Store},
    },
};

/// Group a ballot's votes by question and choice.
fn count_pipeline(ballot_id: Id) -> Vec<Document> {
    vec![
        doc! {"$match": {"ballot_id": ballot_id}},
        doc! {
            "$group": {
                "_id": {
                    "question_id": "$question_id",
                    "option_id": "$option_id",
                    "write_in": {"$gt": ["$write_in", null]},
                },
                "count": {"$sum": 1},
            }
        },
        doc! {
            "$project": {
                "_id": 0,
                "question_id": "$_id.question_id",
                "option_id": "$_id.option_id",
                "write_in": "$_id.write_in",
                "count": 1,
            }
        },
    ]
}

/// Tabulate a ballot from its vote rows and roster.
///
/// Every read happens at one point in time, so counts, totals and
/// participation always agree with each other. Nothing is written.
pub async fn compute_results(store: &Store, ballot_id: Id) -> Result<BallotResults> {
    let mut session = store.snapshot_session().await?;

    let ballot = store
        .coll::<Ballot>()
        .find_one_with_session(ballot_id.as_doc(), None, &mut session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Ballot {ballot_id}")))?;

    let mut cursor = store
        .coll::<Vote>()
        .aggregate_with_session(count_pipeline(ballot_id), None, &mut session)
        .await?;
    let groups: Vec<Document> = cursor.stream(&mut session).try_collect().await?;
    let counts = groups
        .into_iter()
        .map(bson::from_document::<VoteCount>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::StoreUnavailable(e.into()))?;

    let roster = store.coll::<RosterEntry>();
    let registered = roster
        .count_documents_with_session(doc! {"ballot_id": ballot_id}, None, &mut session)
        .await?;
    let voted = roster
        .count_documents_with_session(
            doc! {"ballot_id": ballot_id, "voted": true},
            None,
            &mut session,
        )
        .await?;

    Ok(tabulate(&ballot, &counts, RosterCounts { registered, voted }))
}

/// Check that the caller may see a ballot's results: its owner and the
/// voters on its roster at any time, and anyone once it has completed.
pub async fn ensure_results_visible(store: &Store, caller: Caller<'_>, ballot_id: Id) -> Result<()> {
    let ballot = find_ballot(&store.coll(), ballot_id).await?;
    if ballot.creator == caller.user_id || ballot.status == BallotStatus::Completed {
        return Ok(());
    }
    match find_caller_entry(&store.coll(), ballot_id, caller.user_id, caller.email).await? {
        Some(_) => Ok(()),
        None => Err(Error::Forbidden(format!(
            "Results of ballot {ballot_id} are limited to its voters until it completes"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_groups_by_choice() {
        let ballot_id = Id::new();
        let pipeline = count_pipeline(ballot_id);
        assert_eq!(pipeline.len(), 3);
        let group = pipeline[1].get_document("$group").unwrap();
        let key = group.get_document("_id").unwrap();
        assert_eq!(key.get_str("question_id").unwrap(), "$question_id");
        assert_eq!(key.get_str("option_id").unwrap(), "$option_id");
    }
}
