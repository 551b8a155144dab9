use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::results::{BallotResults, SnapshotDescription},
        auth::{AuthToken, Organizer, Voter},
        db::{
            ballot::queries::owned_ballot,
            snapshot::{get_snapshot, SnapshotScheduler},
            tabulation::{compute_results, ensure_results_visible},
        },
        mongodb::{Id, Store},
    },
};

pub fn routes() -> Vec<Route> {
    routes![get_results, get_results_snapshot, persist_results_snapshot]
}

#[get("/ballots/<ballot_id>/results")]
async fn get_results(
    token: AuthToken<Voter>,
    ballot_id: Id,
    store: &State<Store>,
) -> Result<Json<BallotResults>> {
    ensure_results_visible(store, token.caller(), ballot_id).await?;
    Ok(Json(compute_results(store, ballot_id).await?))
}

#[get("/ballots/<ballot_id>/results/snapshot")]
async fn get_results_snapshot(
    token: AuthToken<Voter>,
    ballot_id: Id,
    store: &State<Store>,
) -> Result<Json<SnapshotDescription>> {
    ensure_results_visible(store, token.caller(), ballot_id).await?;
    Ok(Json(get_snapshot(store, ballot_id).await?))
}

#[post("/ballots/<ballot_id>/results/snapshot")]
async fn persist_results_snapshot(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    store: &State<Store>,
    snapshots: &State<SnapshotScheduler>,
) -> Result<Json<SnapshotDescription>> {
    owned_ballot(&store.coll(), token.id(), ballot_id).await?;
    snapshots.persist_or_retry(store, ballot_id).await?;
    Ok(Json(get_snapshot(store, ballot_id).await?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use mongodb::{bson::doc, Database};
    use rocket::{http::Status, local::asynchronous::Client, tokio::time::sleep};

    use crate::{
        api::testing::{body, organizer, voter},
        model::{
            api::{ballot::BallotSpec, roster::AddVotersRequest, vote::{Answer, CastVoteRequest}},
            common::{enrollment::CapacityPolicy, status::BallotStatus},
            db::{
                ballot::{
                    lifecycle::{create_ballot, end_ballot, start_ballot},
                    Ballot,
                },
                roster::add_voters,
                snapshot::SnapshotRow,
                vote::{cast_vote, Caller},
            },
            mongodb::Coll,
        },
        notifier::Notifier,
    };

    use super::*;

    /// A live ballot on which alice has voted and bob has not.
    async fn voted_ballot(store: &Store, owner: Id) -> Ballot {
        let ballot = create_ballot(store, owner, BallotSpec::example()).await.unwrap();
        add_voters(
            store,
            &Notifier::disabled(),
            CapacityPolicy::Reject,
            owner,
            ballot.id,
            AddVotersRequest::example(&["alice@x.org", "bob@x.org"]),
        )
        .await
        .unwrap();
        let ballot = start_ballot(store, owner, ballot.id).await.unwrap();
        let (fixed, open) = (&ballot.questions[0], &ballot.questions[1]);
        let request = CastVoteRequest {
            answers: vec![
                Answer::option(fixed.id, fixed.options[1].id),
                Answer::written(open.id, "Barbara"),
            ],
        };
        let alice = Caller {
            user_id: Id::new(),
            email: Some("alice@x.org"),
        };
        cast_vote(store, alice, ballot.id, request).await.unwrap();
        ballot
    }

    #[backend_test]
    async fn results_visibility(client: Client, store: Store) {
        let owner = Id::new();
        let ballot = voted_ballot(&store, owner).await;
        let bob = voter(&client, Id::new(), "bob@x.org");

        // The owner and the roster may look while voting is under way.
        let response = client
            .get(uri!(get_results(ballot.id)))
            .header(organizer(&client, owner))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let results: BallotResults = body(response).await;
        assert_eq!(results.voted_voters, 1);
        assert_eq!(results.registered_voters, 2);
        assert_eq!(results.questions[1].write_ins.count, 1);

        let response = client
            .get(uri!(get_results(ballot.id)))
            .header(bob)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        // Outsiders wait for the ballot to close.
        let mallory = voter(&client, Id::new(), "mallory@x.org");
        let response = client
            .get(uri!(get_results(ballot.id)))
            .header(mallory.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        end_ballot(
            &store,
            client.rocket().state::<SnapshotScheduler>().unwrap(),
            owner,
            ballot.id,
        )
        .await
        .unwrap();

        let response = client
            .get(uri!(get_results(ballot.id)))
            .header(mallory.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let response = client
            .get(uri!(get_results_snapshot(ballot.id)))
            .header(mallory)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn failed_snapshot_still_ends(
        store: Store,
        db: Database,
        ballots: Coll<Ballot>,
        rows: Coll<SnapshotRow>,
    ) {
        let owner = Id::new();
        let ballot = voted_ballot(&store, owner).await;

        // Refuse every snapshot row.
        db.run_command(
            doc! {"collMod": rows.name(), "validator": {"never": {"$exists": true}}},
            None,
        )
        .await
        .unwrap();

        let snapshots = SnapshotScheduler::new(ChronoDuration::seconds(1));
        let ended = end_ballot(&store, &snapshots, owner, ballot.id).await.unwrap();
        assert_eq!(ended.status, BallotStatus::Completed);
        let stored = ballots.find_one(ballot.id.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(stored.status, BallotStatus::Completed);
        assert_eq!(stored.snapshot_at, None);

        // The retry lands once rows are accepted again.
        db.run_command(doc! {"collMod": rows.name(), "validator": {}}, None)
            .await
            .unwrap();
        let mut snapshot_at = None;
        for _ in 0..50 {
            sleep(Duration::from_millis(200)).await;
            snapshot_at = ballots
                .find_one(ballot.id.as_doc(), None)
                .await
                .unwrap()
                .unwrap()
                .snapshot_at;
            if snapshot_at.is_some() {
                break;
            }
        }
        assert!(snapshot_at.is_some());
        let count = rows
            .count_documents(doc! {"ballot_id": ballot.id}, None)
            .await
            .unwrap();
        assert_eq!(count, 7);
    }

    #[backend_test]
    async fn results_are_idempotent(store: Store) {
        let ballot = voted_ballot(&store, Id::new()).await;
        let first = compute_results(&store, ballot.id).await.unwrap();
        let second = compute_results(&store, ballot.id).await.unwrap();
        assert_eq!(first, second);

        let fixed = &first.questions[0];
        let total: f64 = fixed.options.iter().map(|o| o.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[backend_test]
    async fn snapshot_written_on_end(client: Client, store: Store, rows: Coll<SnapshotRow>) {
        let owner = Id::new();
        let ballot = voted_ballot(&store, owner).await;
        let auth = organizer(&client, owner);

        // Nothing stored before the ballot ends, and it cannot be forced.
        let response = client
            .get(uri!(get_results_snapshot(ballot.id)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
        let response = client
            .post(uri!(persist_results_snapshot(ballot.id)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let response = client
            .post(format!("/ballots/{}/end", ballot.id))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .get(uri!(get_results_snapshot(ballot.id)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let stored: SnapshotDescription = body(response).await;
        // Two options plus write-ins, then three options plus write-ins.
        assert_eq!(stored.rows.len(), 7);
        let count_before = rows
            .count_documents(doc! {"ballot_id": ballot.id}, None)
            .await
            .unwrap();

        // Rewriting gives the same values.
        let response = client
            .post(uri!(persist_results_snapshot(ballot.id)))
            .header(auth)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let rewritten: SnapshotDescription = body(response).await;
        assert_eq!(rewritten.rows, stored.rows);
        let count_after = rows
            .count_documents(doc! {"ballot_id": ballot.id}, None)
            .await
            .unwrap();
        assert_eq!(count_before, count_after);
    }
}
