use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::ballot::{
            BallotDescription, BallotSpec, BallotUpdate, BallotsOverview, OptionSpec,
            QuestionOrder, QuestionSpec,
        },
        auth::{AuthToken, Organizer},
        db::{
            ballot::{lifecycle, queries, structure, Ballot},
            snapshot::SnapshotScheduler,
        },
        mongodb::{Coll, Id, Store},
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        create_ballot,
        list_ballots,
        summarize_ballots,
        get_ballot,
        update_ballot,
        delete_ballot,
        add_question,
        add_option,
        reorder_questions,
        start_ballot,
        end_ballot,
    ]
}

#[post("/ballots", data = "<spec>", format = "json")]
async fn create_ballot(
    token: AuthToken<Organizer>,
    spec: Json<BallotSpec>,
    store: &State<Store>,
) -> Result<Json<BallotDescription>> {
    let ballot = lifecycle::create_ballot(store, token.id(), spec.into_inner()).await?;
    Ok(Json(ballot.into()))
}

#[get("/ballots")]
async fn list_ballots(
    token: AuthToken<Organizer>,
    ballots: Coll<Ballot>,
) -> Result<Json<Vec<BallotDescription>>> {
    let ballots = queries::list_ballots(&ballots, token.id()).await?;
    Ok(Json(ballots.into_iter().map(Into::into).collect()))
}

#[get("/ballots/summary")]
async fn summarize_ballots(
    token: AuthToken<Organizer>,
    ballots: Coll<Ballot>,
) -> Result<Json<BallotsOverview>> {
    Ok(Json(queries::overview(&ballots, token.id()).await?))
}

#[get("/ballots/<ballot_id>")]
async fn get_ballot(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    ballots: Coll<Ballot>,
) -> Result<Json<BallotDescription>> {
    let ballot = queries::owned_ballot(&ballots, token.id(), ballot_id).await?;
    Ok(Json(ballot.into()))
}

#[put("/ballots/<ballot_id>", data = "<update>", format = "json")]
async fn update_ballot(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    update: Json<BallotUpdate>,
    store: &State<Store>,
) -> Result<Json<BallotDescription>> {
    let ballot = lifecycle::update_ballot(store, token.id(), ballot_id, update.into_inner()).await?;
    Ok(Json(ballot.into()))
}

#[delete("/ballots/<ballot_id>")]
async fn delete_ballot(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    store: &State<Store>,
) -> Result<()> {
    lifecycle::delete_ballot(store, token.id(), ballot_id).await
}

#[post("/ballots/<ballot_id>/questions", data = "<question>", format = "json")]
async fn add_question(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    question: Json<QuestionSpec>,
    store: &State<Store>,
) -> Result<Json<BallotDescription>> {
    let ballot =
        structure::add_question(store, token.id(), ballot_id, question.into_inner()).await?;
    Ok(Json(ballot.into()))
}

#[post(
    "/ballots/<ballot_id>/questions/<question_id>/options",
    data = "<option>",
    format = "json"
)]
async fn add_option(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    question_id: Id,
    option: Json<OptionSpec>,
    store: &State<Store>,
) -> Result<Json<BallotDescription>> {
    let ballot = structure::add_option(
        store,
        token.id(),
        ballot_id,
        question_id,
        option.into_inner(),
    )
    .await?;
    Ok(Json(ballot.into()))
}

#[put("/ballots/<ballot_id>/questions/order", data = "<order>", format = "json")]
async fn reorder_questions(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    order: Json<QuestionOrder>,
    store: &State<Store>,
) -> Result<Json<BallotDescription>> {
    let ballot =
        structure::reorder_questions(store, token.id(), ballot_id, order.into_inner()).await?;
    Ok(Json(ballot.into()))
}

#[post("/ballots/<ballot_id>/start")]
async fn start_ballot(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    store: &State<Store>,
) -> Result<Json<BallotDescription>> {
    let ballot = lifecycle::start_ballot(store, token.id(), ballot_id).await?;
    Ok(Json(ballot.into()))
}

#[post("/ballots/<ballot_id>/end")]
async fn end_ballot(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    store: &State<Store>,
    snapshots: &State<SnapshotScheduler>,
) -> Result<Json<BallotDescription>> {
    let ballot = lifecycle::end_ballot(store, snapshots, token.id(), ballot_id).await?;
    Ok(Json(ballot.into()))
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
    };

    use crate::{
        api::testing::{body, json, organizer, voter},
        model::{
            api::roster::AddVotersRequest,
            common::status::BallotStatus,
            db::roster::RosterEntry,
        },
    };

    use super::*;

    async fn create(client: &Client, owner: Id) -> BallotDescription {
        let response = client
            .post(uri!(create_ballot))
            .header(ContentType::JSON)
            .header(organizer(client, owner))
            .body(json(&BallotSpec::example()))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        body(response).await
    }

    #[backend_test]
    async fn create_and_get(client: Client, ballots: Coll<Ballot>) {
        let owner = Id::new();
        let created = create(&client, owner).await;
        assert_eq!(created.status, BallotStatus::Draft);
        assert_eq!(created.registered_voters, 0);
        assert_eq!(created.questions.len(), 2);
        assert_eq!(*created.creator, owner);

        // Stored as described.
        let stored = ballots
            .find_one(created.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, created.title);
        assert_eq!(stored.questions.len(), 2);

        // Readable by its owner.
        let response = client
            .get(uri!(get_ballot(*created.id)))
            .header(organizer(&client, owner))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let fetched: BallotDescription = body(response).await;
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.questions, created.questions);
    }

    #[backend_test]
    async fn identity_is_required(client: Client) {
        let owner = Id::new();
        let created = create(&client, owner).await;

        // No token at all.
        let response = client.get(uri!(get_ballot(*created.id))).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());

        // A token that is not signed with our secret.
        let response = client
            .get(uri!(get_ballot(*created.id)))
            .header(rocket::http::Header::new("Authorization", "Bearer not.a.jwt"))
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());

        // Voters cannot manage ballots.
        let response = client
            .get(uri!(get_ballot(*created.id)))
            .header(voter(&client, owner, "owner@example.org"))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        // Other organizers cannot see it.
        let response = client
            .get(uri!(get_ballot(*created.id)))
            .header(organizer(&client, Id::new()))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test]
    async fn list_and_summarize(client: Client) {
        let owner = Id::new();
        let first = create(&client, owner).await;
        let second = create(&client, owner).await;
        create(&client, Id::new()).await;

        let response = client
            .post(uri!(start_ballot(*first.id)))
            .header(organizer(&client, owner))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        // Newest first, and only the caller's.
        let response = client
            .get(uri!(list_ballots))
            .header(organizer(&client, owner))
            .dispatch()
            .await;
        let listed: Vec<BallotDescription> = body(response).await;
        let ids: Vec<_> = listed.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let response = client
            .get(uri!(summarize_ballots))
            .header(organizer(&client, owner))
            .dispatch()
            .await;
        let overview: BallotsOverview = body(response).await;
        assert_eq!(
            overview,
            BallotsOverview {
                total: 2,
                draft: 1,
                live: 1,
                completed: 0,
                total_voters: 0,
                total_votes: 0,
            }
        );
    }

    #[backend_test]
    async fn lifecycle_is_forward_only(client: Client) {
        let owner = Id::new();
        let created = create(&client, owner).await;
        let auth = organizer(&client, owner);

        // Cannot end a draft.
        let response = client
            .post(uri!(end_ballot(*created.id)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let response = client
            .post(uri!(start_ballot(*created.id)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let live: BallotDescription = body(response).await;
        assert_eq!(live.status, BallotStatus::Live);
        assert!(live.started_at.is_some());

        // Cannot start twice, and cannot edit once live.
        let response = client
            .post(uri!(start_ballot(*created.id)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
        let response = client
            .post(uri!(add_question(*created.id)))
            .header(ContentType::JSON)
            .header(auth.clone())
            .body(json(&QuestionSpec::example1()))
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let response = client
            .post(uri!(end_ballot(*created.id)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let ended: BallotDescription = body(response).await;
        assert_eq!(ended.status, BallotStatus::Completed);
        assert!(ended.ended_at.is_some());

        // Completed ballots cannot be deleted.
        let response = client
            .delete(uri!(delete_ballot(*created.id)))
            .header(auth)
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
    }

    #[backend_test]
    async fn only_answerable_ballots_start(client: Client) {
        let owner = Id::new();
        let auth = organizer(&client, owner);

        // No questions at all.
        let mut spec = BallotSpec::example();
        spec.questions.clear();
        let response = client
            .post(uri!(create_ballot))
            .header(ContentType::JSON)
            .header(auth.clone())
            .body(json(&spec))
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        // A question nobody could answer.
        spec.questions = vec![QuestionSpec {
            options: vec![],
            allow_write_in: false,
            ..QuestionSpec::example1()
        }];
        let response = client
            .post(uri!(create_ballot))
            .header(ContentType::JSON)
            .header(auth.clone())
            .body(json(&spec))
            .dispatch()
            .await;
        let created: BallotDescription = body(response).await;
        let response = client
            .post(uri!(start_ballot(*created.id)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        // Giving it an option makes it startable.
        let question_id = *created.questions[0].id;
        let response = client
            .post(uri!(add_option(*created.id, question_id)))
            .header(ContentType::JSON)
            .header(auth.clone())
            .body(json(&OptionSpec::example("Yes")))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let response = client
            .post(uri!(start_ballot(*created.id)))
            .header(auth)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn edit_draft_structure(client: Client) {
        let owner = Id::new();
        let created = create(&client, owner).await;
        let auth = organizer(&client, owner);

        // Append a question.
        let response = client
            .post(uri!(add_question(*created.id)))
            .header(ContentType::JSON)
            .header(auth.clone())
            .body(json(&QuestionSpec::example1()))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let edited: BallotDescription = body(response).await;
        assert_eq!(edited.questions.len(), 3);
        let added = edited.questions[2].clone();

        // Give it another option.
        let response = client
            .post(uri!(add_option(*created.id, *added.id)))
            .header(ContentType::JSON)
            .header(auth.clone())
            .body(json(&OptionSpec::example("C")))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let edited: BallotDescription = body(response).await;
        assert_eq!(edited.questions[2].options.len(), 3);
        assert_eq!(edited.questions[2].options[2].text, "C");

        // Move it to the front.
        let mut question_ids: Vec<Id> = edited.questions.iter().map(|q| *q.id).collect();
        question_ids.rotate_right(1);
        let response = client
            .put(uri!(reorder_questions(*created.id)))
            .header(ContentType::JSON)
            .header(auth.clone())
            .body(json(&QuestionOrder {
                question_ids: question_ids.clone(),
            }))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let reordered: BallotDescription = body(response).await;
        let order: Vec<Id> = reordered.questions.iter().map(|q| *q.id).collect();
        assert_eq!(order, question_ids);

        // An order that is not a permutation is rejected.
        let response = client
            .put(uri!(reorder_questions(*created.id)))
            .header(ContentType::JSON)
            .header(auth)
            .body(json(&QuestionOrder {
                question_ids: question_ids[1..].to_vec(),
            }))
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test]
    async fn update_respects_roster(client: Client, store: Store) {
        let owner = Id::new();
        let created = create(&client, owner).await;

        crate::model::db::roster::add_voters(
            &store,
            &crate::notifier::Notifier::disabled(),
            Default::default(),
            owner,
            *created.id,
            AddVotersRequest::example(&["a@x.org", "b@x.org"]),
        )
        .await
        .unwrap();

        // Cannot shrink below the roster.
        let response = client
            .put(uri!(update_ballot(*created.id)))
            .header(ContentType::JSON)
            .header(organizer(&client, owner))
            .body(json(&BallotUpdate {
                max_voters: Some(1),
                ..Default::default()
            }))
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let response = client
            .put(uri!(update_ballot(*created.id)))
            .header(ContentType::JSON)
            .header(organizer(&client, owner))
            .body(json(&BallotUpdate {
                title: Some("Renamed".to_string()),
                max_voters: Some(5),
                ..Default::default()
            }))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let updated: BallotDescription = body(response).await;
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.max_voters, 5);
        assert_eq!(updated.registered_voters, 2);
    }

    #[backend_test]
    async fn delete_removes_roster(client: Client, store: Store, roster: Coll<RosterEntry>) {
        let owner = Id::new();
        let created = create(&client, owner).await;
        crate::model::db::roster::add_voters(
            &store,
            &crate::notifier::Notifier::disabled(),
            Default::default(),
            owner,
            *created.id,
            AddVotersRequest::example(&["a@x.org"]),
        )
        .await
        .unwrap();

        let response = client
            .delete(uri!(delete_ballot(*created.id)))
            .header(organizer(&client, owner))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let remaining = roster
            .count_documents(doc! {"ballot_id": *created.id}, None)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        let response = client
            .get(uri!(get_ballot(*created.id)))
            .header(organizer(&client, owner))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }
}
