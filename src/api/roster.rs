use rocket::{serde::json::Json, Route, State};

use crate::{
    config::Config,
    error::Result,
    model::{
        api::roster::{AddVotersOutcome, AddVotersRequest, RosterCounters, VoterListing},
        auth::{AuthToken, Organizer},
        db::roster,
        mongodb::{Id, Store},
    },
    notifier::Notifier,
};

pub fn routes() -> Vec<Route> {
    routes![add_voters, list_voters, remove_voter, reconcile_roster]
}

#[post("/ballots/<ballot_id>/voters", data = "<request>", format = "json")]
async fn add_voters(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    request: Json<AddVotersRequest>,
    store: &State<Store>,
    notifier: &State<Notifier>,
    config: &State<Config>,
) -> Result<Json<AddVotersOutcome>> {
    let outcome = roster::add_voters(
        store,
        notifier,
        config.capacity_policy(),
        token.id(),
        ballot_id,
        request.into_inner(),
    )
    .await?;
    Ok(Json(outcome))
}

#[get("/ballots/<ballot_id>/voters")]
async fn list_voters(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    store: &State<Store>,
) -> Result<Json<Vec<VoterListing>>> {
    Ok(Json(roster::list_voters(store, token.id(), ballot_id).await?))
}

#[delete("/ballots/<ballot_id>/voters/<entry_id>")]
async fn remove_voter(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    entry_id: Id,
    store: &State<Store>,
) -> Result<()> {
    roster::remove_voter(store, token.id(), ballot_id, entry_id).await
}

#[post("/ballots/<ballot_id>/voters/reconcile")]
async fn reconcile_roster(
    token: AuthToken<Organizer>,
    ballot_id: Id,
    store: &State<Store>,
) -> Result<Json<RosterCounters>> {
    Ok(Json(
        roster::reconcile_roster(store, token.id(), ballot_id).await?,
    ))
}
