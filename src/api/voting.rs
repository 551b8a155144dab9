use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::{
            ballot::BallotDescription,
            vote::{CastVoteRequest, VoteReceipt, VoterStatus},
        },
        auth::{AuthToken, Voter},
        db::vote,
        mongodb::{Id, Store},
    },
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, voter_status, voter_ballot]
}

#[post("/ballots/<ballot_id>/votes", data = "<request>", format = "json")]
async fn cast_vote(
    token: AuthToken<Voter>,
    ballot_id: Id,
    request: Json<CastVoteRequest>,
    store: &State<Store>,
) -> Result<Json<VoteReceipt>> {
    let receipt = vote::cast_vote(store, token.caller(), ballot_id, request.into_inner()).await?;
    Ok(Json(receipt))
}

#[get("/ballots/<ballot_id>/votes/status")]
async fn voter_status(
    token: AuthToken<Voter>,
    ballot_id: Id,
    store: &State<Store>,
) -> Result<Json<VoterStatus>> {
    Ok(Json(
        vote::voter_status(store, token.caller(), ballot_id).await?,
    ))
}

#[get("/voter/ballots/<ballot_id>")]
async fn voter_ballot(
    token: AuthToken<Voter>,
    ballot_id: Id,
    store: &State<Store>,
) -> Result<Json<BallotDescription>> {
    let ballot = vote::voter_ballot(store, token.caller(), ballot_id).await?;
    Ok(Json(ballot.into()))
}
