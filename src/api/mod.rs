use rocket::{http::Status, response::status::Custom, serde::json::Json, Catcher, Request, Route};

use crate::error::ErrorBody;

mod ballot;
mod results;
mod roster;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(ballot::routes());
    routes.extend(roster::routes());
    routes.extend(voting::routes());
    routes.extend(results::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![json_error]
}

/// Answer every failure that never reached a handler in the same JSON shape
/// as handler errors.
#[catch(default)]
fn json_error(status: Status, _req: &Request<'_>) -> Custom<Json<ErrorBody>> {
    Custom(status, Json(ErrorBody::for_status(status)))
}
