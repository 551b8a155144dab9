#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use config::{ConfigFairing, DatabaseFairing, NotifierFairing};
use logging::LoggerFairing;
use model::db::snapshot::SnapshotFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod notifier;
pub mod scheduled_task;

/// Assemble the server: configuration, store connection, invitation
/// dispatch and result snapshots, then the API itself.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(NotifierFairing)
        .attach(SnapshotFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// A server over an existing store, with invitations disabled.
#[cfg(test)]
pub(crate) fn rocket_for_store(store: model::mongodb::Store) -> Rocket<Build> {
    rocket::build()
        .attach(ConfigFairing)
        .manage(store)
        .manage(notifier::Notifier::disabled())
        .attach(SnapshotFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}
