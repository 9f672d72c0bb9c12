//! This library contains definitions for the API layer.

use app::{database::Database, orchestrator::Orchestrator};
use rocket::{Build, Rocket};
use state::RocketState;
use std::sync::Arc;

mod access;
mod error;
mod rate_limit;
mod routes;
mod state;

pub use rate_limit::RateLimit;

pub fn register(
    rocket: Rocket<Build>,
    db: Database,
    orchestrator: Arc<Orchestrator>,
    rate_limit: RateLimit,
) -> Rocket<Build> {
    routes::register(
        rocket,
        RocketState {
            db,
            orchestrator,
            rate_limit,
        },
    )
}
