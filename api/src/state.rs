use app::{database::Database, orchestrator::Orchestrator};
use std::sync::Arc;

use crate::rate_limit::RateLimit;

pub struct RocketState {
    pub db: Database,
    pub orchestrator: Arc<Orchestrator>,
    pub rate_limit: RateLimit,
}
