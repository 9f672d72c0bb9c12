use crate::{access::AuthGuard, error::JsonResult, state::RocketState};
use rocket::{get, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::Serialize;

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// The ledger is corrupt: computed balance went negative. Contact support.
    Corrupt,
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct BalanceResponse {
    balance_msats: i64,
    balance_sats: i64,
}

/// Get the current balance.
#[openapi(tag = "Balance")]
#[get("/balance")]
pub(super) async fn get(
    state: &State<RocketState>,
    guard: AuthGuard,
) -> JsonResult<BalanceResponse, Error> {
    match app::balance::get(&state.db, guard.user_id()).await {
        Ok(balance) => Ok(Json(BalanceResponse {
            balance_msats: balance.milli_sats().0,
            balance_sats: balance.sats().0,
        })),
        Err(_) => Err(crate::error::internal_server_error(
            Error::Corrupt,
            "the ledger is in an inconsistent state, please contact support".to_owned(),
        )),
    }
}
