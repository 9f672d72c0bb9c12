use super::transactions::TransactionResponse;
use crate::{access::AuthGuard, error::JsonResult, state::RocketState};
use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, JsonSchema)]
pub(super) struct DepositRequest {
    /// Reuse the most recently issued unfunded deposit address instead of minting a new one.
    /// Defaults to true.
    reuse_unfunded: Option<bool>,
    /// Optional free-form note attached to the deposit.
    description: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// The bitcoin node could not be reached to mint an address.
    NodeUnavailable,
}

/// Create (or reuse) a deposit address. Pay to this address with a BTC wallet to fund your
/// balance; the deposit's confirmation status updates as the chain listener observes it.
#[openapi(tag = "Deposits")]
#[post("/deposits/addresses", data = "<request>")]
pub(super) async fn post_address(
    state: &State<RocketState>,
    guard: AuthGuard,
    request: Json<DepositRequest>,
) -> JsonResult<TransactionResponse, Error> {
    let request = request.into_inner();
    let force_new = !request.reuse_unfunded.unwrap_or(true);
    match state
        .orchestrator
        .get_or_create_deposit(guard.user_id(), force_new, request.description)
        .await
    {
        Ok(tx) => Ok(Json(TransactionResponse::from_entity(&tx))),
        Err(e) => {
            log::error!("failed to create deposit address: {:?}", e);
            Err(crate::error::internal_server_error(
                Error::NodeUnavailable,
                "could not reach the bitcoin node to mint a deposit address".to_owned(),
            ))
        }
    }
}
