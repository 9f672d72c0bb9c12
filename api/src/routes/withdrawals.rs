use super::transactions::TransactionResponse;
use crate::{
    access::AuthGuard,
    error::{self, JsonResult},
    state::RocketState,
};
use app::{btc, orchestrator};
use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const DEFAULT_TARGET_CONF: i32 = 6;

#[derive(Debug, Deserialize, JsonSchema)]
pub(super) struct WithdrawalRequest {
    /// The address to withdraw funds into. A BTC transaction is broadcast to this address as
    /// part of the withdrawal.
    address: String,
    /// The amount to withdraw, in satoshis. Ignored if `send_all` is true.
    amount_sats: Option<i64>,
    /// Withdraw the entire balance instead of a fixed amount.
    #[serde(default)]
    send_all: bool,
    /// Desired confirmation target in blocks, used for fee estimation. Defaults to 6.
    target_conf: Option<i32>,
    /// Fee rate in sat/vbyte. Takes precedence over `target_conf` when set.
    #[serde(default)]
    sat_per_byte: i64,
    /// Free-form note attached to this transaction on your side.
    description: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// The address was not a valid bitcoin address.
    InvalidAddress,
    /// Amount must be positive.
    InvalidAmount,
    /// Insufficient balance to complete the withdrawal.
    InsufficientBalance,
    /// The bitcoin or lightning node could not be reached.
    NodeUnavailable,
}

/// Withdraw your balance to a BTC address.
#[openapi(tag = "Withdrawals")]
#[post("/withdrawals", data = "<request>")]
pub(super) async fn post(
    state: &State<RocketState>,
    guard: AuthGuard,
    request: Json<WithdrawalRequest>,
) -> JsonResult<TransactionResponse, Error> {
    let request = request.into_inner();
    let Ok(address) = btc::Address::from_str(&request.address) else {
        return Err(error::bad_request(
            Error::InvalidAddress,
            "not a valid bitcoin address".to_owned(),
        ));
    };

    state
        .orchestrator
        .withdraw_onchain(
            guard.user_id(),
            request.amount_sats.map(btc::Sats),
            address,
            request.target_conf.unwrap_or(DEFAULT_TARGET_CONF),
            request.sat_per_byte,
            request.send_all,
            request.description,
        )
        .await
        .map(|tx| Json(TransactionResponse::from_entity(&tx)))
        .map_err(|e| match e {
            orchestrator::Error::InvalidAmount => {
                error::bad_request(Error::InvalidAmount, "amount must be positive".to_owned())
            }
            orchestrator::Error::InsufficientBalance => error::bad_request(
                Error::InsufficientBalance,
                "insufficient balance".to_owned(),
            ),
            other => {
                log::error!("failed to withdraw: {:?}", other);
                error::internal_server_error(
                    Error::NodeUnavailable,
                    "could not reach the bitcoin or lightning node".to_owned(),
                )
            }
        })
}
