use super::transactions::TransactionResponse;
use crate::{
    access::AuthGuard,
    error::{self, JsonResult},
    state::RocketState,
};
use app::{btc::Sats, orchestrator};
use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, JsonSchema)]
pub(super) struct InvoiceRequest {
    /// Amount to request with this invoice.
    amount_sats: i64,
    /// Invoice description, shown to the payer's wallet.
    memo: Option<String>,
    /// Free-form note attached to this transaction on your side.
    description: Option<String>,
    /// Webhook URL to notify when this invoice is paid.
    callback_url: Option<String>,
    /// Your own reference for this invoice.
    customer_order_id: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// Amount must be positive and within the per-invoice maximum.
    InvalidAmount,
    /// Memo exceeds the maximum length.
    MemoTooLong,
    /// The lightning node could not be reached.
    NodeUnavailable,
}

/// Create a new invoice. When it's paid over the Lightning Network, the amount is credited to
/// your balance.
#[openapi(tag = "Invoices")]
#[post("/invoices", data = "<request>")]
pub(super) async fn post(
    state: &State<RocketState>,
    guard: AuthGuard,
    request: Json<InvoiceRequest>,
) -> JsonResult<TransactionResponse, Error> {
    let request = request.into_inner();
    state
        .orchestrator
        .create_invoice(
            guard.user_id(),
            Sats(request.amount_sats),
            request.memo,
            request.description,
            request.callback_url,
            request.customer_order_id,
        )
        .await
        .map(|tx| Json(TransactionResponse::from_entity(&tx)))
        .map_err(|e| match e {
            orchestrator::Error::InvalidAmount => {
                error::bad_request(Error::InvalidAmount, "invalid invoice amount".to_owned())
            }
            orchestrator::Error::MemoTooLong => {
                error::bad_request(Error::MemoTooLong, "memo too long".to_owned())
            }
            other => {
                log::error!("failed to create invoice: {:?}", other);
                error::internal_server_error(
                    Error::NodeUnavailable,
                    "could not reach the lightning node".to_owned(),
                )
            }
        })
}
