use super::transactions::TransactionResponse;
use crate::{
    access::AuthGuard,
    error::{self, JsonResult},
    state::RocketState,
};
use app::orchestrator;
use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, JsonSchema)]
pub(super) struct PaymentRequest {
    /// Invoice to pay, aka payment request.
    invoice: String,
    /// Free-form note attached to this transaction on your side.
    description: Option<String>,
}

/// Error during payment.
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// Amountless invoices are not supported.
    ZeroAmountNotSupported,
    /// Insufficient balance to complete the payment.
    InsufficientBalance,
    /// You cannot pay your own invoice.
    CannotPayOwnInvoice,
    /// The payment failed on the Lightning Network.
    PaymentFailed,
    /// The lightning node could not be reached.
    NodeUnavailable,
}

/// Pay a Lightning invoice (aka payment request) from your balance.
#[openapi(tag = "Payments")]
#[post("/payments", data = "<request>")]
pub(super) async fn post(
    state: &State<RocketState>,
    guard: AuthGuard,
    request: Json<PaymentRequest>,
) -> JsonResult<TransactionResponse, Error> {
    let request = request.into_inner();
    state
        .orchestrator
        .pay_invoice(guard.user_id(), &request.invoice, request.description)
        .await
        .map(|tx| Json(TransactionResponse::from_entity(&tx)))
        .map_err(|e| match e {
            orchestrator::Error::ZeroAmountNotSupported => error::bad_request(
                Error::ZeroAmountNotSupported,
                "amountless invoices are not supported".to_owned(),
            ),
            orchestrator::Error::InsufficientBalance => error::bad_request(
                Error::InsufficientBalance,
                "insufficient balance".to_owned(),
            ),
            orchestrator::Error::CannotPayOwnInvoice => error::bad_request(
                Error::CannotPayOwnInvoice,
                "cannot pay your own invoice".to_owned(),
            ),
            orchestrator::Error::PaymentFailed(reason) => {
                error::bad_request(Error::PaymentFailed, reason)
            }
            other => {
                log::error!("failed to send payment: {:?}", other);
                error::internal_server_error(
                    Error::NodeUnavailable,
                    "could not reach the lightning node".to_owned(),
                )
            }
        })
}
