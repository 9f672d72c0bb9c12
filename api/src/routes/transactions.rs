use super::{Range, RangeError};
use crate::{access::AuthGuard, error::JsonResult, state::RocketState};
use app::ledger::{store, Direction, OffchainStatus, Transaction};
use chrono::{DateTime, Utc};
use rocket::{get, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum DirectionModel {
    Inbound,
    Outbound,
}

impl From<Direction> for DirectionModel {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Inbound => DirectionModel::Inbound,
            Direction::Outbound => DirectionModel::Outbound,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum OffchainStatusModel {
    Created,
    Sent,
    Completed,
    Flopped,
}

impl From<OffchainStatus> for OffchainStatusModel {
    fn from(s: OffchainStatus) -> Self {
        match s {
            OffchainStatus::Created => OffchainStatusModel::Created,
            OffchainStatus::Sent => OffchainStatusModel::Sent,
            OffchainStatus::Completed => OffchainStatusModel::Completed,
            OffchainStatus::Flopped => OffchainStatusModel::Flopped,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KindModel {
    Blockchain {
        address: String,
        txid: Option<String>,
        vout: Option<i32>,
        confirmed_at_block: Option<i32>,
        confirmed_at: Option<DateTime<Utc>>,
    },
    Lightning {
        payment_request: String,
        preimage: Option<String>,
        status: OffchainStatusModel,
        payment_error: Option<String>,
    },
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct TransactionModel {
    id: i64,
    user_id: Uuid,
    direction: DirectionModel,
    amount_milli_sat: Option<i64>,
    amount_sat: Option<i64>,
    description: Option<String>,
    memo: Option<String>,
    callback_url: Option<String>,
    customer_order_id: Option<String>,
    expiry_seconds: Option<i64>,
    expires_at: Option<DateTime<Utc>>,
    expired: bool,
    internal_transfer: bool,
    confirmed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    kind: KindModel,
}

impl TransactionModel {
    fn from_entity(tx: &Transaction) -> Self {
        let json = tx.to_json();
        let kind = match json.kind {
            app::ledger::transaction::TransactionKindJson::Blockchain {
                address,
                txid,
                vout,
                confirmed_at_block,
                confirmed_at,
            } => KindModel::Blockchain {
                address,
                txid,
                vout,
                confirmed_at_block,
                confirmed_at,
            },
            app::ledger::transaction::TransactionKindJson::Lightning {
                payment_request,
                preimage,
                status,
                payment_error,
            } => KindModel::Lightning {
                payment_request,
                preimage,
                status: status.into(),
                payment_error,
            },
        };

        Self {
            id: json.id,
            user_id: json.user_id,
            direction: json.direction.into(),
            amount_milli_sat: json.amount_milli_sat,
            amount_sat: json.amount_sat,
            description: json.description,
            memo: json.memo,
            callback_url: json.callback_url,
            customer_order_id: json.customer_order_id,
            expiry_seconds: json.expiry_seconds,
            expires_at: json.expires_at,
            expired: json.expired,
            internal_transfer: json.internal_transfer,
            confirmed: json.confirmed,
            created_at: json.created_at,
            updated_at: json.updated_at,
            kind,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct TransactionResponse {
    transaction: TransactionModel,
}

impl TransactionResponse {
    pub(super) fn from_entity(tx: &Transaction) -> Self {
        Self {
            transaction: TransactionModel::from_entity(tx),
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct TransactionsResponse {
    transactions: Vec<TransactionModel>,
    total: i64,
}

/// List transactions (deposits, withdrawals, invoices, and payments) for the calling account.
#[openapi(tag = "Transactions")]
#[get("/transactions?<range..>")]
pub(super) async fn list(
    state: &State<RocketState>,
    guard: AuthGuard,
    range: Range,
) -> JsonResult<TransactionsResponse, RangeError> {
    let params = range.query_params()?;
    let transactions = store::list(&state.db, guard.user_id(), &params, store::Sort::Descending)
        .await
        .iter()
        .map(TransactionModel::from_entity)
        .collect();
    let total = store::count(&state.db, guard.user_id(), &params).await;
    Ok(Json(TransactionsResponse { transactions, total }))
}

/// Get transaction details.
#[openapi(tag = "Transactions")]
#[get("/transactions/<transaction_id>")]
pub(super) async fn get(
    state: &State<RocketState>,
    guard: AuthGuard,
    transaction_id: i64,
) -> Option<Json<TransactionResponse>> {
    let id = app::ledger::Id(transaction_id);
    store::get_by_id(&state.db, id, guard.user_id())
        .await
        .map(|tx| Json(TransactionResponse::from_entity(&tx)))
}
