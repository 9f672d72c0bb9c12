//! The ledger store: all reads and writes against the `transactions` table. Invariants I1-I10
//! are enforced by named constraints in the migration; violations surface here as
//! `Error::ConstraintViolated`.

use super::transaction::{
    Common, Direction, Id, Kind, Offchain, OffchainFields, OffchainStatus, Onchain, OnchainFields,
    Transaction,
};
use crate::{
    btc::{Address, MilliSats, Sats, TxId},
    database::{self, Database},
    user,
};
use chrono::{DateTime, Utc};
use const_format::formatcp;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("constraint violated: {0}")]
    ConstraintViolated(String),
    #[error("not found")]
    NotFound,
    #[error("row already has a txid")]
    AlreadyHasTxid,
    #[error("invalid receipt: {0}")]
    InvalidReceipt(&'static str),
}

fn map_write_error(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db_err) => match db_err.constraint() {
            Some(name) => Error::ConstraintViolated(name.to_string()),
            None => panic!("unexpected database error: {:?}", e),
        },
        _ => panic!("unexpected database error: {:?}", e),
    }
}

pub struct NewOnchain {
    pub address: Address,
    /// Set at insertion time for withdrawals, which already know their txid/vout/amount when the
    /// row is created. Left `None` for deposit addresses, which are filled in later by
    /// `onchain::record_receipt` once a payment to the address is observed.
    pub txid: Option<TxId>,
    pub vout: Option<i32>,
}

pub struct NewOffchain {
    pub payment_request: String,
    pub hashed_preimage: String,
}

pub enum NewKind {
    Onchain(NewOnchain),
    Offchain(NewOffchain),
}

pub struct NewTransaction {
    pub user_id: user::Id,
    pub direction: Direction,
    pub amount_milli_sat: Option<MilliSats>,
    pub description: Option<String>,
    pub memo: Option<String>,
    pub callback_url: Option<String>,
    pub customer_order_id: Option<String>,
    pub expiry_seconds: Option<i64>,
    pub kind: NewKind,
}

pub async fn insert(
    tx: &mut database::Transaction,
    new: NewTransaction,
) -> Result<Transaction, Error> {
    let (address, txid, vout, payment_request, hashed_preimage) = match &new.kind {
        NewKind::Onchain(onchain) => (
            Some(onchain.address.to_string()),
            onchain.txid.map(|t| t.to_string()),
            onchain.vout,
            None,
            None,
        ),
        NewKind::Offchain(offchain) => (
            None,
            None,
            None,
            Some(offchain.payment_request.clone()),
            Some(offchain.hashed_preimage.clone()),
        ),
    };

    let status = match new.kind {
        NewKind::Offchain(_) => Some(OffchainStatus::Created.as_str()),
        NewKind::Onchain(_) => None,
    };

    let row = sqlx::query_as::<_, TransactionRow>(formatcp!(
        "INSERT INTO transactions
            ({}, {}, received_tx_at)
         VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
             CASE WHEN $10 IS NOT NULL THEN now() END)
         RETURNING {}",
        "user_id, direction, amount_milli_sat, description, memo, callback_url",
        "customer_order_id, expiry_seconds, address, txid, vout, payment_request, hashed_preimage, status",
        COLUMNS,
    ))
    .bind(new.user_id.0)
    .bind(new.direction.as_str())
    .bind(new.amount_milli_sat.map(|m| m.0))
    .bind(new.description)
    .bind(new.memo)
    .bind(new.callback_url)
    .bind(new.customer_order_id)
    .bind(new.expiry_seconds)
    .bind(address)
    .bind(txid)
    .bind(vout)
    .bind(payment_request)
    .bind(hashed_preimage)
    .bind(status)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_write_error)?;

    Ok(row.into_entity())
}

pub async fn get_by_id(db: &Database, id: Id, user_id: user::Id) -> Option<Transaction> {
    sqlx::query_as::<_, TransactionRow>(formatcp!(
        "SELECT {} FROM transactions WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        COLUMNS
    ))
    .bind(id.0)
    .bind(user_id.0)
    .fetch_optional(db)
    .await
    .unwrap()
    .map(|row| row.into_entity())
}

pub async fn get_by_payment_request(
    db: &Database,
    payment_request: &str,
    user_id: user::Id,
) -> Option<Transaction> {
    sqlx::query_as::<_, TransactionRow>(formatcp!(
        "SELECT {} FROM transactions WHERE payment_request = $1 AND user_id = $2 AND deleted_at IS NULL",
        COLUMNS
    ))
    .bind(payment_request)
    .bind(user_id.0)
    .fetch_optional(db)
    .await
    .unwrap()
    .map(|row| row.into_entity())
}

/// Used by the Payment Orchestrator to detect internal transfers: ignores `user_id` entirely, so
/// it finds the inbound row regardless of who is asking.
pub async fn find_inbound_by_payment_request(
    db: &Database,
    payment_request: &str,
) -> Option<Transaction> {
    sqlx::query_as::<_, TransactionRow>(formatcp!(
        "SELECT {} FROM transactions
         WHERE payment_request = $1 AND direction = 'inbound' AND deleted_at IS NULL",
        COLUMNS
    ))
    .bind(payment_request)
    .fetch_optional(db)
    .await
    .unwrap()
    .map(|row| row.into_entity())
}

/// All rows (any user) carrying `address`, used by the Onchain Tx Listener to find every deposit
/// row associated with an incoming output.
pub async fn find_by_address(db: &Database, address: &Address) -> Vec<Transaction> {
    sqlx::query_as::<_, TransactionRow>(formatcp!(
        "SELECT {} FROM transactions WHERE address = $1 AND deleted_at IS NULL",
        COLUMNS
    ))
    .bind(address.to_string())
    .fetch_all(db)
    .await
    .unwrap()
    .into_iter()
    .map(|row| row.into_entity())
    .collect()
}

/// Every onchain row that has seen a transaction but is not yet confirmed, used by the Block
/// Listener to know what to re-check on each new block.
pub async fn list_unconfirmed_onchain(db: &Database) -> Vec<Transaction> {
    sqlx::query_as::<_, TransactionRow>(formatcp!(
        "SELECT {} FROM transactions
         WHERE address IS NOT NULL AND txid IS NOT NULL AND confirmed_at IS NULL
           AND deleted_at IS NULL",
        COLUMNS
    ))
    .fetch_all(db)
    .await
    .unwrap()
    .into_iter()
    .map(|row| row.into_entity())
    .collect()
}

/// The most recent INBOUND onchain row for `user_id` that has not yet received a deposit, used by
/// `GetOrCreateDeposit` to avoid minting a fresh address on every call.
pub async fn find_latest_unfunded_deposit(db: &Database, user_id: user::Id) -> Option<Transaction> {
    sqlx::query_as::<_, TransactionRow>(formatcp!(
        "SELECT {} FROM transactions
         WHERE user_id = $1 AND direction = 'inbound' AND address IS NOT NULL AND txid IS NULL
           AND deleted_at IS NULL
         ORDER BY created_at DESC LIMIT 1",
        COLUMNS
    ))
    .bind(user_id.0)
    .fetch_optional(db)
    .await
    .unwrap()
    .map(|row| row.into_entity())
}

#[derive(Debug, Clone, Copy)]
pub enum Sort {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub offset: i64,
    pub limit: i64,
    pub min_amount_milli_sat: Option<i64>,
    pub max_amount_milli_sat: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub direction: Option<Direction>,
    pub expired: Option<bool>,
}

impl ListParams {
    fn push_filters<'a>(&'a self, qb: &mut sqlx::QueryBuilder<'a, sqlx::Postgres>) {
        qb.push(" AND (payment_request IS NOT NULL OR amount_milli_sat IS NOT NULL)");

        if let Some(min) = self.min_amount_milli_sat {
            qb.push(" AND amount_milli_sat >= ").push_bind(min);
        }
        if let Some(max) = self.max_amount_milli_sat {
            qb.push(" AND amount_milli_sat <= ").push_bind(max);
        }
        if let Some(since) = self.since {
            qb.push(" AND COALESCE(received_tx_at, created_at) >= ")
                .push_bind(since);
        }
        if let Some(until) = self.until {
            qb.push(" AND COALESCE(received_tx_at, created_at) <= ")
                .push_bind(until);
        }
        if let Some(direction) = self.direction {
            qb.push(" AND direction = ").push_bind(direction.as_str());
        }
        if let Some(expired) = self.expired {
            if expired {
                qb.push(
                    " AND expiry_seconds IS NOT NULL AND now() > created_at + (expiry_seconds * interval '1 second')",
                );
            } else {
                qb.push(
                    " AND (expiry_seconds IS NULL OR now() <= created_at + (expiry_seconds * interval '1 second'))",
                );
            }
        }
    }
}

pub async fn list(
    db: &Database,
    user_id: user::Id,
    params: &ListParams,
    sort: Sort,
) -> Vec<Transaction> {
    let mut qb = sqlx::QueryBuilder::new(formatcp!(
        "SELECT {} FROM transactions WHERE user_id = ",
        COLUMNS
    ));
    qb.push_bind(user_id.0);
    qb.push(" AND deleted_at IS NULL");
    params.push_filters(&mut qb);

    qb.push(" ORDER BY COALESCE(received_tx_at, created_at) ");
    qb.push(match sort {
        Sort::Ascending => "ASC",
        Sort::Descending => "DESC",
    });
    qb.push(" LIMIT ").push_bind(params.limit);
    qb.push(" OFFSET ").push_bind(params.offset);

    qb.build_query_as::<TransactionRow>()
        .fetch_all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.into_entity())
        .collect()
}

pub async fn count(db: &Database, user_id: user::Id, params: &ListParams) -> i64 {
    let mut qb =
        sqlx::QueryBuilder::new("SELECT COUNT(*) FROM transactions WHERE user_id = ");
    qb.push_bind(user_id.0);
    qb.push(" AND deleted_at IS NULL");
    params.push_filters(&mut qb);

    qb.build_query_scalar::<i64>().fetch_one(db).await.unwrap()
}

pub mod onchain {
    use super::*;

    pub async fn record_receipt(
        tx: &mut database::Transaction,
        id: Id,
        txid: TxId,
        vout: i32,
        amount: Sats,
    ) -> Result<Transaction, Error> {
        if vout < 0 || amount.0 < 1 {
            return Err(Error::InvalidReceipt("vout must be >= 0 and amount >= 1 sat"));
        }

        let row = sqlx::query_as::<_, TransactionRow>(formatcp!(
            "UPDATE transactions SET
                txid = $1, vout = $2, amount_milli_sat = $3, received_tx_at = now(), updated_at = now()
             WHERE id = $4
               AND txid IS NULL AND vout IS NULL AND amount_milli_sat IS NULL
             RETURNING {}",
            COLUMNS
        ))
        .bind(txid.to_string())
        .bind(vout)
        .bind(amount.msats().0)
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(super::map_write_error)?;

        row.map(|row| row.into_entity()).ok_or(Error::AlreadyHasTxid)
    }

    pub async fn mark_confirmed(
        tx: &mut database::Transaction,
        id: Id,
        height: i32,
    ) -> Result<Transaction, Error> {
        let row = sqlx::query_as::<_, TransactionRow>(formatcp!(
            "UPDATE transactions SET
                confirmed_at = now(), confirmed_at_block = $1, settled_at = now(), updated_at = now()
             WHERE id = $2 AND txid IS NOT NULL
             RETURNING {}",
            COLUMNS
        ))
        .bind(height)
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(super::map_write_error)?;

        row.map(|row| row.into_entity()).ok_or(Error::NotFound)
    }
}

pub mod offchain {
    use super::*;

    pub async fn mark_completed(
        tx: &mut database::Transaction,
        id: Id,
        preimage: &str,
    ) -> Result<Transaction, Error> {
        let row = sqlx::query_as::<_, TransactionRow>(formatcp!(
            "UPDATE transactions SET
                preimage = $1, status = 'completed', settled_at = now(), updated_at = now()
             WHERE id = $2
             RETURNING {}",
            COLUMNS
        ))
        .bind(preimage)
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(super::map_write_error)?;

        row.map(|row| row.into_entity()).ok_or(Error::NotFound)
    }

    /// Like `mark_completed`, but also overwrites `amount_milli_sat` with the amount actually
    /// paid, which the Lightning spec allows to exceed the requested amount.
    pub async fn mark_completed_with_paid_amount(
        tx: &mut database::Transaction,
        id: Id,
        preimage: &str,
        paid_milli_sat: MilliSats,
    ) -> Result<Transaction, Error> {
        let row = sqlx::query_as::<_, TransactionRow>(formatcp!(
            "UPDATE transactions SET
                preimage = $1, status = 'completed', settled_at = now(), updated_at = now(),
                amount_milli_sat = $2
             WHERE id = $3
             RETURNING {}",
            COLUMNS
        ))
        .bind(preimage)
        .bind(paid_milli_sat.0)
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(super::map_write_error)?;

        row.map(|row| row.into_entity()).ok_or(Error::NotFound)
    }

    pub async fn mark_flopped(
        tx: &mut database::Transaction,
        id: Id,
        reason: &str,
    ) -> Result<Transaction, Error> {
        let row = sqlx::query_as::<_, TransactionRow>(formatcp!(
            "UPDATE transactions SET
                status = 'flopped', payment_error = $1, updated_at = now()
             WHERE id = $2
             RETURNING {}",
            COLUMNS
        ))
        .bind(reason)
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(super::map_write_error)?;

        row.map(|row| row.into_entity()).ok_or(Error::NotFound)
    }
}

const COLUMNS: &str = "id, user_id, direction, amount_milli_sat, description, memo, callback_url, \
customer_order_id, expiry_seconds, internal_transfer, created_at, updated_at, deleted_at, \
address, txid, vout, received_tx_at, confirmed_at_block, confirmed_at, settled_at, \
payment_request, hashed_preimage, preimage, status, payment_error";

#[derive(sqlx::FromRow, Debug)]
struct TransactionRow {
    id: i64,
    user_id: Uuid,
    direction: String,
    amount_milli_sat: Option<i64>,
    description: Option<String>,
    memo: Option<String>,
    callback_url: Option<String>,
    customer_order_id: Option<String>,
    expiry_seconds: Option<i64>,
    internal_transfer: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    address: Option<String>,
    txid: Option<String>,
    vout: Option<i32>,
    received_tx_at: Option<DateTime<Utc>>,
    confirmed_at_block: Option<i32>,
    confirmed_at: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
    payment_request: Option<String>,
    hashed_preimage: Option<String>,
    preimage: Option<String>,
    status: Option<String>,
    payment_error: Option<String>,
}

impl TransactionRow {
    fn into_entity(self) -> Transaction {
        let common = Common {
            id: Id(self.id),
            user_id: user::Id(self.user_id),
            direction: Direction::from_str(&self.direction).expect("corrupt direction in row"),
            amount_milli_sat: self.amount_milli_sat.map(MilliSats),
            description: self.description,
            memo: self.memo,
            callback_url: self.callback_url,
            customer_order_id: self.customer_order_id,
            expiry_seconds: self.expiry_seconds,
            internal_transfer: self.internal_transfer,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        };

        let kind = match (self.address, self.payment_request) {
            (Some(address), None) => Kind::Onchain(OnchainFields {
                address: Address::from_str(&address).expect("corrupt address in row"),
                txid: self
                    .txid
                    .map(|t| TxId::from_str(&t).expect("corrupt txid in row")),
                vout: self.vout,
                received_tx_at: self.received_tx_at,
                confirmed_at_block: self.confirmed_at_block,
                confirmed_at: self.confirmed_at,
                settled_at: self.settled_at,
            }),
            (None, Some(payment_request)) => Kind::Offchain(OffchainFields {
                payment_request,
                hashed_preimage: self.hashed_preimage.expect("offchain row missing hash"),
                preimage: self.preimage,
                settled_at: self.settled_at,
                status: OffchainStatus::from_str(
                    self.status.as_deref().expect("offchain row missing status"),
                )
                .expect("corrupt status in row"),
                payment_error: self.payment_error,
            }),
            _ => panic!("row violates I1: exactly one of address/payment_request must be set"),
        };

        Transaction { common, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_default_excludes_never_funded_onchain() {
        let params = ListParams::default();
        let mut qb = sqlx::QueryBuilder::new("SELECT 1 WHERE true");
        params.push_filters(&mut qb);
        assert!(qb.sql().contains("payment_request IS NOT NULL OR amount_milli_sat IS NOT NULL"));
    }

    #[test]
    fn list_params_only_applies_filters_that_are_set() {
        let params = ListParams {
            direction: Some(Direction::Inbound),
            ..ListParams::default()
        };
        let mut qb = sqlx::QueryBuilder::new("SELECT 1 WHERE true");
        params.push_filters(&mut qb);
        let sql = qb.sql();
        assert!(sql.contains("AND direction = "));
        assert!(!sql.contains("amount_milli_sat >="));
        assert!(!sql.contains("amount_milli_sat <="));
        assert!(!sql.contains("expiry_seconds"));
    }

    #[test]
    fn list_params_expired_true_and_false_push_disjoint_clauses() {
        let mut qb = sqlx::QueryBuilder::new("SELECT 1 WHERE true");
        ListParams {
            expired: Some(true),
            ..ListParams::default()
        }
        .push_filters(&mut qb);
        assert!(qb.sql().contains("now() > created_at"));

        let mut qb = sqlx::QueryBuilder::new("SELECT 1 WHERE true");
        ListParams {
            expired: Some(false),
            ..ListParams::default()
        }
        .push_filters(&mut qb);
        assert!(qb.sql().contains("now() <= created_at"));
    }
}
