//! The unified ledger row and its two specialized views. A `Transaction` is the full polymorphic
//! shape as stored; `Onchain` and `Offchain` are projections used once the kind is known, and
//! convert back and forth via `TryFrom`/`From`.

use crate::{
    btc::{Address, MilliSats, TxId},
    user,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unrecognized direction {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffchainStatus {
    Created,
    Sent,
    Completed,
    Flopped,
}

impl OffchainStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            OffchainStatus::Created => "created",
            OffchainStatus::Sent => "sent",
            OffchainStatus::Completed => "completed",
            OffchainStatus::Flopped => "flopped",
        }
    }
}

impl FromStr for OffchainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OffchainStatus::Created),
            "sent" => Ok(OffchainStatus::Sent),
            "completed" => Ok(OffchainStatus::Completed),
            "flopped" => Ok(OffchainStatus::Flopped),
            other => Err(format!("unrecognized offchain status {:?}", other)),
        }
    }
}

/// Fields shared by every row regardless of kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Common {
    pub id: Id,
    pub user_id: user::Id,
    pub direction: Direction,
    pub amount_milli_sat: Option<MilliSats>,
    pub description: Option<String>,
    pub memo: Option<String>,
    pub callback_url: Option<String>,
    pub customer_order_id: Option<String>,
    pub expiry_seconds: Option<i64>,
    pub internal_transfer: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Onchain(OnchainFields),
    Offchain(OffchainFields),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnchainFields {
    pub address: Address,
    pub txid: Option<TxId>,
    pub vout: Option<i32>,
    pub received_tx_at: Option<DateTime<Utc>>,
    pub confirmed_at_block: Option<i32>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffchainFields {
    pub payment_request: String,
    pub hashed_preimage: String,
    pub preimage: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub status: OffchainStatus,
    pub payment_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub common: Common,
    pub kind: Kind,
}

#[derive(Debug, Error)]
#[error("transaction {0:?} is not the expected kind")]
pub struct WrongKind(pub Id);

impl Transaction {
    pub fn id(&self) -> Id {
        self.common.id
    }

    /// Effective creation time used for ordering in `List`: for onchain rows that have received
    /// funds this is when the funds arrived, not when the deposit row was first issued.
    pub fn effective_created_at(&self) -> DateTime<Utc> {
        match &self.kind {
            Kind::Onchain(onchain) => onchain.received_tx_at.unwrap_or(self.common.created_at),
            Kind::Offchain(_) => self.common.created_at,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.common
            .expiry_seconds
            .map(|secs| self.common.created_at + chrono::Duration::seconds(secs))
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|at| now > at).unwrap_or(false)
    }

    pub fn confirmed(&self) -> bool {
        match &self.kind {
            Kind::Onchain(onchain) => onchain.confirmed_at.is_some(),
            Kind::Offchain(offchain) => offchain.status == OffchainStatus::Completed,
        }
    }

    /// Structural equality that ignores `id` and every timestamp column. Used by listeners and
    /// tests to check that a mutation only touched the fields it claims to.
    pub fn eq_ignoring_timestamps(&self, other: &Transaction) -> bool {
        let a = &self.common;
        let b = &other.common;
        if a.user_id != b.user_id
            || a.direction != b.direction
            || a.amount_milli_sat != b.amount_milli_sat
            || a.description != b.description
            || a.memo != b.memo
            || a.callback_url != b.callback_url
            || a.customer_order_id != b.customer_order_id
            || a.expiry_seconds != b.expiry_seconds
            || a.internal_transfer != b.internal_transfer
        {
            return false;
        }

        match (&self.kind, &other.kind) {
            (Kind::Onchain(x), Kind::Onchain(y)) => {
                x.address == y.address
                    && x.txid == y.txid
                    && x.vout == y.vout
                    && x.confirmed_at_block == y.confirmed_at_block
            }
            (Kind::Offchain(x), Kind::Offchain(y)) => {
                x.payment_request == y.payment_request
                    && x.hashed_preimage == y.hashed_preimage
                    && x.preimage == y.preimage
                    && x.status == y.status
                    && x.payment_error == y.payment_error
            }
            _ => false,
        }
    }

    pub fn to_json(&self) -> TransactionJson {
        let kind = match &self.kind {
            Kind::Onchain(onchain) => TransactionKindJson::Blockchain {
                address: onchain.address.to_string(),
                txid: onchain.txid.map(|t| t.to_string()),
                vout: onchain.vout,
                confirmed_at_block: onchain.confirmed_at_block,
                confirmed_at: onchain.confirmed_at,
            },
            Kind::Offchain(offchain) => TransactionKindJson::Lightning {
                payment_request: offchain.payment_request.clone(),
                preimage: offchain.preimage.clone(),
                status: offchain.status,
                payment_error: offchain.payment_error.clone(),
            },
        };

        let now = Utc::now();

        TransactionJson {
            id: self.common.id.0,
            user_id: self.common.user_id.0,
            direction: self.common.direction,
            amount_milli_sat: self.common.amount_milli_sat.map(|m| m.0),
            amount_sat: self.common.amount_milli_sat.map(|m| m.sats_floor().0),
            description: self.common.description.clone(),
            memo: self.common.memo.clone(),
            callback_url: self.common.callback_url.clone(),
            customer_order_id: self.common.customer_order_id.clone(),
            expiry_seconds: self.common.expiry_seconds,
            expires_at: self.expires_at(),
            expired: self.expired(now),
            internal_transfer: self.common.internal_transfer,
            confirmed: self.confirmed(),
            created_at: self.common.created_at,
            updated_at: self.common.updated_at,
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Onchain {
    pub common: Common,
    pub address: Address,
    pub txid: Option<TxId>,
    pub vout: Option<i32>,
    pub received_tx_at: Option<DateTime<Utc>>,
    pub confirmed_at_block: Option<i32>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Offchain {
    pub common: Common,
    pub payment_request: String,
    pub hashed_preimage: String,
    pub preimage: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub status: OffchainStatus,
    pub payment_error: Option<String>,
}

impl TryFrom<Transaction> for Onchain {
    type Error = WrongKind;

    fn try_from(tx: Transaction) -> Result<Self, Self::Error> {
        let id = tx.id();
        match tx.kind {
            Kind::Onchain(fields) => Ok(Onchain {
                common: tx.common,
                address: fields.address,
                txid: fields.txid,
                vout: fields.vout,
                received_tx_at: fields.received_tx_at,
                confirmed_at_block: fields.confirmed_at_block,
                confirmed_at: fields.confirmed_at,
                settled_at: fields.settled_at,
            }),
            Kind::Offchain(_) => Err(WrongKind(id)),
        }
    }
}

impl From<Onchain> for Transaction {
    fn from(onchain: Onchain) -> Self {
        Transaction {
            common: onchain.common,
            kind: Kind::Onchain(OnchainFields {
                address: onchain.address,
                txid: onchain.txid,
                vout: onchain.vout,
                received_tx_at: onchain.received_tx_at,
                confirmed_at_block: onchain.confirmed_at_block,
                confirmed_at: onchain.confirmed_at,
                settled_at: onchain.settled_at,
            }),
        }
    }
}

impl TryFrom<Transaction> for Offchain {
    type Error = WrongKind;

    fn try_from(tx: Transaction) -> Result<Self, Self::Error> {
        let id = tx.id();
        match tx.kind {
            Kind::Offchain(fields) => Ok(Offchain {
                common: tx.common,
                payment_request: fields.payment_request,
                hashed_preimage: fields.hashed_preimage,
                preimage: fields.preimage,
                settled_at: fields.settled_at,
                status: fields.status,
                payment_error: fields.payment_error,
            }),
            Kind::Onchain(_) => Err(WrongKind(id)),
        }
    }
}

impl From<Offchain> for Transaction {
    fn from(offchain: Offchain) -> Self {
        Transaction {
            common: offchain.common,
            kind: Kind::Offchain(OffchainFields {
                payment_request: offchain.payment_request,
                hashed_preimage: offchain.hashed_preimage,
                preimage: offchain.preimage,
                settled_at: offchain.settled_at,
                status: offchain.status,
                payment_error: offchain.payment_error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_common(direction: Direction) -> Common {
        Common {
            id: Id(1),
            user_id: user::Id(uuid::Uuid::nil()),
            direction,
            amount_milli_sat: Some(MilliSats(1_000)),
            description: None,
            memo: None,
            callback_url: None,
            customer_order_id: None,
            expiry_seconds: None,
            internal_transfer: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn sample_onchain() -> Transaction {
        Transaction {
            common: sample_common(Direction::Inbound),
            kind: Kind::Onchain(OnchainFields {
                address: Address::from_str("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2").unwrap(),
                txid: None,
                vout: None,
                received_tx_at: None,
                confirmed_at_block: None,
                confirmed_at: None,
                settled_at: None,
            }),
        }
    }

    fn sample_offchain() -> Transaction {
        Transaction {
            common: sample_common(Direction::Outbound),
            kind: Kind::Offchain(OffchainFields {
                payment_request: "lnbcrt1...".to_owned(),
                hashed_preimage: "deadbeef".to_owned(),
                preimage: None,
                settled_at: None,
                status: OffchainStatus::Created,
                payment_error: None,
            }),
        }
    }

    #[test]
    fn direction_round_trips_through_str() {
        assert_eq!(Direction::from_str("inbound").unwrap(), Direction::Inbound);
        assert_eq!(Direction::from_str("outbound").unwrap(), Direction::Outbound);
        assert!(Direction::from_str("sideways").is_err());
    }

    #[test]
    fn offchain_status_round_trips_through_str() {
        for status in [
            OffchainStatus::Created,
            OffchainStatus::Sent,
            OffchainStatus::Completed,
            OffchainStatus::Flopped,
        ] {
            assert_eq!(OffchainStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unexpired_transaction_without_expiry_seconds_never_expires() {
        let tx = sample_offchain();
        assert!(!tx.expired(Utc::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn invoice_expires_after_expiry_seconds_elapse() {
        let mut tx = sample_offchain();
        tx.common.expiry_seconds = Some(60);
        assert!(!tx.expired(tx.common.created_at + chrono::Duration::seconds(30)));
        assert!(tx.expired(tx.common.created_at + chrono::Duration::seconds(61)));
    }

    #[test]
    fn onchain_confirmed_iff_confirmed_at_set() {
        let mut tx = sample_onchain();
        assert!(!tx.confirmed());
        if let Kind::Onchain(ref mut fields) = tx.kind {
            fields.confirmed_at = Some(Utc::now());
        }
        assert!(tx.confirmed());
    }

    #[test]
    fn offchain_confirmed_iff_status_completed() {
        let mut tx = sample_offchain();
        assert!(!tx.confirmed());
        if let Kind::Offchain(ref mut fields) = tx.kind {
            fields.status = OffchainStatus::Completed;
        }
        assert!(tx.confirmed());
    }

    #[test]
    fn effective_created_at_prefers_received_tx_at_for_funded_deposits() {
        let mut tx = sample_onchain();
        let created_at = tx.common.created_at;
        assert_eq!(tx.effective_created_at(), created_at);

        let received_at = created_at + chrono::Duration::minutes(5);
        if let Kind::Onchain(ref mut fields) = tx.kind {
            fields.received_tx_at = Some(received_at);
        }
        assert_eq!(tx.effective_created_at(), received_at);
    }

    #[test]
    fn onchain_round_trip_preserves_fields() {
        let tx = sample_onchain();
        let onchain: Onchain = tx.clone().try_into().unwrap();
        let back: Transaction = onchain.into();
        assert!(tx.eq_ignoring_timestamps(&back));
        let wrong: Result<Offchain, WrongKind> = tx.try_into();
        assert!(wrong.is_err());
    }

    #[test]
    fn offchain_round_trip_preserves_fields() {
        let tx = sample_offchain();
        let offchain: Offchain = tx.clone().try_into().unwrap();
        let back: Transaction = offchain.into();
        assert!(tx.eq_ignoring_timestamps(&back));
        let wrong: Result<Onchain, WrongKind> = tx.try_into();
        assert!(wrong.is_err());
    }

    #[test]
    fn eq_ignoring_timestamps_detects_amount_changes() {
        let a = sample_onchain();
        let mut b = a.clone();
        b.common.amount_milli_sat = Some(MilliSats(2_000));
        assert!(!a.eq_ignoring_timestamps(&b));
    }

    #[test]
    fn structural_eq_is_sensitive_to_timestamps_unlike_eq_ignoring_timestamps() {
        let a = sample_onchain();
        let mut b = a.clone();
        b.common.updated_at = a.common.updated_at + chrono::Duration::seconds(1);
        assert_ne!(a, b);
        assert!(a.eq_ignoring_timestamps(&b));
    }

    #[test]
    fn structural_eq_holds_for_identical_clones() {
        let a = sample_offchain();
        assert_eq!(a.clone(), a);
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransactionKindJson {
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
        status: OffchainStatus,
        payment_error: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct TransactionJson {
    pub id: i64,
    pub user_id: uuid::Uuid,
    pub direction: Direction,
    pub amount_milli_sat: Option<i64>,
    pub amount_sat: Option<i64>,
    pub description: Option<String>,
    pub memo: Option<String>,
    pub callback_url: Option<String>,
    pub customer_order_id: Option<String>,
    pub expiry_seconds: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub internal_transfer: bool,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TransactionKindJson,
}
