//! The balance is never stored: it is derived from the ledger on every read by summing settled
//! inbound and outbound rows. See `ledger::store` for the table this queries.

use crate::{
    btc::{MilliSats, Sats},
    database::Database,
    user,
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("balance for user went negative, ledger is corrupt")]
pub struct NegativeBalance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Balance(MilliSats);

impl Balance {
    pub fn milli_sats(self) -> MilliSats {
        self.0
    }

    pub fn sats(self) -> Sats {
        self.0.sats_floor()
    }

    pub fn btc(self) -> f64 {
        self.sats().0 as f64 / 100_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_converts_sats_to_whole_bitcoin() {
        let balance = Balance(MilliSats(150_000_000_000));
        assert_eq!(balance.sats(), Sats(150_000_000));
        assert_eq!(balance.btc(), 1.5);
    }

    #[test]
    fn sats_floors_fractional_milli_sats() {
        let balance = Balance(MilliSats(1_999));
        assert_eq!(balance.sats(), Sats(1));
    }
}

pub async fn get(db: &Database, user_id: user::Id) -> Result<Balance, NegativeBalance> {
    let incoming = queries::sum_incoming(db, user_id).await;
    let outgoing = queries::sum_outgoing(db, user_id).await;
    let balance = incoming - outgoing;

    if balance.0 < 0 {
        log::error!(
            "user {:?} has negative balance ({} msat incoming, {} msat outgoing): ledger is corrupt",
            user_id,
            incoming.0,
            outgoing.0,
        );
        return Err(NegativeBalance);
    }

    Ok(Balance(balance))
}

mod queries {
    use crate::{btc::MilliSats, database::Database, user};

    pub(super) async fn sum_incoming(db: &Database, user_id: user::Id) -> MilliSats {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount_milli_sat) FROM transactions
             WHERE user_id = $1
               AND direction = 'inbound'
               AND (
                 (payment_request IS NOT NULL AND status = 'completed' AND settled_at IS NOT NULL)
                 OR (address IS NOT NULL AND confirmed_at IS NOT NULL)
               )",
        )
        .bind(user_id.0)
        .fetch_one(db)
        .await
        .unwrap();

        MilliSats(sum.unwrap_or(0))
    }

    pub(super) async fn sum_outgoing(db: &Database, user_id: user::Id) -> MilliSats {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount_milli_sat) FROM transactions
             WHERE user_id = $1
               AND direction = 'outbound'
               AND (
                 (payment_request IS NOT NULL AND status <> 'flopped')
                 OR (address IS NOT NULL AND txid IS NOT NULL)
               )",
        )
        .bind(user_id.0)
        .fetch_one(db)
        .await
        .unwrap();

        MilliSats(sum.unwrap_or(0))
    }
}
