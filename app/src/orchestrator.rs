//! The Payment Orchestrator: the four user-initiated operations that create and settle ledger
//! rows (`pay_invoice`, `create_invoice`, `withdraw_onchain`, `deposit`). Everything else mutates
//! the ledger from the listener side.

use crate::{
    auth,
    balance::{self, NegativeBalance},
    bitcoin::{self, Bitcoin},
    btc::{Address, Sats, TxId},
    database::Database,
    ledger::{store, Direction, Transaction},
    lightning::{self, Lightning},
    user,
    webhook::Dispatcher,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invoice has no amount, which is not supported")]
    ZeroAmountNotSupported,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("cannot pay your own invoice")]
    CannotPayOwnInvoice,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("memo too long")]
    MemoTooLong,
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    #[error("ledger is corrupt: {0}")]
    Corrupt(#[from] NegativeBalance),
    #[error("ledger error: {0}")]
    Ledger(#[from] store::Error),
    #[error("lightning node error: {0}")]
    Lightning(#[from] lightning::NodeError),
    #[error("bitcoin node error: {0}")]
    Bitcoin(#[from] bitcoin::NodeError),
}

pub struct Orchestrator {
    db: Database,
    lightning: Arc<dyn Lightning>,
    bitcoin: Arc<dyn Bitcoin>,
    webhook: Dispatcher,
    max_amount_sat_per_invoice: Sats,
    max_memo_len: usize,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        lightning: Arc<dyn Lightning>,
        bitcoin: Arc<dyn Bitcoin>,
        webhook: Dispatcher,
        max_amount_sat_per_invoice: Sats,
        max_memo_len: usize,
    ) -> Self {
        Self {
            db,
            lightning,
            bitcoin,
            webhook,
            max_amount_sat_per_invoice,
            max_memo_len,
        }
    }

    pub async fn pay_invoice(
        &self,
        user_id: user::Id,
        payment_request: &str,
        description: Option<String>,
    ) -> Result<Transaction, Error> {
        let decoded = self.lightning.decode_pay_req(payment_request).await?;
        if decoded.num_satoshis.0 == 0 {
            return Err(Error::ZeroAmountNotSupported);
        }

        let mut data_tx = self.db.begin().await.unwrap();
        let pending = store::insert(
            &mut data_tx,
            store::NewTransaction {
                user_id,
                direction: Direction::Outbound,
                amount_milli_sat: Some(decoded.num_satoshis.msats()),
                description,
                memo: Some(decoded.description.clone()),
                callback_url: None,
                customer_order_id: None,
                expiry_seconds: Some(decoded.expiry_seconds),
                kind: store::NewKind::Offchain(store::NewOffchain {
                    payment_request: payment_request.to_string(),
                    hashed_preimage: decoded.payment_hash.clone(),
                }),
            },
        )
        .await?;
        data_tx.commit().await.unwrap();

        // Insert happens before the balance check so a concurrent payment attempt on the same
        // user already sees this amount counted against them.
        let current_balance = balance::get(&self.db, user_id).await?;
        if current_balance.milli_sats() < decoded.num_satoshis.msats() {
            let mut data_tx = self.db.begin().await.unwrap();
            store::offchain::mark_flopped(&mut data_tx, pending.id(), "balance_too_low").await?;
            data_tx.commit().await.unwrap();
            return Err(Error::InsufficientBalance);
        }

        match store::find_inbound_by_payment_request(&self.db, payment_request).await {
            Some(inbound) if inbound.common.user_id == user_id => {
                let mut data_tx = self.db.begin().await.unwrap();
                store::offchain::mark_flopped(&mut data_tx, pending.id(), "cannot_pay_own_invoice")
                    .await?;
                data_tx.commit().await.unwrap();
                Err(Error::CannotPayOwnInvoice)
            }
            Some(inbound) => self.settle_internal_transfer(pending, inbound).await,
            None => self.settle_external(pending, payment_request).await,
        }
    }

    async fn settle_internal_transfer(
        &self,
        outbound: Transaction,
        inbound: Transaction,
    ) -> Result<Transaction, Error> {
        let inbound_offchain: crate::ledger::Offchain = inbound
            .try_into()
            .expect("find_inbound_by_payment_request only returns offchain rows");

        let details = self
            .lightning
            .lookup_invoice(&inbound_offchain.hashed_preimage)
            .await?;
        let preimage = details
            .r_preimage
            .expect("an inbound invoice issued by this system always has a preimage on record");

        let outbound_id = outbound.id();
        let outbound_user = outbound.common.user_id;
        let inbound_id = inbound_offchain.common.id;
        let inbound_user = inbound_offchain.common.user_id;

        let mut data_tx = self.db.begin().await.unwrap();
        store::offchain::mark_completed(&mut data_tx, outbound_id, &preimage).await?;
        store::offchain::mark_completed(&mut data_tx, inbound_id, &preimage).await?;
        sqlx::query("UPDATE transactions SET internal_transfer = true WHERE id = $1")
            .bind(outbound_id.0)
            .execute(&mut data_tx)
            .await
            .unwrap();
        data_tx.commit().await.unwrap();

        let outbound_final = store::get_by_id(&self.db, outbound_id, outbound_user)
            .await
            .ok_or(store::Error::NotFound)?;
        let inbound_final = store::get_by_id(&self.db, inbound_id, inbound_user)
            .await
            .ok_or(store::Error::NotFound)?;

        if let Some(key) = auth::any_api_key(&self.db, outbound_user).await {
            self.webhook.enqueue(&outbound_final, key.id);
        }
        if let Some(key) = auth::any_api_key(&self.db, inbound_user).await {
            self.webhook.enqueue(&inbound_final, key.id);
        }

        Ok(outbound_final)
    }

    async fn settle_external(
        &self,
        outbound: Transaction,
        payment_request: &str,
    ) -> Result<Transaction, Error> {
        let sent = self.lightning.send_payment_sync(payment_request).await?;

        if !sent.payment_error.is_empty() {
            let mut data_tx = self.db.begin().await.unwrap();
            store::offchain::mark_flopped(&mut data_tx, outbound.id(), &sent.payment_error)
                .await?;
            data_tx.commit().await.unwrap();
            return Err(Error::PaymentFailed(sent.payment_error));
        }

        let preimage = sent
            .payment_preimage
            .expect("a payment without a payment_error always has a preimage");

        let mut data_tx = self.db.begin().await.unwrap();
        let completed = store::offchain::mark_completed(&mut data_tx, outbound.id(), &preimage)
            .await?;
        data_tx.commit().await.unwrap();

        if let Some(key) = auth::any_api_key(&self.db, completed.common.user_id).await {
            self.webhook.enqueue(&completed, key.id);
        }

        Ok(completed)
    }

    pub async fn create_invoice(
        &self,
        user_id: user::Id,
        amount_sat: Sats,
        memo: Option<String>,
        description: Option<String>,
        callback_url: Option<String>,
        customer_order_id: Option<String>,
    ) -> Result<Transaction, Error> {
        if amount_sat.0 <= 0 || amount_sat.0 > self.max_amount_sat_per_invoice.0 {
            return Err(Error::InvalidAmount);
        }
        if let Some(memo) = &memo {
            if memo.len() > self.max_memo_len {
                return Err(Error::MemoTooLong);
            }
        }

        let added = self
            .lightning
            .add_invoice(memo.as_deref().unwrap_or(""), amount_sat)
            .await?;

        let mut data_tx = self.db.begin().await.unwrap();
        let inserted = store::insert(
            &mut data_tx,
            store::NewTransaction {
                user_id,
                direction: Direction::Inbound,
                amount_milli_sat: Some(amount_sat.msats()),
                description,
                memo,
                callback_url,
                customer_order_id,
                expiry_seconds: Some(added.expiry_seconds),
                kind: store::NewKind::Offchain(store::NewOffchain {
                    payment_request: added.payment_request,
                    hashed_preimage: added.r_hash,
                }),
            },
        )
        .await?;
        data_tx.commit().await.unwrap();

        Ok(inserted)
    }

    pub async fn withdraw_onchain(
        &self,
        user_id: user::Id,
        amount_sat: Option<Sats>,
        address: Address,
        target_conf: i32,
        sat_per_byte: i64,
        send_all: bool,
        description: Option<String>,
    ) -> Result<Transaction, Error> {
        let current_balance = balance::get(&self.db, user_id).await?;

        let withdrawal_amount = if send_all {
            current_balance.sats()
        } else {
            let amount = amount_sat.ok_or(Error::InvalidAmount)?;
            if amount.0 <= 0 {
                return Err(Error::InvalidAmount);
            }
            amount
        };

        if current_balance.sats().0 < withdrawal_amount.0 {
            return Err(Error::InsufficientBalance);
        }

        // `send_all` is never forwarded past this point: the node always sees a concrete amount,
        // never a "drain the wallet" flag.
        let txid: TxId = self
            .lightning
            .send_coins(&address, withdrawal_amount, target_conf, sat_per_byte)
            .await?;

        let verbose = self.bitcoin.get_raw_transaction_verbose(&txid).await?;
        let vout = verbose
            .vout
            .iter()
            .find(|out| out.value_sat == withdrawal_amount.0)
            .unwrap_or_else(|| {
                panic!(
                    "sent transaction {} has no output matching withdrawal amount {} sat",
                    txid, withdrawal_amount.0
                )
            });

        let mut data_tx = self.db.begin().await.unwrap();
        let inserted = store::insert(
            &mut data_tx,
            store::NewTransaction {
                user_id,
                direction: Direction::Outbound,
                amount_milli_sat: Some(withdrawal_amount.msats()),
                description,
                memo: None,
                callback_url: None,
                customer_order_id: None,
                expiry_seconds: None,
                kind: store::NewKind::Onchain(store::NewOnchain {
                    address,
                    txid: Some(txid),
                    vout: Some(vout.n as i32),
                }),
            },
        )
        .await?;
        data_tx.commit().await.unwrap();

        Ok(inserted)
    }

    pub async fn deposit(
        &self,
        user_id: user::Id,
        description: Option<String>,
    ) -> Result<Transaction, Error> {
        let address = self.lightning.new_address().await?;

        let mut data_tx = self.db.begin().await.unwrap();
        let inserted = store::insert(
            &mut data_tx,
            store::NewTransaction {
                user_id,
                direction: Direction::Inbound,
                amount_milli_sat: None,
                description,
                memo: None,
                callback_url: None,
                customer_order_id: None,
                expiry_seconds: None,
                kind: store::NewKind::Onchain(store::NewOnchain {
                    address,
                    txid: None,
                    vout: None,
                }),
            },
        )
        .await?;
        data_tx.commit().await.unwrap();

        Ok(inserted)
    }

    pub async fn get_or_create_deposit(
        &self,
        user_id: user::Id,
        force_new: bool,
        description: Option<String>,
    ) -> Result<Transaction, Error> {
        if force_new {
            return self.deposit(user_id, description).await;
        }

        match store::find_latest_unfunded_deposit(&self.db, user_id).await {
            Some(existing) => Ok(existing),
            None => self.deposit(user_id, description).await,
        }
    }
}
