use crate::{
    bitcoin::RawTransaction,
    btc::{self, Address, Sats},
    database::Database,
    ledger::{store, Direction, Kind},
    webhook::Dispatcher,
};
use futures::{stream::BoxStream, StreamExt};

/// Drains `txs` until the node closes the subscription. Unparseable scripts and outputs that
/// don't match a tracked address are skipped; everything else is fail-soft, logged and continued.
///
/// Receipt is not a user-visible terminal state (`block::run` fires the callback at confirmation
/// time), so this listener never dispatches webhooks itself; `_webhook` is threaded through only
/// to keep this listener's signature uniform with its siblings.
pub async fn run(db: Database, _webhook: Dispatcher, mut txs: BoxStream<'static, RawTransaction>) {
    while let Some(raw_tx) = txs.next().await {
        for output in &raw_tx.vout {
            let Ok(script_bytes) = hex::decode(&output.script_pub_key_hex) else {
                continue;
            };
            let script = bitcoin::Script::from(script_bytes);
            let Some(address) = Address::from_script(&script, btc::network()) else {
                continue;
            };

            let existing = store::find_by_address(&db, &address).await;
            if existing.is_empty() {
                continue;
            }

            let amount = Sats(output.value_sat);
            let vout = output.n as i32;

            let unfunded = existing.iter().find(|row| match &row.kind {
                Kind::Onchain(fields) => fields.txid.is_none(),
                Kind::Offchain(_) => false,
            });

            let mut data_tx = db.begin().await.unwrap();
            let result = match unfunded {
                Some(row) => {
                    store::onchain::record_receipt(&mut data_tx, row.id(), raw_tx.txid, vout, amount)
                        .await
                }
                None => {
                    // Every row for this address already has a txid: the user reused the address
                    // without pre-registering a fresh deposit. Model it as a new receipt on the
                    // same address for the same user.
                    let user_id = existing[0].common.user_id;
                    store::insert(
                        &mut data_tx,
                        store::NewTransaction {
                            user_id,
                            direction: Direction::Inbound,
                            amount_milli_sat: Some(amount.msats()),
                            description: None,
                            memo: None,
                            callback_url: None,
                            customer_order_id: None,
                            expiry_seconds: None,
                            kind: store::NewKind::Onchain(store::NewOnchain {
                                address: address.clone(),
                                txid: Some(raw_tx.txid),
                                vout: Some(vout),
                            }),
                        },
                    )
                    .await
                }
            };

            match result {
                Ok(_tx) => {
                    data_tx.commit().await.unwrap();
                }
                Err(e) => {
                    log::error!(
                        "failed to record receipt for address {} (txid {}, vout {}): {:?}",
                        address,
                        raw_tx.txid,
                        vout,
                        e
                    );
                }
            }
        }
    }
}
