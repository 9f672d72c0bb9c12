use crate::{
    auth,
    bitcoin::{Bitcoin, RawBlock},
    database::Database,
    ledger::{store, Kind},
    webhook::Dispatcher,
};
use futures::{stream::BoxStream, StreamExt};
use std::sync::Arc;

/// Drains `blocks` until the node closes the subscription. Each block is only a trigger to
/// re-check every pending onchain row against the current tip; a mismatch between a confirmed
/// transaction's output value and what was recorded at receipt time is a programming error and
/// brings the process down rather than silently corrupting the ledger.
pub async fn run(
    db: Database,
    bitcoin: Arc<dyn Bitcoin>,
    webhook: Dispatcher,
    confirmation_threshold: u32,
    mut blocks: BoxStream<'static, RawBlock>,
) {
    while blocks.next().await.is_some() {
        let tip_height = match bitcoin.get_block_count().await {
            Ok(height) => height,
            Err(e) => {
                log::error!("failed to fetch block count: {:?}", e);
                continue;
            }
        };

        for row in store::list_unconfirmed_onchain(&db).await {
            let Kind::Onchain(fields) = &row.kind else {
                continue;
            };
            let Some(txid) = fields.txid else { continue };
            let Some(vout) = fields.vout else { continue };

            let verbose = match bitcoin.get_raw_transaction_verbose(&txid).await {
                Ok(v) => v,
                Err(e) => {
                    log::error!("failed to fetch transaction {} verbose data: {:?}", txid, e);
                    continue;
                }
            };

            if verbose.confirmations < confirmation_threshold {
                continue;
            }

            let output = verbose.vout.iter().find(|o| o.n as i32 == vout).unwrap_or_else(|| {
                panic!(
                    "transaction {} no longer reports output {} that it carried at receipt time",
                    txid, vout
                )
            });

            let expected_sat = row.common.amount_milli_sat.map(|m| m.sats_floor().0);
            if Some(output.value_sat) != expected_sat {
                panic!(
                    "transaction {} output {} is worth {} sat, but the ledger recorded {:?} sat at receipt time",
                    txid, vout, output.value_sat, expected_sat,
                );
            }

            let confirmation_height = tip_height - verbose.confirmations as i32;

            let mut data_tx = db.begin().await.unwrap();
            match store::onchain::mark_confirmed(&mut data_tx, row.id(), confirmation_height).await {
                Ok(confirmed) => {
                    data_tx.commit().await.unwrap();
                    if let Some(key) = auth::any_api_key(&db, confirmed.common.user_id).await {
                        webhook.enqueue(&confirmed, key.id);
                    }
                }
                Err(e) => log::error!("failed to mark transaction {:?} confirmed: {:?}", row.id(), e),
            }
        }
    }
}
