use crate::{
    auth,
    database::Database,
    ledger::store,
    lightning::{InvoiceState, InvoiceUpdate},
    webhook::Dispatcher,
};
use futures::{stream::BoxStream, StreamExt};

/// Drains `updates` until the node closes the subscription. Terminates on `ACCEPTED`/`CANCELED`
/// states, which this processor does not support (it never issues hold invoices), since seeing
/// one means a node is running with features this ledger cannot account for.
pub async fn run(db: Database, webhook: Dispatcher, mut updates: BoxStream<'static, InvoiceUpdate>) {
    while let Some(update) = updates.next().await {
        match update.state {
            InvoiceState::Open => {}

            InvoiceState::Settled => {
                let Some(row) = store::find_inbound_by_payment_request(&db, &update.payment_request).await else {
                    log::warn!(
                        "settled invoice for unknown payment request {:?}",
                        update.payment_request
                    );
                    continue;
                };

                if let Some(requested) = row.common.amount_milli_sat {
                    if update.amt_paid_msat > requested {
                        log::warn!(
                            "invoice {:?} overpaid: requested {} msat, received {} msat",
                            row.id(),
                            requested.0,
                            update.amt_paid_msat.0,
                        );
                    }
                }

                let preimage = update.r_preimage.clone().unwrap_or_default();

                let mut data_tx = db.begin().await.unwrap();
                let completed = match store::offchain::mark_completed_with_paid_amount(
                    &mut data_tx,
                    row.id(),
                    &preimage,
                    update.amt_paid_msat,
                )
                .await
                {
                    Ok(completed) => completed,
                    Err(e) => {
                        log::error!("failed to mark invoice {:?} completed: {:?}", row.id(), e);
                        continue;
                    }
                };
                data_tx.commit().await.unwrap();

                if let Some(key) = auth::any_api_key(&db, completed.common.user_id).await {
                    webhook.enqueue(&completed, key.id);
                }
            }

            InvoiceState::Accepted | InvoiceState::Canceled => {
                panic!(
                    "received hold-invoice state {:?} for payment request {:?}, which this processor does not support",
                    update.state, update.payment_request,
                );
            }
        }
    }
}
