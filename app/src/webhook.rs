//! Merchant callback delivery. Dispatch is asynchronous and detached from the ledger operation
//! that triggered it: callers enqueue a job after their transaction commits, and a single
//! dedicated worker task drains the queue with retries. A full queue drops the job and logs an
//! alert rather than blocking the caller.

use crate::{auth::ApiKeyId, ledger::Transaction};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::mpsc;

type HmacSha256 = Hmac<Sha256>;

struct Job {
    callback_url: String,
    api_key_id: ApiKeyId,
    payload: serde_json::Value,
}

#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
}

impl Dispatcher {
    pub fn start(client: reqwest::Client, retry_base: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(crate::swallow_panic(worker(client, retry_base, rx)));
        Self { tx }
    }

    /// Enqueues delivery of `tx`'s state to its callback URL, signed with `api_key_id`. No-op if
    /// `tx` has no callback URL. Must only be called after the transaction that produced this
    /// state has committed.
    pub fn enqueue(&self, tx: &Transaction, api_key_id: ApiKeyId) {
        let Some(callback_url) = tx.common.callback_url.clone() else {
            return;
        };

        let hash = sign(api_key_id, tx.id());
        let payload = serde_json::json!({
            "payment": tx.to_json(),
            "hash": hash,
        });

        let job = Job {
            callback_url,
            api_key_id,
            payload,
        };

        if self.tx.try_send(job).is_err() {
            log::error!(
                "webhook queue full, dropping callback for transaction {:?} (api key {:?})",
                tx.id(),
                api_key_id,
            );
        }
    }
}

fn sign(api_key_id: ApiKeyId, tx_id: crate::ledger::Id) -> String {
    let key_hash = Sha256::digest(api_key_id.0.as_bytes());
    let mut mac =
        HmacSha256::new_from_slice(&key_hash).expect("hmac accepts a key of any length");
    mac.update(tx_id.0.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

const MAX_ATTEMPTS: u32 = 5;

async fn worker(client: reqwest::Client, retry_base: Duration, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.recv().await {
        let client = client.clone();
        let retry_base = retry_base;
        tokio::spawn(crate::swallow_panic(deliver(client, retry_base, job)));
    }
}

async fn deliver(client: reqwest::Client, retry_base: Duration, job: Job) {
    for attempt in 0..MAX_ATTEMPTS {
        let result = client
            .post(&job.callback_url)
            .header("Content-Type", "application/json")
            .json(&job.payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        match result {
            Ok(_) => return,
            Err(e) if attempt + 1 == MAX_ATTEMPTS => {
                log::warn!(
                    "webhook delivery to {} failed after {} attempts, giving up: {:?}",
                    job.callback_url,
                    MAX_ATTEMPTS,
                    e
                );
                return;
            }
            Err(e) => {
                log::warn!(
                    "webhook delivery to {} failed (attempt {}/{}): {:?}",
                    job.callback_url,
                    attempt + 1,
                    MAX_ATTEMPTS,
                    e
                );
                tokio::time::sleep(retry_base * 2u32.pow(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_for_the_same_key_and_transaction() {
        let key_id = ApiKeyId(uuid::Uuid::nil());
        let tx_id = crate::ledger::Id(42);
        assert_eq!(sign(key_id, tx_id), sign(key_id, tx_id));
    }

    #[test]
    fn sign_differs_across_api_keys() {
        let tx_id = crate::ledger::Id(42);
        let a = sign(ApiKeyId(uuid::Uuid::nil()), tx_id);
        let b = sign(ApiKeyId(uuid::Uuid::new_v4()), tx_id);
        assert_ne!(a, b);
    }

    #[test]
    fn sign_differs_across_transactions() {
        let key_id = ApiKeyId(uuid::Uuid::nil());
        let a = sign(key_id, crate::ledger::Id(1));
        let b = sign(key_id, crate::ledger::Id(2));
        assert_ne!(a, b);
    }

    #[test]
    fn sign_output_is_lowercase_hex() {
        let hash = sign(ApiKeyId(uuid::Uuid::nil()), crate::ledger::Id(1));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
