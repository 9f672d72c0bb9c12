//! Interface to the Bitcoin node backing onchain settlement. `RpcBitcoin` talks JSON-RPC for
//! point lookups and ZMQ for the two push feeds the listeners subscribe to.

use crate::btc::TxId;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("bitcoin node request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("bitcoin node rejected the call: {0}")]
    Rpc(String),
}

#[derive(Debug, Clone)]
pub struct VerboseOutput {
    pub n: u32,
    pub value_sat: i64,
    pub script_pub_key_hex: String,
}

#[derive(Debug, Clone)]
pub struct VerboseTransaction {
    pub confirmations: u32,
    pub vout: Vec<VerboseOutput>,
}

#[derive(Debug, Clone)]
pub struct RawTransaction {
    pub txid: TxId,
    pub vout: Vec<VerboseOutput>,
}

/// A new-block notification off the ZMQ `rawblock` feed. Carries no data of its own; it only
/// tells the Block Listener to re-scan pending onchain rows against the current tip height.
#[derive(Debug, Clone, Copy)]
pub struct RawBlock;

/// An abstraction over the Bitcoin node. The concrete implementation (`RpcBitcoin`) talks to a
/// Bitcoin Core-compatible JSON-RPC endpoint; this indirection exists so the listeners can be
/// tested against a fake.
#[async_trait]
pub trait Bitcoin: Send + Sync {
    async fn get_raw_transaction_verbose(
        &self,
        txid: &TxId,
    ) -> Result<VerboseTransaction, NodeError>;

    async fn get_block_count(&self) -> Result<i32, NodeError>;

    /// Subscribes to raw mempool/block-included transactions (ZMQ `rawtx`).
    fn subscribe_raw_transactions(&self) -> BoxStream<'static, RawTransaction>;

    /// Subscribes to raw connected blocks (ZMQ `rawblock`).
    fn subscribe_raw_blocks(&self) -> BoxStream<'static, RawBlock>;
}

pub struct RpcBitcoin {
    client: reqwest::Client,
    rpc_endpoint: url::Url,
    rpc_user: String,
    rpc_password: String,
    zmq_raw_tx_endpoint: String,
    zmq_raw_block_endpoint: String,
    next_id: AtomicU64,
}

impl RpcBitcoin {
    pub fn new(
        rpc_endpoint: url::Url,
        rpc_user: String,
        rpc_password: String,
        zmq_raw_tx_endpoint: String,
        zmq_raw_block_endpoint: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_endpoint,
            rpc_user,
            rpc_password,
            zmq_raw_tx_endpoint,
            zmq_raw_block_endpoint,
            next_id: AtomicU64::new(0),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, NodeError> {
        #[derive(Deserialize)]
        struct RpcError {
            message: String,
        }

        #[derive(Deserialize)]
        struct Response<T> {
            result: Option<T>,
            error: Option<RpcError>,
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let resp: Response<T> = self
            .client
            .post(self.rpc_endpoint.clone())
            .basic_auth(&self.rpc_user, Some(&self.rpc_password))
            .json(&json!({ "jsonrpc": "1.0", "id": id, "method": method, "params": params }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match (resp.result, resp.error) {
            (Some(result), None) => Ok(result),
            (_, Some(error)) => Err(NodeError::Rpc(error.message)),
            (None, None) => Err(NodeError::Rpc("empty response".to_string())),
        }
    }
}

#[async_trait]
impl Bitcoin for RpcBitcoin {
    async fn get_raw_transaction_verbose(
        &self,
        txid: &TxId,
    ) -> Result<VerboseTransaction, NodeError> {
        let resp: rpc::RawTransactionVerbose = self
            .call(
                "getrawtransaction",
                json!([txid.to_string(), true]),
            )
            .await?;

        Ok(VerboseTransaction {
            confirmations: resp.confirmations.unwrap_or(0),
            vout: resp
                .vout
                .into_iter()
                .map(|out| VerboseOutput {
                    n: out.n,
                    value_sat: (out.value * 100_000_000.0).round() as i64,
                    script_pub_key_hex: out.script_pub_key.hex,
                })
                .collect(),
        })
    }

    async fn get_block_count(&self) -> Result<i32, NodeError> {
        self.call("getblockcount", json!([])).await
    }

    fn subscribe_raw_transactions(&self) -> BoxStream<'static, RawTransaction> {
        zmq::subscribe_raw_transactions(self.zmq_raw_tx_endpoint.clone())
    }

    fn subscribe_raw_blocks(&self) -> BoxStream<'static, RawBlock> {
        zmq::subscribe_raw_blocks(self.zmq_raw_block_endpoint.clone())
    }
}

mod rpc {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub(super) struct RawTransactionVerbose {
        pub confirmations: Option<u32>,
        pub vout: Vec<Vout>,
    }

    #[derive(Deserialize)]
    pub(super) struct Vout {
        pub n: u32,
        pub value: f64,
        #[serde(rename = "scriptPubKey")]
        pub script_pub_key: ScriptPubKey,
    }

    #[derive(Deserialize)]
    pub(super) struct ScriptPubKey {
        pub hex: String,
    }
}

/// Bridges the Bitcoin node's ZMQ `rawtx`/`rawblock` publishers into `BoxStream`s of parsed
/// values. Modeled as its own module since it owns a raw socket rather than an RPC connection.
mod zmq {
    use super::{RawBlock, RawTransaction, VerboseOutput};
    use crate::btc::TxId;
    use bitcoin::consensus::encode::deserialize;
    use bitcoin::Transaction as RawTx;
    use futures::stream::BoxStream;
    use std::str::FromStr;

    pub(super) fn subscribe_raw_transactions(endpoint: String) -> BoxStream<'static, RawTransaction> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);

        tokio::task::spawn_blocking(move || {
            let ctx = zmq::Context::new();
            let socket = match ctx.socket(zmq::SUB) {
                Ok(socket) => socket,
                Err(e) => {
                    log::error!("failed to create zmq socket for {}: {:?}", endpoint, e);
                    return;
                }
            };
            if let Err(e) = socket.connect(&endpoint) {
                log::error!("failed to connect to zmq endpoint {}: {:?}", endpoint, e);
                return;
            }
            if let Err(e) = socket.set_subscribe(b"rawtx") {
                log::error!("failed to subscribe to rawtx: {:?}", e);
                return;
            }

            loop {
                let parts = match socket.recv_multipart(0) {
                    Ok(parts) => parts,
                    Err(e) => {
                        log::warn!("zmq recv error on rawtx: {:?}", e);
                        break;
                    }
                };
                let Some(payload) = parts.get(1) else { continue };
                let raw: RawTx = match deserialize(payload) {
                    Ok(raw) => raw,
                    Err(e) => {
                        log::warn!("failed to deserialize raw transaction from zmq: {:?}", e);
                        continue;
                    }
                };

                let txid = TxId::from_str(&raw.txid().to_string()).unwrap();
                let vout = raw
                    .output
                    .iter()
                    .enumerate()
                    .map(|(n, out)| VerboseOutput {
                        n: n as u32,
                        value_sat: out.value as i64,
                        script_pub_key_hex: hex::encode(out.script_pubkey.as_bytes()),
                    })
                    .collect();

                if tx.blocking_send(RawTransaction { txid, vout }).is_err() {
                    break;
                }
            }
        });

        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    pub(super) fn subscribe_raw_blocks(endpoint: String) -> BoxStream<'static, RawBlock> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        tokio::task::spawn_blocking(move || {
            let ctx = zmq::Context::new();
            let socket = match ctx.socket(zmq::SUB) {
                Ok(socket) => socket,
                Err(e) => {
                    log::error!("failed to create zmq socket for {}: {:?}", endpoint, e);
                    return;
                }
            };
            if let Err(e) = socket.connect(&endpoint) {
                log::error!("failed to connect to zmq endpoint {}: {:?}", endpoint, e);
                return;
            }
            if let Err(e) = socket.set_subscribe(b"rawblock") {
                log::error!("failed to subscribe to rawblock: {:?}", e);
                return;
            }

            loop {
                let parts = match socket.recv_multipart(0) {
                    Ok(parts) => parts,
                    Err(e) => {
                        log::warn!("zmq recv error on rawblock: {:?}", e);
                        break;
                    }
                };
                if parts.get(1).is_none() {
                    continue;
                }

                // The payload itself carries the new block's header, but the Block Listener only
                // needs to know a block arrived; it re-derives the tip height via `GetBlockCount`
                // and re-checks every pending row against it.
                if tx.blocking_send(RawBlock).is_err() {
                    break;
                }
            }
        });

        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }
}
