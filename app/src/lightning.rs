//! Interface to the Lightning node this processor is custodying funds through. The node also owns
//! the onchain wallet (`NewAddress`/`SendCoins`), matching LND's design of bundling both.

use crate::{
    btc::{Address, MilliSats, Sats, TxId},
    hex::Hex,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("lightning node request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("lightning node returned malformed data: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone)]
pub struct AddedInvoice {
    pub payment_request: String,
    pub r_hash: String,
    pub expiry_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceState {
    Open,
    Settled,
    Accepted,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct InvoiceDetails {
    pub state: InvoiceState,
    pub amt_paid_msat: MilliSats,
    pub payment_request: String,
    pub r_preimage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvoiceUpdate {
    pub state: InvoiceState,
    pub amt_paid_msat: MilliSats,
    pub payment_request: String,
    pub r_preimage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentPayment {
    /// Non-empty when the payment failed; LND reports failures this way instead of an error.
    pub payment_error: String,
    pub payment_preimage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DecodedPayReq {
    pub num_satoshis: Sats,
    pub payment_hash: String,
    pub description: String,
    pub expiry_seconds: i64,
    pub destination: String,
}

/// An abstraction over the Lightning node we custody funds through. The concrete implementation
/// (`LndLightning`) speaks LND's REST gateway; this indirection exists so the orchestrator and
/// listeners can be tested against a fake.
#[async_trait]
pub trait Lightning: Send + Sync {
    async fn add_invoice(&self, memo: &str, value_sat: Sats) -> Result<AddedInvoice, NodeError>;
    async fn lookup_invoice(&self, r_hash: &str) -> Result<InvoiceDetails, NodeError>;
    async fn send_payment_sync(&self, payment_request: &str) -> Result<SentPayment, NodeError>;
    async fn decode_pay_req(&self, payment_request: &str) -> Result<DecodedPayReq, NodeError>;
    async fn new_address(&self) -> Result<Address, NodeError>;
    async fn send_coins(
        &self,
        addr: &Address,
        amount: Sats,
        target_conf: i32,
        sat_per_byte: i64,
    ) -> Result<TxId, NodeError>;

    /// Opens a long-lived subscription to invoice state updates. The stream ends when the
    /// underlying connection to the node is lost.
    fn subscribe_invoice_updates(&self) -> BoxStream<'static, InvoiceUpdate>;
}

#[derive(Clone)]
pub struct LndLightning {
    client: reqwest::Client,
    rest_endpoint: url::Url,
    macaroon: Hex,
}

impl LndLightning {
    pub fn connect(
        rest_endpoint: url::Url,
        macaroon_path: &str,
        cert_path: &str,
    ) -> Result<Self, NodeError> {
        let macaroon = std::fs::read(macaroon_path).unwrap_or_else(|e| {
            panic!("failed to read macaroon at {:?}: {:?}", macaroon_path, e)
        });
        let cert_pem = std::fs::read(cert_path)
            .unwrap_or_else(|e| panic!("failed to read tls cert at {:?}: {:?}", cert_path, e));
        let cert = reqwest::Certificate::from_pem(&cert_pem)
            .unwrap_or_else(|e| panic!("tls.cert is not a valid PEM certificate: {:?}", e));

        let client = reqwest::Client::builder()
            .add_root_certificate(cert)
            .build()?;

        Ok(Self {
            client,
            rest_endpoint,
            macaroon: Hex::encode(&macaroon),
        })
    }

    fn url(&self, path: &str) -> url::Url {
        self.rest_endpoint.join(path).expect("invalid LND REST path")
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("Grpc-Metadata-macaroon", self.macaroon.as_str())
    }
}

#[async_trait]
impl Lightning for LndLightning {
    async fn add_invoice(&self, memo: &str, value_sat: Sats) -> Result<AddedInvoice, NodeError> {
        let resp: rest::AddInvoiceResponse = self
            .request(reqwest::Method::POST, "v1/invoices")
            .json(&rest::AddInvoiceRequest {
                memo: memo.to_string(),
                value: value_sat.0,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(AddedInvoice {
            payment_request: resp.payment_request,
            r_hash: resp.r_hash,
            expiry_seconds: resp.expiry.unwrap_or(3600),
        })
    }

    async fn lookup_invoice(&self, r_hash: &str) -> Result<InvoiceDetails, NodeError> {
        let resp: rest::Invoice = self
            .request(reqwest::Method::GET, &format!("v1/invoice/{}", r_hash))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.into_details())
    }

    async fn send_payment_sync(&self, payment_request: &str) -> Result<SentPayment, NodeError> {
        let resp: rest::SendResponse = self
            .request(reqwest::Method::POST, "v1/channels/transactions")
            .json(&rest::SendRequest {
                payment_request: payment_request.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(SentPayment {
            payment_error: resp.payment_error,
            payment_preimage: (!resp.payment_preimage.is_empty()).then_some(resp.payment_preimage),
        })
    }

    async fn decode_pay_req(&self, payment_request: &str) -> Result<DecodedPayReq, NodeError> {
        let resp: rest::PayReq = self
            .request(
                reqwest::Method::GET,
                &format!("v1/payreq/{}", payment_request),
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(DecodedPayReq {
            num_satoshis: Sats(resp.num_satoshis),
            payment_hash: resp.payment_hash,
            description: resp.description,
            expiry_seconds: resp.expiry,
            destination: resp.destination,
        })
    }

    async fn new_address(&self) -> Result<Address, NodeError> {
        let resp: rest::NewAddressResponse = self
            .request(reqwest::Method::GET, "v1/newaddress?type=0")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Address::from_str(&resp.address)
            .map_err(|e| NodeError::MalformedResponse(e.to_string()))
    }

    async fn send_coins(
        &self,
        addr: &Address,
        amount: Sats,
        target_conf: i32,
        sat_per_byte: i64,
    ) -> Result<TxId, NodeError> {
        let resp: rest::SendCoinsResponse = self
            .request(reqwest::Method::POST, "v1/transactions")
            .json(&rest::SendCoinsRequest {
                addr: addr.to_string(),
                amount: amount.0,
                target_conf,
                sat_per_vbyte: sat_per_byte,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        TxId::from_str(&resp.txid).map_err(|e| NodeError::MalformedResponse(e.to_string()))
    }

    fn subscribe_invoice_updates(&self) -> BoxStream<'static, InvoiceUpdate> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let client = self.client.clone();
        let url = self.url("v1/invoices/subscribe");
        let macaroon = self.macaroon.as_str().to_string();

        tokio::spawn(async move {
            let response = match client
                .get(url)
                .header("Grpc-Metadata-macaroon", macaroon)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    log::error!("failed to open invoice subscription: {:?}", e);
                    return;
                }
            };

            let mut buf = Vec::new();
            let mut stream = response.bytes_stream();
            use futures::StreamExt;

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        log::warn!("invoice subscription stream error: {:?}", e);
                        break;
                    }
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = std::str::from_utf8(&line).unwrap_or("").trim();
                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<rest::InvoiceSubscriptionMessage>(line) {
                        Ok(msg) => {
                            if tx.send(msg.result.into_update()).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => log::warn!("malformed invoice subscription message: {:?}", e),
                    }
                }
            }
        });

        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        }))
    }
}

mod rest {
    use super::{InvoiceDetails, InvoiceState, InvoiceUpdate};
    use crate::btc::MilliSats;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    pub(super) struct AddInvoiceRequest {
        pub memo: String,
        pub value: i64,
    }

    #[derive(Deserialize)]
    pub(super) struct AddInvoiceResponse {
        pub payment_request: String,
        pub r_hash: String,
        pub expiry: Option<i64>,
    }

    #[derive(Deserialize)]
    pub(super) struct Invoice {
        pub state: String,
        pub amt_paid_msat: String,
        pub payment_request: String,
        pub r_preimage: Option<String>,
    }

    impl Invoice {
        pub(super) fn into_details(self) -> InvoiceDetails {
            InvoiceDetails {
                state: parse_state(&self.state),
                amt_paid_msat: MilliSats(self.amt_paid_msat.parse().unwrap_or(0)),
                payment_request: self.payment_request,
                r_preimage: self.r_preimage.filter(|p| !p.is_empty()),
            }
        }
    }

    #[derive(Deserialize)]
    pub(super) struct InvoiceSubscriptionMessage {
        pub result: Invoice,
    }

    impl Invoice {
        pub(super) fn into_update(self) -> InvoiceUpdate {
            InvoiceUpdate {
                state: parse_state(&self.state),
                amt_paid_msat: MilliSats(self.amt_paid_msat.parse().unwrap_or(0)),
                payment_request: self.payment_request,
                r_preimage: self.r_preimage.filter(|p| !p.is_empty()),
            }
        }
    }

    fn parse_state(state: &str) -> InvoiceState {
        match state {
            "OPEN" => InvoiceState::Open,
            "SETTLED" => InvoiceState::Settled,
            "ACCEPTED" => InvoiceState::Accepted,
            "CANCELED" => InvoiceState::Canceled,
            other => {
                log::warn!("unrecognized invoice state {:?}, treating as open", other);
                InvoiceState::Open
            }
        }
    }

    #[derive(Serialize)]
    pub(super) struct SendRequest {
        pub payment_request: String,
    }

    #[derive(Deserialize)]
    pub(super) struct SendResponse {
        #[serde(default)]
        pub payment_error: String,
        #[serde(default)]
        pub payment_preimage: String,
    }

    #[derive(Deserialize)]
    pub(super) struct PayReq {
        #[serde(deserialize_with = "super::de_str_i64")]
        pub num_satoshis: i64,
        pub payment_hash: String,
        pub description: String,
        #[serde(deserialize_with = "super::de_str_i64")]
        pub expiry: i64,
        pub destination: String,
    }

    #[derive(Deserialize)]
    pub(super) struct NewAddressResponse {
        pub address: String,
    }

    #[derive(Serialize)]
    pub(super) struct SendCoinsRequest {
        pub addr: String,
        pub amount: i64,
        pub target_conf: i32,
        pub sat_per_vbyte: i64,
    }

    #[derive(Deserialize)]
    pub(super) struct SendCoinsResponse {
        pub txid: String,
    }
}

fn de_str_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
