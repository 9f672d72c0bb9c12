//! The three push-driven listeners that advance the ledger from node-observed events: the
//! Invoice Listener, the Onchain Tx Listener, and the Block Listener. Each is a plain async
//! function meant to be `tokio::spawn`'d and `.await`'d on its `JoinHandle` by the binary, so that
//! a genuine panic inside one of them (a hold-invoice receipt, an output-value mismatch) takes
//! the whole process down instead of being silently retried.

pub mod block;
pub mod invoice;
pub mod onchain_tx;
