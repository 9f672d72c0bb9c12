pub mod store;
pub mod transaction;

pub use transaction::{
    Common, Direction, Id, Kind, Offchain, OffchainFields, OffchainStatus, Onchain,
    OnchainFields, Transaction, TransactionJson, WrongKind,
};
