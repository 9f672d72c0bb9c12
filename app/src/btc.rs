//! This module contains definitions for Bitcoin-specific entities and routines.

use std::ops::{Add, AddAssign, Sub, SubAssign};

#[cfg(all(feature = "mainnet", feature = "testnet"))]
compile_error!("mainnet and testnet cannot be enabled at the same time");

#[cfg(feature = "mainnet")]
const NETWORK: bitcoin::Network = bitcoin::Network::Bitcoin;

#[cfg(feature = "testnet")]
const NETWORK: bitcoin::Network = bitcoin::Network::Testnet;

#[cfg(all(not(feature = "mainnet"), not(feature = "testnet")))]
const NETWORK: bitcoin::Network = bitcoin::Network::Regtest;

pub use bitcoin::Address;
pub use bitcoin::Txid as TxId;

/// The network this binary was built for, selected via the `mainnet`/`testnet` features and
/// falling back to regtest.
pub fn network() -> bitcoin::Network {
    NETWORK
}

#[derive(Debug, Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq)]
pub struct MilliSats(pub i64);

#[derive(Debug, Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq)]
pub struct Sats(pub i64);

impl MilliSats {
    pub fn sats_floor(&self) -> Sats {
        Sats(self.0 / 1000)
    }
}

impl Add for MilliSats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for MilliSats {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for MilliSats {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl SubAssign for MilliSats {
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}

impl Sats {
    pub fn msats(self) -> MilliSats {
        MilliSats(self.0 * 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sats_and_msats_convert_losslessly_on_whole_sat_amounts() {
        assert_eq!(Sats(42).msats(), MilliSats(42_000));
        assert_eq!(MilliSats(42_000).sats_floor(), Sats(42));
    }

    #[test]
    fn sats_floor_truncates_towards_zero() {
        assert_eq!(MilliSats(1_999).sats_floor(), Sats(1));
        assert_eq!(MilliSats(-1_999).sats_floor(), Sats(-1));
    }

    #[test]
    fn milli_sats_add_and_sub_assign() {
        let mut balance = MilliSats(500);
        balance += MilliSats(250);
        assert_eq!(balance, MilliSats(750));
        balance -= MilliSats(1_000);
        assert_eq!(balance, MilliSats(-250));
    }
}
