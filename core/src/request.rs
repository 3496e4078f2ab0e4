//! Request ids: the cross-ledger correlation key of a claim code.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "bincode")]
use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde_with::{DeserializeFromStr, SerializeDisplay};
use sha3::{Digest, Keccak256};

use crate::error::IdentityError;

/// `keccak256(utf8(claim_code))`.
///
/// Both ledgers compute it independently, so a request and its response can
/// be correlated without the claim code ever crossing the wire.
#[cfg_attr(feature = "json", derive(SerializeDisplay, DeserializeFromStr))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub [u8; 32]);

impl RequestId {
    pub const LEN: usize = 32;

    pub fn from_claim_code(claim_code: &str) -> Self {
        Self(Keccak256::digest(claim_code.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({self})")
    }
}

impl FromStr for RequestId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)?;
        let arr: [u8; Self::LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| IdentityError::InvalidLength {
                    expected: Self::LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }
}
