//! Chain identifiers and account addresses shared by both ledgers.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "bincode")]
use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "json")]
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::IdentityError;

/// Messaging-layer endpoint identifier of a ledger.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "json", serde(transparent))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u32);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChainId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// 32-byte universal account address.
///
/// Accounts of 32-byte ledgers use every byte. 20-byte EVM addresses are
/// left-padded with twelve zero bytes, the same way peers are registered on
/// the messaging layer.
#[cfg_attr(feature = "json", derive(SerializeDisplay, DeserializeFromStr))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// Width in bytes.
    pub const LEN: usize = 32;

    /// Number of leading zero bytes in a padded EVM address.
    const EVM_PADDING: usize = Self::LEN - EvmAddress::LEN;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the embedded EVM address if the upper twelve bytes are zero.
    pub fn as_evm(&self) -> Option<EvmAddress> {
        let (padding, tail) = self.0.split_at(Self::EVM_PADDING);
        if padding.iter().any(|b| *b != 0) {
            return None;
        }
        let mut out = [0u8; EvmAddress::LEN];
        out.copy_from_slice(tail);
        Some(EvmAddress(out))
    }
}

impl From<EvmAddress> for Address {
    fn from(value: EvmAddress) -> Self {
        let mut out = [0u8; Self::LEN];
        out[Self::EVM_PADDING..].copy_from_slice(&value.0);
        Self(out)
    }
}

impl From<[u8; 32]> for Address {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl fmt::Display for Address {
    /// Padded EVM addresses print as `0x`-prefixed hex, everything else as base58.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_evm() {
            Some(evm) => write!(f, "{evm}"),
            None => write!(f, "{}", bs58::encode(self.0).into_string()),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = IdentityError;

    /// Accepts `0x` + 40 hex chars (EVM, padded), `0x` + 64 hex chars
    /// (full width), or a base58 string decoding to 32 bytes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentityError::EmptyIdentity);
        }
        let bytes = match s.strip_prefix("0x") {
            Some(digits) => hex::decode(digits)?,
            None => bs58::decode(s).into_vec()?,
        };
        match bytes.len() {
            EvmAddress::LEN => {
                let mut evm = [0u8; EvmAddress::LEN];
                evm.copy_from_slice(&bytes);
                Ok(EvmAddress(evm).into())
            }
            Self::LEN => {
                let mut out = [0u8; Self::LEN];
                out.copy_from_slice(&bytes);
                Ok(Self(out))
            }
            actual => Err(IdentityError::InvalidLength {
                expected: Self::LEN,
                actual,
            }),
        }
    }
}

/// 20-byte EVM account address, as carried in verification requests.
#[cfg_attr(feature = "json", derive(SerializeDisplay, DeserializeFromStr))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    /// Width in bytes.
    pub const LEN: usize = 20;
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmAddress({self})")
    }
}

impl FromStr for EvmAddress {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentityError::EmptyIdentity);
        }
        let digits = s.strip_prefix("0x").ok_or(IdentityError::UnsupportedFormat)?;
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
