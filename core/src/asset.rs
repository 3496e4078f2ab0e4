use std::fmt;
use std::str::FromStr;

#[cfg(feature = "bincode")]
use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::IdentityError;
use crate::identity::Address;

/// What kind of value an escrow or payout moves.
#[cfg_attr(feature = "json", derive(SerializeDisplay, DeserializeFromStr))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum TokenKind {
    /// Native coin of the ledger, in its smallest unit (lamports, wei).
    #[default]
    Native,
    /// Contract/program-based fungible token identified by its mint.
    Fungible(Address),
}

impl TokenKind {
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }

    /// Mint address of a fungible token.
    pub fn mint(&self) -> Option<&Address> {
        match self {
            Self::Native => None,
            Self::Fungible(mint) => Some(mint),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Fungible(mint) => write!(f, "fungible:{mint}"),
        }
    }
}

impl FromStr for TokenKind {
    type Err = IdentityError;

    /// Accepts `native` or `fungible:<mint address>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.trim().splitn(2, ':').collect::<Vec<_>>();
        match parts.as_slice() {
            ["native"] => Ok(Self::Native),
            ["fungible", mint] => Ok(Self::Fungible(mint.parse()?)),
            _ => Err(IdentityError::UnsupportedFormat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!("native".parse::<TokenKind>().unwrap(), TokenKind::Native);

        let usdc = TokenKind::Fungible(Address([7u8; 32]));
        assert_eq!(usdc.to_string().parse::<TokenKind>().unwrap(), usdc);
        assert_eq!(usdc.mint(), Some(&Address([7u8; 32])));
        assert!(!usdc.is_native());

        assert!("nft:abc".parse::<TokenKind>().is_err());
    }
}
