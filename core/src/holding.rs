//! Deterministic holding addresses.
//!
//! Anyone can recompute where an escrow's funds live from the namespace and
//! the claim code alone. The derived address is a lookup key into the bank,
//! not an owned resource.

use sha2::{Digest, Sha256};

use crate::identity::Address;

/// Namespace used for escrow holding accounts unless configured otherwise.
pub const ESCROW_NAMESPACE: &str = "escrow";

/// `sha256(be32(len(namespace)) || namespace || key)`.
///
/// The length prefix keeps `("ab", "c")` and `("a", "bc")` apart.
pub fn derive_address(namespace: &str, key: &[u8]) -> Address {
    let mut hasher = Sha256::new();
    hasher.update((namespace.len() as u32).to_be_bytes());
    hasher.update(namespace.as_bytes());
    hasher.update(key);
    Address(hasher.finalize().into())
}

/// Holding address of the escrow locked under `claim_code`.
pub fn holding_address(namespace: &str, claim_code: &str) -> Address {
    derive_address(namespace, claim_code.as_bytes())
}
