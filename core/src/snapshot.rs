//! Binary snapshots of ledger records.
//!
//! Snapshots carry records only. Balances belong to the bank and are
//! restored, if at all, by whoever owns it.

use bincode::config::standard;
use bincode::{Decode, Encode};

use crate::bank::Bank;
use crate::coordinator::ClaimCoordinator;
use crate::endpoint::MessagingEndpoint;
use crate::error::SnapshotError;
use crate::escrow::{EscrowLedger, EscrowRecord};
use crate::verification::VerificationRecord;

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LedgerSnapshot {
    pub version: u8,
    pub taken_at: u64,
    pub records: Vec<EscrowRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CoordinatorSnapshot {
    pub version: u8,
    pub taken_at: u64,
    pub records: Vec<VerificationRecord>,
}

fn encode<T: Encode>(snapshot: &T) -> Result<Vec<u8>, SnapshotError> {
    Ok(bincode::encode_to_vec(snapshot, standard())?)
}

fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T, SnapshotError> {
    let (snapshot, _) = bincode::decode_from_slice(bytes, standard())?;
    Ok(snapshot)
}

fn check_version(version: u8) -> Result<(), SnapshotError> {
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    Ok(())
}

impl<B: Bank> EscrowLedger<B> {
    pub fn snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut records = self.records().cloned().collect::<Vec<_>>();
        records.sort_by(|a, b| a.claim_code.cmp(&b.claim_code));
        encode(&LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: self.now(),
            records,
        })
    }

    /// Replaces every record with those in `bytes`.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<u64, SnapshotError> {
        let snapshot: LedgerSnapshot = decode(bytes)?;
        check_version(snapshot.version)?;
        self.replace_records(snapshot.records);
        Ok(snapshot.taken_at)
    }
}

impl<B, E> ClaimCoordinator<B, E>
where
    B: Bank,
    E: MessagingEndpoint,
{
    pub fn snapshot(&self, taken_at: u64) -> Result<Vec<u8>, SnapshotError> {
        let mut records = self.records().cloned().collect::<Vec<_>>();
        records.sort_by_key(|r| r.request_id);
        encode(&CoordinatorSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at,
            records,
        })
    }

    pub fn restore(&mut self, bytes: &[u8]) -> Result<u64, SnapshotError> {
        let snapshot: CoordinatorSnapshot = decode(bytes)?;
        check_version(snapshot.version)?;
        self.replace_records(snapshot.records);
        Ok(snapshot.taken_at)
    }
}
