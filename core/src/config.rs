//! JSON deployment configuration for both ledgers.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::asset::TokenKind;
use crate::coordinator::CoordinatorConfig;
use crate::endpoint::FeeSchedule;
use crate::escrow::EscrowConfig;
use crate::identity::{Address, ChainId};

/// Directory holding one `<environment>.json` per deployment environment.
pub const DEPLOY_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../deploy");

/// Deserializes a deployment file.
pub fn load_config<P, T>(path: P) -> anyhow::Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("no deployment file at {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("malformed deployment file {}", path.display()))
}

/// Writes a deployment file, replacing any existing one.
pub fn save_config<P, T>(path: P, data: &T) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let path = path.as_ref();
    let mut writer = BufWriter::new(
        File::create(path)
            .with_context(|| format!("cannot write deployment file {}", path.display()))?,
    );
    serde_json::to_writer_pretty(&mut writer, data)?;
    writer
        .flush()
        .with_context(|| format!("deployment file {} left incomplete", path.display()))
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Testnet,
    Mainnet,
}

impl Environment {
    /// `<dir>/<environment>.json`.
    pub fn config_path(&self, dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(format!("{}.json", self.as_ref()))
    }
}

impl AsRef<str> for Environment {
    fn as_ref(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    /// Case-insensitive; accepts `local`, `testnet`/`test`, `mainnet`/`main`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "testnet" | "test" => Ok(Self::Testnet),
            "mainnet" | "main" => Ok(Self::Mainnet),
            other => anyhow::bail!("unknown environment {other:?}"),
        }
    }
}

/// Balance credited to an account when an in-memory ledger starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenesisBalance {
    pub account: Address,
    #[serde(default)]
    pub token: TokenKind,
    pub amount: u64,
}

/// The ledger holding escrows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub chain_id: ChainId,
    /// Manages the peer registry.
    pub admin: Address,
    /// Address this ledger's messaging endpoint sends from.
    pub endpoint_address: Address,
    /// Pays for verification responses.
    pub fee_payer: Address,
    pub fee_vault: Address,
    /// Price of messages sent from this ledger.
    pub outbound_fee: FeeSchedule,
    #[serde(default)]
    pub escrow: EscrowConfig,
    #[serde(default)]
    pub genesis: Vec<GenesisBalance>,
}

/// The ledger paying out claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationConfig {
    pub chain_id: ChainId,
    pub admin: Address,
    pub endpoint_address: Address,
    pub outbound_fee: FeeSchedule,
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub genesis: Vec<GenesisBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub environment: Environment,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
}

impl DeploymentConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config: Self = load_config(path.as_ref())?;
        config
            .validate()
            .with_context(|| format!("validating {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Cross-field checks serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        let (src, dst) = (&self.source, &self.destination);
        ensure!(
            src.chain_id != dst.chain_id,
            "source and destination share chain id {}",
            src.chain_id
        );
        ensure!(
            dst.coordinator.remote_chain == src.chain_id,
            "coordinator points at chain {}, source is {}",
            dst.coordinator.remote_chain,
            src.chain_id
        );
        ensure!(
            src.endpoint_address != dst.endpoint_address,
            "both ledgers use endpoint address {}",
            src.endpoint_address
        );

        let escrow = &src.escrow;
        ensure!(
            escrow.min_expiry_days >= 1 && escrow.min_expiry_days <= escrow.max_expiry_days,
            "expiry bounds {}..={} days are empty or start at zero",
            escrow.min_expiry_days,
            escrow.max_expiry_days
        );
        ensure!(escrow.max_claim_code_len > 0, "max_claim_code_len must be positive");
        ensure!(
            !escrow.holding_namespace.is_empty(),
            "holding_namespace must not be empty"
        );
        ensure!(
            dst.coordinator.request_ttl_secs > 0,
            "request_ttl_secs must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> DeploymentConfig {
        load_config(Environment::Local.config_path(DEPLOY_DIR)).unwrap()
    }

    #[test]
    fn shipped_local_config_is_valid() {
        let config = local();
        config.validate().unwrap();
        assert_eq!(config.environment, Environment::Local);
        assert_eq!(config.source.escrow, EscrowConfig::default());
        assert!(!config.source.genesis.is_empty());
    }

    #[test]
    fn validate_catches_miswiring() {
        let mut config = local();
        config.destination.coordinator.remote_chain = config.destination.chain_id;
        assert!(config.validate().is_err());

        let mut config = local();
        config.source.escrow.min_expiry_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_load() {
        let config = local();
        let path = std::env::temp_dir().join(format!("giftbridge-{}.json", std::process::id()));
        save_config(&path, &config).unwrap();
        let loaded: DeploymentConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let missing = Environment::Mainnet.config_path("/nonexistent/giftbridge");
        let err = load_config::<_, DeploymentConfig>(&missing).unwrap_err();
        assert!(err.to_string().contains("no deployment file"), "{err}");

        let path = std::env::temp_dir().join(format!("giftbridge-bad-{}.json", std::process::id()));
        std::fs::write(&path, b"{\"source\": 1").unwrap();
        let err = DeploymentConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("malformed deployment file"), "{err}");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn environment_names() {
        assert_eq!("TESTNET".parse::<Environment>().unwrap(), Environment::Testnet);
        assert!("devnet".parse::<Environment>().is_err());
        assert!(Environment::Mainnet
            .config_path("/etc/giftbridge")
            .ends_with("mainnet.json"));
    }
}
