// deployer/src/record.rs

use crate::rpc::{Confirmation, RpcClient, RpcError};
use chrono::{DateTime, Utc};
use ethers::types::{Address, TxHash, H256, U256, U64};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read deployment record {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("deployment record {} is not valid: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write deployment record {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockConfirmation {
    pub status: ConfirmationStatus,
    pub block_number: Option<U64>,
    pub block_hash: Option<H256>,
    pub gas_used: Option<U256>,
}

/// Proof of a confirmed deployment. Only ever built from a successful
/// confirmation; there is no pending or failed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub contract_name: String,
    pub contract_address: Address,
    pub transaction_hash: TxHash,
    pub confirmation: BlockConfirmation,
    pub deployer: Address,
    pub chain_id: U256,
    pub constructor_args: Vec<String>,
    /// Interface descriptor of the deployed contract.
    pub abi: serde_json::Value,
    /// keccak256 of the creation bytecode, without constructor arguments.
    pub bytecode_hash: H256,
    /// keccak256 of the bytecode followed by the ABI-encoded arguments.
    pub payload_hash: H256,
    pub deployed_at: DateTime<Utc>,
}

/// Everything about a deployment that is known before it is submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentIdentity<'a> {
    pub contract_name: &'a str,
    pub bytecode_hash: H256,
    pub payload_hash: H256,
    pub constructor_args: &'a [String],
    pub chain_id: U256,
}

impl DeploymentRecord {
    pub fn new(
        identity: &DeploymentIdentity<'_>,
        contract_address: Address,
        deployer: Address,
        abi: serde_json::Value,
        confirmation: &Confirmation,
    ) -> Self {
        Self {
            contract_name: identity.contract_name.to_string(),
            contract_address,
            transaction_hash: confirmation.transaction_hash,
            confirmation: BlockConfirmation {
                status: ConfirmationStatus::Confirmed,
                block_number: confirmation.block_number,
                block_hash: confirmation.block_hash,
                gas_used: confirmation.gas_used,
            },
            deployer,
            chain_id: identity.chain_id,
            constructor_args: identity.constructor_args.to_vec(),
            abi,
            bytecode_hash: identity.bytecode_hash,
            payload_hash: identity.payload_hash,
            deployed_at: Utc::now(),
        }
    }

    /// Whether this record describes the deployment `identity` would produce.
    /// Arguments compare by encoding, so `50` and `050` are the same.
    pub fn matches(&self, identity: &DeploymentIdentity<'_>) -> bool {
        self.contract_name == identity.contract_name
            && self.bytecode_hash == identity.bytecode_hash
            && self.payload_hash == identity.payload_hash
            && self.chain_id == identity.chain_id
    }

    /// Checks the chain still has code at the recorded address.
    pub async fn verify<R: RpcClient + ?Sized>(&self, rpc: &R) -> Result<bool, RpcError> {
        let code = rpc.code_at(self.contract_address).await?;
        Ok(!code.is_empty())
    }

    pub fn to_json(&self) -> String {
        // No map keys besides strings, so serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Reads a record file; a missing file is `None`.
    pub fn read_from(path: &Path) -> Result<Option<Self>, RecordError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RecordError::Read { path: path.to_path_buf(), source: e }),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RecordError::Parse { path: path.to_path_buf(), source: e })
    }

    /// Writes through a sibling temp file and a rename, so a reader never
    /// sees a half-written record.
    pub fn write_to(&self, path: &Path) -> Result<(), RecordError> {
        let write_err = |source| RecordError::Write { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, self.to_json()).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;
        debug!(path = %path.display(), "Deployment record written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::MockRpcClient;
    use ethers::types::Bytes;

    fn args() -> Vec<String> {
        vec!["3".into(), "14".into(), "50".into()]
    }

    fn record(args: &[String]) -> DeploymentRecord {
        let identity = DeploymentIdentity {
            contract_name: "VotedAdmins",
            bytecode_hash: H256::repeat_byte(0xaa),
            payload_hash: H256::repeat_byte(0xbb),
            constructor_args: args,
            chain_id: U256::from(1337),
        };
        let confirmation = Confirmation {
            transaction_hash: TxHash::repeat_byte(0x01),
            contract_address: Some(Address::repeat_byte(0xcc)),
            block_number: Some(U64::from(7)),
            gas_used: Some(U256::from(250_000)),
            status: Some(U64::one()),
            ..Default::default()
        };
        DeploymentRecord::new(
            &identity,
            Address::repeat_byte(0xcc),
            Address::repeat_byte(0xdd),
            serde_json::json!([]),
            &confirmation,
        )
    }

    #[test]
    fn json_uses_camel_case_and_confirmed_status() {
        let args = args();
        let json: serde_json::Value = serde_json::from_str(&record(&args).to_json()).unwrap();
        assert_eq!(json["contractName"], "VotedAdmins");
        assert_eq!(json["confirmation"]["status"], "confirmed");
        assert_eq!(json["constructorArgs"], serde_json::json!(["3", "14", "50"]));
        assert!(json["contractAddress"].as_str().unwrap().starts_with("0xcccc"));
    }

    #[test]
    fn record_file_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments").join("voted_admins.json");
        let args = args();
        let original = record(&args);

        assert_eq!(DeploymentRecord::read_from(&path).unwrap(), None);
        original.write_to(&path).unwrap();
        assert_eq!(DeploymentRecord::read_from(&path).unwrap(), Some(original));
        assert!(!dir.path().join("deployments").join("voted_admins.json.tmp").exists());
    }

    #[test]
    fn garbage_record_is_a_parse_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "{ not json").unwrap();
        assert!(matches!(DeploymentRecord::read_from(file.path()), Err(RecordError::Parse { .. })));
    }

    #[test]
    fn identity_matching() {
        let args = args();
        let rec = record(&args);
        let mut identity = DeploymentIdentity {
            contract_name: "VotedAdmins",
            bytecode_hash: H256::repeat_byte(0xaa),
            payload_hash: H256::repeat_byte(0xbb),
            constructor_args: &args,
            chain_id: U256::from(1337),
        };
        assert!(rec.matches(&identity));

        // Same encoding, different spelling.
        let padded_args = vec!["003".to_string(), "014".to_string(), "050".to_string()];
        identity.constructor_args = &padded_args;
        assert!(rec.matches(&identity));

        identity.chain_id = U256::from(1);
        assert!(!rec.matches(&identity));

        identity.chain_id = U256::from(1337);
        identity.payload_hash = H256::repeat_byte(0xbc);
        assert!(!rec.matches(&identity));
    }

    #[tokio::test]
    async fn verify_checks_code_at_address() {
        let args = args();
        let rec = record(&args);
        let mut rpc = MockRpcClient::new();
        rpc.expect_code_at()
            .withf(|addr| *addr == Address::repeat_byte(0xcc))
            .times(1)
            .returning(|_| Ok(Bytes::from(vec![0x60, 0x80])));
        assert!(rec.verify(&rpc).await.unwrap());

        let mut empty = MockRpcClient::new();
        empty.expect_code_at().returning(|_| Ok(Bytes::new()));
        assert!(!rec.verify(&empty).await.unwrap());
    }
}
