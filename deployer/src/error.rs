// deployer/src/error.rs

use crate::{
    compiler::CompileError,
    encoding::ArgumentMismatchError,
    gas::GasLimitError,
    record::{DeploymentRecord, RecordError},
    rpc::RpcError,
    source::SourceError,
};
use ethers::types::{TxHash, U64};
use std::{fmt, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("node rejected the deployment transaction: {0}")]
    Rejected(RpcError),
    #[error("node query failed before submission: {0}")]
    Query(RpcError),
    #[error("deployment transaction not submitted after {attempts} attempt(s): {last}")]
    Transport { attempts: u32, last: RpcError },
    #[error("failed while awaiting confirmation of {tx_hash:?}: {source}")]
    Confirmation {
        tx_hash: TxHash,
        #[source]
        source: RpcError,
    },
    #[error("deployment transaction {tx_hash:?} reverted in block {}", fmt_block(.block_number))]
    Reverted { tx_hash: TxHash, block_number: Option<U64> },
    #[error("receipt for {tx_hash:?} carries no contract address")]
    MissingContractAddress { tx_hash: TxHash },
}

fn fmt_block(block: &Option<U64>) -> String {
    block.map(|b| b.to_string()).unwrap_or_else(|| "<unknown>".into())
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("contract `{name}` not found in compiler output (available: {})", .available.join(", "))]
    ContractNotFound { name: String, available: Vec<String> },
    #[error(transparent)]
    ArgumentMismatch(#[from] ArgumentMismatchError),
    #[error(transparent)]
    GasLimit(#[from] GasLimitError),
    #[error("no account to deploy from: {0}")]
    NoAccount(RpcError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("deployment {tx_hash:?} still pending after {waited:?}")]
    Pending { tx_hash: TxHash, waited: Duration },
    #[error("stopped waiting for deployment {tx_hash:?}")]
    Cancelled { tx_hash: TxHash },
    /// The contract is on chain but its record could not be stored.
    #[error(
        "contract deployed at {:?} (transaction {:?}) but {source}",
        .deployed.contract_address,
        .deployed.transaction_hash
    )]
    Record {
        deployed: Box<DeploymentRecord>,
        #[source]
        source: RecordError,
    },
    #[error("cannot reach node: {0}")]
    Connection(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Stable name for each failure class, printed next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFoundError,
    ReadError,
    CompileError,
    ContractNotFoundError,
    ArgumentMismatchError,
    GasLimitError,
    NoAccountError,
    SubmissionError,
    DeploymentPendingError,
    DeploymentCancelledError,
    RecordError,
    ConnectionError,
    ConfigError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_COMPILE: i32 = 1;
pub const EXIT_SUBMISSION: i32 = 2;
pub const EXIT_VALIDATION: i32 = 3;

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Source(SourceError::NotFound { .. }) => ErrorKind::NotFoundError,
            DeployError::Source(SourceError::Read { .. }) => ErrorKind::ReadError,
            DeployError::Compile(_) => ErrorKind::CompileError,
            DeployError::ContractNotFound { .. } => ErrorKind::ContractNotFoundError,
            DeployError::ArgumentMismatch(_) => ErrorKind::ArgumentMismatchError,
            DeployError::GasLimit(_) => ErrorKind::GasLimitError,
            DeployError::NoAccount(_) => ErrorKind::NoAccountError,
            DeployError::Submission(_) => ErrorKind::SubmissionError,
            DeployError::Pending { .. } => ErrorKind::DeploymentPendingError,
            DeployError::Cancelled { .. } => ErrorKind::DeploymentCancelledError,
            DeployError::Record { .. } => ErrorKind::RecordError,
            DeployError::Connection(_) => ErrorKind::ConnectionError,
            DeployError::Config(_) => ErrorKind::ConfigError,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::NotFoundError | ErrorKind::ReadError | ErrorKind::CompileError => EXIT_COMPILE,
            ErrorKind::ContractNotFoundError
            | ErrorKind::ArgumentMismatchError
            | ErrorKind::GasLimitError
            | ErrorKind::ConfigError => EXIT_VALIDATION,
            ErrorKind::NoAccountError
            | ErrorKind::SubmissionError
            | ErrorKind::DeploymentPendingError
            | ErrorKind::DeploymentCancelledError
            | ErrorKind::RecordError
            | ErrorKind::ConnectionError => EXIT_SUBMISSION,
        }
    }

    /// Hash of a transaction that was submitted and may still confirm.
    pub fn pending_tx_hash(&self) -> Option<TxHash> {
        match self {
            DeployError::Pending { tx_hash, .. } | DeployError::Cancelled { tx_hash } => Some(*tx_hash),
            _ => None,
        }
    }

    /// The confirmed deployment, when only storing its record failed.
    pub fn deployed_record(&self) -> Option<&DeploymentRecord> {
        match self {
            DeployError::Record { deployed, .. } => Some(deployed.as_ref()),
            _ => None,
        }
    }
}
