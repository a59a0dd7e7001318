// deployer/src/deploy.rs
//
// Orchestrates a deployment: pick the contract, validate and encode its
// constructor arguments, submit from the node's account and wait for the
// receipt. Each step either completes or ends the deployment.

use crate::{
    compiler::{CompiledContract, CompiledContracts, Compiler, LanguageVersion},
    encoding::{encode_deployment_payload, validate_constructor_args},
    error::{DeployError, SubmissionError},
    gas::resolve_gas_limit,
    record::{DeploymentIdentity, DeploymentRecord},
    rpc::{RpcClient, RpcError},
    source::load_source,
    transaction::{AccountLocks, DeploymentTransaction},
};
use ethers::{
    types::{Address, TxHash, H256},
    utils::keccak256,
};
use std::{future::Future, path::{Path, PathBuf}, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// What to deploy and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub contract_name: String,
    /// Constructor arguments in declaration order, as text.
    pub args: Vec<String>,
    /// Falls back to [`crate::gas::DEFAULT_GAS_LIMIT`].
    pub gas_limit: Option<u64>,
    pub confirmation_timeout: Duration,
    /// Where the record is kept. Also enables redeploy detection.
    pub record_path: Option<PathBuf>,
    /// Await this already submitted transaction instead of sending a new one.
    pub resume_tx: Option<TxHash>,
}

impl DeployRequest {
    pub fn new(contract_name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            args,
            gas_limit: None,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            record_path: None,
            resume_tx: None,
        }
    }
}

pub struct Deployer<R> {
    rpc: Arc<R>,
    locks: Arc<AccountLocks>,
    retry_backoff: Duration,
}

impl<R: RpcClient> Deployer<R> {
    pub fn new(rpc: Arc<R>) -> Self {
        Self { rpc, locks: Arc::new(AccountLocks::new()), retry_backoff: DEFAULT_RETRY_BACKOFF }
    }

    /// Shares account serialization with other deployers on the same node.
    pub fn with_account_locks(mut self, locks: Arc<AccountLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub async fn deploy(
        &self,
        compiled: &CompiledContracts,
        request: &DeployRequest,
    ) -> Result<DeploymentRecord, DeployError> {
        self.deploy_until(compiled, request, std::future::pending()).await
    }

    /// Like [`Self::deploy`], but gives up waiting for confirmation once
    /// `shutdown` resolves. The error then carries the transaction hash.
    #[instrument(skip_all, fields(contract = %request.contract_name))]
    pub async fn deploy_until<F>(
        &self,
        compiled: &CompiledContracts,
        request: &DeployRequest,
        shutdown: F,
    ) -> Result<DeploymentRecord, DeployError>
    where
        F: Future<Output = ()> + Send,
    {
        let contract = select_contract(compiled, &request.contract_name)?;
        let args = validate_constructor_args(contract, &request.args)?;
        let payload = encode_deployment_payload(contract, &args)?;
        let gas_limit = resolve_gas_limit(request.gas_limit, &payload)?;

        let account = self.rpc.default_account().await.map_err(DeployError::NoAccount)?;
        self.try_unlock(account).await;

        let _account_guard = self.locks.acquire(account).await;
        let chain_id = self.rpc.chain_id().await.map_err(SubmissionError::Query)?;
        let identity = DeploymentIdentity {
            contract_name: &contract.name,
            bytecode_hash: contract.bytecode_hash(),
            payload_hash: H256::from(keccak256(payload.as_ref())),
            constructor_args: &args.raw,
            chain_id,
        };
        if let Some(existing) = self.find_existing(request, &identity).await? {
            return Ok(existing);
        }

        let tx_hash = match request.resume_tx {
            Some(tx_hash) => {
                info!(?tx_hash, "Resuming earlier deployment");
                tx_hash
            }
            None => {
                let tx = DeploymentTransaction::new(account, payload, gas_limit);
                self.submit_with_retry(&tx).await?
            }
        };
        info!(?tx_hash, %account, timeout = ?request.confirmation_timeout, "Awaiting deployment confirmation");

        let confirmation = tokio::select! {
            result = self.rpc.wait_for_confirmation(tx_hash, request.confirmation_timeout) => match result {
                Ok(confirmation) => confirmation,
                Err(RpcError::Timeout(waited)) => return Err(DeployError::Pending { tx_hash, waited }),
                Err(source) => return Err(SubmissionError::Confirmation { tx_hash, source }.into()),
            },
            _ = shutdown => return Err(DeployError::Cancelled { tx_hash }),
        };

        if confirmation.reverted() {
            return Err(SubmissionError::Reverted { tx_hash, block_number: confirmation.block_number }.into());
        }
        let contract_address = confirmation
            .contract_address
            .ok_or(SubmissionError::MissingContractAddress { tx_hash })?;

        let record = DeploymentRecord::new(&identity, contract_address, account, contract.abi_json.clone(), &confirmation);
        if let Some(path) = &request.record_path {
            if let Err(source) = record.write_to(path) {
                return Err(DeployError::Record { deployed: Box::new(record), source });
            }
        }
        info!(address = ?record.contract_address, block = ?record.confirmation.block_number, "✅ Contract deployed");
        Ok(record)
    }

    // Unlock failures do not stop the deployment; a still-locked account
    // surfaces later as a rejected submission.
    async fn try_unlock(&self, account: Address) {
        match self.rpc.unlock(account).await {
            Ok(true) => debug!(%account, "Account unlocked"),
            Ok(false) => warn!(%account, "Node refused to unlock account; unlock it manually if submission fails"),
            Err(e) => warn!(%account, error = %e, "Could not unlock account; unlock it manually if submission fails"),
        }
    }

    async fn submit_with_retry(&self, tx: &DeploymentTransaction) -> Result<TxHash, SubmissionError> {
        match self.rpc.submit_transaction(tx).await {
            Ok(tx_hash) => Ok(tx_hash),
            Err(e) if e.is_transient() => {
                warn!(error = %e, backoff = ?self.retry_backoff, "Submission failed in transport; retrying once");
                sleep(self.retry_backoff).await;
                self.rpc.submit_transaction(tx).await.map_err(|e| {
                    if e.is_transient() {
                        SubmissionError::Transport { attempts: 2, last: e }
                    } else {
                        SubmissionError::Rejected(e)
                    }
                })
            }
            Err(e) => Err(SubmissionError::Rejected(e)),
        }
    }

    /// A record for the same deployment whose address still holds code.
    async fn find_existing(
        &self,
        request: &DeployRequest,
        identity: &DeploymentIdentity<'_>,
    ) -> Result<Option<DeploymentRecord>, DeployError> {
        let Some(path) = &request.record_path else { return Ok(None) };
        let existing = match DeploymentRecord::read_from(path) {
            Ok(Some(existing)) => existing,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable deployment record; it will be replaced");
                return Ok(None);
            }
        };

        if !existing.matches(identity) {
            info!(path = %path.display(), "Existing record describes a different deployment; it will be replaced");
            return Ok(None);
        }
        if let Some(resumed) = request.resume_tx.filter(|hash| *hash != existing.transaction_hash) {
            info!(?resumed, recorded = ?existing.transaction_hash, "Record belongs to another transaction; awaiting the resumed one");
            return Ok(None);
        }
        if existing.verify(self.rpc.as_ref()).await.map_err(SubmissionError::Query)? {
            warn!(address = ?existing.contract_address, "Identical contract already deployed; reusing record");
            Ok(Some(existing))
        } else {
            warn!(address = ?existing.contract_address, "Recorded address holds no code; deploying again");
            Ok(None)
        }
    }
}

fn select_contract<'a>(compiled: &'a CompiledContracts, name: &str) -> Result<&'a CompiledContract, DeployError> {
    // solc keys look like `file:Name`; accept them as well as the bare name.
    let bare = name.rsplit(':').next().unwrap_or(name);
    compiled.get(bare).ok_or_else(|| DeployError::ContractNotFound {
        name: name.to_string(),
        available: compiled.keys().cloned().collect(),
    })
}

/// Full pipeline for one contract file: load, compile, deploy.
/// `language_version` overrides the source's own pragma.
pub async fn deploy_contract_file<R, F>(
    compiler: &dyn Compiler,
    deployer: &Deployer<R>,
    contract_file: &Path,
    language_version: Option<&LanguageVersion>,
    request: &DeployRequest,
    shutdown: F,
) -> Result<DeploymentRecord, DeployError>
where
    R: RpcClient,
    F: Future<Output = ()> + Send,
{
    let source = load_source(contract_file)?;
    let version = match language_version {
        Some(version) => version.clone(),
        None => LanguageVersion::from_pragma(&source)?,
    };
    let compiled = compiler.compile(&source, &version)?;
    deployer.deploy_until(&compiled, request, shutdown).await
}
