// deployer/src/rpc.rs
//
// The node as seen by the deployer. `RpcClient` is the narrow capability the
// orchestration depends on; `EthersRpcClient` backs it with an ethers
// middleware stack (plain HTTP provider or a local signer on top of it).

use crate::transaction::DeploymentTransaction;
use async_trait::async_trait;
use ethers::{
    prelude::{Http, LocalWallet, Provider, SignerMiddleware},
    providers::{Middleware, MiddlewareError},
    signers::Signer,
    types::{Address, Bytes, TransactionReceipt, TransactionRequest, TxHash, H256, U256, U64},
};
use eyre::WrapErr;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, trace, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
const UNLOCK_DURATION_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The request never got a JSON-RPC answer (connection, HTTP, decoding).
    #[error("transport failure: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error.
    #[error("node rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("node has no accounts to deploy from")]
    NoAccount,
    #[error("no receipt within {0:?}")]
    Timeout(Duration),
}

impl RpcError {
    /// Transport failures may succeed on retry; node rejections will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }

    fn from_middleware<E: MiddlewareError>(err: E) -> Self {
        match err.as_error_response() {
            Some(resp) => RpcError::Rejected { code: resp.code, message: resp.message.clone() },
            None => RpcError::Transport(err.to_string()),
        }
    }
}

/// What the node reports once a transaction is mined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Confirmation {
    pub transaction_hash: TxHash,
    pub contract_address: Option<Address>,
    pub block_number: Option<U64>,
    pub block_hash: Option<H256>,
    pub gas_used: Option<U256>,
    /// `Some(0)` means the creation reverted. Pre-Byzantium receipts carry none.
    pub status: Option<U64>,
}

impl Confirmation {
    pub fn reverted(&self) -> bool {
        self.status == Some(U64::zero())
    }
}

impl From<TransactionReceipt> for Confirmation {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            contract_address: receipt.contract_address,
            block_number: receipt.block_number,
            block_hash: receipt.block_hash,
            gas_used: receipt.gas_used,
            status: receipt.status,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// The account deployments are sent from.
    async fn default_account(&self) -> Result<Address, RpcError>;

    /// Unlocks `account` on the node. `Ok(false)` means the node refused.
    async fn unlock(&self, account: Address) -> Result<bool, RpcError>;

    async fn submit_transaction(&self, tx: &DeploymentTransaction) -> Result<TxHash, RpcError>;

    /// Waits up to `timeout` for `tx_hash` to be mined.
    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<Confirmation, RpcError>;

    async fn chain_id(&self) -> Result<U256, RpcError>;

    /// Runtime code at `address`; empty when nothing is deployed there.
    async fn code_at(&self, address: Address) -> Result<Bytes, RpcError>;
}

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// [`RpcClient`] over any ethers middleware.
#[derive(Debug)]
pub struct EthersRpcClient<M> {
    client: Arc<M>,
    /// Set when transactions are signed locally rather than by the node.
    signer: Option<Address>,
    passphrase: String,
    poll_interval: Duration,
}

impl EthersRpcClient<Provider<Http>> {
    /// Node-managed accounts: the node signs, accounts may need unlocking.
    pub fn node_managed(rpc_url: &str, passphrase: impl Into<String>) -> eyre::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .wrap_err_with(|| format!("Invalid RPC URL: {rpc_url}"))?;
        Ok(Self {
            client: Arc::new(provider),
            signer: None,
            passphrase: passphrase.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }
}

impl EthersRpcClient<SignerClient> {
    /// Transactions signed with a local key, chain id taken from the node.
    pub async fn with_local_key(rpc_url: &str, private_key: &str) -> eyre::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .wrap_err_with(|| format!("Invalid RPC URL: {rpc_url}"))?;
        let wallet: LocalWallet = private_key
            .trim_start_matches("0x")
            .parse()
            .wrap_err("Failed to parse private key")?;
        let address = wallet.address();
        let client = SignerMiddleware::new_with_provider_chain(provider, wallet)
            .await
            .wrap_err("Failed to fetch chain id for local signer")?;
        info!(%address, "Using local signer");
        Ok(Self {
            client: Arc::new(client),
            signer: Some(address),
            passphrase: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }
}

impl<M> EthersRpcClient<M> {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl<M: Middleware> EthersRpcClient<M> {
    async fn poll_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, RpcError> {
        loop {
            match self.client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => trace!(?tx_hash, "Receipt not yet available"),
                Err(e) => match RpcError::from_middleware(e) {
                    err @ RpcError::Transport(_) => warn!(?tx_hash, error = %err, "Receipt poll failed; retrying"),
                    err => return Err(err),
                },
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl<M> RpcClient for EthersRpcClient<M>
where
    M: Middleware + 'static,
{
    async fn default_account(&self) -> Result<Address, RpcError> {
        if let Some(address) = self.signer {
            return Ok(address);
        }
        let accounts = self.client.get_accounts().await.map_err(RpcError::from_middleware)?;
        accounts.first().copied().ok_or(RpcError::NoAccount)
    }

    async fn unlock(&self, account: Address) -> Result<bool, RpcError> {
        if self.signer.is_some() {
            return Ok(true);
        }
        self.client
            .provider()
            .request("personal_unlockAccount", (account, self.passphrase.clone(), UNLOCK_DURATION_SECS))
            .await
            .map_err(RpcError::from_middleware)
    }

    #[instrument(skip_all, fields(sender = %tx.sender, gas = %tx.gas_limit, bytes = tx.payload.len()))]
    async fn submit_transaction(&self, tx: &DeploymentTransaction) -> Result<TxHash, RpcError> {
        let request = TransactionRequest::new()
            .from(tx.sender)
            .data(tx.payload.clone())
            .gas(tx.gas_limit);
        let pending = self
            .client
            .send_transaction(request, None)
            .await
            .map_err(RpcError::from_middleware)?;
        let tx_hash = pending.tx_hash();
        debug!(?tx_hash, "Deployment transaction accepted by node");
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        wait: Duration,
    ) -> Result<Confirmation, RpcError> {
        let receipt = timeout(wait, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| RpcError::Timeout(wait))??;
        Ok(receipt.into())
    }

    async fn chain_id(&self) -> Result<U256, RpcError> {
        self.client.get_chainid().await.map_err(RpcError::from_middleware)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, RpcError> {
        self.client.get_code(address, None).await.map_err(RpcError::from_middleware)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{JsonRpcError, MockProvider, ProviderError};

    #[test]
    fn node_error_responses_are_rejections() {
        let err = ProviderError::JsonRpcClientError(Box::new(ethers::providers::HttpClientError::JsonRpcError(
            JsonRpcError { code: -32000, message: "nonce too low".into(), data: None },
        )));
        let classified = RpcError::from_middleware(err);
        assert_eq!(classified, RpcError::Rejected { code: -32000, message: "nonce too low".into() });
        assert!(!classified.is_transient());
    }

    #[test]
    fn other_failures_are_transient() {
        let err = ProviderError::CustomError("connection refused".into());
        let classified = RpcError::from_middleware(err);
        assert!(classified.is_transient());
    }

    #[test]
    fn reverted_status() {
        let mut confirmation = Confirmation { status: Some(U64::zero()), ..Default::default() };
        assert!(confirmation.reverted());
        confirmation.status = Some(U64::one());
        assert!(!confirmation.reverted());
        confirmation.status = None;
        assert!(!confirmation.reverted());
    }

    #[test]
    fn invalid_url_is_reported() {
        assert!(EthersRpcClient::node_managed("not a url", "").is_err());
    }

    fn mocked(passphrase: &str) -> (EthersRpcClient<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        let client = EthersRpcClient {
            client: Arc::new(provider),
            signer: None,
            passphrase: passphrase.into(),
            poll_interval: Duration::from_millis(5),
        };
        (client, mock)
    }

    #[tokio::test]
    async fn node_without_accounts() {
        let (client, mock) = mocked("");
        mock.push::<Vec<Address>, _>(Vec::new()).unwrap();
        assert_eq!(client.default_account().await, Err(RpcError::NoAccount));
    }

    #[tokio::test]
    async fn unlock_sends_account_passphrase_and_duration() {
        let (client, mock) = mocked("hunter2");
        let account = Address::repeat_byte(0x5e);
        mock.push::<bool, _>(true).unwrap();

        assert_eq!(client.unlock(account).await, Ok(true));
        mock.assert_request("personal_unlockAccount", (account, "hunter2", UNLOCK_DURATION_SECS))
            .unwrap();
    }

    #[tokio::test]
    async fn missing_receipt_times_out() {
        let (client, mock) = mocked("");
        for _ in 0..200 {
            mock.push::<serde_json::Value, _>(serde_json::Value::Null).unwrap();
        }

        let waited = Duration::from_millis(40);
        let result = client.wait_for_confirmation(TxHash::repeat_byte(0xab), waited).await;
        assert_eq!(result, Err(RpcError::Timeout(waited)));
    }

    #[tokio::test]
    async fn polling_survives_transport_errors() {
        let (client, mock) = mocked("");
        let tx_hash = TxHash::repeat_byte(0xab);
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            contract_address: Some(Address::repeat_byte(0xcc)),
            block_number: Some(U64::from(7)),
            status: Some(U64::one()),
            ..Default::default()
        };

        // Polls fail with an empty mock until the receipt shows up.
        let feeder = {
            let mock = mock.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(30)).await;
                mock.push::<TransactionReceipt, _>(receipt).unwrap();
            })
        };

        let confirmation = client.wait_for_confirmation(tx_hash, Duration::from_secs(2)).await.unwrap();
        feeder.await.unwrap();
        assert_eq!(confirmation.contract_address, Some(Address::repeat_byte(0xcc)));
        assert_eq!(confirmation.block_number, Some(U64::from(7)));
        assert!(!confirmation.reverted());
    }
}
