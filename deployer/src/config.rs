// deployer/src/config.rs

use crate::{
    compiler::LanguageVersion,
    deploy::{DeployRequest, DEFAULT_CONFIRMATION_TIMEOUT},
    encoding::split_arg_list,
    error::DeployError,
};
use clap::Parser;
use dotenv::dotenv;
use ethers::{signers::LocalWallet, types::TxHash};
use std::{path::PathBuf, time::Duration};
use tracing::debug;

const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// Compile a contract source file and deploy one of its contracts.
#[derive(Parser, Debug, Clone)]
#[command(name = "deploy", version, long_about = None)]
pub struct Cli {
    /// Solidity source, or pre-built hex bytecode (`.bin`/`.hex`) with an ABI file beside it.
    #[arg(long, env = "DEPLOY_CONTRACT_FILE", value_name = "PATH")]
    pub contract_file: PathBuf,

    /// Contract to deploy from the compiled output.
    #[arg(long, env = "DEPLOY_CONTRACT_NAME", value_name = "NAME")]
    pub contract_name: String,

    #[arg(long, env = "DEPLOY_RPC_URL", default_value = DEFAULT_RPC_URL, value_name = "URL")]
    pub rpc_url: String,

    /// Constructor arguments, comma separated. Use brackets for arrays and quotes for strings with commas.
    #[arg(long, env = "DEPLOY_ARGS", default_value = "", value_name = "VALUE,...", allow_hyphen_values = true)]
    pub args: String,

    /// Gas ceiling for the deployment transaction [default: 4000000].
    #[arg(long = "gas", env = "DEPLOY_GAS_LIMIT", value_name = "LIMIT")]
    pub gas_limit: Option<u64>,

    /// How long to wait for the deployment to be mined.
    #[arg(long, env = "DEPLOY_CONFIRMATION_TIMEOUT_SECS", default_value_t = DEFAULT_CONFIRMATION_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Receipt polling interval.
    #[arg(long, env = "DEPLOY_POLL_INTERVAL_MS", default_value_t = 1_000)]
    pub poll_interval_ms: u64,

    /// solc binary to compile with; `solc` from PATH otherwise.
    #[arg(long, env = "DEPLOY_SOLC", value_name = "PATH")]
    pub solc: Option<PathBuf>,

    /// Solidity version requirement, overriding the source's pragma.
    #[arg(long, env = "DEPLOY_SOLC_VERSION", value_name = "REQ")]
    pub solc_version: Option<String>,

    /// Sign locally with this key instead of using the node's first account.
    #[arg(long, env = "DEPLOY_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Passphrase for unlocking the node-managed account.
    #[arg(long, env = "DEPLOY_UNLOCK_PASSPHRASE", default_value = "", hide_env_values = true)]
    pub unlock_passphrase: String,

    /// JSON deployment record. An existing record for the same deployment is reused.
    #[arg(long, env = "DEPLOY_RECORD_FILE", value_name = "PATH")]
    pub record_file: Option<PathBuf>,

    /// Wait for a previously submitted deployment instead of sending a new one.
    #[arg(long, value_name = "TX_HASH")]
    pub resume_tx: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub contract_file: PathBuf,
    pub rpc_url: String,
    pub solc: Option<PathBuf>,
    pub language_version: Option<LanguageVersion>,
    pub private_key: Option<String>,
    pub unlock_passphrase: String,
    pub poll_interval: Duration,
    pub request: DeployRequest,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, DeployError> {
        if cli.contract_name.trim().is_empty() {
            return Err(DeployError::Config("contract name must not be empty".into()));
        }
        if !(cli.rpc_url.starts_with("http://") || cli.rpc_url.starts_with("https://")) {
            return Err(DeployError::Config(format!("RPC URL must be http(s): {}", cli.rpc_url)));
        }
        if cli.timeout_secs == 0 {
            return Err(DeployError::Config("confirmation timeout must be at least one second".into()));
        }

        let language_version = cli
            .solc_version
            .as_deref()
            .map(|req| {
                req.parse::<LanguageVersion>()
                    .map_err(|e| DeployError::Config(format!("invalid solidity version `{req}`: {e}")))
            })
            .transpose()?;
        let resume_tx = cli
            .resume_tx
            .as_deref()
            .map(|hash| {
                hash.parse::<TxHash>()
                    .map_err(|e| DeployError::Config(format!("invalid transaction hash `{hash}`: {e}")))
            })
            .transpose()?;
        let private_key = cli.private_key.filter(|k| !k.trim().is_empty());
        if let Some(key) = &private_key {
            key.trim_start_matches("0x")
                .parse::<LocalWallet>()
                .map_err(|_| DeployError::Config("private key is not a valid secp256k1 key".into()))?;
        }

        let request = DeployRequest {
            contract_name: cli.contract_name,
            args: split_arg_list(&cli.args),
            gas_limit: cli.gas_limit,
            confirmation_timeout: Duration::from_secs(cli.timeout_secs),
            record_path: cli.record_file,
            resume_tx,
        };

        Ok(Self {
            contract_file: cli.contract_file,
            rpc_url: cli.rpc_url,
            solc: cli.solc,
            language_version,
            private_key,
            unlock_passphrase: cli.unlock_passphrase,
            poll_interval: Duration::from_millis(cli.poll_interval_ms.max(1)),
            request,
        })
    }
}

/// Loads `.env` (if any) so its values act as flag fallbacks, then parses
/// the command line. `--help` and `--version` print and exit here.
pub fn load_config() -> Result<Config, DeployError> {
    dotenv().ok();
    let cli = Cli::try_parse().map_err(|e| {
        if !e.use_stderr() {
            e.exit()
        }
        DeployError::Config(e.to_string().trim_end().to_string())
    })?;
    debug!(contract_file = %cli.contract_file.display(), contract = %cli.contract_name, rpc_url = %cli.rpc_url, "Command line parsed");
    Config::from_cli(cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Config, DeployError> {
        let cli = Cli::try_parse_from(std::iter::once("deploy").chain(args.iter().copied()))
            .map_err(|e| DeployError::Config(e.to_string()))?;
        Config::from_cli(cli)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn full_command_line() {
        let config = parse(&[
            "--contract-file", "contracts/voted_admins.sol",
            "--contract-name", "VotedAdmins",
            "--rpc-url", "http://127.0.0.1:8545",
            "--args", "3,14,50",
            "--gas", "4000000",
            "--timeout-secs", "30",
            "--record-file", "deployments/voted_admins.json",
        ])
        .unwrap();

        assert_eq!(config.contract_file, PathBuf::from("contracts/voted_admins.sol"));
        assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(config.request.contract_name, "VotedAdmins");
        assert_eq!(config.request.args, vec!["3", "14", "50"]);
        assert_eq!(config.request.gas_limit, Some(4_000_000));
        assert_eq!(config.request.confirmation_timeout, Duration::from_secs(30));
        assert_eq!(config.request.record_path, Some(PathBuf::from("deployments/voted_admins.json")));
        assert_eq!(config.request.resume_tx, None);
    }

    #[test]
    fn defaults_follow_local_node() {
        let config = parse(&["--contract-file", "a.sol", "--contract-name", "A"]).unwrap();
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert!(config.request.args.is_empty());
        assert_eq!(config.request.gas_limit, None);
        assert_eq!(config.request.confirmation_timeout, DEFAULT_CONFIRMATION_TIMEOUT);
        assert!(config.language_version.is_none());
        assert!(config.private_key.is_none());
    }

    #[test]
    fn resume_hash_and_version_are_parsed() {
        let hash = format!("0x{}", "ab".repeat(32));
        let config = parse(&[
            "--contract-file", "a.sol", "--contract-name", "A",
            "--resume-tx", &hash,
            "--solc-version", "^0.4.0",
        ])
        .unwrap();
        assert_eq!(config.request.resume_tx, Some(TxHash::repeat_byte(0xab)));
        assert!(config.language_version.unwrap().matches(&semver::Version::new(0, 4, 24)));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let base = ["--contract-file", "a.sol", "--contract-name", "A"];
        let with = |extra: &[&str]| parse(&[&base[..], extra].concat());

        assert!(matches!(with(&["--resume-tx", "0x1234"]), Err(DeployError::Config(_))));
        assert!(matches!(with(&["--rpc-url", "localhost:8545"]), Err(DeployError::Config(_))));
        assert!(matches!(with(&["--timeout-secs", "0"]), Err(DeployError::Config(_))));
        assert!(matches!(with(&["--solc-version", "^0.4 || ^0.5"]), Err(DeployError::Config(_))));
        assert!(matches!(with(&["--gas", "lots"]), Err(DeployError::Config(_))));
    }

    #[test]
    fn malformed_private_key_is_rejected_up_front() {
        let err = parse(&["--contract-file", "a.sol", "--contract-name", "A", "--private-key", "0xnothex"]).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn empty_private_key_means_node_accounts() {
        let config = parse(&["--contract-file", "a.sol", "--contract-name", "A", "--private-key", ""]).unwrap();
        assert!(config.private_key.is_none());
    }
}
