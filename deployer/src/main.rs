// deployer/src/main.rs

// --- Imports ---
use contract_deployer::{
    compiler::compiler_for,
    config::{load_config, Config},
    deploy::{deploy_contract_file, Deployer},
    error::{DeployError, EXIT_SUCCESS},
    record::DeploymentRecord,
    rpc::{EthersRpcClient, RpcClient},
};
use std::{process, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// --- Main Execution ---
#[tokio::main]
async fn main() {
    init_tracing();

    let code = match load_config() {
        Ok(config) => match run(&config).await {
            Ok(record) => {
                // stdout carries the address and nothing else
                println!("{:?}", record.contract_address);
                EXIT_SUCCESS
            }
            Err(err) => report(&err),
        },
        Err(err) => report(&err),
    };
    process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: &Config) -> Result<DeploymentRecord, DeployError> {
    let connect_err = |e: eyre::Report| {
        error!("{e:?}");
        DeployError::Connection(format!("{e:#}"))
    };

    match &config.private_key {
        Some(key) => {
            let rpc = EthersRpcClient::with_local_key(&config.rpc_url, key)
                .await
                .map_err(connect_err)?
                .with_poll_interval(config.poll_interval);
            deploy_with(config, rpc).await
        }
        None => {
            let rpc = EthersRpcClient::node_managed(&config.rpc_url, config.unlock_passphrase.clone())
                .map_err(connect_err)?
                .with_poll_interval(config.poll_interval);
            deploy_with(config, rpc).await
        }
    }
}

async fn deploy_with<R: RpcClient>(config: &Config, rpc: R) -> Result<DeploymentRecord, DeployError> {
    info!(rpc_url = %config.rpc_url, file = %config.contract_file.display(), "Starting deployment");
    let compiler = compiler_for(&config.contract_file, config.solc.clone());
    let deployer = Deployer::new(Arc::new(rpc));

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler: never cancel.
            std::future::pending::<()>().await;
        }
    };

    deploy_contract_file(
        compiler.as_ref(),
        &deployer,
        &config.contract_file,
        config.language_version.as_ref(),
        &config.request,
        shutdown,
    )
    .await
}

/// Prints the error for a human on stderr and picks the exit code.
fn report(err: &DeployError) -> i32 {
    eprintln!("error[{}]: {}", err.kind(), err);
    if let DeployError::Compile(compile) = err {
        for diagnostic in &compile.diagnostics {
            eprintln!("  {diagnostic}");
        }
    }
    if let Some(deployed) = err.deployed_record() {
        // Deployed all the same: the address still goes to stdout.
        println!("{:?}", deployed.contract_address);
        eprintln!("transaction hash: {:?}", deployed.transaction_hash);
        eprintln!("the contract is live; do not redeploy it, save the record by hand instead");
    }
    if let Some(tx_hash) = err.pending_tx_hash() {
        eprintln!("transaction hash: {tx_hash:?}");
        eprintln!("the deployment may still confirm; resume with --resume-tx {tx_hash:?} instead of redeploying");
    }
    err.exit_code()
}
