// deployer/src/gas.rs
// Gas ceiling for deployment transactions. There is no price estimation:
// the node fills in the price, the tool only bounds the gas.

use ethers::types::U256;
use thiserror::Error;
use tracing::debug;

/// Ceiling used when the caller does not supply one.
pub const DEFAULT_GAS_LIMIT: u64 = 4_000_000;

const TX_BASE_GAS: u64 = 21_000;
const CONTRACT_CREATION_GAS: u64 = 32_000;
const ZERO_BYTE_GAS: u64 = 4;
const NON_ZERO_BYTE_GAS: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("gas ceiling {limit} is below the {required} gas the deployment payload needs before execution")]
pub struct GasLimitError {
    pub limit: u64,
    pub required: u64,
}

/// Gas a contract-creation transaction costs before any code runs.
pub fn intrinsic_deployment_gas(payload: &[u8]) -> u64 {
    let zeros = payload.iter().filter(|b| **b == 0).count() as u64;
    let non_zeros = payload.len() as u64 - zeros;
    TX_BASE_GAS + CONTRACT_CREATION_GAS + zeros * ZERO_BYTE_GAS + non_zeros * NON_ZERO_BYTE_GAS
}

/// The caller's ceiling, or [`DEFAULT_GAS_LIMIT`]. A ceiling that could never
/// cover the payload is refused up front instead of being burnt on-chain.
pub fn resolve_gas_limit(requested: Option<u64>, payload: &[u8]) -> Result<U256, GasLimitError> {
    let limit = requested.unwrap_or(DEFAULT_GAS_LIMIT);
    let required = intrinsic_deployment_gas(payload);
    if limit < required {
        return Err(GasLimitError { limit, required });
    }
    debug!(limit, intrinsic = required, "Gas ceiling resolved");
    Ok(U256::from(limit))
}
