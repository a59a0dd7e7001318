// deployer/src/encoding.rs
// Constructor argument parsing, validation and ABI encoding for the
// deployment payload.

use crate::compiler::CompiledContract;
use ethers::{
    abi::{
        token::{LenientTokenizer, Tokenizer},
        Token,
    },
    types::Bytes,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentMismatchError {
    #[error("constructor of `{contract}` expects {expected} argument(s), {supplied} supplied")]
    Arity {
        contract: String,
        expected: usize,
        supplied: usize,
    },
    #[error("argument {position} (`{name}`: {kind}) of `{contract}` rejects value `{value}`: {reason}")]
    Type {
        contract: String,
        /// 1-based.
        position: usize,
        name: String,
        kind: String,
        value: String,
        reason: String,
    },
    #[error("failed to encode constructor arguments of `{contract}`: {reason}")]
    Encoding { contract: String, reason: String },
}

/// Constructor arguments as supplied by the caller, and as typed ABI values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstructorArgs {
    pub raw: Vec<String>,
    pub tokens: Vec<Token>,
}

/// Splits a comma separated argument list. Commas nested in `[...]`, `(...)`
/// or double quotes belong to the enclosing value, so `1,[2,3],"a,b"` is
/// three values. An empty or blank list has no values.
pub fn split_arg_list(list: &str) -> Vec<String> {
    if list.trim().is_empty() {
        return Vec::new();
    }

    let mut values = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;

    for c in list.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '[' | '(' if !in_quotes => depth += 1,
            ']' | ')' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                values.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    values.push(current.trim().to_string());
    values
}

/// Checks `raw` against the constructor in the contract's interface
/// descriptor: arity first, then each value against its declared type.
/// A contract without a constructor takes no arguments.
pub fn validate_constructor_args(
    contract: &CompiledContract,
    raw: &[String],
) -> Result<ConstructorArgs, ArgumentMismatchError> {
    let inputs = contract.abi.constructor.as_ref().map(|c| c.inputs.as_slice()).unwrap_or_default();

    if inputs.len() != raw.len() {
        return Err(ArgumentMismatchError::Arity {
            contract: contract.name.clone(),
            expected: inputs.len(),
            supplied: raw.len(),
        });
    }

    let tokens = inputs
        .iter()
        .zip(raw)
        .enumerate()
        .map(|(idx, (param, value))| {
            LenientTokenizer::tokenize(&param.kind, unquote(value)).map_err(|e| ArgumentMismatchError::Type {
                contract: contract.name.clone(),
                position: idx + 1,
                name: param.name.clone(),
                kind: param.kind.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ConstructorArgs { raw: raw.to_vec(), tokens })
}

/// Creation bytecode followed by the ABI-encoded constructor arguments.
pub fn encode_deployment_payload(
    contract: &CompiledContract,
    args: &ConstructorArgs,
) -> Result<Bytes, ArgumentMismatchError> {
    match &contract.abi.constructor {
        Some(constructor) => constructor
            .encode_input(contract.bytecode.to_vec(), &args.tokens)
            .map(Bytes::from)
            .map_err(|e| ArgumentMismatchError::Encoding {
                contract: contract.name.clone(),
                reason: e.to_string(),
            }),
        None if args.tokens.is_empty() => Ok(contract.bytecode.clone()),
        None => Err(ArgumentMismatchError::Arity {
            contract: contract.name.clone(),
            expected: 0,
            supplied: args.tokens.len(),
        }),
    }
}

// Top-level strings may be quoted to protect commas; the tokenizer wants them bare.
fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
