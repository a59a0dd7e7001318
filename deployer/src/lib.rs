// deployer/src/lib.rs
// Library interface shared by the `deploy` binary and the integration tests.

pub mod compiler;
pub mod config;
pub mod deploy;
pub mod encoding;
pub mod error;
pub mod gas;
pub mod record;
pub mod rpc;
pub mod source;
pub mod transaction;

// Public types re-exported for convenience
pub use compiler::{ArtifactCompiler, CompileError, CompiledContract, CompiledContracts, Compiler, Diagnostic, LanguageVersion, SolcCompiler};
pub use deploy::{deploy_contract_file, DeployRequest, Deployer};
pub use encoding::{ArgumentMismatchError, ConstructorArgs};
pub use error::{DeployError, ErrorKind, SubmissionError};
pub use record::DeploymentRecord;
pub use rpc::{Confirmation, EthersRpcClient, RpcClient, RpcError};
pub use source::{load_source, ContractSource, SourceError};
pub use transaction::{AccountLocks, DeploymentTransaction};
