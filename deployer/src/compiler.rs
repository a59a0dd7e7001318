// deployer/src/compiler.rs
//
// Compilation is a capability: the deployer only sees the `Compiler` trait.
// `SolcCompiler` shells out to a local solc through standard-JSON,
// `ArtifactCompiler` accepts bytecode that was already built elsewhere.

use crate::source::ContractSource;
use ethers::{
    abi::Abi,
    solc::{
        artifacts::{BytecodeObject, Error as SolcError, Severity as SolcSeverity, Source, Sources},
        CompilerInput, CompilerOutput, Solc,
    },
    types::{Bytes, H256},
    utils::keccak256,
};
use semver::{Version, VersionReq};
use std::{collections::BTreeMap, fmt, fs, path::{Path, PathBuf}, str::FromStr};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Output of one compile invocation, keyed by contract name.
pub type CompiledContracts = BTreeMap<String, CompiledContract>;

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledContract {
    pub name: String,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Bytes,
    pub abi: Abi,
    /// The interface descriptor exactly as the compiler emitted it.
    pub abi_json: serde_json::Value,
}

impl CompiledContract {
    pub fn bytecode_hash(&self) -> H256 {
        H256::from(keccak256(self.bytecode.as_ref()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
            Severity::Info => f.write_str("info"),
        }
    }
}

/// A single compiler message, located in the source where possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    /// 1-based.
    pub line: Option<usize>,
    /// 1-based, in characters.
    pub column: Option<usize>,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    /// An error about the file as a whole rather than a position in it.
    pub fn file_error(source: &ContractSource, message: impl Into<String>) -> Self {
        Self {
            file: source.path.display().to_string(),
            line: None,
            column: None,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn from_solc(err: &SolcError, source: &ContractSource) -> Self {
        let severity = match err.severity {
            SolcSeverity::Error => Severity::Error,
            SolcSeverity::Warning => Severity::Warning,
            SolcSeverity::Info => Severity::Info,
        };
        let message = format!("{}: {}", err.r#type, err.message);

        let Some(loc) = &err.source_location else {
            return Self { severity, message, ..Self::file_error(source, "") };
        };
        let position = (Path::new(&loc.file) == source.path && loc.start >= 0)
            .then(|| line_col(&source.text, loc.start as usize))
            .flatten();

        Self {
            file: loc.file.clone(),
            line: position.map(|(line, _)| line),
            column: position.map(|(_, col)| col),
            severity,
            message,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(col) = self.column {
                write!(f, ":{col}")?;
            }
        }
        write!(f, ": {}: {}", self.severity, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("compilation failed with {} error(s){}", .diagnostics.len(), first_line(.diagnostics))]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn single(diagnostic: Diagnostic) -> Self {
        Self { diagnostics: vec![diagnostic] }
    }
}

fn first_line(diagnostics: &[Diagnostic]) -> String {
    diagnostics.first().map(|d| format!(": {d}")).unwrap_or_default()
}

/// Maps a byte offset into `text` to a 1-based (line, column) pair.
fn line_col(text: &str, offset: usize) -> Option<(usize, usize)> {
    let before = text.get(..offset)?;
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    Some((line, column))
}

/// Solidity version requirement a source must be compiled with.
///
/// Follows Solidity pragma semantics rather than Cargo's: a bare `0.4.24`
/// means exactly that version, and comparators are whitespace separated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LanguageVersion(Option<VersionReq>);

impl LanguageVersion {
    pub fn any() -> Self {
        Self(None)
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.0.as_ref().map_or(true, |req| req.matches(version))
    }

    /// Reads the requirement from the first `pragma solidity` directive.
    /// A source without one accepts any compiler.
    pub fn from_pragma(source: &ContractSource) -> Result<Self, CompileError> {
        for (idx, line) in source.text.lines().enumerate() {
            let Some(rest) = line.trim_start().strip_prefix("pragma") else { continue };
            let Some(rest) = rest.trim_start().strip_prefix("solidity") else { continue };
            let requirement = rest.split(';').next().unwrap_or_default();

            return requirement.parse().map_err(|e: semver::Error| {
                CompileError::single(Diagnostic {
                    line: Some(idx + 1),
                    ..Diagnostic::file_error(source, format!("unsupported version pragma `{}`: {e}", requirement.trim()))
                })
            });
        }
        Ok(Self::any())
    }
}

impl FromStr for LanguageVersion {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }

        // Re-attach operators written with a space (`>= 0.4.22`) to their version.
        let mut comparators: Vec<String> = Vec::new();
        let mut pending_op = String::new();
        for token in s.split_whitespace() {
            if token.chars().all(|c| "<>=^~".contains(c)) {
                pending_op.push_str(token);
                continue;
            }
            let comparator = format!("{}{}", std::mem::take(&mut pending_op), token);
            if comparator.starts_with(|c: char| c.is_ascii_digit()) {
                comparators.push(format!("={comparator}"));
            } else {
                comparators.push(comparator);
            }
        }

        // `||` alternatives and dangling operators fall through to the semver error.
        let joined = if pending_op.is_empty() { comparators.join(", ") } else { s.to_string() };
        VersionReq::parse(&joined).map(|req| Self(Some(req)))
    }
}

impl fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(req) => write!(f, "{req}"),
            None => f.write_str("*"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Compiler: Send + Sync {
    /// Compiles `source` into every deployable contract it defines. The
    /// source is only borrowed; the same input always reaches the compiler.
    fn compile(
        &self,
        source: &ContractSource,
        version: &LanguageVersion,
    ) -> Result<CompiledContracts, CompileError>;
}

/// Compiles Solidity with a local `solc` binary.
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    solc: Solc,
}

impl SolcCompiler {
    /// Uses the binary at `path`, or `solc` from `PATH` (or `SOLC_PATH`).
    pub fn new(path: Option<PathBuf>) -> Self {
        let solc = match path {
            Some(path) => Solc::new(path),
            None => Solc::default(),
        };
        Self { solc }
    }

    fn collect(output: CompilerOutput, source: &ContractSource) -> Result<CompiledContracts, CompileError> {
        let mut diagnostics = Vec::new();
        for err in &output.errors {
            let diagnostic = Diagnostic::from_solc(err, source);
            if diagnostic.severity == Severity::Error {
                diagnostics.push(diagnostic);
            } else {
                warn!(%diagnostic, "Compiler reported a non-fatal diagnostic");
            }
        }
        if !diagnostics.is_empty() {
            return Err(CompileError { diagnostics });
        }

        let mut compiled = CompiledContracts::new();
        for (name, contract) in output.contracts.into_values().flatten() {
            let object = contract.evm.and_then(|evm| evm.bytecode).map(|b| b.object);
            let bytecode = match object {
                Some(BytecodeObject::Bytecode(bytes)) if !bytes.is_empty() => bytes,
                Some(BytecodeObject::Unlinked(_)) => {
                    return Err(CompileError::single(Diagnostic::file_error(
                        source,
                        format!("contract `{name}` references external libraries; linking is not supported"),
                    )));
                }
                _ => {
                    debug!(contract = %name, "Skipping contract without creation bytecode (abstract or interface)");
                    continue;
                }
            };
            let (abi, abi_json) = match contract.abi {
                Some(lossless) => (lossless.abi, lossless.abi_value),
                None => (Abi::default(), serde_json::Value::Array(Vec::new())),
            };
            compiled.insert(name.clone(), CompiledContract { name, bytecode, abi, abi_json });
        }
        Ok(compiled)
    }
}

impl Compiler for SolcCompiler {
    fn compile(
        &self,
        source: &ContractSource,
        version: &LanguageVersion,
    ) -> Result<CompiledContracts, CompileError> {
        let found = self.solc.version().map_err(|e| {
            CompileError::single(Diagnostic::file_error(
                source,
                format!("failed to run solc at {}: {e}", self.solc.solc.display()),
            ))
        })?;
        if !version.matches(&found) {
            return Err(CompileError::single(Diagnostic::file_error(
                source,
                format!("source requires solidity {version}, but solc is {found}"),
            )));
        }

        let mut sources = Sources::new();
        sources.insert(source.path.clone(), Source::new(source.text.clone()));
        // The default EVM target is newer than older compilers accept; cap it at
        // what `found` supports.
        let input = CompilerInput::with_sources(sources)
            .into_iter()
            .next()
            .ok_or_else(|| CompileError::single(Diagnostic::file_error(source, "no compilable input")))?
            .normalize_evm_version(&found);
        debug!(evm_version = ?input.settings.evm_version, "Compiler input prepared");

        info!(path = %source.path.display(), solc = %found, "Compiling contract source");
        let output = self.solc.compile(&input).map_err(|e| {
            CompileError::single(Diagnostic::file_error(source, format!("solc invocation failed: {e}")))
        })?;

        let compiled = Self::collect(output, source)?;
        info!(contracts = ?compiled.keys().collect::<Vec<_>>(), "Compilation finished");
        Ok(compiled)
    }
}

/// Loads pre-built creation bytecode (a hex `.bin` file) and the interface
/// descriptor sitting next to it (`.abi`, or `.json` holding either the ABI
/// array or an artifact with an `abi` field). The contract is named after
/// the file stem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactCompiler;

impl ArtifactCompiler {
    pub fn handles(path: &Path) -> bool {
        matches!(path.extension().and_then(|e| e.to_str()), Some("bin" | "hex"))
    }

    fn read_abi(source: &ContractSource) -> Result<serde_json::Value, CompileError> {
        let candidate = ["abi", "json"]
            .iter()
            .map(|ext| source.path.with_extension(ext))
            .find(|p| p.is_file());
        let Some(abi_path) = candidate else {
            warn!(path = %source.path.display(), "No ABI file next to bytecode; deploying with an empty interface");
            return Ok(serde_json::Value::Array(Vec::new()));
        };

        let raw = fs::read_to_string(&abi_path).map_err(|e| {
            CompileError::single(Diagnostic::file_error(source, format!("failed to read {}: {e}", abi_path.display())))
        })?;
        let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            CompileError::single(Diagnostic::file_error(source, format!("{} is not valid JSON: {e}", abi_path.display())))
        })?;
        match value {
            serde_json::Value::Object(mut artifact) => Ok(artifact.remove("abi").unwrap_or_default()),
            other => Ok(other),
        }
    }
}

impl Compiler for ArtifactCompiler {
    fn compile(
        &self,
        source: &ContractSource,
        _version: &LanguageVersion,
    ) -> Result<CompiledContracts, CompileError> {
        let name = source
            .stem()
            .ok_or_else(|| CompileError::single(Diagnostic::file_error(source, "cannot derive contract name from path")))?
            .to_string();

        let cleaned = source.text.trim().trim_start_matches("0x");
        let bytecode = hex::decode(cleaned).map_err(|e| {
            CompileError::single(Diagnostic::file_error(source, format!("bytecode is not valid hex: {e}")))
        })?;
        if bytecode.is_empty() {
            return Err(CompileError::single(Diagnostic::file_error(source, "bytecode file is empty")));
        }

        let abi_json = Self::read_abi(source)?;
        let abi: Abi = serde_json::from_value(abi_json.clone()).map_err(|e| {
            CompileError::single(Diagnostic::file_error(source, format!("invalid interface descriptor: {e}")))
        })?;

        let contract = CompiledContract { name: name.clone(), bytecode: Bytes::from(bytecode), abi, abi_json };
        Ok(CompiledContracts::from([(name, contract)]))
    }
}

/// Picks the compiler for a contract file by its extension.
pub fn compiler_for(path: &Path, solc: Option<PathBuf>) -> Box<dyn Compiler> {
    if ArtifactCompiler::handles(path) {
        Box::new(ArtifactCompiler)
    } else {
        Box::new(SolcCompiler::new(solc))
    }
}
