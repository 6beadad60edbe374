use std::path::PathBuf;

/// Errors produced while resolving dependencies, building the dependency graph, or
/// scoring it against a platform ABI policy.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to parse one of the ELF files involved.
    #[error("ELF error: {0}")]
    Elf(#[from] auditelf::Error),
    /// A `DT_NEEDED` entry could not be resolved to a file on disk.
    #[error("failed to resolve dependency {0:?} of {1:?}")]
    FailedToResolve(String, PathBuf),
    /// Input/output error.
    #[error("input/output error: {0}")]
    Io(#[from] std::io::Error),
    /// The policy file's JSON was malformed or referenced an unknown policy.
    #[error("policy error: {0}")]
    Policy(String),
    /// The same soname resolved to two different absolute paths from two search
    /// contexts within one graph.
    #[error("soname {0:?} resolves to conflicting paths: {1:?} and {2:?}")]
    SonameConflict(String, PathBuf, PathBuf),
    /// Root binaries span more than one architecture.
    #[error("archive contains binaries for more than one architecture: {0} and {1}")]
    HeterogeneousArchive(String, String),
    /// A whitelisted library's imported symbol version exceeds the policy's maximum.
    #[error("symbol version {actual} of group {group} exceeds policy maximum {max}")]
    PolicyViolation {
        /// The symbol version group, e.g. `GLIBC`.
        group: String,
        /// The version actually requested.
        actual: String,
        /// The highest version the policy allows for this group.
        max: String,
    },
    /// A whitelisted library's imported symbol is explicitly blacklisted by the policy.
    #[error("symbol {symbol:?} of library {library:?} is blacklisted by the policy")]
    BlacklistedSymbol {
        /// The library the symbol is imported from.
        library: String,
        /// The blacklisted plain symbol name.
        symbol: String,
    },
}
