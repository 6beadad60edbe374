use std::path::PathBuf;

/// Errors surfaced by the `auditelf` command-line tool: wraps every lower-layer
/// crate's errors plus the archive-handling failures specific to this layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error from the ELF inspector.
    #[error("{0}")]
    Elf(#[from] auditelf::Error),
    /// An error from dependency resolution, graph building, policy scoring or planning.
    #[error("{0}")]
    Resolve(#[from] auditelf_resolve::Error),
    /// Input/output error.
    #[error("input/output error: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to read or write the zip archive.
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Failed to parse or render JSON (policy file, `--format json`).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The archive is missing a `.dist-info/WHEEL` or `.dist-info/RECORD` file.
    #[error("{0:?} is not a valid wheel: {1}")]
    MalformedWheel(PathBuf, &'static str),
    /// The archive contains no ELF binaries with a platform-specific tag.
    #[error("{0:?} is not a platform wheel")]
    NonPlatformWheel(PathBuf),
    /// The requested target policy doesn't exist in the policy table.
    #[error("unknown policy {0:?}")]
    UnknownPolicy(String),
    /// The archive does not satisfy the requested target policy and cannot be repaired
    /// into satisfying it (graft conflicts aside, this is a symbol/version violation).
    #[error("cannot repair {0:?} to satisfy {1:?}: {2}")]
    Infeasible(PathBuf, String, String),
    /// The external `patchelf` invocation failed.
    #[error("patchelf failed on {0:?}: {1}")]
    PatcherFailed(PathBuf, String),
    /// The external `strip` invocation failed (not simply missing or read-only).
    #[error("strip failed on {0:?}: {1}")]
    StripFailed(PathBuf, String),
}
