use thiserror::Error;

/// Errors produced while parsing an ELF file.
#[derive(Error, Debug)]
pub enum Error {
    /// The magic bytes at the start of the file do not match `\x7fELF`.
    #[error("not an ELF file")]
    NotElf,
    /// The file is a well-formed ELF file but uses a class, byte order or
    /// machine this inspector does not know how to interpret.
    #[error("unsupported ELF file: {0}")]
    UnsupportedElf(&'static str),
    /// The file claims to be ELF but its internal offsets, sizes or tables
    /// are inconsistent or truncated.
    #[error("malformed ELF file: {0}")]
    MalformedElf(&'static str),
    /// Input/output error while reading the file.
    #[error("input/output error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<std::io::ErrorKind> for Error {
    fn from(other: std::io::ErrorKind) -> Self {
        Self::Io(other.into())
    }
}
