use crate::dm::regs::{CmdErr, SbError};

/// Crate-wide error type.
///
/// Every fallible operation in the debug module back end and the RSP
/// front end returns one of these. The dispatcher (`rsp::dispatch`) is
/// the only place that ever turns a variant into wire bytes; nothing
/// else should match on these for control flow beyond that.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed RSP frame")]
    WireFraming,

    #[error("RSP checksum mismatch")]
    ChecksumMismatch,

    #[error("operation timed out")]
    Timeout,

    #[error("abstract command error: {0:?}")]
    DmCmdErr(CmdErr),

    #[error("system bus error: {0:?}")]
    SysBusError(SbError),

    #[error("unaligned memory access")]
    UnalignedAccess,

    #[error("unknown or out-of-range register")]
    BadRegister,

    #[error("malformed command arguments")]
    BadArguments,

    #[error("transport closed")]
    TransportClosed,

    #[error("elf load error: {0}")]
    Elf(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps an [`Error`] to the two hex digits of an RSP `Exx` reply. The
/// numbering is this crate's own convention — GDB only cares that the
/// reply is shaped `Exx`, not what the code means.
pub fn errno(e: &Error) -> u8 {
    match e {
        Error::WireFraming => 1,
        Error::ChecksumMismatch => 2,
        Error::Timeout => 3,
        Error::DmCmdErr(_) => 4,
        Error::SysBusError(_) => 5,
        Error::UnalignedAccess => 6,
        Error::BadRegister => 7,
        Error::BadArguments => 8,
        Error::TransportClosed => 9,
        Error::Elf(_) => 10,
        Error::Io(_) => 11,
    }
}
