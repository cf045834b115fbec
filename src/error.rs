//! Status codes and the error type shared by every bridge operation.
//!
//! Operations return [`DspResult`]. The numeric codes are what crosses the user/kernel boundary;
//! [`DspError::status`] and [`DspError::from_status`] convert between the two forms.

use core::fmt;

use dmm::DmmError;
use elf::ElfError;

/// Base of the success codes.
pub const DSP_SBASE: u32 = 0x0000_8000;
/// Success.
pub const DSP_SOK: u32 = DSP_SBASE;
/// Success, another client was already attached to the processor.
pub const DSP_SALREADYATTACHED: u32 = DSP_SBASE + 0x01;

/// Base of the failure codes.
pub const DSP_EBASE: u32 = 0x8000_8000;
/// The executable could not be parsed.
pub const DSP_ECORRUPTFILE: u32 = DSP_EBASE + 0x03;
/// General failure.
pub const DSP_EFAIL: u32 = DSP_EBASE + 0x08;
/// The executable was not found.
pub const DSP_EFILE: u32 = DSP_EBASE + 0x09;
/// Invalid handle.
pub const DSP_EHANDLE: u32 = DSP_EBASE + 0x0a;
/// A caller precondition was violated.
pub const DSP_EINVALIDARG: u32 = DSP_EBASE + 0x0b;
/// Out of memory or address space.
pub const DSP_EMEMORY: u32 = DSP_EBASE + 0x0c;
/// Not implemented.
pub const DSP_ENOTIMPL: u32 = DSP_EBASE + 0x0d;
/// The caller-provided table is too small.
pub const DSP_ESIZE: u32 = DSP_EBASE + 0x0e;
/// Timeout.
pub const DSP_ETIMEOUT: u32 = DSP_EBASE + 0x0f;
/// Invalid value.
pub const DSP_EVALUE: u32 = DSP_EBASE + 0x10;
/// The processor is in the wrong state.
pub const DSP_EWRONGSTATE: u32 = DSP_EBASE + 0x11;
/// The client lacks the required access rights.
pub const DSP_EACCESSDENIED: u32 = DSP_EBASE + 0x12;
/// No region starts at the given address.
pub const DSP_ENOTFOUND: u32 = DSP_EBASE + 0x13;
/// A critical error occurred and the DSP is being restarted.
pub const DSP_ERESTART: u32 = DSP_EBASE + 0x14;

/// Result type returned by bridge operations.
pub type DspResult<T> = Result<T, DspError>;

/// The error type returned by bridge operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DspError {
    /// The processor handle is invalid or was detached.
    Handle,
    /// The processor is not in a state allowing the operation.
    WrongState,
    /// The DSP did not respond in time.
    Timeout,
    /// The executable was not found.
    File,
    /// The executable could not be parsed or relocated.
    CorruptFile,
    /// The client lacks the required access rights.
    AccessDenied,
    /// Out of memory or address space.
    Memory,
    /// No region or mapping starts at the given address.
    NotFound,
    /// The requested feature is not supported.
    NotImplemented,
    /// General failure.
    Fail,
    /// A critical error occurred and the DSP is being restarted.
    Restarting,
    /// The caller-provided table is too small.
    Size,
    /// A parameter has an invalid value.
    Value,
    /// A caller precondition was violated.
    InvalidArg,
}

impl DspError {
    /// Returns the numeric status code for this error.
    pub fn status(self) -> u32 {
        match self {
            DspError::Handle => DSP_EHANDLE,
            DspError::WrongState => DSP_EWRONGSTATE,
            DspError::Timeout => DSP_ETIMEOUT,
            DspError::File => DSP_EFILE,
            DspError::CorruptFile => DSP_ECORRUPTFILE,
            DspError::AccessDenied => DSP_EACCESSDENIED,
            DspError::Memory => DSP_EMEMORY,
            DspError::NotFound => DSP_ENOTFOUND,
            DspError::NotImplemented => DSP_ENOTIMPL,
            DspError::Fail => DSP_EFAIL,
            DspError::Restarting => DSP_ERESTART,
            DspError::Size => DSP_ESIZE,
            DspError::Value => DSP_EVALUE,
            DspError::InvalidArg => DSP_EINVALIDARG,
        }
    }

    /// Converts a numeric failure code back into an error.
    ///
    /// Returns `None` for success codes and unknown values.
    pub fn from_status(status: u32) -> Option<Self> {
        let err = match status {
            DSP_EHANDLE => DspError::Handle,
            DSP_EWRONGSTATE => DspError::WrongState,
            DSP_ETIMEOUT => DspError::Timeout,
            DSP_EFILE => DspError::File,
            DSP_ECORRUPTFILE => DspError::CorruptFile,
            DSP_EACCESSDENIED => DspError::AccessDenied,
            DSP_EMEMORY => DspError::Memory,
            DSP_ENOTFOUND => DspError::NotFound,
            DSP_ENOTIMPL => DspError::NotImplemented,
            DSP_EFAIL => DspError::Fail,
            DSP_ERESTART => DspError::Restarting,
            DSP_ESIZE => DspError::Size,
            DSP_EVALUE => DspError::Value,
            DSP_EINVALIDARG => DspError::InvalidArg,
            _ => return None,
        };
        Some(err)
    }
}

/// Returns whether `status` is a success code.
pub fn is_success(status: u32) -> bool {
    status & DSP_EBASE != DSP_EBASE && status & DSP_SBASE == DSP_SBASE
}

impl fmt::Display for DspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DspError::Handle => write!(f, "invalid processor handle"),
            DspError::WrongState => write!(f, "processor in wrong state"),
            DspError::Timeout => write!(f, "timed out waiting for the DSP"),
            DspError::File => write!(f, "DSP executable not found"),
            DspError::CorruptFile => write!(f, "unable to parse the DSP executable"),
            DspError::AccessDenied => write!(f, "access denied"),
            DspError::Memory => write!(f, "out of memory"),
            DspError::NotFound => write!(f, "region not found"),
            DspError::NotImplemented => write!(f, "not implemented"),
            DspError::Fail => write!(f, "general failure"),
            DspError::Restarting => write!(f, "DSP is restarting"),
            DspError::Size => write!(f, "buffer too small"),
            DspError::Value => write!(f, "invalid value"),
            DspError::InvalidArg => write!(f, "invalid argument"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DspError {}

impl From<ElfError> for DspError {
    fn from(_: ElfError) -> Self {
        DspError::CorruptFile
    }
}

impl From<DmmError> for DspError {
    fn from(e: DmmError) -> Self {
        match e {
            DmmError::OutOfSpace => DspError::Memory,
            DmmError::NotFound | DmmError::Overlap => DspError::NotFound,
            DmmError::InvalidSize | DmmError::UnalignedAddress => DspError::InvalidArg,
            DmmError::InvalidPageSize => DspError::Fail,
        }
    }
}
