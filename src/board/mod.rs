//! Interface to the DSP hardware.
//!
//! Everything that touches the DSP subsystem itself goes through the [`Board`] trait: reset and
//! run control, access to DSP memory, the DSP MMU, cache maintenance on host buffers and the
//! control channel. The processor layer only keeps bookkeeping and drives a board through it.

use core::fmt;

use bitflags::bitflags;

use crate::error::DspError;

pub mod sim;

pub use sim::{CacheRecord, SimBoard};

/// State of the DSP as seen by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardState {
    /// In reset.
    Stopped,
    /// Out of reset, running the boot monitor.
    Idle,
    /// Running the loaded image.
    Running,
    /// An image was written and the DSP is waiting to be started.
    Loaded,
    /// Powered down with its context saved.
    Hibernation,
    /// A fatal error was reported by the DSP.
    Error,
}

/// The error type returned by board operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardError {
    /// The DSP did not answer in time.
    Timeout,
    /// An access fell outside DSP memory.
    Fault,
    /// The hardware refused the request.
    Failed,
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardError::Timeout => write!(f, "DSP did not respond in time"),
            BoardError::Fault => write!(f, "access outside DSP memory"),
            BoardError::Failed => write!(f, "board request failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BoardError {}

impl From<BoardError> for DspError {
    fn from(e: BoardError) -> Self {
        match e {
            BoardError::Timeout => DspError::Timeout,
            BoardError::Fault | BoardError::Failed => DspError::Fail,
        }
    }
}

/// Cache maintenance applied to a host buffer shared with the DSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    /// Discard cached lines so the CPU sees what the DSP wrote.
    Invalidate,
    /// Write dirty lines back so the DSP sees what the CPU wrote.
    Writeback,
    /// Write dirty lines back, then discard them.
    WritebackInvalidate,
}

impl TryFrom<u32> for CacheOp {
    type Error = DspError;

    fn try_from(flag: u32) -> Result<Self, Self::Error> {
        match flag {
            0 => Ok(CacheOp::Invalidate),
            1 => Ok(CacheOp::Writeback),
            2 => Ok(CacheOp::WritebackInvalidate),
            _ => Err(DspError::InvalidArg),
        }
    }
}

bitflags! {
    /// Attributes of a DSP MMU mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapAttrs: u32 {
        /// Little-endian element accesses.
        const LITTLE_ENDIAN   = 1 << 0;
        /// Big-endian element accesses.
        const BIG_ENDIAN      = 1 << 1;
        /// Element size given per access instead of per mapping.
        const MIXED_ELEM_SIZE = 1 << 2;
        /// 8-bit elements.
        const ELEM_SIZE8      = 1 << 3;
        /// 16-bit elements.
        const ELEM_SIZE16     = 1 << 4;
        /// 32-bit elements.
        const ELEM_SIZE32     = 1 << 5;
        /// 64-bit elements.
        const ELEM_SIZE64     = 1 << 6;
        /// The host address is a process virtual address.
        const VIRTUAL_ADDR    = 1 << 7;
        /// The host address is a physical address.
        const PHYSICAL_ADDR   = 1 << 8;
        /// Do not pin the host pages.
        const DO_NOT_LOCK     = 1 << 9;
    }
}

impl MapAttrs {
    const ENDIANNESS: Self = Self::LITTLE_ENDIAN.union(Self::BIG_ENDIAN);
    const ADDRESSING: Self = Self::VIRTUAL_ADDR.union(Self::PHYSICAL_ADDR);
    const ELEM_SIZES: Self = Self::ELEM_SIZE8
        .union(Self::ELEM_SIZE16)
        .union(Self::ELEM_SIZE32)
        .union(Self::ELEM_SIZE64);

    /// Fills in the defaults for unset attribute groups: little-endian, virtual addressing.
    ///
    /// Returns `None` if the attributes contradict each other.
    pub fn normalize(self) -> Option<Self> {
        if self.contains(Self::ENDIANNESS)
            || self.contains(Self::ADDRESSING)
            || self.intersection(Self::ELEM_SIZES).bits().count_ones() > 1
        {
            return None;
        }

        let mut attrs = self;
        if !attrs.intersects(Self::ENDIANNESS) {
            attrs |= Self::LITTLE_ENDIAN;
        }
        if !attrs.intersects(Self::ADDRESSING) {
            attrs |= Self::VIRTUAL_ADDR;
        }
        Some(attrs)
    }
}

/// Payload of a control request, forwarded to the DSP as is.
pub type CallbackData = [u8];

/// Processor load statistics reported by the DSP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcLoadStat {
    /// Current load, in percent.
    pub curr_load: u32,
    /// Predicted load, in percent.
    pub predicted_load: u32,
    /// Current DSP frequency, in kHz.
    pub curr_dsp_freq: u32,
    /// Predicted DSP frequency, in kHz.
    pub predicted_freq: u32,
}

/// A trait for DSP subsystem drivers.
///
/// Methods take `&self`: implementations are shared between all processor objects of a device
/// and must synchronize internally.
pub trait Board: Send + Sync {
    /// Returns the current state of the DSP.
    fn status(&self) -> Result<BoardState, BoardError>;

    /// Forces the board state, used to flag loaded images and fatal errors.
    fn set_state(&self, state: BoardState) -> Result<(), BoardError>;

    /// Takes the DSP out of reset and parks it in the boot monitor.
    fn monitor(&self) -> Result<(), BoardError>;

    /// Starts execution at `entry`.
    fn start(&self, entry: u32) -> Result<(), BoardError>;

    /// Puts the DSP back into reset.
    fn stop(&self) -> Result<(), BoardError>;

    /// Writes `data` to DSP memory at `dsp_addr`.
    fn write(&self, dsp_addr: u32, data: &[u8]) -> Result<(), BoardError>;

    /// Reads DSP memory at `dsp_addr` into `buf`.
    fn read(&self, dsp_addr: u32, buf: &mut [u8]) -> Result<(), BoardError>;

    /// Maps `size` bytes of host memory at `mpu_addr` to `dsp_addr` in the DSP MMU.
    fn mem_map(
        &self,
        mpu_addr: usize,
        dsp_addr: u32,
        size: u32,
        attrs: MapAttrs,
    ) -> Result<(), BoardError>;

    /// Removes the DSP MMU entries covering `[dsp_addr, dsp_addr + size)`.
    fn mem_unmap(&self, dsp_addr: u32, size: u32) -> Result<(), BoardError>;

    /// Applies cache maintenance to `size` bytes of host memory at `mpu_addr`.
    fn cache_op(&self, op: CacheOp, mpu_addr: usize, size: u32) -> Result<(), BoardError>;

    /// Sends a control request to the DSP and waits up to `timeout_ms` for it to complete.
    fn ctrl(&self, cmd: u32, args: &CallbackData, timeout_ms: u32) -> Result<(), BoardError>;

    /// Returns the current processor load.
    fn proc_load(&self) -> Result<ProcLoadStat, BoardError>;
}
