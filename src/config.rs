//! Driver-wide constants and per-device configuration.

use alloc::{string::String, vec, vec::Vec};

/// Default timeout for DSP control requests, in milliseconds.
pub const PROC_DFLT_TIMEOUT_MS: u32 = 10_000;

/// Page size of the DSP MMU.
pub const DSP_PAGE_SIZE: u32 = dmm::PAGE_SIZE_4K;

/// Default base of the DSP virtual address pool handed out by the DMM.
pub const DMM_POOL_BASE: u32 = 0x2000_0000;
/// Default size of the DSP virtual address pool.
pub const DMM_POOL_SIZE: u32 = 0x0100_0000;

/// Environment entry prepended to every loaded image's environment.
pub const PROC_ENV_PROCID: &str = "PROC_ID=";

/// Section receiving `argc`, `argv` and `envp` at load time.
pub const ARGS_SECTION: &str = ".args";

/// Symbol marking the start of the DSP trace buffer.
pub const TRACE_BEG_SYMBOL: &str = "_SYS_PUTCBEG";
/// Symbol marking the end of the DSP trace buffer.
pub const TRACE_END_SYMBOL: &str = "_SYS_PUTCEND";

/// Kind of processor behind a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// The main DSP core.
    Dsp,
    /// The IVA accelerator.
    Iva,
}

/// DSP memory segments node heaps can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemSegment {
    /// Dual-access internal RAM.
    Daram,
    /// Single-access internal RAM.
    Saram,
    /// External memory.
    External,
    /// On-chip SRAM.
    Sram,
}

/// A node heap inside a DSP memory segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Segment the heap lives in.
    pub segment: MemSegment,
    /// DSP address of the heap.
    pub base: u32,
    /// Size of the heap in bytes.
    pub size: u32,
    /// Allocation granularity, must be a power of two.
    pub granularity: u32,
}

/// Device node settings read at device creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevNode {
    /// Image loaded when the device is auto-started.
    pub default_executable: Option<String>,
    /// Load and start the default executable as soon as the device is created.
    pub auto_start: bool,
}

/// Configuration of a single DSP device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Kind of processor.
    pub dev_type: DeviceType,
    /// Base of the DSP virtual address pool.
    pub dmm_base: u32,
    /// Size of the DSP virtual address pool.
    pub dmm_size: u32,
    /// Offset added to the addresses of position-independent images.
    pub load_bias: u32,
    /// Node heaps, created each time the processor is started.
    pub heaps: Vec<HeapConfig>,
    /// Device node settings.
    pub node: DevNode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            dev_type: DeviceType::Dsp,
            dmm_base: DMM_POOL_BASE,
            dmm_size: DMM_POOL_SIZE,
            load_bias: 0,
            heaps: vec![
                HeapConfig {
                    segment: MemSegment::Daram,
                    base: 0x1100_0000,
                    size: 0x0001_0000,
                    granularity: 128,
                },
                HeapConfig {
                    segment: MemSegment::External,
                    base: 0x8700_0000,
                    size: 0x0010_0000,
                    granularity: 4096,
                },
            ],
            node: DevNode::default(),
        }
    }
}

/// Attributes passed when attaching to a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorAttrs {
    /// Timeout for control requests, in milliseconds.
    pub timeout_ms: u32,
}

impl Default for ProcessorAttrs {
    fn default() -> Self {
        Self {
            timeout_ms: PROC_DFLT_TIMEOUT_MS,
        }
    }
}
