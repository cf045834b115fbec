#![allow(dead_code)]

use std::sync::Arc;

use dspbridge::{
    board::SimBoard,
    cod::MemoryImages,
    config::{DevNode, DeviceConfig, ARGS_SECTION, TRACE_BEG_SYMBOL, TRACE_END_SYMBOL},
    proc, Device, Driver, ProcessContext, Processor,
};
use elf::{abi, builder::ImageBuilder};

pub const MEM_BASE: u32 = 0x1000_0000;
pub const MEM_SIZE: u32 = 0x0001_0000;
pub const ENTRY: u32 = MEM_BASE + 0x100;
pub const ARGS: u32 = MEM_BASE + 0x3000;
pub const TRACE_BEG: u32 = MEM_BASE + 0x2000;
pub const TRACE_END: u32 = MEM_BASE + 0x2040;

pub const IMAGE: &str = "dsp.out";

/// A small DSP executable with a trace buffer and an argument section.
pub fn dsp_image() -> Vec<u8> {
    ImageBuilder::new(abi::ET_EXEC, ENTRY)
        .segment(MEM_BASE, &[0x11; 0x200], 0x400, abi::PF_R | abi::PF_X)
        .section(ARGS_SECTION, ARGS, 0x200)
        .symbol(TRACE_BEG_SYMBOL, TRACE_BEG)
        .symbol(TRACE_END_SYMBOL, TRACE_END)
        .symbol("_main", ENTRY)
        .build()
}

pub fn auto_start_config() -> DeviceConfig {
    DeviceConfig {
        node: DevNode {
            default_executable: Some(IMAGE.into()),
            auto_start: true,
        },
        ..DeviceConfig::default()
    }
}

/// A driver with one simulated DSP. Holds a reference on the processor module while alive.
pub struct Bench {
    pub driver: Driver,
    pub board: Arc<SimBoard>,
    pub images: Arc<MemoryImages>,
}

impl Bench {
    pub fn new() -> Self {
        Self::with_config(DeviceConfig::default())
    }

    pub fn with_config(config: DeviceConfig) -> Self {
        assert!(proc::init());

        let images = Arc::new(MemoryImages::new());
        images.insert(IMAGE, dsp_image());

        let mut driver = Driver::new(images.clone());
        let board = Arc::new(SimBoard::new(MEM_BASE, MEM_SIZE));
        driver.add_device(board.clone(), config).unwrap();

        Self {
            driver,
            board,
            images,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        self.driver.device(0).unwrap()
    }

    pub fn attach(&self, ctx: &mut ProcessContext) -> Processor {
        proc::attach(&self.driver, 0, None, ctx)
            .unwrap()
            .into_processor()
    }

    /// Attaches `ctx`, then loads and starts the test image.
    pub fn running(&self, ctx: &mut ProcessContext) -> Processor {
        let p = self.attach(ctx);
        p.load(&[IMAGE], &[]).unwrap();
        p.start().unwrap();
        p
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        proc::exit();
    }
}

pub fn read_cstr(board: &SimBoard, addr: u32) -> String {
    let bytes = board.peek(addr, 64).unwrap();
    let end = bytes.iter().position(|&b| b == 0).unwrap();
    String::from_utf8(bytes[..end].to_vec()).unwrap()
}
