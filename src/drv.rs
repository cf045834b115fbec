//! The driver object and per-process client contexts.

use alloc::{sync::Arc, vec::Vec};
use core::fmt;

use log::{info, warn};

use crate::{
    board::Board,
    cod::ImageSource,
    config::DeviceConfig,
    dev::Device,
    error::DspResult,
    proc::{self, Processor},
};

/// The set of DSP devices managed by the bridge.
pub struct Driver {
    devices: Vec<Arc<Device>>,
    images: Arc<dyn ImageSource>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Creates a driver without devices. Executables are looked up in `images`.
    pub fn new(images: Arc<dyn ImageSource>) -> Self {
        Self {
            devices: Vec::new(),
            images,
        }
    }

    /// Adds a device driven by `board`. Its processor id is the number of devices added before.
    ///
    /// If the device node asks for it, the default executable is loaded and started right away.
    /// A failed auto-start is logged and leaves the device stopped.
    pub fn add_device(
        &mut self,
        board: Arc<dyn Board>,
        config: DeviceConfig,
    ) -> DspResult<Arc<Device>> {
        let processor_id = self.devices.len() as u32;
        let device = Arc::new(Device::new(
            processor_id,
            board,
            self.images.clone(),
            config,
        )?);
        self.devices.push(device.clone());
        info!("processor {}: device created", processor_id);

        let node = device.config().node.clone();
        if node.auto_start {
            if let Err(e) = proc::auto_start(&node, &device) {
                warn!("processor {}: auto-start failed: {}", processor_id, e);
            }
        }

        Ok(device)
    }

    /// Returns the device with the given processor id.
    pub fn device(&self, processor_id: u32) -> Option<&Arc<Device>> {
        self.devices.get(processor_id as usize)
    }

    /// Returns all devices.
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }
}

/// Bridge resources owned by one client process.
///
/// Dropping the context releases them: mappings and reservations are torn down and the
/// processor is detached.
#[derive(Debug)]
pub struct ProcessContext {
    pid: u32,
    privileged: bool,
    pub(crate) processor: Option<Processor>,
    pub(crate) maps: Vec<u32>,
    pub(crate) reservations: Vec<u32>,
}

impl ProcessContext {
    /// Creates the context of an ordinary client.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            privileged: false,
            processor: None,
            maps: Vec::new(),
            reservations: Vec::new(),
        }
    }

    /// Creates the context of a client allowed to load images and send control requests.
    pub fn privileged(pid: u32) -> Self {
        let mut ctx = Self::new(pid);
        ctx.privileged = true;
        ctx
    }

    /// Returns the client process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns whether the client may load images and send control requests.
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Returns the processor this context is attached to.
    pub fn processor(&self) -> Option<&Processor> {
        self.processor.as_ref()
    }

    /// Returns the DSP addresses of the buffers mapped by this context.
    pub fn mappings(&self) -> &[u32] {
        &self.maps
    }

    /// Returns the DSP addresses of the regions reserved by this context.
    pub fn reservations(&self) -> &[u32] {
        &self.reservations
    }

    /// Releases everything the context holds.
    pub fn release(&mut self) {
        if self.processor.is_some() {
            if let Err(e) = proc::detach(self) {
                warn!("pid {}: detach on release failed: {}", self.pid, e);
            }
        }
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        self.release();
    }
}
