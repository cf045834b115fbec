//! DSP devices.
//!
//! A [`Device`] holds everything shared by the processor objects attached to one DSP core: the
//! board, the run state, the loaded image, the node manager and the DSP virtual address pool.
//!
//! Lock order is `state` before `dmm`. Notifications are always sent with both released.

use alloc::{
    string::String,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::fmt;

use dmm::{RegionTable, TableStats};
use log::{debug, error};
use spin::Mutex;

use crate::{
    board::Board,
    cod::{CodImage, ImageSource},
    config::{DeviceConfig, DeviceType, MemSegment, DSP_PAGE_SIZE},
    deh::Deh,
    error::{DspError, DspResult},
    node::{NodeHandle, NodeInfo, NodeManager},
    ntfy::ProcEvents,
    proc::{ProcObject, ProcState},
};

#[derive(Debug)]
pub(crate) struct DeviceState {
    pub(crate) state: ProcState,
    pub(crate) restarting: bool,
    pub(crate) cod: Option<CodImage>,
    pub(crate) node_mgr: Option<NodeManager>,
    pub(crate) auto_started: bool,
}

/// A host buffer mapped into the DSP address pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MapRecord {
    pub(crate) mpu_addr: usize,
    pub(crate) dsp_addr: u32,
    pub(crate) size: u32,
}

impl MapRecord {
    /// Returns whether `[mpu_addr, mpu_addr + size)` lies inside the mapped buffer.
    pub(crate) fn covers(&self, mpu_addr: usize, size: u32) -> bool {
        let end = self.mpu_addr.checked_add(self.size as usize);
        let req_end = mpu_addr.checked_add(size as usize);
        match (end, req_end) {
            (Some(end), Some(req_end)) => mpu_addr >= self.mpu_addr && req_end <= end,
            _ => false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DmmState {
    pub(crate) table: RegionTable,
    pub(crate) maps: Vec<MapRecord>,
}

/// A DSP core and the state shared by its clients.
pub struct Device {
    processor_id: u32,
    config: DeviceConfig,
    board: Arc<dyn Board>,
    images: Arc<dyn ImageSource>,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) dmm: Mutex<DmmState>,
    pub(crate) deh: Deh,
    procs: Mutex<Vec<Weak<ProcObject>>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("processor_id", &self.processor_id)
            .field("dev_type", &self.config.dev_type)
            .field("state", &self.state.lock().state)
            .finish_non_exhaustive()
    }
}

impl Device {
    pub(crate) fn new(
        processor_id: u32,
        board: Arc<dyn Board>,
        images: Arc<dyn ImageSource>,
        config: DeviceConfig,
    ) -> DspResult<Self> {
        let table = RegionTable::new(config.dmm_base, config.dmm_size, DSP_PAGE_SIZE).map_err(
            |e| {
                error!(
                    "processor {}: invalid DMM pool {:#x}+{:#x}: {}",
                    processor_id, config.dmm_base, config.dmm_size, e
                );
                DspError::Fail
            },
        )?;

        Ok(Self {
            processor_id,
            config,
            board,
            images,
            state: Mutex::new(DeviceState {
                state: ProcState::Stopped,
                restarting: false,
                cod: None,
                node_mgr: None,
                auto_started: false,
            }),
            dmm: Mutex::new(DmmState {
                table,
                maps: Vec::new(),
            }),
            deh: Deh::default(),
            procs: Mutex::new(Vec::new()),
        })
    }

    /// Returns the index of the processor in the driver.
    pub fn processor_id(&self) -> u32 {
        self.processor_id
    }

    /// Returns the kind of processor.
    pub fn dev_type(&self) -> DeviceType {
        self.config.dev_type
    }

    /// Returns the device configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Returns the board driving the DSP.
    pub fn board(&self) -> &dyn Board {
        &*self.board
    }

    pub(crate) fn images(&self) -> &dyn ImageSource {
        &*self.images
    }

    /// Returns the processor state tracked by the bridge.
    pub fn state(&self) -> ProcState {
        self.state.lock().state
    }

    /// Returns whether the DSP is being restarted after a fatal error.
    pub fn is_restarting(&self) -> bool {
        self.state.lock().restarting
    }

    /// Returns the name of the loaded image.
    pub fn loaded_image(&self) -> Option<String> {
        self.state.lock().cod.as_ref().map(|c| c.name().into())
    }

    /// Returns whether the current image was started by the driver itself.
    pub fn is_auto_started(&self) -> bool {
        self.state.lock().auto_started
    }

    /// Returns the number of processor objects attached.
    pub fn attached_count(&self) -> usize {
        self.live_procs().len()
    }

    /// Returns occupancy statistics of the DSP virtual address pool.
    pub fn dmm_stats(&self) -> TableStats {
        self.dmm.lock().table.stats()
    }

    /// Returns the number of nodes allocated on the processor.
    pub fn node_count(&self) -> usize {
        self.state.lock().node_mgr.as_ref().map_or(0, NodeManager::count)
    }

    /// Allocates a node with `size` bytes of memory in `segment`.
    ///
    /// Fails with [`DspError::WrongState`] unless the processor is running.
    pub fn allocate_node(&self, name: &str, segment: MemSegment, size: u32) -> DspResult<NodeHandle> {
        let mut state = self.state.lock();
        if state.state != ProcState::Running {
            return Err(DspError::WrongState);
        }
        state
            .node_mgr
            .as_mut()
            .ok_or(DspError::WrongState)?
            .allocate(name, segment, size)
    }

    /// Deletes a node, releasing its memory.
    pub fn delete_node(&self, handle: NodeHandle) -> DspResult<()> {
        self.state
            .lock()
            .node_mgr
            .as_mut()
            .ok_or(DspError::Handle)?
            .delete(handle)
    }

    /// Returns information about a live node.
    pub fn node_info(&self, handle: NodeHandle) -> Option<NodeInfo> {
        self.state
            .lock()
            .node_mgr
            .as_ref()
            .and_then(|mgr| mgr.info(handle).cloned())
    }

    /// Fails with [`DspError::Restarting`] if the DSP hit a fatal error or is being restarted.
    pub(crate) fn ensure_responsive(&self) -> DspResult<()> {
        let state = self.state.lock();
        if state.restarting || state.state == ProcState::Error {
            return Err(DspError::Restarting);
        }
        Ok(())
    }

    /// Adds a processor object, returning whether other clients were already attached.
    pub(crate) fn insert_proc(&self, obj: &Arc<ProcObject>) -> bool {
        let mut procs = self.procs.lock();
        procs.retain(|p| p.upgrade().is_some_and(|p| p.is_attached()));
        let already = !procs.is_empty();
        procs.push(Arc::downgrade(obj));
        already
    }

    pub(crate) fn remove_proc(&self, obj: &Arc<ProcObject>) {
        let target = Arc::downgrade(obj);
        self.procs
            .lock()
            .retain(|p| !p.ptr_eq(&target) && p.strong_count() > 0);
    }

    fn live_procs(&self) -> Vec<Arc<ProcObject>> {
        self.procs
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|p| p.is_attached())
            .collect()
    }

    /// Signals `events` to every client attached to the device.
    pub(crate) fn notify_clients(&self, events: ProcEvents) {
        let procs = self.live_procs();
        debug!(
            "processor {}: {:?} to {} clients",
            self.processor_id,
            events,
            procs.len()
        );
        for p in procs {
            p.notifier().notify(events);
        }
    }
}
