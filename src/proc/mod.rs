//! Processor management.
//!
//! Clients attach to a DSP through [`attach`] and get a [`Processor`] handle. Through it they load
//! and run images, map host buffers into the DSP address space, query the DSP and receive event
//! notifications. Every handle attached to a DSP is a view of the same [`Device`]; the processor
//! state is shared, notifications and access rights are per handle.
//!
//! The module keeps a reference count of its users: [`init`] must be called before attaching,
//! and balanced by [`exit`].

use alloc::{format, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use spin::Mutex;

use crate::{
    board::{BoardState, CallbackData, ProcLoadStat},
    cod::CodImage,
    config::{
        DevNode, MemSegment, ProcessorAttrs, PROC_DFLT_TIMEOUT_MS, PROC_ENV_PROCID,
        TRACE_BEG_SYMBOL, TRACE_END_SYMBOL,
    },
    deh::ErrorInfo,
    dev::Device,
    drv::{Driver, ProcessContext},
    error::{DspError, DspResult, DSP_SALREADYATTACHED, DSP_SOK},
    node::{NodeCount, NodeHandle, NodeManager},
    ntfy::{Notification, Notifier, NotifyType, ProcEvents},
};

mod memory;
mod recovery;

pub use recovery::recover;

lazy_static! {
    static ref PROC_REFS: Mutex<u32> = Mutex::new(0);
}

/// Takes a reference on the processor module. Always succeeds.
pub fn init() -> bool {
    let mut refs = PROC_REFS.lock();
    *refs += 1;
    if *refs == 1 {
        debug!("processor module initialized");
    }
    true
}

/// Drops a reference on the processor module.
pub fn exit() {
    let mut refs = PROC_REFS.lock();
    match *refs {
        0 => warn!("processor module exit without init"),
        1 => {
            *refs = 0;
            debug!("processor module released");
        }
        _ => *refs -= 1,
    }
}

/// Returns whether [`init`] was called more often than [`exit`].
pub fn is_initialized() -> bool {
    *PROC_REFS.lock() > 0
}

/// Processor state reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcState {
    /// No image is running.
    Stopped,
    /// An image is loaded and can be started.
    Loaded,
    /// The loaded image is running.
    Running,
    /// The DSP hit a fatal error.
    Error,
}

/// Processor state with the details of the last fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorState {
    /// Current state.
    pub state: ProcState,
    /// Error details, meaningful in [`ProcState::Error`] only.
    pub err_info: ErrorInfo,
}

/// Resources [`Processor::resource_info`] can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Node heap in dual-access RAM.
    DynDaram,
    /// Node heap in single-access RAM.
    DynSaram,
    /// Node heap in external memory.
    DynExternal,
    /// Node heap in on-chip SRAM.
    DynSram,
    /// Processor load.
    ProcLoad,
}

impl ResourceType {
    /// Returns the memory segment backing a memory resource.
    pub fn segment(self) -> Option<MemSegment> {
        match self {
            ResourceType::DynDaram => Some(MemSegment::Daram),
            ResourceType::DynSaram => Some(MemSegment::Saram),
            ResourceType::DynExternal => Some(MemSegment::External),
            ResourceType::DynSram => Some(MemSegment::Sram),
            ResourceType::ProcLoad => None,
        }
    }
}

impl TryFrom<u32> for ResourceType {
    type Error = DspError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(ResourceType::DynDaram),
            1 => Ok(ResourceType::DynSaram),
            2 => Ok(ResourceType::DynExternal),
            3 => Ok(ResourceType::DynSram),
            4 => Ok(ResourceType::ProcLoad),
            _ => Err(DspError::InvalidArg),
        }
    }
}

/// Memory statistics of a node heap.
pub type MemStat = dmm::TableStats;

/// Answer of [`Processor::resource_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceInfo {
    /// Statistics of a node heap.
    Memory(MemStat),
    /// Processor load.
    ProcLoad(ProcLoadStat),
}

/// Outcome of a successful [`attach`].
#[derive(Debug, Clone)]
pub enum Attach {
    /// The caller is the only client of the processor.
    Attached(Processor),
    /// Other clients were already attached.
    AlreadyAttached(Processor),
}

impl Attach {
    /// Returns the processor handle.
    pub fn processor(&self) -> &Processor {
        match self {
            Attach::Attached(p) | Attach::AlreadyAttached(p) => p,
        }
    }

    /// Consumes the outcome, returning the processor handle.
    pub fn into_processor(self) -> Processor {
        match self {
            Attach::Attached(p) | Attach::AlreadyAttached(p) => p,
        }
    }

    /// Returns the matching success code.
    pub fn status(&self) -> u32 {
        match self {
            Attach::Attached(_) => DSP_SOK,
            Attach::AlreadyAttached(_) => DSP_SALREADYATTACHED,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ProcObject {
    device: Arc<Device>,
    processor_id: u32,
    timeout_ms: u32,
    pid: u32,
    privileged: bool,
    notifier: Notifier,
    deh_regs: Mutex<Vec<Notification>>,
    attached: AtomicBool,
}

impl ProcObject {
    fn new(device: Arc<Device>, timeout_ms: u32, pid: u32, privileged: bool) -> Self {
        Self {
            processor_id: device.processor_id(),
            device,
            timeout_ms,
            pid,
            privileged,
            notifier: Notifier::new(),
            deh_regs: Mutex::new(Vec::new()),
            attached: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

/// A client handle on a DSP processor.
///
/// Clones refer to the same handle. Once detached, every operation fails with
/// [`DspError::Handle`].
#[derive(Debug, Clone)]
pub struct Processor(Arc<ProcObject>);

/// Attaches the client owning `ctx` to processor `processor_id`.
///
/// If `ctx` is already attached, its handle is returned unchanged. Every client of the processor
/// is notified with [`ProcEvents::PROCESSORATTACH`].
pub fn attach(
    driver: &Driver,
    processor_id: u32,
    attrs: Option<&ProcessorAttrs>,
    ctx: &mut ProcessContext,
) -> DspResult<Attach> {
    if !is_initialized() {
        error!("attach to processor {} before init", processor_id);
        return Err(DspError::Fail);
    }

    if let Some(p) = ctx.processor.as_ref().filter(|p| p.is_valid()) {
        return Ok(Attach::Attached(p.clone()));
    }

    let device = driver.device(processor_id).ok_or_else(|| {
        error!("attach to unknown processor {}", processor_id);
        DspError::Fail
    })?;

    let timeout_ms = attrs.map_or(PROC_DFLT_TIMEOUT_MS, |a| a.timeout_ms);
    let obj = Arc::new(ProcObject::new(
        device.clone(),
        timeout_ms,
        ctx.pid(),
        ctx.is_privileged(),
    ));
    let already = device.insert_proc(&obj);
    let processor = Processor(obj);
    ctx.processor = Some(processor.clone());

    info!(
        "processor {}: attached by pid {}{}",
        processor_id,
        ctx.pid(),
        if already { ", shared" } else { "" }
    );
    device.notify_clients(ProcEvents::PROCESSORATTACH);

    Ok(if already {
        Attach::AlreadyAttached(processor)
    } else {
        Attach::Attached(processor)
    })
}

/// Detaches the processor held by `ctx`.
///
/// Mappings and reservations made through the context are released first. The handle's own
/// registrations get [`ProcEvents::PROCESSORDETACH`] before being dropped.
pub fn detach(ctx: &mut ProcessContext) -> DspResult<()> {
    let processor = ctx.processor.take().ok_or(DspError::Handle)?;
    let obj = processor.object()?;

    memory::release_context(&processor, ctx);

    obj.notifier.notify(ProcEvents::PROCESSORDETACH);
    obj.notifier.clear();
    let deh_regs = core::mem::take(&mut *obj.deh_regs.lock());
    for n in &deh_regs {
        let _ = obj
            .device
            .deh
            .notifier
            .register(n, ProcEvents::empty(), NotifyType::SIGNAL_EVENT);
    }

    obj.attached.store(false, Ordering::Release);
    obj.device.remove_proc(&processor.0);
    info!("processor {}: detached by pid {}", obj.processor_id, obj.pid);
    Ok(())
}

/// Loads and starts the default executable of a device, without any client attached.
pub fn auto_start(node: &DevNode, device: &Arc<Device>) -> DspResult<()> {
    if !is_initialized() {
        error!("auto-start of processor {} before init", device.processor_id());
        return Err(DspError::Fail);
    }

    let exec = node.default_executable.as_deref().ok_or_else(|| {
        warn!("processor {}: no default executable", device.processor_id());
        DspError::File
    })?;

    let processor = Processor(Arc::new(ProcObject::new(
        device.clone(),
        PROC_DFLT_TIMEOUT_MS,
        0,
        true,
    )));
    processor.stop()?;
    processor.load(&[exec], &[])?;
    processor.start()?;

    device.state.lock().auto_started = true;
    info!("processor {}: auto-started {}", device.processor_id(), exec);
    Ok(())
}

impl Processor {
    fn object(&self) -> DspResult<&ProcObject> {
        if self.0.is_attached() {
            Ok(&*self.0)
        } else {
            Err(DspError::Handle)
        }
    }

    /// Returns whether the handle is still attached.
    pub fn is_valid(&self) -> bool {
        self.0.is_attached()
    }

    /// Returns whether `self` and `other` are the same handle.
    pub fn same(&self, other: &Processor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Sends a control request to the DSP. Requires a privileged client.
    pub fn ctrl(&self, cmd: u32, args: &CallbackData) -> DspResult<()> {
        let obj = self.object()?;
        if !obj.privileged {
            warn!("processor {}: ctrl denied to pid {}", obj.processor_id, obj.pid);
            return Err(DspError::AccessDenied);
        }
        obj.device.ensure_responsive()?;

        obj.device
            .board()
            .ctrl(cmd, args, obj.timeout_ms)
            .map_err(|e| {
                error!("processor {}: ctrl {:#x}: {}", obj.processor_id, cmd, e);
                DspError::from(e)
            })
    }

    /// Copies the handles of the nodes allocated on the processor into `table`.
    ///
    /// Fails with [`DspError::Size`] if `table` is too small, see [`Device::node_count`].
    pub fn enum_nodes(&self, table: &mut [NodeHandle]) -> DspResult<NodeCount> {
        let obj = self.object()?;
        obj.device.ensure_responsive()?;

        let state = obj.device.state.lock();
        state
            .node_mgr
            .as_ref()
            .ok_or(DspError::Fail)?
            .enumerate(table)
    }

    /// Reports on a processor resource. The processor must be running.
    pub fn resource_info(&self, kind: ResourceType) -> DspResult<ResourceInfo> {
        let obj = self.object()?;
        let device = &obj.device;
        device.ensure_responsive()?;

        let state = device.state.lock();
        if state.state != ProcState::Running {
            return Err(DspError::WrongState);
        }

        match kind.segment() {
            Some(segment) => state
                .node_mgr
                .as_ref()
                .and_then(|mgr| mgr.heap_stats(segment))
                .map(ResourceInfo::Memory)
                .ok_or(DspError::Fail),
            None => {
                drop(state);
                device
                    .board()
                    .proc_load()
                    .map(ResourceInfo::ProcLoad)
                    .map_err(|e| {
                        error!("processor {}: load query: {}", obj.processor_id, e);
                        DspError::from(e)
                    })
            }
        }
    }

    /// Returns the device behind the handle.
    pub fn dev_object(&self) -> DspResult<Arc<Device>> {
        Ok(self.object()?.device.clone())
    }

    /// Returns the processor state as reported by the board.
    pub fn state(&self) -> DspResult<ProcessorState> {
        let obj = self.object()?;
        let status = obj.device.board().status().map_err(|e| {
            error!("processor {}: status: {}", obj.processor_id, e);
            DspError::Fail
        })?;

        let state = match status {
            BoardState::Stopped | BoardState::Idle => ProcState::Stopped,
            BoardState::Loaded => ProcState::Loaded,
            BoardState::Running | BoardState::Hibernation => ProcState::Running,
            BoardState::Error => ProcState::Error,
        };
        let err_info = if state == ProcState::Error {
            obj.device.error_info()
        } else {
            ErrorInfo::default()
        };

        Ok(ProcessorState { state, err_info })
    }

    /// Returns the zero-based processor id.
    pub fn processor_id(&self) -> DspResult<u32> {
        Ok(self.object()?.processor_id)
    }

    /// Copies the DSP trace buffer into `buf`, returning the number of bytes copied.
    pub fn trace(&self, buf: &mut [u8]) -> DspResult<usize> {
        if buf.is_empty() {
            return Err(DspError::InvalidArg);
        }
        let obj = self.object()?;
        obj.device.ensure_responsive()?;

        let bounds = {
            let state = obj.device.state.lock();
            let cod = state.cod.as_ref().ok_or(DspError::Fail)?;
            cod.symbol(TRACE_BEG_SYMBOL).zip(cod.symbol(TRACE_END_SYMBOL))
        };
        let (beg, end) = match bounds {
            Some((beg, end)) if end > beg => (beg, end),
            _ => {
                error!("processor {}: no trace buffer in image", obj.processor_id);
                return Err(DspError::Fail);
            }
        };

        let len = buf.len().min((end - beg) as usize);
        obj.device
            .board()
            .read(beg, &mut buf[..len])
            .map_err(|e| {
                error!("processor {}: reading trace buffer: {}", obj.processor_id, e);
                DspError::Fail
            })?;
        Ok(len)
    }

    /// Loads the image named `argv[0]` onto the DSP, passing it `argv` and `envp`.
    ///
    /// The processor is stopped first. A `PROC_ID=<id>` entry is prepended to the environment.
    /// Requires a privileged client.
    pub fn load(&self, argv: &[&str], envp: &[&str]) -> DspResult<()> {
        let obj = self.object()?;
        if argv.is_empty() {
            return Err(DspError::InvalidArg);
        }
        if !obj.privileged {
            warn!("processor {}: load denied to pid {}", obj.processor_id, obj.pid);
            return Err(DspError::AccessDenied);
        }

        self.stop()?;

        let device = &obj.device;
        let board = device.board();
        board.monitor().map_err(|e| {
            error!("processor {}: can't enter monitor: {}", obj.processor_id, e);
            DspError::Fail
        })?;

        let proc_id = format!("{}{}", PROC_ENV_PROCID, obj.processor_id);
        let env: Vec<&str> = core::iter::once(proc_id.as_str())
            .chain(envp.iter().copied())
            .collect();

        let name = argv[0];
        let image = device.images().open(name).ok_or_else(|| {
            error!("processor {}: {} not found", obj.processor_id, name);
            DspError::File
        })?;

        let mut state = device.state.lock();
        state.cod = None;
        let cod = CodImage::load(board, name, &image, argv, &env, device.config().load_bias)?;
        board.set_state(BoardState::Loaded).map_err(|e| {
            error!("processor {}: can't flag image loaded: {}", obj.processor_id, e);
            DspError::Fail
        })?;

        let entry = cod.entry();
        state.cod = Some(cod);
        state.state = ProcState::Loaded;
        drop(state);

        device.deh.clear();
        info!(
            "processor {}: loaded {} (entry {:#010x})",
            obj.processor_id, name, entry
        );
        Ok(())
    }

    /// Registers `notification` for the events in `event_mask`.
    ///
    /// Error events are delivered by the device exception handler, the others by this handle.
    /// An empty mask removes the registration.
    pub fn register_notify(
        &self,
        event_mask: u32,
        notify_type: NotifyType,
        notification: &Notification,
    ) -> DspResult<()> {
        let obj = self.object()?;
        let mask = ProcEvents::from_mask(event_mask)?;
        if notify_type != NotifyType::SIGNAL_EVENT {
            return Err(DspError::NotImplemented);
        }

        let errors = mask & ProcEvents::ERRORS;
        let others = mask - ProcEvents::ERRORS;

        if mask.is_empty() {
            let own = obj.notifier.register(notification, mask, notify_type);
            let deh = self.deregister_deh(notification);
            return own.or(deh);
        }

        if others.is_empty() {
            let _ = obj.notifier.register(notification, others, notify_type);
        } else {
            obj.notifier.register(notification, others, notify_type)?;
        }

        if errors.is_empty() {
            let _ = self.deregister_deh(notification);
        } else {
            obj.device
                .deh
                .notifier
                .register(notification, errors, notify_type)?;
            let mut regs = obj.deh_regs.lock();
            if !regs.iter().any(|n| n.same(notification)) {
                regs.push(notification.clone());
            }
        }
        Ok(())
    }

    fn deregister_deh(&self, notification: &Notification) -> DspResult<()> {
        let obj = self.object()?;
        obj.deh_regs.lock().retain(|n| !n.same(notification));
        obj.device
            .deh
            .notifier
            .register(notification, ProcEvents::empty(), NotifyType::SIGNAL_EVENT)
    }

    /// Signals `events` to the registrations of this handle.
    pub fn notify_clients(&self, events: u32) -> DspResult<()> {
        let obj = self.object()?;
        let events = ProcEvents::from_mask(events)?;
        if events.is_empty() {
            return Err(DspError::Value);
        }
        obj.notifier.notify(events);
        Ok(())
    }

    /// Signals `events` to every handle attached to the processor.
    pub fn notify_all_clients(&self, events: u32) -> DspResult<()> {
        let obj = self.object()?;
        let events = ProcEvents::from_mask(events)?;
        if events.is_empty() {
            return Err(DspError::Value);
        }
        obj.device.notify_clients(events);
        Ok(())
    }

    /// Starts the loaded image.
    pub fn start(&self) -> DspResult<()> {
        let obj = self.object()?;
        let device = &obj.device;
        let board = device.board();

        let entry = {
            let mut state = device.state.lock();
            if state.state != ProcState::Loaded {
                warn!(
                    "processor {}: start in state {:?}",
                    obj.processor_id, state.state
                );
                return Err(DspError::WrongState);
            }
            let entry = state
                .cod
                .as_ref()
                .map(CodImage::entry)
                .ok_or(DspError::Fail)?;

            let started = board
                .start(entry)
                .map_err(|e| {
                    error!("processor {}: start at {:#x}: {}", obj.processor_id, entry, e);
                    DspError::Fail
                })
                .and_then(|()| NodeManager::new(&device.config().heaps));

            match started {
                Ok(mgr) => {
                    state.node_mgr = Some(mgr);
                    state.state = ProcState::Running;
                }
                Err(e) => {
                    if let Err(e) = board.stop() {
                        warn!("processor {}: stop after failed start: {}", obj.processor_id, e);
                    }
                    state.state = ProcState::Stopped;
                    return Err(e);
                }
            }
            entry
        };

        info!("processor {}: started at {:#010x}", obj.processor_id, entry);
        device.notify_clients(ProcEvents::PROCESSORSTATECHANGE);
        Ok(())
    }

    /// Stops the processor. Fails with [`DspError::WrongState`] while nodes are allocated.
    pub fn stop(&self) -> DspResult<()> {
        let obj = self.object()?;
        let device = &obj.device;

        {
            let mut state = device.state.lock();
            let nodes = state.node_mgr.as_ref().map_or(0, NodeManager::count);
            if nodes > 0 {
                warn!(
                    "processor {}: can't stop with {} active nodes",
                    obj.processor_id, nodes
                );
                return Err(DspError::WrongState);
            }

            device.board().stop().map_err(|e| {
                error!("processor {}: stop: {}", obj.processor_id, e);
                DspError::Fail
            })?;
            state.node_mgr = None;
            state.state = ProcState::Stopped;
        }

        info!("processor {}: stopped", obj.processor_id);
        device.notify_clients(ProcEvents::PROCESSORSTATECHANGE);
        Ok(())
    }
}
