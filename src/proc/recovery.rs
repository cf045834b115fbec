//! Restarting a DSP after a fatal error.

use alloc::sync::Arc;

use log::{info, warn};

use super::{auto_start, ProcState};
use crate::{
    dev::Device,
    error::{DspError, DspResult},
    ntfy::ProcEvents,
};

/// Brings a device out of [`ProcState::Error`].
///
/// Clients are told the DSP is restarting, nodes are dropped and the DSP is put back into reset.
/// Devices configured to auto-start get their default executable reloaded and started, the
/// others are left stopped for a client to reload. Operations reaching the DSP fail with
/// [`DspError::Restarting`] while this runs.
pub fn recover(device: &Arc<Device>) -> DspResult<()> {
    {
        let mut state = device.state.lock();
        if state.state != ProcState::Error {
            return Err(DspError::WrongState);
        }
        state.restarting = true;
    }

    info!("processor {}: recovering", device.processor_id());
    device.notify_clients(ProcEvents::PROCESSORRESTART);

    {
        let mut state = device.state.lock();
        if let Err(e) = device.board().stop() {
            warn!("processor {}: stop during recovery: {}", device.processor_id(), e);
        }
        state.node_mgr = None;
        state.state = ProcState::Stopped;
        state.auto_started = false;
    }

    let node = &device.config().node;
    let result = if node.auto_start && node.default_executable.is_some() {
        auto_start(node, device)
    } else {
        Ok(())
    };

    device.state.lock().restarting = false;
    match &result {
        Ok(()) => info!("processor {}: recovered", device.processor_id()),
        Err(e) => warn!("processor {}: recovery failed: {}", device.processor_id(), e),
    }
    device.notify_clients(ProcEvents::PROCESSORSTATECHANGE);
    result
}
