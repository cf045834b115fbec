//! Device exception handling.
//!
//! Fatal DSP errors (MMU faults, system errors, watchdog and power failures) are reported here.
//! The device moves to [`ProcState::Error`] and the error details are kept for
//! [`Processor::state`]. Clients registered for the error event are signaled through the device
//! exception notifier, every attached client gets a state change. Until the DSP is reloaded,
//! most processor operations fail with [`DspError::Restarting`].
//!
//! [`Processor::state`]: crate::proc::Processor::state

use log::{error, warn};
use spin::Mutex;

use crate::{
    board::BoardState,
    dev::Device,
    error::{DspError, DspResult},
    ntfy::{Notifier, ProcEvents},
    proc::ProcState,
};

/// Details of the last fatal DSP error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Events describing the error.
    pub err_mask: u32,
    /// First error-specific value, the faulting address for MMU faults.
    pub val1: u32,
    /// Second error-specific value.
    pub val2: u32,
    /// Third error-specific value.
    pub val3: u32,
}

#[derive(Debug, Default)]
pub(crate) struct Deh {
    pub(crate) notifier: Notifier,
    info: Mutex<ErrorInfo>,
}

impl Deh {
    pub(crate) fn info(&self) -> ErrorInfo {
        *self.info.lock()
    }

    pub(crate) fn clear(&self) {
        *self.info.lock() = ErrorInfo::default();
    }
}

impl Device {
    /// Reports a fatal DSP error.
    ///
    /// `event` must be a non-empty combination of [`ProcEvents::ERRORS`].
    pub fn report_exception(&self, event: ProcEvents, info: ErrorInfo) -> DspResult<()> {
        if event.is_empty() || !ProcEvents::ERRORS.contains(event) {
            return Err(DspError::Value);
        }

        {
            let mut state = self.state.lock();
            state.state = ProcState::Error;
            if let Err(e) = self.board().set_state(BoardState::Error) {
                warn!("processor {}: can't flag board error: {}", self.processor_id(), e);
            }
        }

        *self.deh.info.lock() = ErrorInfo {
            err_mask: event.bits(),
            ..info
        };
        error!(
            "processor {}: DSP exception {:?} ({:#x}, {:#x}, {:#x})",
            self.processor_id(),
            event,
            info.val1,
            info.val2,
            info.val3
        );

        self.deh.notifier.notify(event);
        self.notify_clients(ProcEvents::PROCESSORSTATECHANGE);
        Ok(())
    }

    /// Returns the details of the last fatal error, cleared when a new image is loaded.
    pub fn error_info(&self) -> ErrorInfo {
        self.deh.info()
    }
}
