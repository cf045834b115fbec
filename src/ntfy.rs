//! Event notifications delivered to processor clients.
//!
//! A client hands a [`Notification`] to [`Processor::register_notify`] together with the events
//! it cares about. When one of those events fires, the notification is signaled and the fired
//! events accumulate in it until the client takes them.
//!
//! [`Processor::register_notify`]: crate::proc::Processor::register_notify

use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::error::{DspError, DspResult};

bitflags! {
    /// Processor events a client can register for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProcEvents: u32 {
        /// The processor was started, stopped or hit an error.
        const PROCESSORSTATECHANGE = 0x0000_0001;
        /// A client attached to the processor.
        const PROCESSORATTACH      = 0x0000_0002;
        /// The processor object was detached.
        const PROCESSORDETACH      = 0x0000_0004;
        /// The DSP is being restarted after a fatal error.
        const PROCESSORRESTART     = 0x0000_0008;
        /// The DSP MMU faulted.
        const MMUFAULT             = 0x0000_0010;
        /// The DSP reported a system error.
        const SYSERROR             = 0x0000_0020;
        /// The DSP watchdog expired.
        const WDTOVERFLOW          = 0x0000_0040;
        /// The DSP power management failed.
        const PWRERROR             = 0x0000_0080;
    }
}

impl ProcEvents {
    /// Events raised by the device exception handler.
    pub const ERRORS: Self = Self::MMUFAULT
        .union(Self::SYSERROR)
        .union(Self::WDTOVERFLOW)
        .union(Self::PWRERROR);

    /// Parses a raw event mask, rejecting unknown bits.
    pub fn from_mask(mask: u32) -> DspResult<Self> {
        Self::from_bits(mask).ok_or(DspError::Value)
    }
}

/// How a notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyType(pub u32);

impl NotifyType {
    /// Signal an event object.
    pub const SIGNAL_EVENT: Self = Self(0x0000_0001);
}

#[derive(Debug, Default)]
struct NotificationInner {
    name: Option<String>,
    pending: AtomicU32,
    count: AtomicU32,
}

/// An event object signaled when registered processor events fire.
///
/// Clones refer to the same object.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    inner: Arc<NotificationInner>,
}

impl Notification {
    /// Creates an unsignaled notification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an unsignaled notification carrying a name, for diagnostics.
    pub fn named(name: &str) -> Self {
        Self {
            inner: Arc::new(NotificationInner {
                name: Some(name.to_string()),
                ..NotificationInner::default()
            }),
        }
    }

    /// Returns the notification name, if any.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Signals `events`.
    pub fn signal(&self, events: ProcEvents) {
        self.inner.pending.fetch_or(events.bits(), Ordering::AcqRel);
        self.inner.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns whether events are pending.
    pub fn is_signaled(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire) != 0
    }

    /// Returns the pending events without clearing them.
    pub fn pending(&self) -> ProcEvents {
        ProcEvents::from_bits_truncate(self.inner.pending.load(Ordering::Acquire))
    }

    /// Returns and clears the pending events.
    pub fn take(&self) -> ProcEvents {
        ProcEvents::from_bits_truncate(self.inner.pending.swap(0, Ordering::AcqRel))
    }

    /// Returns how many times the notification was signaled.
    pub fn signal_count(&self) -> u32 {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Returns whether `self` and `other` are the same event object.
    pub fn same(&self, other: &Notification) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug)]
struct Registration {
    notification: Notification,
    mask: ProcEvents,
}

/// A list of notifications registered for processor events.
#[derive(Debug, Default)]
pub struct Notifier {
    registrations: Mutex<Vec<Registration>>,
}

impl Notifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `notification` for the events in `mask`.
    ///
    /// Registering an already known notification replaces its mask. An empty mask removes the
    /// registration, which fails with [`DspError::Value`] if there is none.
    pub fn register(
        &self,
        notification: &Notification,
        mask: ProcEvents,
        notify_type: NotifyType,
    ) -> DspResult<()> {
        if notify_type != NotifyType::SIGNAL_EVENT {
            return Err(DspError::NotImplemented);
        }

        let mut regs = self.registrations.lock();
        let existing = regs
            .iter()
            .position(|r| r.notification.same(notification));

        match (existing, mask.is_empty()) {
            (Some(i), true) => {
                regs.remove(i);
            }
            (None, true) => return Err(DspError::Value),
            (Some(i), false) => {
                regs[i].mask = mask;
            }
            (None, false) => regs.push(Registration {
                notification: notification.clone(),
                mask,
            }),
        }
        Ok(())
    }

    /// Signals every notification registered for any of `events` with the events it asked for.
    /// Returns how many were signaled.
    pub fn notify(&self, events: ProcEvents) -> usize {
        let targets: Vec<(Notification, ProcEvents)> = self
            .registrations
            .lock()
            .iter()
            .filter(|r| r.mask.intersects(events))
            .map(|r| (r.notification.clone(), r.mask & events))
            .collect();

        for (n, fired) in &targets {
            n.signal(*fired);
        }
        targets.len()
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Returns whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.registrations.lock().clear();
    }
}
