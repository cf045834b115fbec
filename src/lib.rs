//! dspbridge manages DSP cores on behalf of host-side clients.
//!
//! A client process attaches to a DSP through [`proc::attach`], then uses the returned
//! [`Processor`] handle to load executables, start and stop the DSP, share host buffers with it
//! through the DSP MMU and receive notifications about processor events. Devices, the images
//! they run and their memory pools are owned by a [`Driver`].
//!
//! The hardware itself is reached through the [`board::Board`] trait. [`board::SimBoard`]
//! implements it in host memory.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod board;
pub mod cod;
pub mod config;
pub mod deh;
pub mod dev;
pub mod drv;
pub mod error;
pub mod node;
pub mod ntfy;
pub mod proc;

pub use dev::Device;
pub use drv::{Driver, ProcessContext};
pub use error::{DspError, DspResult};
pub use ntfy::{Notification, NotifyType, ProcEvents};
pub use proc::{Attach, ProcState, Processor};
