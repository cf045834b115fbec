//! DSP memory management.
//!
//! The DSP sees host buffers through its own MMU, inside a fixed virtual address pool. Clients
//! first reserve a contiguous chunk of that pool and then map host buffers into it. This crate
//! keeps the bookkeeping for both steps; programming the actual MMU is left to the board code.
//!
//! The same region table doubles as a simple first-fit heap for DSP-side memory segments.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![deny(missing_debug_implementations)]

extern crate alloc;

pub mod region;

pub use region::{DmmError, Mapping, RegionTable, TableStats};

/// Size of a DSP MMU page.
pub const PAGE_SIZE_4K: u32 = 4096;

/// A trait for numeric types that can be aligned to a boundary.
///
/// `align` must be a non-zero power of two.
pub trait Align<U> {
    /// Aligns address upwards to the specified bound.
    ///
    /// Returns the first address greater or equal than `addr` with alignment `align`, or `None`
    /// if that address is not representable.
    fn align_up(&self, align: U) -> Option<Self>
    where
        Self: Sized;

    /// Aligns address downwards to the specified bound.
    ///
    /// Returns the first address lower or equal than `addr` with alignment `align`.
    fn align_down(&self, align: U) -> Self;

    /// Checks whether the address has the specified alignment.
    fn is_aligned(&self, align: U) -> bool;
}

macro_rules! impl_align {
    ($($t:ty),*) => {
        $(
            impl Align<$t> for $t {
                fn align_up(&self, align: $t) -> Option<Self> {
                    self.checked_add(align - 1).map(|v| v & !(align - 1))
                }

                fn align_down(&self, align: $t) -> Self {
                    self & !(align - 1)
                }

                fn is_aligned(&self, align: $t) -> bool {
                    self & (align - 1) == 0
                }
            }
        )*
    };
}

impl_align!(u32, u64, usize);
