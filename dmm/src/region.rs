//! A page-descriptor table tracking reserved and mapped regions of a DSP address pool.
//!
//! The pool is split into pages, each owning a descriptor. Descriptors at the start of a region
//! carry the region length in pages; every other descriptor in the region is left blank. A region
//! is either free or reserved, and a reserved region may host any number of non-overlapping
//! mappings, whose heads are tagged the same way.
//!
//! Releasing a reservation does not merge it with its free neighbours. Coalescing happens lazily
//! while [`RegionTable::reserve`] walks the table looking for a chunk that fits.
//!
//! # Complexity
//!
//! Releasing a region is `O(r)` in the region length, reservation is `O(n)` in the number of
//! regions in the pool.

use core::fmt;

use alloc::{vec, vec::Vec};

use bitflags::bitflags;

use crate::Align;

bitflags! {
    /// Status of a page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct PageFlags: u8 {
        const RESERVED = 1 << 0;
        const MAPPED   = 1 << 1;
    }
}

/// A descriptor for a single page of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageDescriptor {
    flags: PageFlags,
    /// Length in pages of the region starting here, zero if this is not a region head.
    region_size: u32,
    /// Length in pages of the mapping starting here, zero if this is not a mapping head.
    mapped_size: u32,
}

impl PageDescriptor {
    const BLANK: Self = Self {
        flags: PageFlags::empty(),
        region_size: 0,
        mapped_size: 0,
    };

    fn is_reserved(&self) -> bool {
        self.flags.contains(PageFlags::RESERVED)
    }

    fn is_mapped(&self) -> bool {
        self.flags.contains(PageFlags::MAPPED)
    }
}

/// The error type returned by fallible table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DmmError {
    /// The provided address or size is not page aligned.
    UnalignedAddress,
    /// The provided page size is not valid.
    InvalidPageSize,
    /// The requested size is zero or does not fit the address space.
    InvalidSize,
    /// No free chunk is large enough.
    OutOfSpace,
    /// No region or mapping starts at (or contains) the given address.
    NotFound,
    /// The requested mapping overlaps an existing one.
    Overlap,
}

impl fmt::Display for DmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmmError::UnalignedAddress => write!(f, "unaligned address"),
            DmmError::InvalidPageSize => write!(f, "invalid page size"),
            DmmError::InvalidSize => write!(f, "invalid size"),
            DmmError::OutOfSpace => write!(f, "no free chunk large enough"),
            DmmError::NotFound => write!(f, "region not found"),
            DmmError::Overlap => write!(f, "mapping overlaps an existing one"),
        }
    }
}

/// A mapped range inside a reserved region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// First address of the mapping.
    pub addr: u32,
    /// Mapping length in bytes.
    pub size: u32,
}

/// Occupancy statistics of a table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Total size of the pool in bytes.
    pub size: u32,
    /// Sum of all free chunks in bytes.
    pub total_free: u32,
    /// Largest free chunk in bytes, after merging adjacent free regions.
    pub largest_free: u32,
    /// Number of free chunks, after merging adjacent free regions.
    pub free_blocks: u32,
    /// Number of reserved regions.
    pub alloc_blocks: u32,
}

/// Reservation and mapping bookkeeping for a contiguous address pool.
#[derive(Debug)]
pub struct RegionTable {
    base: u32,
    page_size: u32,
    pages: Vec<PageDescriptor>,
}

impl RegionTable {
    /// Creates a table managing `size` bytes of address space starting at `base`, split in pages
    /// of `page_size` bytes. The whole pool starts out as one free region.
    ///
    /// Returns an error if any of the following conditions are not met:
    ///  - `page_size` is a non-zero power of two,
    ///  - `base` and `size` are page-aligned,
    ///  - `size` is non-zero and the pool does not wrap around the address space.
    pub fn new(base: u32, size: u32, page_size: u32) -> Result<Self, DmmError> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(DmmError::InvalidPageSize);
        }
        if !base.is_aligned(page_size) || !size.is_aligned(page_size) {
            return Err(DmmError::UnalignedAddress);
        }
        if size == 0 || u64::from(base) + u64::from(size) > 1 << 32 {
            return Err(DmmError::InvalidSize);
        }

        let num_pages = size / page_size;
        let mut pages = vec![PageDescriptor::BLANK; num_pages as usize];
        pages[0].region_size = num_pages;

        Ok(Self {
            base,
            page_size,
            pages,
        })
    }

    /// Returns the pool size in bytes.
    pub fn size(&self) -> u32 {
        self.pages.len() as u32 * self.page_size
    }

    /// Reserves a chunk of at least `size` bytes, rounded up to whole pages, and returns its first
    /// address. The first free chunk large enough is used, and only the requested pages are
    /// taken out of it.
    pub fn reserve(&mut self, size: u32) -> Result<u32, DmmError> {
        if size == 0 {
            return Err(DmmError::InvalidSize);
        }
        let needed = size
            .align_up(self.page_size)
            .ok_or(DmmError::OutOfSpace)?
            / self.page_size;
        let num_pages = self.pages.len() as u32;

        let mut i = 0;
        while i < num_pages {
            let head = self.pages[i as usize];
            debug_assert!(head.region_size > 0, "walked into the middle of a region");

            if head.is_reserved() {
                i += head.region_size.max(1);
                continue;
            }

            let len = self.coalesce(i);
            if len >= needed {
                if len > needed {
                    self.pages[(i + needed) as usize] = PageDescriptor {
                        region_size: len - needed,
                        ..PageDescriptor::BLANK
                    };
                }
                self.pages[i as usize] = PageDescriptor {
                    flags: PageFlags::RESERVED,
                    region_size: needed,
                    mapped_size: 0,
                };
                return Ok(self.addr_of(i));
            }

            i += len;
        }

        Err(DmmError::OutOfSpace)
    }

    /// Releases the reservation starting at `addr`.
    ///
    /// Any mapping still living inside the region is dropped along with it and returned, so the
    /// caller can tear down the matching MMU entries.
    pub fn unreserve(&mut self, addr: u32) -> Result<Vec<Mapping>, DmmError> {
        let head = self.region_head_at(addr)?;
        let len = self.pages[head as usize].region_size;

        let mut dropped = Vec::new();
        let mut i = head;
        while i < head + len {
            let descr = &mut self.pages[i as usize];
            if descr.is_mapped() {
                let pages = descr.mapped_size.max(1);
                dropped.push(Mapping {
                    addr: self.base + i * self.page_size,
                    size: pages * self.page_size,
                });
                descr.flags.remove(PageFlags::MAPPED);
                descr.mapped_size = 0;
                i += pages;
            } else {
                i += 1;
            }
        }

        self.pages[head as usize].flags = PageFlags::empty();

        Ok(dropped)
    }

    /// Records a mapping of `size` bytes, rounded up to whole pages, starting at `addr`.
    ///
    /// The mapping must fit entirely inside a single reserved region and must not overlap any
    /// mapping already recorded there.
    pub fn map(&mut self, addr: u32, size: u32) -> Result<Mapping, DmmError> {
        if !addr.is_aligned(self.page_size) {
            return Err(DmmError::UnalignedAddress);
        }
        if size == 0 {
            return Err(DmmError::InvalidSize);
        }
        let pages = size
            .align_up(self.page_size)
            .ok_or(DmmError::InvalidSize)?
            / self.page_size;

        let start = self.page_of(addr).ok_or(DmmError::NotFound)?;
        let head = self.region_containing(start).ok_or(DmmError::NotFound)?;
        let region = self.pages[head as usize];
        if !region.is_reserved() {
            return Err(DmmError::NotFound);
        }
        let end = start.checked_add(pages).ok_or(DmmError::NotFound)?;
        if end > head + region.region_size {
            return Err(DmmError::NotFound);
        }

        let mut i = head;
        while i < head + region.region_size {
            let descr = self.pages[i as usize];
            if descr.is_mapped() {
                let len = descr.mapped_size.max(1);
                if i < end && start < i + len {
                    return Err(DmmError::Overlap);
                }
                i += len;
            } else {
                i += 1;
            }
        }

        let descr = &mut self.pages[start as usize];
        descr.flags.insert(PageFlags::MAPPED);
        descr.mapped_size = pages;

        Ok(Mapping {
            addr,
            size: pages * self.page_size,
        })
    }

    /// Removes the mapping starting at `addr` and returns it.
    pub fn unmap(&mut self, addr: u32) -> Result<Mapping, DmmError> {
        let i = self
            .page_of(addr)
            .filter(|_| addr.is_aligned(self.page_size))
            .ok_or(DmmError::NotFound)?;

        let descr = &mut self.pages[i as usize];
        if !descr.is_mapped() {
            return Err(DmmError::NotFound);
        }

        let size = descr.mapped_size * self.page_size;
        descr.flags.remove(PageFlags::MAPPED);
        descr.mapped_size = 0;

        Ok(Mapping { addr, size })
    }

    /// Returns the first address of the reservation containing `addr`, if any.
    pub fn reservation_containing(&self, addr: u32) -> Option<u32> {
        let head = self.region_containing(self.page_of(addr)?)?;
        self.pages[head as usize]
            .is_reserved()
            .then(|| self.addr_of(head))
    }

    /// Computes occupancy statistics for the pool.
    pub fn stats(&self) -> TableStats {
        let mut stats = TableStats {
            size: self.size(),
            ..TableStats::default()
        };

        let mut run = 0;
        let mut i = 0;
        while i < self.pages.len() as u32 {
            let descr = self.pages[i as usize];
            let len = descr.region_size.max(1);

            if descr.is_reserved() {
                if run > 0 {
                    stats.free_blocks += 1;
                    stats.largest_free = stats.largest_free.max(run * self.page_size);
                    run = 0;
                }
                stats.alloc_blocks += 1;
            } else {
                run += len;
                stats.total_free += len * self.page_size;
            }

            i += len;
        }

        if run > 0 {
            stats.free_blocks += 1;
            stats.largest_free = stats.largest_free.max(run * self.page_size);
        }

        stats
    }

    /// Merges all free regions following the free region at `head` into it and returns its new
    /// length in pages.
    fn coalesce(&mut self, head: u32) -> u32 {
        let num_pages = self.pages.len() as u32;
        let mut len = self.pages[head as usize].region_size;

        while head + len < num_pages {
            let next = &mut self.pages[(head + len) as usize];
            if next.is_reserved() {
                break;
            }
            let next_len = next.region_size.max(1);
            next.region_size = 0;
            len += next_len;
        }

        self.pages[head as usize].region_size = len;
        len
    }

    /// Returns the index of the reserved region head at exactly `addr`.
    fn region_head_at(&self, addr: u32) -> Result<u32, DmmError> {
        let i = self
            .page_of(addr)
            .filter(|_| addr.is_aligned(self.page_size))
            .ok_or(DmmError::NotFound)?;
        let descr = &self.pages[i as usize];

        if descr.is_reserved() && descr.region_size > 0 {
            Ok(i)
        } else {
            Err(DmmError::NotFound)
        }
    }

    /// Returns the index of the head of the region containing page `page`.
    fn region_containing(&self, page: u32) -> Option<u32> {
        let mut i = 0;
        while i < self.pages.len() as u32 {
            let len = self.pages[i as usize].region_size.max(1);
            if page < i + len {
                return Some(i);
            }
            i += len;
        }
        None
    }

    fn page_of(&self, addr: u32) -> Option<u32> {
        let offset = addr.checked_sub(self.base)?;
        let page = offset / self.page_size;
        (page < self.pages.len() as u32).then_some(page)
    }

    fn addr_of(&self, page: u32) -> u32 {
        self.base + page * self.page_size
    }
}
