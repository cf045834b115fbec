//! DSP address space management and cache maintenance.
//!
//! Host buffers become visible to the DSP in two steps: a chunk of the DSP virtual address pool
//! is reserved, then buffers are mapped at page-aligned addresses inside it. Mappings made
//! through a [`ProcessContext`] are released with it.

use alloc::vec::Vec;

use dmm::Align;
use log::{debug, error, warn};

use super::Processor;
use crate::{
    board::{CacheOp, MapAttrs},
    config::DSP_PAGE_SIZE,
    dev::MapRecord,
    drv::ProcessContext,
    error::{DspError, DspResult},
};

impl Processor {
    /// Reserves `size` bytes of the DSP virtual address pool and returns the first address.
    pub fn reserve_memory(&self, size: u32, ctx: &mut ProcessContext) -> DspResult<u32> {
        let obj = self.object()?;
        if size == 0 {
            return Err(DspError::InvalidArg);
        }

        let addr = obj.device.dmm.lock().table.reserve(size).map_err(|e| {
            error!(
                "processor {}: can't reserve {:#x} bytes: {}",
                obj.processor_id, size, e
            );
            DspError::from(e)
        })?;

        ctx.reservations.push(addr);
        debug!(
            "processor {}: reserved {:#x} bytes at {:#010x}",
            obj.processor_id, size, addr
        );
        Ok(addr)
    }

    /// Releases the reservation starting at `rsv_addr`, unmapping whatever is still mapped in it.
    ///
    /// Only reservations made through `ctx` can be released.
    pub fn unreserve_memory(&self, rsv_addr: u32, ctx: &mut ProcessContext) -> DspResult<()> {
        if !ctx.reservations.contains(&rsv_addr) {
            return Err(DspError::NotFound);
        }
        let dropped = self.unreserve(rsv_addr)?;
        ctx.reservations.retain(|&a| a != rsv_addr);
        ctx.maps.retain(|a| !dropped.contains(a));
        Ok(())
    }

    /// Maps `size` bytes of host memory at `mpu_addr` into the DSP address space at `req_addr`,
    /// which must lie in a region reserved through `ctx`.
    ///
    /// Both addresses are aligned down to a page and the size up, so the returned DSP address
    /// keeps the page offset of `mpu_addr`.
    pub fn map(
        &self,
        mpu_addr: usize,
        size: u32,
        req_addr: u32,
        attrs: MapAttrs,
        ctx: &mut ProcessContext,
    ) -> DspResult<u32> {
        let obj = self.object()?;
        if size == 0 {
            return Err(DspError::InvalidArg);
        }
        let attrs = attrs.normalize().ok_or(DspError::InvalidArg)?;

        let va_align = req_addr.align_down(DSP_PAGE_SIZE);
        let pa_align = mpu_addr.align_down(DSP_PAGE_SIZE as usize);
        let offset = (mpu_addr - pa_align) as u32;
        let size_align = size
            .checked_add(offset)
            .and_then(|s| s.align_up(DSP_PAGE_SIZE))
            .ok_or(DspError::InvalidArg)?;

        let mut dmm = obj.device.dmm.lock();
        let owned = dmm
            .table
            .reservation_containing(va_align)
            .is_some_and(|rsv| ctx.reservations.contains(&rsv));
        if !owned {
            debug!(
                "processor {}: {:#010x} not reserved by pid {}",
                obj.processor_id,
                va_align,
                ctx.pid()
            );
            return Err(DspError::NotFound);
        }

        dmm.table.map(va_align, size_align).map_err(|e| {
            error!(
                "processor {}: can't map {:#x} bytes at {:#010x}: {}",
                obj.processor_id, size_align, va_align, e
            );
            DspError::from(e)
        })?;

        if let Err(e) = obj
            .device
            .board()
            .mem_map(pa_align, va_align, size_align, attrs)
        {
            error!(
                "processor {}: MMU map of {:#x} at {:#010x}: {}",
                obj.processor_id, pa_align, va_align, e
            );
            let _ = dmm.table.unmap(va_align);
            return Err(DspError::Fail);
        }

        dmm.maps.push(MapRecord {
            mpu_addr: pa_align,
            dsp_addr: va_align,
            size: size_align,
        });
        drop(dmm);

        ctx.maps.push(va_align);
        debug!(
            "processor {}: mapped {:#x}+{:#x} at {:#010x}",
            obj.processor_id, pa_align, size_align, va_align
        );
        Ok(va_align | (mpu_addr as u32 & (DSP_PAGE_SIZE - 1)))
    }

    /// Removes the mapping starting at the page of `map_addr`. Only mappings made through `ctx`
    /// can be removed.
    pub fn unmap(&self, map_addr: u32, ctx: &mut ProcessContext) -> DspResult<()> {
        let va_align = map_addr.align_down(DSP_PAGE_SIZE);
        if !ctx.maps.contains(&va_align) {
            return Err(DspError::NotFound);
        }
        self.unmap_page(va_align)?;
        ctx.maps.retain(|&a| a != va_align);
        Ok(())
    }

    /// Writes back and/or invalidates the cache lines of a mapped host buffer.
    ///
    /// `flags` is 0 to invalidate, 1 to write back and 2 to do both.
    pub fn flush_memory(&self, mpu_addr: usize, size: u32, flags: u32) -> DspResult<()> {
        let op = CacheOp::try_from(flags)?;
        self.memory_sync(mpu_addr, size, op)
    }

    /// Invalidates the cache lines of a mapped host buffer.
    pub fn invalidate_memory(&self, mpu_addr: usize, size: u32) -> DspResult<()> {
        self.memory_sync(mpu_addr, size, CacheOp::Invalidate)
    }

    fn memory_sync(&self, mpu_addr: usize, size: u32, op: CacheOp) -> DspResult<()> {
        let obj = self.object()?;
        if size == 0 {
            return Err(DspError::InvalidArg);
        }

        let mapped = obj
            .device
            .dmm
            .lock()
            .maps
            .iter()
            .any(|m| m.covers(mpu_addr, size));
        if !mapped {
            error!(
                "processor {}: {:?} on unmapped buffer {:#x}+{:#x}",
                obj.processor_id, op, mpu_addr, size
            );
            return Err(DspError::Fail);
        }

        obj.device
            .board()
            .cache_op(op, mpu_addr, size)
            .map_err(|e| {
                error!("processor {}: {:?}: {}", obj.processor_id, op, e);
                DspError::Fail
            })
    }

    fn unmap_page(&self, va_align: u32) -> DspResult<()> {
        let obj = self.object()?;
        let mut dmm = obj.device.dmm.lock();
        let mapping = dmm.table.unmap(va_align).map_err(|e| {
            debug!(
                "processor {}: no mapping at {:#010x}: {}",
                obj.processor_id, va_align, e
            );
            DspError::from(e)
        })?;
        dmm.maps.retain(|m| m.dsp_addr != va_align);

        obj.device
            .board()
            .mem_unmap(mapping.addr, mapping.size)
            .map_err(|e| {
                error!(
                    "processor {}: MMU unmap at {:#010x}: {}",
                    obj.processor_id, va_align, e
                );
                DspError::Fail
            })?;
        debug!("processor {}: unmapped {:#010x}", obj.processor_id, va_align);
        Ok(())
    }

    /// Releases a reservation and returns the addresses of the mappings dropped with it.
    fn unreserve(&self, rsv_addr: u32) -> DspResult<Vec<u32>> {
        let obj = self.object()?;
        let device = &obj.device;
        let mut dmm = device.dmm.lock();
        let dropped = dmm.table.unreserve(rsv_addr).map_err(|e| {
            error!(
                "processor {}: can't unreserve {:#010x}: {}",
                obj.processor_id, rsv_addr, e
            );
            DspError::from(e)
        })?;

        for m in &dropped {
            dmm.maps.retain(|r| r.dsp_addr != m.addr);
            if let Err(e) = device.board().mem_unmap(m.addr, m.size) {
                warn!(
                    "processor {}: MMU unmap at {:#010x}: {}",
                    obj.processor_id, m.addr, e
                );
            }
        }
        debug!(
            "processor {}: unreserved {:#010x}, {} mappings dropped",
            obj.processor_id,
            rsv_addr,
            dropped.len()
        );
        Ok(dropped.iter().map(|m| m.addr).collect())
    }
}

/// Tears down the mappings and reservations made through `ctx`.
pub(super) fn release_context(processor: &Processor, ctx: &mut ProcessContext) {
    for addr in core::mem::take(&mut ctx.maps) {
        if let Err(e) = processor.unmap_page(addr) {
            warn!("pid {}: releasing mapping {:#010x}: {}", ctx.pid(), addr, e);
        }
    }
    for addr in core::mem::take(&mut ctx.reservations) {
        if let Err(e) = processor.unreserve(addr) {
            warn!("pid {}: releasing reservation {:#010x}: {}", ctx.pid(), addr, e);
        }
    }
}
