//! A simulated DSP board.
//!
//! Models DSP memory as a flat window and records everything the processor layer asks of the
//! hardware, so the effects of each operation can be checked from the host.

use alloc::{collections::BTreeMap, vec, vec::Vec};

use spin::Mutex;

use super::{Board, BoardError, BoardState, CacheOp, CallbackData, MapAttrs, ProcLoadStat};

/// A DSP MMU entry programmed on the simulated board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimMapping {
    /// Host address backing the entry.
    pub mpu_addr: usize,
    /// Size of the entry in bytes.
    pub size: u32,
    /// Attributes the entry was created with.
    pub attrs: MapAttrs,
}

/// A cache maintenance request seen by the simulated board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRecord {
    /// Requested operation.
    pub op: CacheOp,
    /// Start of the host buffer.
    pub mpu_addr: usize,
    /// Size of the host buffer.
    pub size: u32,
}

#[derive(Debug)]
struct SimState {
    state: BoardState,
    entry: Option<u32>,
    mem_base: u32,
    mem: Vec<u8>,
    mmu: BTreeMap<u32, SimMapping>,
    cache_ops: Vec<CacheRecord>,
    ctrl_log: Vec<(u32, Vec<u8>)>,
    load: ProcLoadStat,
    fail_start: bool,
    fail_map: bool,
    ctrl_timeout: bool,
}

/// A [`Board`] backed by host memory.
#[derive(Debug)]
pub struct SimBoard {
    inner: Mutex<SimState>,
}

impl SimBoard {
    /// Creates a board in reset whose DSP memory covers `[mem_base, mem_base + mem_size)`.
    pub fn new(mem_base: u32, mem_size: u32) -> Self {
        Self {
            inner: Mutex::new(SimState {
                state: BoardState::Stopped,
                entry: None,
                mem_base,
                mem: vec![0; mem_size as usize],
                mmu: BTreeMap::new(),
                cache_ops: Vec::new(),
                ctrl_log: Vec::new(),
                load: ProcLoadStat::default(),
                fail_start: false,
                fail_map: false,
                ctrl_timeout: false,
            }),
        }
    }

    /// Returns the address execution was last started at.
    pub fn entry(&self) -> Option<u32> {
        self.inner.lock().entry
    }

    /// Returns a copy of `len` bytes of DSP memory at `addr`.
    pub fn peek(&self, addr: u32, len: usize) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        inner.window(addr, len).map(|r| inner.mem[r].to_vec())
    }

    /// Reads a little-endian word of DSP memory.
    pub fn peek_u32(&self, addr: u32) -> Option<u32> {
        let bytes = self.peek(addr, 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Overwrites DSP memory at `addr`, as the DSP itself would.
    pub fn poke(&self, addr: u32, data: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        match inner.window(addr, data.len()) {
            Some(r) => {
                inner.mem[r].copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Returns the MMU entries currently programmed, keyed by DSP address.
    pub fn mappings(&self) -> Vec<(u32, SimMapping)> {
        self.inner.lock().mmu.iter().map(|(&k, &v)| (k, v)).collect()
    }

    /// Returns the cache maintenance requests seen so far.
    pub fn cache_ops(&self) -> Vec<CacheRecord> {
        self.inner.lock().cache_ops.clone()
    }

    /// Returns the control requests seen so far.
    pub fn ctrl_log(&self) -> Vec<(u32, Vec<u8>)> {
        self.inner.lock().ctrl_log.clone()
    }

    /// Sets the load statistics reported by [`Board::proc_load`].
    pub fn set_load(&self, load: ProcLoadStat) {
        self.inner.lock().load = load;
    }

    /// Makes the next start request fail.
    pub fn fail_next_start(&self) {
        self.inner.lock().fail_start = true;
    }

    /// Makes the next MMU map request fail.
    pub fn fail_next_map(&self) {
        self.inner.lock().fail_map = true;
    }

    /// Makes control requests time out until cleared.
    pub fn set_ctrl_timeout(&self, timeout: bool) {
        self.inner.lock().ctrl_timeout = timeout;
    }
}

impl SimState {
    fn window(&self, addr: u32, len: usize) -> Option<core::ops::Range<usize>> {
        let start = addr.checked_sub(self.mem_base)? as usize;
        let end = start.checked_add(len)?;
        (end <= self.mem.len()).then_some(start..end)
    }
}

impl Board for SimBoard {
    fn status(&self) -> Result<BoardState, BoardError> {
        Ok(self.inner.lock().state)
    }

    fn set_state(&self, state: BoardState) -> Result<(), BoardError> {
        self.inner.lock().state = state;
        Ok(())
    }

    fn monitor(&self) -> Result<(), BoardError> {
        self.inner.lock().state = BoardState::Idle;
        Ok(())
    }

    fn start(&self, entry: u32) -> Result<(), BoardError> {
        let mut inner = self.inner.lock();
        if core::mem::take(&mut inner.fail_start) {
            return Err(BoardError::Failed);
        }
        inner.entry = Some(entry);
        inner.state = BoardState::Running;
        Ok(())
    }

    fn stop(&self) -> Result<(), BoardError> {
        self.inner.lock().state = BoardState::Stopped;
        Ok(())
    }

    fn write(&self, dsp_addr: u32, data: &[u8]) -> Result<(), BoardError> {
        if self.poke(dsp_addr, data) {
            Ok(())
        } else {
            Err(BoardError::Fault)
        }
    }

    fn read(&self, dsp_addr: u32, buf: &mut [u8]) -> Result<(), BoardError> {
        let inner = self.inner.lock();
        let r = inner.window(dsp_addr, buf.len()).ok_or(BoardError::Fault)?;
        buf.copy_from_slice(&inner.mem[r]);
        Ok(())
    }

    fn mem_map(
        &self,
        mpu_addr: usize,
        dsp_addr: u32,
        size: u32,
        attrs: MapAttrs,
    ) -> Result<(), BoardError> {
        let mut inner = self.inner.lock();
        if core::mem::take(&mut inner.fail_map) {
            return Err(BoardError::Failed);
        }

        let end = u64::from(dsp_addr) + u64::from(size);
        let overlaps = inner
            .mmu
            .iter()
            .any(|(&va, m)| {
                u64::from(va) < end && u64::from(dsp_addr) < u64::from(va) + u64::from(m.size)
            });
        if overlaps {
            return Err(BoardError::Failed);
        }

        inner.mmu.insert(
            dsp_addr,
            SimMapping {
                mpu_addr,
                size,
                attrs,
            },
        );
        Ok(())
    }

    fn mem_unmap(&self, dsp_addr: u32, size: u32) -> Result<(), BoardError> {
        let mut inner = self.inner.lock();
        match inner.mmu.get(&dsp_addr) {
            Some(m) if m.size == size => {
                inner.mmu.remove(&dsp_addr);
                Ok(())
            }
            _ => Err(BoardError::Failed),
        }
    }

    fn cache_op(&self, op: CacheOp, mpu_addr: usize, size: u32) -> Result<(), BoardError> {
        self.inner.lock().cache_ops.push(CacheRecord { op, mpu_addr, size });
        Ok(())
    }

    fn ctrl(&self, cmd: u32, args: &CallbackData, _timeout_ms: u32) -> Result<(), BoardError> {
        let mut inner = self.inner.lock();
        if inner.ctrl_timeout {
            return Err(BoardError::Timeout);
        }
        inner.ctrl_log.push((cmd, args.to_vec()));
        Ok(())
    }

    fn proc_load(&self) -> Result<ProcLoadStat, BoardError> {
        Ok(self.inner.lock().load)
    }
}
