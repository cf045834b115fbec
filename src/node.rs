//! Nodes running on the DSP.
//!
//! A node manager exists while the processor runs. It hands out node handles and carves node
//! memory out of the configured heaps, each one a [`RegionTable`] over its DSP segment.

use alloc::{collections::BTreeMap, string::String, vec::Vec};

use dmm::{RegionTable, TableStats};
use log::{debug, error};

use crate::{
    config::{HeapConfig, MemSegment},
    error::{DspError, DspResult},
};

/// Handle of a node allocated on the processor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle(u32);

impl NodeHandle {
    /// Returns the raw handle value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A node allocated on the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// Segment the node memory lives in.
    pub segment: MemSegment,
    /// DSP address of the node memory.
    pub addr: u32,
}

/// Result of a node enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCount {
    /// Handles written to the caller's table.
    pub written: usize,
    /// Nodes currently allocated.
    pub allocated: usize,
}

#[derive(Debug)]
pub(crate) struct NodeManager {
    nodes: BTreeMap<NodeHandle, NodeInfo>,
    heaps: Vec<(MemSegment, RegionTable)>,
    next: u32,
}

impl NodeManager {
    pub(crate) fn new(heaps: &[HeapConfig]) -> DspResult<Self> {
        let heaps = heaps
            .iter()
            .map(|h| {
                RegionTable::new(h.base, h.size, h.granularity)
                    .map(|table| (h.segment, table))
                    .map_err(|e| {
                        error!("invalid {:?} heap at {:#x}: {}", h.segment, h.base, e);
                        DspError::Fail
                    })
            })
            .collect::<DspResult<Vec<_>>>()?;

        Ok(Self {
            nodes: BTreeMap::new(),
            heaps,
            next: 1,
        })
    }

    pub(crate) fn allocate(
        &mut self,
        name: &str,
        segment: MemSegment,
        size: u32,
    ) -> DspResult<NodeHandle> {
        let heap = self.heap_mut(segment).ok_or(DspError::Memory)?;
        let addr = heap.reserve(size)?;

        let handle = NodeHandle(self.next);
        self.next += 1;
        self.nodes.insert(
            handle,
            NodeInfo {
                name: name.into(),
                segment,
                addr,
            },
        );
        debug!("node {} ({}) at {:#x}", handle.0, name, addr);
        Ok(handle)
    }

    pub(crate) fn delete(&mut self, handle: NodeHandle) -> DspResult<()> {
        let info = self.nodes.remove(&handle).ok_or(DspError::Handle)?;
        if let Some(heap) = self.heap_mut(info.segment) {
            heap.unreserve(info.addr)?;
        }
        debug!("node {} ({}) deleted", handle.0, info.name);
        Ok(())
    }

    pub(crate) fn info(&self, handle: NodeHandle) -> Option<&NodeInfo> {
        self.nodes.get(&handle)
    }

    /// Copies the live handles into `table`, failing with [`DspError::Size`] if it is too small.
    pub(crate) fn enumerate(&self, table: &mut [NodeHandle]) -> DspResult<NodeCount> {
        let allocated = self.nodes.len();
        if table.len() < allocated {
            return Err(DspError::Size);
        }

        for (slot, handle) in table.iter_mut().zip(self.nodes.keys()) {
            *slot = *handle;
        }
        Ok(NodeCount {
            written: allocated,
            allocated,
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn heap_stats(&self, segment: MemSegment) -> Option<TableStats> {
        self.heaps
            .iter()
            .find(|(s, _)| *s == segment)
            .map(|(_, heap)| heap.stats())
    }

    fn heap_mut(&mut self, segment: MemSegment) -> Option<&mut RegionTable> {
        self.heaps
            .iter_mut()
            .find(|(s, _)| *s == segment)
            .map(|(_, heap)| heap)
    }
}
