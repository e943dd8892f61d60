//! Command-loader buffers
//!
//! Register writes for one frame are staged as `(address, value)` pairs,
//! copied into two DMA-visible buffers (header + payload) and handed to the
//! block's command queue in a single submission. The hardware sequencer
//! applies the pairs at the next frame boundary.
//!
//! The last committed payload is kept so that a failed shot can be rolled
//! back and a skipped (repeated) shot can re-trigger the same programming.

use crate::backend::{DmaRegion, IspBackend};
use crate::error::{PabloError, Result};
use crate::facade::RegisterSink;
use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use pablo_chip::cmdq;
use tracing::{debug, warn};

/// One payload entry
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CldPair {
    /// Register offset inside the block window
    pub addr: u32,
    /// Value to write
    pub value: u32,
}

/// Fixed header record at the start of the header buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CldHeader {
    /// [`cmdq::HEADER_MAGIC`]
    pub magic: u32,
    /// Header entries (always one record)
    pub header_count: u32,
    /// Payload pairs
    pub pair_count: u32,
    /// Frame count this programming belongs to
    pub fcount: u32,
    /// DVA of the header buffer
    pub header_dva: u64,
    /// DVA of the payload buffer
    pub payload_dva: u64,
    /// Packed `(batch << 16) | index`
    pub num_buffers: u32,
    /// Reserved, zero
    pub reserved: u32,
}

/// Arguments of one "add to command queue" call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdqSubmission {
    /// DVA of the header buffer
    pub header_dva: u64,
    /// DVA of the payload buffer
    pub payload_dva: u64,
    /// Payload pairs
    pub pair_count: u32,
    /// Frame count
    pub fcount: u32,
    /// Packed multi-buffer count
    pub num_buffers: u32,
}

/// Staging area and DMA buffers of one block's command loader
#[derive(Debug)]
pub struct CommandLoader {
    header: DmaRegion,
    payload: DmaRegion,
    capacity: usize,
    pairs: Vec<CldPair>,
    committed: Option<Bytes>,
}

impl CommandLoader {
    /// Allocate header and payload buffers from `backend`
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::OutOfMemory`] if either allocation fails; a
    /// header allocated before a failing payload is released again.
    pub fn allocate(backend: &dyn IspBackend, header_size: usize, payload_size: usize) -> Result<Self> {
        let header = backend.alloc_dma(header_size)?;
        let payload = match backend.alloc_dma(payload_size) {
            Ok(payload) => payload,
            Err(e) => {
                backend.free_dma(header);
                return Err(e);
            }
        };
        debug!(
            "Command loader: header {:#x} ({:#x}), payload {:#x} ({:#x})",
            header.dva, header.size, payload.dva, payload.size
        );
        Ok(Self::new(header, payload))
    }

    /// Wrap already allocated buffers
    pub fn new(header: DmaRegion, payload: DmaRegion) -> Self {
        let capacity = cmdq::pair_capacity(payload.size);
        Self {
            header,
            payload,
            capacity,
            pairs: Vec::with_capacity(capacity.min(1024)),
            committed: None,
        }
    }

    /// Return both buffers to `backend`
    pub fn release(self, backend: &dyn IspBackend) {
        backend.free_dma(self.header);
        backend.free_dma(self.payload);
    }

    /// Drop staged pairs
    pub fn reset(&mut self) {
        self.pairs.clear();
    }

    /// Stage one register write
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::CommandBufferFull`] when the payload is exhausted.
    pub fn append(&mut self, addr: u32, value: u32) -> Result<()> {
        if self.pairs.len() >= self.capacity {
            return Err(PabloError::CommandBufferFull {
                capacity: self.capacity,
            });
        }
        self.pairs.push(CldPair { addr, value });
        Ok(())
    }

    /// Staged pairs
    pub fn pairs(&self) -> &[CldPair] {
        &self.pairs
    }

    /// Payload capacity in pairs
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Header record describing the staged payload
    #[allow(clippy::cast_possible_truncation)]
    pub fn header(&self, fcount: u32, num_buffers: u32) -> CldHeader {
        CldHeader {
            magic: cmdq::HEADER_MAGIC,
            header_count: 1,
            pair_count: self.pairs.len() as u32,
            fcount,
            header_dva: self.header.dva,
            payload_dva: self.payload.dva,
            num_buffers,
            reserved: 0,
        }
    }

    /// Copy header and payload into their DMA buffers
    ///
    /// # Errors
    ///
    /// Returns error if the backend copy fails.
    pub fn sync_for_device(&self, backend: &dyn IspBackend, header: &CldHeader) -> Result<()> {
        backend.sync_for_device(&self.header, bytemuck::bytes_of(header))?;
        backend.sync_for_device(&self.payload, bytemuck::cast_slice(&self.pairs))
    }

    /// Submission arguments for `header`
    pub const fn submission(&self, header: &CldHeader) -> CmdqSubmission {
        CmdqSubmission {
            header_dva: header.header_dva,
            payload_dva: header.payload_dva,
            pair_count: header.pair_count,
            fcount: header.fcount,
            num_buffers: header.num_buffers,
        }
    }

    /// Frozen copy of the staged payload
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(bytemuck::cast_slice(&self.pairs))
    }

    /// Mark the staged payload as the last successfully committed one
    pub fn commit(&mut self) {
        self.committed = Some(self.snapshot());
    }

    /// Last committed payload
    pub fn committed(&self) -> Option<&Bytes> {
        self.committed.as_ref()
    }

    /// Whether a committed payload exists to re-trigger
    pub const fn has_committed(&self) -> bool {
        self.committed.is_some()
    }

    /// Restore the staging area to the last committed payload
    pub fn rollback(&mut self) {
        self.pairs = self
            .committed
            .as_ref()
            .map(|bytes| decode_pairs(bytes))
            .unwrap_or_default();
        debug!("Command loader rolled back to {} pairs", self.pairs.len());
    }
}

impl RegisterSink for CommandLoader {
    fn write(&mut self, offset: u32, value: u32) -> Result<()> {
        self.append(offset, value)
    }
}

/// Decode a payload byte image into pairs
///
/// Trailing bytes that do not form a whole pair are ignored.
pub fn decode_pairs(bytes: &[u8]) -> Vec<CldPair> {
    let whole = bytes.len() - bytes.len() % cmdq::PAIR_SIZE;
    if whole != bytes.len() {
        warn!("Payload has {} trailing bytes", bytes.len() - whole);
    }
    // Source alignment is not guaranteed, so copy instead of casting in place.
    bytemuck::pod_collect_to_vec(&bytes[..whole])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(payload_size: usize) -> CommandLoader {
        CommandLoader::new(
            DmaRegion { dva: 0x1000, size: cmdq::HEADER_SIZE },
            DmaRegion { dva: 0x4000, size: payload_size },
        )
    }

    #[test]
    fn header_layout_matches_wire_format() {
        assert_eq!(std::mem::size_of::<CldHeader>(), cmdq::HEADER_RECORD_SIZE);
        assert_eq!(std::mem::size_of::<CldPair>(), cmdq::PAIR_SIZE);
    }

    #[test]
    fn overflow_is_reported() {
        let mut l = loader(2 * cmdq::PAIR_SIZE);
        l.append(0, 1).unwrap();
        l.append(4, 2).unwrap();
        assert!(matches!(
            l.append(8, 3),
            Err(PabloError::CommandBufferFull { capacity: 2 })
        ));
    }

    #[test]
    fn rollback_restores_committed_payload() {
        let mut l = loader(cmdq::PAYLOAD_SIZE);
        l.append(0x100, 0x0780_0438).unwrap();
        l.commit();
        l.reset();
        l.append(0x104, 0xdead).unwrap();
        l.rollback();
        assert_eq!(l.pairs(), &[CldPair { addr: 0x100, value: 0x0780_0438 }]);
    }

    #[test]
    fn rollback_without_commit_empties() {
        let mut l = loader(cmdq::PAYLOAD_SIZE);
        l.append(0x100, 1).unwrap();
        l.rollback();
        assert!(l.pairs().is_empty());
    }

    #[test]
    fn header_carries_counts_and_addresses() {
        let mut l = loader(cmdq::PAYLOAD_SIZE);
        l.append(0x100, 1).unwrap();
        l.append(0x104, 2).unwrap();
        let h = l.header(42, cmdq::pack_num_buffers(4, 2));
        assert_eq!(h.magic, cmdq::HEADER_MAGIC);
        assert_eq!(h.pair_count, 2);
        assert_eq!(h.payload_dva, 0x4000);
        assert_eq!(cmdq::unpack_num_buffers(h.num_buffers), (4, 2));
        let s = l.submission(&h);
        assert_eq!(s.fcount, 42);
    }
}
