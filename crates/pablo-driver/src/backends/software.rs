// SPDX-License-Identifier: AGPL-3.0-only

//! Software (simulated ISP) backend
//!
//! Keeps a register file per block and a DMA pool in host memory. Command
//! queue submissions are decoded from the simulated DMA memory and applied
//! to the register file, so everything the engine programs through the
//! command loader can be read back exactly as the hardware would see it
//! after the next frame boundary.
//!
//! Status registers behave like the silicon where it matters to the
//! engine: reset completes immediately, blocks report idle unless forced
//! busy, and interrupt status is write-1-to-clear.

use crate::backend::{BackendType, DmaRegion, IspBackend};
use crate::cmdq::{decode_pairs, CldPair, CmdqSubmission};
use crate::error::{PabloError, Result};
use bytes::Bytes;
use pablo_chip::block::{BlockId, REG_WINDOW_SIZE};
use pablo_chip::{cmdq, regs};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace};

/// Simulated DMA pool size
const POOL_SIZE: u64 = 64 << 20;

/// DMA allocation granule
const DMA_ALIGN: u64 = 0x1000;

/// First device-virtual address handed out
const DVA_BASE: u64 = 0x1000_0000;

/// One command-queue submission seen by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Target block
    pub block: BlockId,
    /// Frame count from the submission
    pub fcount: u32,
    /// Packed multi-buffer count
    pub num_buffers: u32,
    /// Raw payload bytes as read from DMA memory
    pub payload: Bytes,
}

impl Submission {
    /// Decoded payload pairs
    pub fn pairs(&self) -> Vec<CldPair> {
        decode_pairs(&self.payload)
    }
}

#[derive(Debug, Default)]
struct SimState {
    regs: HashMap<(BlockId, u32), u32>,
    writes: u64,
    memory: BTreeMap<u64, Vec<u8>>,
    next_dva: u64,
    allocated: u64,
    submissions: Vec<Submission>,
    busy: HashSet<BlockId>,
    fail_next_alloc: bool,
    fail_reads: bool,
    fail_writes: HashSet<BlockId>,
}

/// Simulated ISP backend
#[derive(Debug)]
pub struct SoftwareBackend {
    device: String,
    state: Mutex<SimState>,
}

impl SoftwareBackend {
    /// Create a simulator named `device`
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            state: Mutex::new(SimState {
                next_dva: DVA_BASE,
                ..SimState::default()
            }),
        }
    }

    /// Device name given at construction
    pub fn device(&self) -> &str {
        &self.device
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| PabloError::hardware_error("simulator state poisoned"))
    }

    /// Register value without read side effects; unwritten registers read 0
    pub fn register(&self, block: BlockId, offset: u32) -> u32 {
        self.lock()
            .map(|s| s.regs.get(&(block, offset)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of direct register writes so far
    pub fn write_count(&self) -> u64 {
        self.lock().map(|s| s.writes).unwrap_or(0)
    }

    /// Command-queue submissions so far, oldest first
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().map(|s| s.submissions.clone()).unwrap_or_default()
    }

    /// Contents of the DMA buffer starting at `dva`
    pub fn memory(&self, dva: u64) -> Option<Vec<u8>> {
        self.lock().ok().and_then(|s| s.memory.get(&dva).cloned())
    }

    /// Latch interrupt status bits on both lines of `block`
    pub fn raise_irq(&self, block: BlockId, int0: u32, int1: u32) {
        if let Ok(mut s) = self.lock() {
            *s.regs.entry((block, regs::irq::INT0_STATUS)).or_default() |= int0 & regs::irq::INT0_MASK;
            *s.regs.entry((block, regs::irq::INT1_STATUS)).or_default() |= int1 & regs::irq::INT1_MASK;
        }
        trace!("{block}: raised int0={int0:#x} int1={int1:#x}");
    }

    /// Make the next DMA allocation fail
    pub fn fail_next_alloc(&self) {
        if let Ok(mut s) = self.lock() {
            s.fail_next_alloc = true;
        }
    }

    /// Keep `block` from reporting idle
    pub fn set_busy(&self, block: BlockId, busy: bool) {
        if let Ok(mut s) = self.lock() {
            if busy {
                s.busy.insert(block);
            } else {
                s.busy.remove(&block);
            }
        }
    }

    /// Make every register read fail
    pub fn fail_reads(&self, fail: bool) {
        if let Ok(mut s) = self.lock() {
            s.fail_reads = fail;
        }
    }

    /// Make register writes to `block` fail
    pub fn fail_writes(&self, block: BlockId, fail: bool) {
        if let Ok(mut s) = self.lock() {
            if fail {
                s.fail_writes.insert(block);
            } else {
                s.fail_writes.remove(&block);
            }
        }
    }
}

fn check_offset(block: BlockId, offset: u32) -> Result<()> {
    if offset >= REG_WINDOW_SIZE || offset % 4 != 0 {
        return Err(PabloError::hardware_error(format!(
            "{block}: register offset {offset:#x} outside window"
        )));
    }
    Ok(())
}

impl IspBackend for SoftwareBackend {
    fn init(device: &str) -> Result<Self> {
        info!("Software ISP backend for {device}");
        Ok(Self::new(device))
    }

    fn read32(&self, block: BlockId, offset: u32) -> Result<u32> {
        check_offset(block, offset)?;
        let s = self.lock()?;
        if s.fail_reads {
            return Err(PabloError::hardware_error(format!("{block}: read {offset:#x} failed")));
        }
        Ok(match offset {
            regs::SW_RESET_STATUS => 0,
            regs::IDLE_STATUS if s.busy.contains(&block) => 0,
            regs::IDLE_STATUS => regs::idle::IDLE,
            _ => s.regs.get(&(block, offset)).copied().unwrap_or(0),
        })
    }

    fn write32(&self, block: BlockId, offset: u32, value: u32) -> Result<()> {
        check_offset(block, offset)?;
        let mut s = self.lock()?;
        if s.fail_writes.contains(&block) {
            return Err(PabloError::hardware_error(format!("{block}: write {offset:#x} failed")));
        }
        s.writes += 1;
        let status = match offset {
            regs::irq::INT0_CLEAR => Some(regs::irq::INT0_STATUS),
            regs::irq::INT1_CLEAR => Some(regs::irq::INT1_STATUS),
            _ => None,
        };
        if let Some(status) = status {
            *s.regs.entry((block, status)).or_default() &= !value;
        } else {
            s.regs.insert((block, offset), value);
        }
        Ok(())
    }

    fn alloc_dma(&self, size: usize) -> Result<DmaRegion> {
        let mut s = self.lock()?;
        if std::mem::take(&mut s.fail_next_alloc) {
            return Err(PabloError::out_of_memory("injected allocation failure"));
        }
        let span = (size as u64).div_ceil(DMA_ALIGN) * DMA_ALIGN;
        if size == 0 || s.allocated + span > POOL_SIZE {
            return Err(PabloError::out_of_memory(format!(
                "cannot allocate {size:#x} bytes ({:#x} of {POOL_SIZE:#x} in use)",
                s.allocated
            )));
        }
        let dva = s.next_dva;
        s.next_dva += span;
        s.allocated += span;
        s.memory.insert(dva, vec![0; size]);
        debug!("Simulated DMA alloc {dva:#x} ({size:#x})");
        Ok(DmaRegion { dva, size })
    }

    fn free_dma(&self, region: DmaRegion) {
        if let Ok(mut s) = self.lock() {
            if s.memory.remove(&region.dva).is_some() {
                let span = (region.size as u64).div_ceil(DMA_ALIGN) * DMA_ALIGN;
                s.allocated = s.allocated.saturating_sub(span);
            }
        }
    }

    fn sync_for_device(&self, region: &DmaRegion, data: &[u8]) -> Result<()> {
        let mut s = self.lock()?;
        let buf = s.memory.get_mut(&region.dva).ok_or_else(|| {
            PabloError::hardware_error(format!("sync to unknown buffer {:#x}", region.dva))
        })?;
        if data.len() > buf.len() {
            return Err(PabloError::hardware_error(format!(
                "{} bytes do not fit buffer {:#x} ({} bytes)",
                data.len(),
                region.dva,
                buf.len()
            )));
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn submit(&self, block: BlockId, submission: &CmdqSubmission) -> Result<()> {
        let mut s = self.lock()?;
        let len = submission.pair_count as usize * cmdq::PAIR_SIZE;
        let buf = s.memory.get(&submission.payload_dva).ok_or_else(|| {
            PabloError::hardware_error(format!(
                "{block}: payload {:#x} not mapped",
                submission.payload_dva
            ))
        })?;
        if len > buf.len() {
            return Err(PabloError::hardware_error(format!(
                "{block}: {} pairs overrun payload",
                submission.pair_count
            )));
        }
        let payload = Bytes::copy_from_slice(&buf[..len]);
        for pair in decode_pairs(&payload) {
            s.regs.insert((block, pair.addr), pair.value);
        }
        s.regs.insert((block, regs::cmdq::QUE_FRAME_ID), submission.fcount);
        s.regs.insert((block, regs::cmdq::QUE_NUM_BUFFERS), submission.num_buffers);
        s.submissions.push(Submission {
            block,
            fcount: submission.fcount,
            num_buffers: submission.num_buffers,
            payload,
        });
        debug!(
            "{block}: applied {} pairs for frame {}",
            submission.pair_count, submission.fcount
        );
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmdq::CommandLoader;
    use std::time::Duration;

    #[test]
    fn irq_status_is_write_one_to_clear() {
        let sim = SoftwareBackend::new("sim0");
        sim.raise_irq(BlockId::Rgbp, regs::irq::FRAME_START | regs::irq::FRAME_END, 0);
        sim.write32(BlockId::Rgbp, regs::irq::INT0_CLEAR, regs::irq::FRAME_START)
            .unwrap();
        assert_eq!(
            sim.read32(BlockId::Rgbp, regs::irq::INT0_STATUS).unwrap(),
            regs::irq::FRAME_END
        );
    }

    #[test]
    fn reset_and_idle_complete() {
        let sim = SoftwareBackend::new("sim0");
        sim.soft_reset(BlockId::Mcsc, Duration::from_millis(5)).unwrap();
        sim.wait_idle(BlockId::Mcsc, Duration::from_millis(5)).unwrap();
        sim.set_busy(BlockId::Mcsc, true);
        assert!(sim.wait_idle(BlockId::Mcsc, Duration::from_millis(1)).is_err());
    }

    #[test]
    fn submission_applies_payload() {
        let sim = SoftwareBackend::new("sim0");
        let mut loader = CommandLoader::allocate(&sim, cmdq::HEADER_SIZE, cmdq::PAYLOAD_SIZE).unwrap();
        loader.append(regs::CHAIN_SRC_SIZE, 0x0780_0438).unwrap();
        let header = loader.header(7, cmdq::pack_num_buffers(1, 0));
        loader.sync_for_device(&sim, &header).unwrap();
        sim.submit(BlockId::Rgbp, &loader.submission(&header)).unwrap();

        assert_eq!(sim.register(BlockId::Rgbp, regs::CHAIN_SRC_SIZE), 0x0780_0438);
        let subs = sim.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].fcount, 7);
        assert_eq!(subs[0].pairs().len(), 1);
        assert_eq!(sim.write_count(), 0);
    }

    #[test]
    fn injected_alloc_failure_is_one_shot() {
        let sim = SoftwareBackend::new("sim0");
        sim.fail_next_alloc();
        assert!(matches!(sim.alloc_dma(64), Err(PabloError::OutOfMemory { .. })));
        let region = sim.alloc_dma(64).unwrap();
        sim.free_dma(region);
        assert!(sim.memory(region.dva).is_none());
    }

    #[test]
    fn out_of_window_access_fails() {
        let sim = SoftwareBackend::new("sim0");
        assert!(sim.write32(BlockId::Lme, REG_WINDOW_SIZE, 1).is_err());
        assert!(sim.read32(BlockId::Lme, 0x2).is_err());
    }
}
