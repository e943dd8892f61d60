//! Register shadow for cached façade mode
//!
//! Static programming (prepare, restore) can go through a software copy of
//! the block window instead of touching MMIO per write. Writes mark the
//! register dirty; [`ShadowRegisters::flush`] pushes dirty registers to
//! the backend in offset order.

use crate::backend::IspBackend;
use crate::error::Result;
use crate::facade::{dump_offsets, RegisterSink};
use pablo_chip::block::BlockId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Software copy of one block's registers
#[derive(Debug)]
pub struct ShadowRegisters {
    block: BlockId,
    values: BTreeMap<u32, u32>,
    dirty: BTreeSet<u32>,
}

impl ShadowRegisters {
    /// Empty shadow of `block`
    pub fn new(block: BlockId) -> Self {
        Self {
            block,
            values: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Re-read the shadowed registers from hardware and drop pending writes
    ///
    /// # Errors
    ///
    /// Returns the first read error; the shadow is left empty in that case.
    pub fn reinit(&mut self, backend: &dyn IspBackend) -> Result<()> {
        self.values.clear();
        self.dirty.clear();
        let mut values = BTreeMap::new();
        for offset in dump_offsets(self.block) {
            values.insert(offset, backend.read32(self.block, offset)?);
        }
        self.values = values;
        debug!("{}: register cache holds {} registers", self.block, self.values.len());
        Ok(())
    }

    /// Cached value of `offset`
    pub fn get(&self, offset: u32) -> Option<u32> {
        self.values.get(&offset).copied()
    }

    /// Registers written since the last flush
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Write dirty registers to the backend
    ///
    /// Returns how many registers were written.
    ///
    /// # Errors
    ///
    /// Returns the first write error; registers not yet written stay dirty.
    pub fn flush(&mut self, backend: &dyn IspBackend) -> Result<usize> {
        let mut written = 0;
        while let Some(offset) = self.dirty.first().copied() {
            let value = self.values.get(&offset).copied().unwrap_or(0);
            backend.write32(self.block, offset, value)?;
            self.dirty.remove(&offset);
            written += 1;
        }
        Ok(written)
    }
}

impl RegisterSink for ShadowRegisters {
    fn write(&mut self, offset: u32, value: u32) -> Result<()> {
        if self.values.insert(offset, value) != Some(value) {
            self.dirty.insert(offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareBackend;
    use pablo_chip::regs;

    #[test]
    fn unchanged_writes_stay_clean() {
        let sim = SoftwareBackend::new("sim0");
        sim.write32(BlockId::Rgbp, regs::CHAIN_SRC_SIZE, 0x10).unwrap();
        let mut shadow = ShadowRegisters::new(BlockId::Rgbp);
        shadow.reinit(&sim).unwrap();
        assert_eq!(shadow.get(regs::CHAIN_SRC_SIZE), Some(0x10));

        shadow.write(regs::CHAIN_SRC_SIZE, 0x10).unwrap();
        shadow.write(regs::CHAIN_DST_SIZE, 0x20).unwrap();
        assert_eq!(shadow.dirty_count(), 1);

        let before = sim.write_count();
        assert_eq!(shadow.flush(&sim).unwrap(), 1);
        assert_eq!(sim.write_count(), before + 1);
        assert_eq!(sim.register(BlockId::Rgbp, regs::CHAIN_DST_SIZE), 0x20);
        assert_eq!(shadow.dirty_count(), 0);
    }

    #[test]
    fn reinit_failure_empties_cache() {
        let sim = SoftwareBackend::new("sim0");
        sim.fail_reads(true);
        let mut shadow = ShadowRegisters::new(BlockId::Mcsc);
        assert!(shadow.reinit(&sim).is_err());
        assert_eq!(shadow.get(regs::CHAIN_SRC_SIZE), None);
    }
}
