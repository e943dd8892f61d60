//! UIO backend
//!
//! One `/dev/uioN` node exposes the whole ISP:
//!
//! - map0: the register windows of every block, back to back in
//!   [`BlockId::ALL`] order, [`REG_WINDOW_SIZE`] bytes each
//! - map1: a physically contiguous DMA pool; its bus address is the
//!   device-virtual address of offset 0
//!
//! Map geometry comes from `/sys/class/uio/uioN/maps/mapK/{addr,size}`.
//! DMA buffers are carved from map1 by a bump allocator that is only
//! rewound when the last buffer is freed.

use crate::backend::{BackendType, DmaRegion, IspBackend};
use crate::error::{PabloError, Result};
use crate::mmio::MappedRegion;
use pablo_chip::block::{BlockId, REG_WINDOW_SIZE};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Default sysfs class directory
pub const UIO_SYSFS_ROOT: &str = "/sys/class/uio";

/// Register map index
const REG_MAP: usize = 0;

/// DMA pool map index
const DMA_MAP: usize = 1;

/// DMA allocation granule
const DMA_ALIGN: usize = 0x1000;

/// Geometry of one UIO map as reported by sysfs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UioMap {
    /// Bus address
    pub addr: u64,
    /// Size in bytes
    pub size: usize,
}

fn parse_hex(text: &str) -> Option<u64> {
    let t = text.trim();
    let t = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")).unwrap_or(t);
    u64::from_str_radix(t, 16).ok()
}

/// Read `maps/map{index}` of UIO device `name` under `sysfs_root`
///
/// # Errors
///
/// Returns error if the attribute files are missing or not hexadecimal.
pub fn read_uio_map(sysfs_root: &Path, name: &str, index: usize) -> Result<UioMap> {
    let dir = sysfs_root.join(name).join("maps").join(format!("map{index}"));
    let read = |attr: &str| -> Result<u64> {
        let path = dir.join(attr);
        let text = std::fs::read_to_string(&path)?;
        parse_hex(&text).ok_or_else(|| {
            PabloError::hardware_error(format!("{}: not a hex value: {:?}", path.display(), text.trim()))
        })
    };
    let addr = read("addr")?;
    let size = usize::try_from(read("size")?)
        .map_err(|_| PabloError::hardware_error(format!("{name} map{index}: size overflows")))?;
    Ok(UioMap { addr, size })
}

#[derive(Debug)]
struct BumpPool {
    next: usize,
    live: usize,
}

/// ISP behind a UIO device node
#[derive(Debug)]
pub struct UioBackend {
    name: String,
    regs: MappedRegion,
    pool: MappedRegion,
    pool_addr: u64,
    alloc: Mutex<BumpPool>,
}

impl UioBackend {
    /// Open UIO device `name` with geometry from `sysfs_root` and the node in `dev_root`
    ///
    /// # Errors
    ///
    /// Returns error if sysfs describes no usable maps or mapping fails.
    pub fn open(sysfs_root: &Path, dev_root: &Path, name: &str) -> Result<Self> {
        let reg_map = read_uio_map(sysfs_root, name, REG_MAP)?;
        let dma_map = read_uio_map(sysfs_root, name, DMA_MAP)?;

        let needed = BlockId::ALL.len() * REG_WINDOW_SIZE as usize;
        if reg_map.size < needed {
            return Err(PabloError::hardware_error(format!(
                "{name}: register map is {:#x} bytes, need {needed:#x}",
                reg_map.size
            )));
        }

        let node: PathBuf = dev_root.join(name);
        let file = OpenOptions::new().read(true).write(true).open(&node).map_err(|e| {
            PabloError::hardware_error(format!("Cannot open {}: {e}", node.display()))
        })?;

        let regs = MappedRegion::map(&file, REG_MAP, reg_map.size)?;
        let pool = MappedRegion::map(&file, DMA_MAP, dma_map.size)?;

        info!(
            "UIO {name}: registers {:#x}+{:#x}, DMA pool {:#x}+{:#x}",
            reg_map.addr, reg_map.size, dma_map.addr, dma_map.size
        );

        Ok(Self {
            name: name.to_string(),
            regs,
            pool,
            pool_addr: dma_map.addr,
            alloc: Mutex::new(BumpPool { next: 0, live: 0 }),
        })
    }

    /// UIO device name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn reg_offset(block: BlockId, offset: u32) -> Result<usize> {
        if offset >= REG_WINDOW_SIZE {
            return Err(PabloError::hardware_error(format!(
                "{block}: register offset {offset:#x} outside window"
            )));
        }
        Ok(block as usize * REG_WINDOW_SIZE as usize + offset as usize)
    }

    fn pool_offset(&self, dva: u64) -> Result<usize> {
        dva.checked_sub(self.pool_addr)
            .and_then(|off| usize::try_from(off).ok())
            .ok_or_else(|| PabloError::hardware_error(format!("{dva:#x} is not in the DMA pool")))
    }
}

impl IspBackend for UioBackend {
    fn init(device: &str) -> Result<Self> {
        let name = device.trim_start_matches("/dev/");
        Self::open(Path::new(UIO_SYSFS_ROOT), Path::new("/dev"), name)
    }

    fn read32(&self, block: BlockId, offset: u32) -> Result<u32> {
        self.regs.read32(Self::reg_offset(block, offset)?)
    }

    fn write32(&self, block: BlockId, offset: u32, value: u32) -> Result<()> {
        self.regs.write32(Self::reg_offset(block, offset)?, value)
    }

    fn alloc_dma(&self, size: usize) -> Result<DmaRegion> {
        let mut pool = self
            .alloc
            .lock()
            .map_err(|_| PabloError::hardware_error("DMA pool lock poisoned"))?;
        let span = size.div_ceil(DMA_ALIGN) * DMA_ALIGN;
        if size == 0 || pool.next + span > self.pool.size() {
            return Err(PabloError::out_of_memory(format!(
                "{}: {size:#x} bytes requested, {:#x} free",
                self.name,
                self.pool.size() - pool.next
            )));
        }
        let offset = pool.next;
        pool.next += span;
        pool.live += 1;
        let dva = self.pool_addr + offset as u64;
        debug!("{}: DMA alloc {dva:#x} ({size:#x})", self.name);
        Ok(DmaRegion { dva, size })
    }

    fn free_dma(&self, region: DmaRegion) {
        let Ok(mut pool) = self.alloc.lock() else {
            warn!("{}: DMA pool lock poisoned, leaking {:#x}", self.name, region.dva);
            return;
        };
        pool.live = pool.live.saturating_sub(1);
        if pool.live == 0 {
            pool.next = 0;
            debug!("{}: DMA pool rewound", self.name);
        }
    }

    fn sync_for_device(&self, region: &DmaRegion, data: &[u8]) -> Result<()> {
        if data.len() > region.size {
            return Err(PabloError::hardware_error(format!(
                "{} bytes do not fit buffer {:#x}",
                data.len(),
                region.dva
            )));
        }
        self.pool.write_bytes(self.pool_offset(region.dva)?, data)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Uio
    }

    fn is_ready(&self) -> bool {
        self.read32(BlockId::Paf0, pablo_chip::regs::IDLE_STATUS).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_map(root: &Path, name: &str, index: usize, addr: &str, size: &str) {
        let dir = root.join(name).join("maps").join(format!("map{index}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("addr"), addr).unwrap();
        std::fs::write(dir.join("size"), size).unwrap();
    }

    #[test]
    fn sysfs_map_is_parsed() {
        let tmp = tempfile::tempdir().unwrap();
        write_map(tmp.path(), "uio3", 1, "0x00000000f8000000\n", "0x0000000000400000\n");
        let map = read_uio_map(tmp.path(), "uio3", 1).unwrap();
        assert_eq!(map, UioMap { addr: 0xf800_0000, size: 0x40_0000 });
    }

    #[test]
    fn garbage_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_map(tmp.path(), "uio0", 0, "zz", "0x1000");
        assert!(read_uio_map(tmp.path(), "uio0", 0).is_err());
        assert!(read_uio_map(tmp.path(), "uio9", 0).is_err());
    }

    #[test]
    fn short_register_map_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        write_map(tmp.path(), "uio0", 0, "0x15000000", "0x10000");
        write_map(tmp.path(), "uio0", 1, "0xf8000000", "0x100000");
        let err = UioBackend::open(tmp.path(), tmp.path(), "uio0").unwrap_err();
        assert!(err.to_string().contains("register map"));
    }

    #[test]
    fn register_offsets_follow_block_order() {
        assert_eq!(UioBackend::reg_offset(BlockId::Paf0, 0x40).unwrap(), 0x40);
        assert_eq!(
            UioBackend::reg_offset(BlockId::Mcsc, 0).unwrap(),
            8 * REG_WINDOW_SIZE as usize
        );
        assert!(UioBackend::reg_offset(BlockId::Lme, REG_WINDOW_SIZE).is_err());
    }

    #[test]
    #[ignore = "requires a Pablo ISP UIO device"]
    fn hardware_opens() {
        let backend = UioBackend::init("uio0").unwrap();
        assert!(backend.is_ready());
    }
}
