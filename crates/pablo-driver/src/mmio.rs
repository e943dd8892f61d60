//! Memory-Mapped I/O for the ISP register space
//!
//! Provides safe abstractions over a UIO memory map. By UIO convention,
//! map `N` of `/dev/uioX` is selected by passing `N * page_size` as the
//! mmap offset.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::ptr_as_ptr)]

use crate::error::{PabloError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::os::unix::io::AsFd;

/// Mapped UIO region for MMIO access
pub struct MappedRegion {
    /// Memory-mapped pointer
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// UIO map index
    index: usize,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("index", &self.index)
            .finish()
    }
}

// SAFETY: Send - MappedRegion owns the mapping exclusively. Moving between threads
// doesn't invalidate the mapping (mmap'd memory is process-wide). No thread-local state.
unsafe impl Send for MappedRegion {}

// SAFETY: Sync - all accesses are bounds-checked volatile operations on device memory.
// Concurrent register accesses are serialized by the hardware bus, never by Rust references.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map UIO map `index` of size `size`
    ///
    /// # Errors
    ///
    /// Returns an error if memory mapping the region fails.
    pub fn map(device: &File, index: usize, size: usize) -> Result<Self> {
        let page = rustix::param::page_size();
        let offset = (index * page) as u64;

        // SAFETY: mmap necessary for MMIO - maps the UIO region into process address space.
        // Invariants: (1) device fd valid and open for read/write; (2) size taken from the
        // UIO sysfs description of this map; (3) ptr valid for size bytes or Err.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                device.as_fd(),
                offset,
            )
            .map_err(|e| {
                PabloError::hardware_error(format!("Failed to mmap UIO map{index}: {e}"))
            })?
        };

        tracing::info!("Mapped UIO map{} at {:p}, size={:#x}", index, ptr, size);

        Ok(Self {
            ptr: ptr.cast(),
            size,
            index,
        })
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(PabloError::hardware_error(format!(
                "access {offset:#x}+{len} outside map{} ({:#x} bytes)",
                self.index, self.size
            ))),
        }
    }

    /// Read a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns error if `offset + 4` exceeds the mapped region size.
    pub fn read32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4)?;
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap, valid for self.size; (2) offset+4 <= size checked;
        // (3) register offsets are u32 aligned.
        Ok(unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) })
    }

    /// Write a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns error if `offset + 4` exceeds the mapped region size.
    pub fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, 4)?;
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+4 <= size checked; (3) u32 aligned.
        unsafe {
            std::ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value);
        }
        Ok(())
    }

    /// Copy bytes into the mapping (DMA pool staging)
    ///
    /// # Errors
    ///
    /// Returns error if the copy would run past the mapping.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        // SAFETY: destination range checked above; source is a live slice that cannot
        // alias device memory mapped by this process.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Get UIO map index
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Get region size
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: munmap necessary - must unmap region before process ends.
        // Invariants: (1) ptr from mmap in map(), valid for self.size; (2) Drop runs once.
        unsafe {
            // Ignore error in Drop (can't propagate)
            let _ = munmap(self.ptr.cast(), self.size);
        }
        tracing::debug!("Unmapped UIO map{}", self.index);
    }
}
