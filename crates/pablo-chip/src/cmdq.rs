//! Command-loader wire layout.
//!
//! The hardware sequencer consumes two DMA-visible buffers per frame:
//!
//! ```text
//! header  (HEADER_SIZE bytes)
//!   +0x00  magic              "PCLD"
//!   +0x04  header entry count
//!   +0x08  payload pair count
//!   +0x0C  frame id (fcount)
//!   +0x10  header DVA   (u64)
//!   +0x18  payload DVA  (u64)
//!   +0x20  num_buffers  (batch << 16 | index)
//!   +0x24  reserved
//! payload (PAYLOAD_SIZE bytes)
//!   repeated { u32 register address, u32 value }
//! ```

/// Default size of the header buffer.
pub const HEADER_SIZE: usize = 0x2000;
/// Default size of the payload buffer.
pub const PAYLOAD_SIZE: usize = 0x8000;
/// Header magic.
pub const HEADER_MAGIC: u32 = u32::from_le_bytes(*b"PCLD");
/// Size of the fixed header record.
pub const HEADER_RECORD_SIZE: usize = 0x28;
/// Size of one payload pair.
pub const PAIR_SIZE: usize = 8;

/// Bit position of the batch count in `num_buffers`.
pub const BATCH_SHIFT: u32 = 16;
/// Mask of each half of `num_buffers`.
pub const NUM_BUFFERS_MASK: u32 = 0xFFFF;

/// Pack a multi-buffer batch count and current index.
///
/// Batches of one are encoded as a plain `1`.
pub const fn pack_num_buffers(batch: u32, index: u32) -> u32 {
    if batch <= 1 {
        return 1;
    }
    ((batch & NUM_BUFFERS_MASK) << BATCH_SHIFT) | (index & NUM_BUFFERS_MASK)
}

/// Inverse of [`pack_num_buffers`]: `(batch, index)`.
pub const fn unpack_num_buffers(value: u32) -> (u32, u32) {
    let batch = (value >> BATCH_SHIFT) & NUM_BUFFERS_MASK;
    if batch == 0 {
        (1, 0)
    } else {
        (batch, value & NUM_BUFFERS_MASK)
    }
}

/// Payload pairs that fit a payload buffer of `size` bytes.
pub const fn pair_capacity(size: usize) -> usize {
    size / PAIR_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_of_four_index_two() {
        let packed = pack_num_buffers(4, 2);
        assert_eq!(packed, (4 << 16) | 2);
        assert_eq!(unpack_num_buffers(packed), (4, 2));
    }

    #[test]
    fn single_buffer() {
        assert_eq!(pack_num_buffers(1, 0), 1);
        assert_eq!(pack_num_buffers(0, 0), 1);
        assert_eq!(unpack_num_buffers(1), (1, 0));
    }

    #[test]
    fn fields_are_masked() {
        // An index wider than 16 bits must not corrupt the batch field.
        let packed = pack_num_buffers(2, 0x1_0001);
        assert_eq!(unpack_num_buffers(packed), (2, 1));
    }

    #[test]
    fn default_capacity() {
        assert_eq!(pair_capacity(PAYLOAD_SIZE), 4096);
        assert!(HEADER_RECORD_SIZE <= HEADER_SIZE);
    }
}
