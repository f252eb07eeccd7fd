use anyhow::{bail, Result};

/// Splits byte addresses into a block address and an intra-block offset for a fixed,
/// power-of-two block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDecoder {
    block_size: u32,
    block_mask: u64,
    block_shift: u32,
}

impl BlockDecoder {
    pub fn new(block_size: u32) -> Result<Self> {
        if block_size == 0 {
            bail!("block size must be positive");
        }
        if !block_size.is_power_of_two() {
            bail!("block size {} is not a power of two", block_size);
        }
        Ok(Self {
            block_size,
            block_mask: block_size as u64 - 1,
            block_shift: block_size.trailing_zeros(),
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_mask(&self) -> u64 {
        self.block_mask
    }

    pub fn block_shift(&self) -> u32 {
        self.block_shift
    }

    #[inline]
    pub fn block_addr(&self, addr: u64) -> u64 {
        addr & !self.block_mask
    }

    #[inline]
    pub fn offset(&self, addr: u64) -> u64 {
        addr & self.block_mask
    }

    // block index in units of block_size, used for set selection
    #[inline]
    pub fn block_number(&self, addr: u64) -> u64 {
        addr >> self.block_shift
    }
}
