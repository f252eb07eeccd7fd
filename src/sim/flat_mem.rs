use anyhow::Result;

use crate::base::mem::HasMemory;

/// Flat byte-addressed backing store. Every byte starts out as a function of its address so
/// loads can be checked against what the cache returns.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    bytes: Vec<u8>,
}

impl HasMemory for FlatMemory {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn read_impl(&self, addr: usize, n: usize) -> Result<&[u8]> {
        Ok(&self.bytes[addr..addr + n])
    }

    fn write_impl(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl FlatMemory {
    pub fn new_with_size(size: usize) -> Self {
        let bytes = (0..size).map(pattern_byte).collect();
        Self { bytes }
    }

    pub fn zeroed(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }
}

pub fn pattern_byte(addr: usize) -> u8 {
    (addr ^ (addr >> 8) ^ (addr >> 16)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_contents_follow_pattern() {
        let mem = FlatMemory::new_with_size(0x2000);
        let bytes = mem.read(0x1234, 4).unwrap();
        let expected: Vec<u8> = (0x1234..0x1238).map(pattern_byte).collect();
        assert_eq!(bytes, expected.as_slice());
    }

    #[test]
    fn write_then_read_back() {
        let mut mem = FlatMemory::zeroed(64);
        mem.write(8, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.read(8, 4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(mem.read(12, 1).unwrap(), &[0]);
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut mem = FlatMemory::zeroed(64);
        assert!(mem.read(60, 8).is_err());
        assert!(mem.read(0, 0).is_err());
        assert!(mem.write(63, &[0, 0]).is_err());
        assert!(mem.read(usize::MAX, 2).is_err());
    }
}
