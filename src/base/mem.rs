use anyhow::{bail, Result};

/// Trait for simulated backing stores.
pub trait HasMemory {
    fn size(&self) -> usize;

    fn read_impl(&self, addr: usize, n: usize) -> Result<&[u8]>;
    fn read(&self, addr: usize, n: usize) -> Result<&[u8]> {
        if n == 0 {
            bail!("empty memory read @ {:#08x}", addr);
        }
        match addr.checked_add(n) {
            Some(end) if end <= self.size() => self.read_impl(addr, n),
            _ => bail!(
                "memory read of size {} @ {:#08x} past end of {}B store",
                n,
                addr,
                self.size()
            ),
        }
    }

    fn write_impl(&mut self, addr: usize, data: &[u8]) -> Result<()>;
    fn write(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        match addr.checked_add(data.len()) {
            Some(end) if end <= self.size() => self.write_impl(addr, data),
            _ => bail!(
                "memory write of size {} @ {:#08x} past end of {}B store",
                data.len(),
                addr,
                self.size()
            ),
        }
    }
}
