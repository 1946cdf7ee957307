//! Simulated NOR flash

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

/// Erase sector size of the simulated device
pub const SIM_ERASE_SIZE: usize = 256;

/// Program granularity of the simulated device
pub const SIM_WRITE_SIZE: usize = 1;

/// Errors returned by the simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// Access outside the device
    OutOfBounds,
    /// Erase range not sector aligned
    NotAligned,
    /// Fault injected by the test
    Injected,
    /// Power was cut
    PowerLost,
}

impl NorFlashError for SimError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            SimError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            SimError::NotAligned => NorFlashErrorKind::NotAligned,
            SimError::Injected | SimError::PowerLost => NorFlashErrorKind::Other,
        }
    }
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Read operations
    pub reads: usize,
    /// Write operations
    pub writes: usize,
    /// Erase operations
    pub erases: usize,
    /// Bytes programmed
    pub bytes_written: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Read(u32),
    Write(u32),
    Erase(u32),
}

/// In-memory NOR flash with fault injection
#[derive(Debug, Clone)]
pub struct SimFlash {
    mem: Vec<u8>,
    faults: Vec<Fault>,
    /// Bytes that can still be programmed before power is cut
    power_budget: Option<usize>,
    powered: bool,
    stats: SimStats,
}

impl SimFlash {
    /// Create an erased device of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            mem: vec![0xFF; size],
            faults: Vec::new(),
            power_budget: None,
            powered: true,
            stats: SimStats::default(),
        }
    }

    /// Raw device contents
    pub fn image(&self) -> &[u8] {
        &self.mem
    }

    /// Mutable raw device contents, for planting corrupted records
    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    /// Operation counters
    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Fail the next read covering `address`
    pub fn fail_read_at(&mut self, address: u32) {
        self.faults.push(Fault::Read(address));
    }

    /// Fail the next write covering `address`
    pub fn fail_write_at(&mut self, address: u32) {
        self.faults.push(Fault::Write(address));
    }

    /// Fail the next erase covering `address`
    pub fn fail_erase_at(&mut self, address: u32) {
        self.faults.push(Fault::Erase(address));
    }

    /// Cut power once `bytes` more bytes have been programmed
    pub fn cut_power_after(&mut self, bytes: usize) {
        self.power_budget = Some(bytes);
    }

    /// Power the device up again after a cut
    pub fn restore_power(&mut self) {
        self.powered = true;
        self.power_budget = None;
    }

    /// Check if the device is powered
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Remove all pending injected faults
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, SimError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(SimError::OutOfBounds)?;
        if end > self.mem.len() {
            return Err(SimError::OutOfBounds);
        }
        Ok(start..end)
    }

    /// Consume a one-shot fault matching `probe` inside `range`
    fn take_fault(&mut self, range: &core::ops::Range<usize>, probe: fn(Fault) -> Option<u32>) -> bool {
        let hit = self
            .faults
            .iter()
            .position(|&f| probe(f).is_some_and(|addr| range.contains(&(addr as usize))));
        match hit {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }
}

impl ErrorType for SimFlash {
    type Error = SimError;
}

impl ReadNorFlash for SimFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), SimError> {
        if !self.powered {
            return Err(SimError::PowerLost);
        }
        let range = self.range(offset, bytes.len())?;
        self.stats.reads += 1;
        if self.take_fault(&range, |f| match f {
            Fault::Read(a) => Some(a),
            _ => None,
        }) {
            return Err(SimError::Injected);
        }
        bytes.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.mem.len()
    }
}

impl NorFlash for SimFlash {
    const WRITE_SIZE: usize = SIM_WRITE_SIZE;
    const ERASE_SIZE: usize = SIM_ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), SimError> {
        if !self.powered {
            return Err(SimError::PowerLost);
        }
        if to < from {
            return Err(SimError::OutOfBounds);
        }
        let range = self.range(from, (to - from) as usize)?;
        if range.start % SIM_ERASE_SIZE != 0 || range.end % SIM_ERASE_SIZE != 0 {
            return Err(SimError::NotAligned);
        }
        self.stats.erases += 1;
        if self.take_fault(&range, |f| match f {
            Fault::Erase(a) => Some(a),
            _ => None,
        }) {
            return Err(SimError::Injected);
        }
        self.mem[range].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), SimError> {
        if !self.powered {
            return Err(SimError::PowerLost);
        }
        let range = self.range(offset, bytes.len())?;
        self.stats.writes += 1;
        if self.take_fault(&range, |f| match f {
            Fault::Write(a) => Some(a),
            _ => None,
        }) {
            return Err(SimError::Injected);
        }

        let programmed = match self.power_budget {
            Some(budget) if budget < bytes.len() => budget,
            _ => bytes.len(),
        };
        for (cell, byte) in self.mem[range.start..range.start + programmed]
            .iter_mut()
            .zip(bytes)
        {
            *cell &= *byte;
        }
        self.stats.bytes_written += programmed;

        if let Some(budget) = self.power_budget.as_mut() {
            *budget -= programmed;
            if programmed < bytes.len() {
                self.powered = false;
                return Err(SimError::PowerLost);
            }
        }
        Ok(())
    }
}
