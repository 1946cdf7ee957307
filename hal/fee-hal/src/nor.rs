//! Deferred-completion driver over a blocking NOR flash
//!
//! Wraps any `embedded-storage` [`NorFlash`] device so it can serve as the
//! Fee flash primitive. Requests latch the job; [`FlashDriver::main_function`]
//! performs it. In [`Mode::Slow`] an erase advances one erase sector per
//! call, in [`Mode::Fast`] the whole range is erased at once.

use embedded_storage::nor_flash::NorFlash;
use heapless::Vec;

use crate::flash::{Completion, DriverJobResult, FlashDriver, Mode, RequestError};

/// Default transfer buffer size in bytes
pub const DEFAULT_TRANSFER_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Idle,
    Erase { next: u32, end: u32 },
    Write { offset: u32 },
    Read { offset: u32, length: u32 },
}

/// [`FlashDriver`] implementation for a blocking NOR flash device
pub struct NorFlashDriver<F, const N: usize = DEFAULT_TRANSFER_SIZE> {
    flash: F,
    /// Address of the first device byte in the Fee address space
    base: u32,
    job: Job,
    /// Write data of the current job, or data of the last read
    buffer: Vec<u8, N>,
    result: DriverJobResult,
    mode: Mode,
}

impl<F: NorFlash, const N: usize> NorFlashDriver<F, N> {
    /// Create a driver whose address space starts at device offset 0
    pub fn new(flash: F) -> Self {
        Self::with_base(flash, 0)
    }

    /// Create a driver whose address space starts at `base`
    pub fn with_base(flash: F, base: u32) -> Self {
        Self {
            flash,
            base,
            job: Job::Idle,
            buffer: Vec::new(),
            result: DriverJobResult::Ok,
            mode: Mode::Slow,
        }
    }

    /// Borrow the underlying device
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Mutably borrow the underlying device
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Release the underlying device
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Check if a job is latched or in progress
    pub fn is_busy(&self) -> bool {
        self.job != Job::Idle
    }

    /// Current operating mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Validate a request and translate its address to a device offset
    fn check(&self, address: u32, length: u32, align: usize) -> Result<u32, RequestError> {
        if self.is_busy() {
            return Err(RequestError::Busy);
        }

        let offset = address
            .checked_sub(self.base)
            .ok_or(RequestError::OutOfRange)?;
        let end = offset
            .checked_add(length)
            .ok_or(RequestError::OutOfRange)?;
        if end as usize > self.flash.capacity() {
            return Err(RequestError::OutOfRange);
        }

        let align = align as u32;
        if align > 1 && (offset % align != 0 || length % align != 0) {
            return Err(RequestError::Unaligned);
        }

        Ok(offset)
    }

    fn finish(&mut self, ok: bool) -> Option<Completion> {
        self.job = Job::Idle;
        if ok {
            self.result = DriverJobResult::Ok;
            Some(Completion::JobEnd)
        } else {
            self.result = DriverJobResult::Failed;
            Some(Completion::JobError)
        }
    }
}

impl<F: NorFlash, const N: usize> FlashDriver for NorFlashDriver<F, N> {
    fn erase(&mut self, address: u32, length: u32) -> Result<(), RequestError> {
        let offset = self.check(address, length, F::ERASE_SIZE)?;
        self.job = Job::Erase {
            next: offset,
            end: offset + length,
        };
        self.result = DriverJobResult::Pending;
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), RequestError> {
        if data.len() > N {
            return Err(RequestError::TooLarge);
        }
        let offset = self.check(address, data.len() as u32, F::WRITE_SIZE)?;

        self.buffer.clear();
        self.buffer
            .extend_from_slice(data)
            .map_err(|_| RequestError::TooLarge)?;
        self.job = Job::Write { offset };
        self.result = DriverJobResult::Pending;
        Ok(())
    }

    fn read(&mut self, address: u32, length: u32) -> Result<(), RequestError> {
        if length as usize > N {
            return Err(RequestError::TooLarge);
        }
        let offset = self.check(address, length, F::READ_SIZE)?;
        self.job = Job::Read { offset, length };
        self.result = DriverJobResult::Pending;
        Ok(())
    }

    fn read_data(&self) -> &[u8] {
        &self.buffer
    }

    fn cancel(&mut self) {
        if self.is_busy() {
            self.job = Job::Idle;
            self.result = DriverJobResult::Cancelled;
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn job_result(&self) -> DriverJobResult {
        self.result
    }

    fn main_function(&mut self) -> Option<Completion> {
        match self.job {
            Job::Idle => None,
            Job::Erase { next, end } => {
                let step = match self.mode {
                    Mode::Slow => (F::ERASE_SIZE as u32).min(end - next),
                    Mode::Fast => end - next,
                };
                if self.flash.erase(next, next + step).is_err() {
                    return self.finish(false);
                }
                if next + step >= end {
                    self.finish(true)
                } else {
                    self.job = Job::Erase {
                        next: next + step,
                        end,
                    };
                    None
                }
            }
            Job::Write { offset } => {
                let ok = self.flash.write(offset, &self.buffer).is_ok();
                self.finish(ok)
            }
            Job::Read { offset, length } => {
                self.buffer.clear();
                if self.buffer.resize(length as usize, 0).is_err() {
                    return self.finish(false);
                }
                let ok = self.flash.read(offset, &mut self.buffer).is_ok();
                self.finish(ok)
            }
        }
    }
}
