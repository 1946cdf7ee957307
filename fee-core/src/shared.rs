//! Interrupt-safe shared instance
//!
//! The flash driver may signal completion from an interrupt while the
//! application calls into the same instance. [`SharedFee`] serializes both
//! through a blocking mutex; a call that arrives while another one holds the
//! instance (for example from an interrupt preempting `main_function`) is
//! refused with [`ApiError::Reentrant`] instead of aliasing the state.
//!
//! A driver completion that arrives while the instance is held is latched
//! and delivered by the next [`SharedFee::main_function`].

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use fee_hal::{Completion, FaultSink, FlashDriver};

use crate::fee::Fee;
use crate::state::{ApiError, JobResult, Status};

/// [`Fee`] instance behind a blocking mutex
pub struct SharedFee<M: RawMutex, D, S> {
    inner: Mutex<M, RefCell<Fee<D, S>>>,
    /// Completion refused while the instance was held
    pending: Mutex<M, Cell<Option<Completion>>>,
}

impl<M: RawMutex, D: FlashDriver, S: FaultSink> SharedFee<M, D, S> {
    /// Wrap an instance
    pub fn new(fee: Fee<D, S>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(fee)),
            pending: Mutex::new(Cell::new(None)),
        }
    }

    /// Run `f` with exclusive access to the instance
    pub fn with<R>(&self, f: impl FnOnce(&mut Fee<D, S>) -> R) -> Result<R, ApiError> {
        self.inner.lock(|cell| {
            let mut fee = cell.try_borrow_mut().map_err(|_| ApiError::Reentrant)?;
            Ok(f(&mut fee))
        })
    }

    /// Cyclic service; delivers a latched completion first
    pub fn main_function(&self) -> Result<(), ApiError> {
        self.with(|fee| {
            match self.pending.lock(|p| p.take()) {
                Some(Completion::JobEnd) => fee.job_end_notification(),
                Some(Completion::JobError) => fee.job_error_notification(),
                None => {}
            }
            fee.main_function()
        })
    }

    /// Completion callback for the flash driver
    ///
    /// Never lost: if the instance is held the completion is latched.
    pub fn job_end_notification(&self) {
        self.notify(Completion::JobEnd);
    }

    /// Error callback for the flash driver
    ///
    /// Never lost: if the instance is held the completion is latched.
    pub fn job_error_notification(&self) {
        self.notify(Completion::JobError);
    }

    fn notify(&self, completion: Completion) {
        let delivered = self.with(|fee| match completion {
            Completion::JobEnd => fee.job_end_notification(),
            Completion::JobError => fee.job_error_notification(),
        });
        if delivered.is_err() {
            warn!("completion arrived while busy, latched");
            self.pending.lock(|p| p.set(Some(completion)));
        }
    }

    /// Module status
    pub fn status(&self) -> Result<Status, ApiError> {
        self.with(|fee| fee.status())
    }

    /// Result of the last job
    pub fn job_result(&self) -> Result<JobResult, ApiError> {
        self.with(|fee| fee.job_result())
    }

    /// Release the instance
    pub fn into_inner(self) -> Fee<D, S> {
        let mut fee = self.inner.into_inner().into_inner();
        match self.pending.into_inner().into_inner() {
            Some(Completion::JobEnd) => fee.job_end_notification(),
            Some(Completion::JobError) => fee.job_error_notification(),
            None => {}
        }
        fee
    }
}
