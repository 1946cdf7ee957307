//! Public API
//!
//! [`Fee`] binds an [`Engine`] to a [`FlashDriver`] and a [`FaultSink`].
//! Every operation only validates its arguments and queues a job; the work
//! happens in [`Fee::main_function`] and in the two completion callbacks.
//!
//! ```text
//! caller ──▶ write() ──▶ Pending
//!
//! main_function() ──▶ driver.main_function() ──▶ job_end_notification()
//!                                                   │
//!                      engine.advance(Event) ◀──────┘
//!                              │
//!                              ▼
//!                      driver.write/read/erase (next operation)
//! ```

use fee_hal::{FaultSink, FlashDriver, Mode, NoFaultSink};

use crate::config::{ConfigError, FeeConfig};
use crate::engine::{Engine, Event, FlashOp, Outcome, Step};
use crate::runtime::RuntimeInfo;
use crate::state::{ApiError, ApiId, BlockStatus, JobResult, RuntimeFault, Status};

/// Upper-layer callbacks
#[derive(Debug, Clone, Copy, Default)]
pub struct Notifications {
    /// A user job finished with `Ok`
    pub job_end: Option<fn()>,
    /// A user job finished with `Failed`, `BlockInvalid` or `BlockInconsistent`
    pub job_error: Option<fn()>,
    /// Init found no valid cluster in a group and formatted one
    pub cluster_format: Option<fn()>,
}

/// Flash EEPROM emulation instance
pub struct Fee<D, S = NoFaultSink> {
    engine: Engine,
    driver: D,
    sink: S,
    notify: Notifications,
    /// Operation handed to the driver and not yet completed
    outstanding: Option<FlashOp>,
}

impl<D: FlashDriver> Fee<D, NoFaultSink> {
    /// Create an instance without fault reporting or callbacks
    pub fn with_driver(config: FeeConfig, driver: D) -> Result<Self, ConfigError> {
        Self::new(config, driver, NoFaultSink, Notifications::default())
    }
}

impl<D: FlashDriver, S: FaultSink> Fee<D, S> {
    /// Create an uninitialized instance
    pub fn new(
        config: FeeConfig,
        driver: D,
        sink: S,
        notify: Notifications,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: Engine::new(config)?,
            driver,
            sink,
            notify,
            outstanding: None,
        })
    }

    /// Borrow the flash driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutably borrow the flash driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Borrow the fault sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Borrow the engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Release the driver and the fault sink
    pub fn into_parts(self) -> (D, S) {
        (self.driver, self.sink)
    }

    fn reject(&mut self, err: ApiError, api: ApiId) -> ApiError {
        warn!("api {} rejected: {}", api as u8, err);
        let instance = self.engine.config().instance;
        self.sink.report_error(err.report(instance, api));
        err
    }

    /// Reset the runtime tables and queue the flash scan
    pub fn init(&mut self) -> Result<(), ApiError> {
        self.engine
            .request_init()
            .map_err(|e| self.reject(e, ApiId::Init))
    }

    /// Queue a read of `length` bytes at `offset` of block `number`
    ///
    /// The data is available from [`Fee::read_data`] once the job result
    /// is `Ok`.
    pub fn read(&mut self, number: u16, offset: u16, length: u16) -> Result<(), ApiError> {
        self.engine
            .request_read(number, offset, length)
            .map_err(|e| self.reject(e, ApiId::Read))
    }

    /// Copy the data of the last successful read into `buf`
    pub fn copy_read_data(&mut self, buf: &mut [u8]) -> Result<usize, ApiError> {
        let len = self.engine.read_data().len();
        if buf.len() < len {
            return Err(self.reject(ApiError::InvalidBuffer, ApiId::Read));
        }
        buf[..len].copy_from_slice(self.engine.read_data());
        Ok(len)
    }

    /// Data of the last successful read
    pub fn read_data(&self) -> &[u8] {
        self.engine.read_data()
    }

    /// Queue a write of block `number`; `data` must cover the whole block
    pub fn write(&mut self, number: u16, data: &[u8]) -> Result<(), ApiError> {
        self.engine
            .request_write(number, data)
            .map_err(|e| self.reject(e, ApiId::Write))
    }

    /// Queue the invalidation of block `number`
    pub fn invalidate_block(&mut self, number: u16) -> Result<(), ApiError> {
        self.engine
            .request_invalidate(number)
            .map_err(|e| self.reject(e, ApiId::InvalidateBlock))
    }

    /// Queue the space allocation for immediate block `number`
    pub fn erase_immediate_block(&mut self, number: u16) -> Result<(), ApiError> {
        self.engine
            .request_erase_immediate(number)
            .map_err(|e| self.reject(e, ApiId::EraseImmediateBlock))
    }

    /// Abort the running user job
    ///
    /// The job result becomes `Cancelled`; no callback is invoked.
    pub fn cancel(&mut self) -> Result<(), ApiError> {
        self.engine
            .cancel()
            .map_err(|e| self.reject(e, ApiId::Cancel))?;
        if self.outstanding.take().is_some() {
            self.driver.cancel();
        }
        Ok(())
    }

    /// Module status
    pub fn status(&self) -> Status {
        self.engine.status()
    }

    /// Result of the last job
    pub fn job_result(&self) -> JobResult {
        self.engine.job_result()
    }

    /// Resolved status of block `number`, if known
    pub fn block_status(&self, number: u16) -> Option<BlockStatus> {
        self.engine.block_status(number)
    }

    /// Space and compaction figures of cluster group `group`
    pub fn runtime_info(&mut self, group: usize) -> Result<RuntimeInfo, ApiError> {
        self.engine
            .runtime_info(group)
            .map_err(|e| self.reject(e, ApiId::GetRuntimeInfo))
    }

    /// Compact `group` before its next allocation
    pub fn force_swap_on_next_write(&mut self, group: usize) -> Result<(), ApiError> {
        self.engine
            .force_swap(group)
            .map_err(|e| self.reject(e, ApiId::ForceSwap))
    }

    /// Switch the flash driver mode
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), ApiError> {
        match self.engine.status() {
            Status::Idle => {
                self.driver.set_mode(mode);
                Ok(())
            }
            Status::Uninit => Err(self.reject(ApiError::Uninit, ApiId::SetMode)),
            Status::Busy => Err(self.reject(ApiError::Busy, ApiId::SetMode)),
            Status::BusyInternal => Err(self.reject(ApiError::BusyInternal, ApiId::SetMode)),
        }
    }

    /// Cyclic service: poll the driver and start a queued job
    pub fn main_function(&mut self) {
        match self.driver.main_function() {
            Some(fee_hal::Completion::JobEnd) => self.job_end_notification(),
            Some(fee_hal::Completion::JobError) => self.job_error_notification(),
            None => {}
        }
        if let Some(step) = self.engine.start() {
            self.drive(step);
        }
    }

    /// The driver finished the outstanding operation
    pub fn job_end_notification(&mut self) {
        let Some(op) = self.outstanding.take() else {
            return;
        };
        let data = self.driver.read_data();
        let event = match op {
            FlashOp::Read { length, .. } if data.len() == length as usize => Event::Data(data),
            FlashOp::Read { .. } => Event::Failed,
            _ => Event::Done,
        };
        if let Some(step) = self.engine.advance(event) {
            self.drive(step);
        }
    }

    /// The driver failed the outstanding operation
    pub fn job_error_notification(&mut self) {
        if self.outstanding.take().is_none() {
            return;
        }
        self.report_runtime(RuntimeFault::FlashJobFailed);
        if let Some(step) = self.engine.advance(Event::Failed) {
            self.drive(step);
        }
    }

    fn report_runtime(&mut self, fault: RuntimeFault) {
        let instance = self.engine.config().instance;
        self.sink.report_runtime_error(fault.report(instance));
    }

    /// Run engine steps until an operation is accepted or the job ends
    fn drive(&mut self, mut step: Step) {
        loop {
            while let Some(fault) = self.engine.take_fault() {
                self.report_runtime(fault);
            }

            let op = match step {
                Step::Submit(op) => op,
                Step::Finished(outcome) => return self.complete(outcome),
            };

            let accepted = match op {
                FlashOp::Erase { address, length } => self.driver.erase(address, length),
                FlashOp::Write { address } => self.driver.write(address, self.engine.staged()),
                FlashOp::Read { address, length } => self.driver.read(address, length),
            };
            match accepted {
                Ok(()) => {
                    self.outstanding = Some(op);
                    return;
                }
                Err(err) => {
                    warn!("flash request {} refused: {}", op, err);
                    self.report_runtime(RuntimeFault::FlashRejected);
                    match self.engine.advance(Event::Failed) {
                        Some(next) => step = next,
                        None => return,
                    }
                }
            }
        }
    }

    fn complete(&mut self, outcome: Outcome) {
        debug!("job finished: {}", outcome.result);
        if outcome.formatted {
            if let Some(hook) = self.notify.cluster_format {
                hook();
            }
        }
        if !outcome.user {
            return;
        }
        let hook = match outcome.result {
            JobResult::Ok => self.notify.job_end,
            JobResult::Failed | JobResult::BlockInvalid | JobResult::BlockInconsistent => {
                self.notify.job_error
            }
            JobResult::Pending | JobResult::Cancelled => None,
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockConfig;
    use crate::engine::tests::small_config;
    use core::sync::atomic::{AtomicU32, Ordering};
    use fee_layout::{BlockHeader, Layout};
    use fee_hal_sim::{sim_driver, FaultLog, SimDriver, SimFlash};
    use heapless::Vec;
    use proptest::prelude::*;

    type TestFee = Fee<SimDriver, FaultLog>;

    fn run_to_idle<D: FlashDriver, S: FaultSink>(fee: &mut Fee<D, S>) -> JobResult {
        for _ in 0..10_000 {
            if !fee.status().is_busy() {
                return fee.job_result();
            }
            fee.main_function();
        }
        panic!("job did not finish");
    }

    fn boot(config: FeeConfig, flash: SimFlash) -> TestFee {
        let mut fee = Fee::new(
            config,
            SimDriver::new(flash),
            FaultLog::new(),
            Notifications::default(),
        )
        .unwrap();
        fee.init().unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        fee
    }

    fn ready(config: FeeConfig) -> TestFee {
        boot(config, SimFlash::new(0x400))
    }

    /// Power-cycle: keep the flash image, rebuild everything else
    fn reboot(fee: TestFee, config: FeeConfig, prepare: impl FnOnce(&mut SimFlash)) -> TestFee {
        let (driver, _) = fee.into_parts();
        let mut flash = driver.into_inner();
        flash.restore_power();
        flash.clear_faults();
        prepare(&mut flash);
        boot(config, flash)
    }

    fn write(fee: &mut TestFee, number: u16, data: &[u8]) -> JobResult {
        fee.write(number, data).unwrap();
        run_to_idle(fee)
    }

    fn read(fee: &mut TestFee, number: u16, offset: u16, length: u16) -> (JobResult, Vec<u8, 1024>) {
        fee.read(number, offset, length).unwrap();
        let result = run_to_idle(fee);
        (result, Vec::from_slice(fee.read_data()).unwrap())
    }

    fn flash_writes(fee: &TestFee) -> usize {
        fee.driver().flash().stats().writes
    }

    fn assert_cursor_invariant(fee: &TestFee) {
        let g = fee.engine().group(0).unwrap();
        assert!(g.cursors.header <= g.cursors.data);
    }

    /// Program a record region and its payload straight into the image
    fn plant(flash: &mut SimFlash, layout: &Layout, slot: u32, header: BlockHeader, payload: &[u8]) {
        let mut region = [0u8; 64];
        let len = header.encode_record(layout, true, false, &mut region).unwrap();
        let image = flash.image_mut();
        image[slot as usize..slot as usize + len].copy_from_slice(&region[..len]);
        let data = header.data_address as usize;
        image[data..data + payload.len()].copy_from_slice(payload);
    }

    fn record(number: u16, length: u16, data_address: u32) -> BlockHeader {
        BlockHeader {
            number,
            length,
            data_address,
            immediate: false,
            project: 0,
        }
    }

    fn force_swap_pending(fee: &TestFee, group: usize) -> bool {
        fee.engine().group(group).unwrap().force_swap
    }

    static FORMATS: AtomicU32 = AtomicU32::new(0);
    static ENDS: AtomicU32 = AtomicU32::new(0);
    static ERRORS: AtomicU32 = AtomicU32::new(0);

    #[test]
    fn test_blank_flash_init_and_notifications() {
        let notify = Notifications {
            job_end: Some(|| {
                ENDS.fetch_add(1, Ordering::Relaxed);
            }),
            job_error: Some(|| {
                ERRORS.fetch_add(1, Ordering::Relaxed);
            }),
            cluster_format: Some(|| {
                FORMATS.fetch_add(1, Ordering::Relaxed);
            }),
        };
        let mut fee =
            Fee::new(small_config(), sim_driver(0x400), FaultLog::new(), notify).unwrap();
        assert_eq!(fee.status(), Status::Uninit);

        fee.init().unwrap();
        assert_eq!(fee.status(), Status::BusyInternal);
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(fee.status(), Status::Idle);
        assert_eq!(FORMATS.load(Ordering::Relaxed), 1);

        let info = fee.runtime_info(0).unwrap();
        assert_eq!(info.generation, 1);
        assert_eq!(info.active_cluster, 0);
        assert_eq!(info.total_space, 0x200);
        assert_eq!(info.free_space, 0x200 - 32 - 32);

        fee.write(5, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(fee.job_result(), JobResult::Pending);
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(ENDS.load(Ordering::Relaxed), 1);

        fee.read(5, 0, 8).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(fee.read_data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(ENDS.load(Ordering::Relaxed), 2);

        fee.read(1, 0, 8).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::BlockInvalid);
        assert_eq!(ERRORS.load(Ordering::Relaxed), 1);
        assert_eq!(FORMATS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_partial_read() {
        let mut fee = ready(small_config());
        let data: [u8; 20] = core::array::from_fn(|i| i as u8);
        assert_eq!(write(&mut fee, 7, &data), JobResult::Ok);

        let (result, bytes) = read(&mut fee, 7, 5, 10);
        assert_eq!(result, JobResult::Ok);
        assert_eq!(&bytes[..], &data[5..15]);

        let mut buf = [0u8; 4];
        assert_eq!(fee.copy_read_data(&mut buf), Err(ApiError::InvalidBuffer));
        let mut buf = [0u8; 16];
        assert_eq!(fee.copy_read_data(&mut buf), Ok(10));
        assert_eq!(&buf[..10], &data[5..15]);
    }

    #[test]
    fn test_data_survives_reboot() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 1, &[0x11; 8]), JobResult::Ok);
        assert_eq!(write(&mut fee, 1, &[0x22; 8]), JobResult::Ok);
        assert_eq!(write(&mut fee, 5, &[0x55; 8]), JobResult::Ok);

        let mut fee = reboot(fee, small_config(), |_| {});
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [0x22; 8]);
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [0x55; 8]);
        assert!(!fee.engine().group(0).unwrap().force_swap);
        assert_cursor_invariant(&fee);
    }

    #[test]
    fn test_full_cluster_compacts() {
        let mut fee = ready(small_config());
        // 448 bytes free: one 40-byte record of block 1, seven 56-byte
        // records of block 7
        assert_eq!(write(&mut fee, 1, &[0x11; 8]), JobResult::Ok);
        for fill in 0..7u8 {
            assert_eq!(write(&mut fee, 7, &[fill; 20]), JobResult::Ok);
        }
        let before = fee.runtime_info(0).unwrap();
        assert_eq!(before.free_space, 16);
        assert_eq!(before.number_of_swaps, 0);

        let mut seen: Vec<Status, 8> = Vec::new();
        fee.write(7, &[0xA5; 20]).unwrap();
        loop {
            let status = fee.status();
            if seen.last() != Some(&status) {
                seen.push(status).unwrap();
            }
            if !status.is_busy() {
                break;
            }
            fee.main_function();
        }
        assert_eq!(
            &seen[..],
            &[Status::Busy, Status::BusyInternal, Status::Busy, Status::Idle]
        );
        assert_eq!(fee.job_result(), JobResult::Ok);

        let after = fee.runtime_info(0).unwrap();
        assert_eq!(after.number_of_swaps, 1);
        assert_eq!(after.generation, 2);
        assert_eq!(after.active_cluster, 1);
        assert!(after.free_space > before.free_space);
        assert_eq!(read(&mut fee, 7, 0, 20).1[..], [0xA5; 20]);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [0x11; 8]);
        assert_cursor_invariant(&fee);

        // The compacted cluster wins the next scan
        let mut fee = reboot(fee, small_config(), |_| {});
        let info = fee.runtime_info(0).unwrap();
        assert_eq!(info.active_cluster, 1);
        assert_eq!(info.generation, 2);
        assert_eq!(info.free_space, after.free_space);
        assert_eq!(read(&mut fee, 7, 0, 20).1[..], [0xA5; 20]);
    }

    #[test]
    fn test_invalidate() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Ok);

        fee.invalidate_block(5).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(fee.block_status(5), Some(BlockStatus::Invalid));
        assert_eq!(read(&mut fee, 5, 0, 8).0, JobResult::BlockInvalid);

        let writes = flash_writes(&fee);
        fee.invalidate_block(5).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        fee.invalidate_block(1).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(flash_writes(&fee), writes);

        let mut fee = reboot(fee, small_config(), |_| {});
        assert_eq!(fee.block_status(5), Some(BlockStatus::Invalid));
        assert_eq!(read(&mut fee, 5, 0, 8).0, JobResult::BlockInvalid);
    }

    #[test]
    fn test_invalidated_status_reported_when_configured() {
        let mut config = small_config();
        config.layout.invalidated_status = true;
        let mut fee = ready(config.clone());
        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Ok);
        fee.invalidate_block(5).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(fee.block_status(5), Some(BlockStatus::Invalidated));

        let fee = reboot(fee, config, |_| {});
        assert_eq!(fee.block_status(5), Some(BlockStatus::Invalidated));
    }

    #[test]
    fn test_busy_rejection_reported() {
        let mut fee = ready(small_config());
        let info = fee.runtime_info(0).unwrap();
        fee.write(1, &[1; 8]).unwrap();

        assert_eq!(fee.write(5, &[2; 8]), Err(ApiError::Busy));
        assert_eq!(fee.read(1, 0, 8), Err(ApiError::Busy));
        assert_eq!(fee.erase_immediate_block(9), Err(ApiError::Busy));
        assert_eq!(fee.set_mode(Mode::Fast), Err(ApiError::Busy));
        assert_eq!(fee.runtime_info(0).unwrap(), info);

        let report = fee.sink().errors[0];
        assert_eq!(report.module, 21);
        assert_eq!(report.api, ApiId::Write as u8);
        assert_eq!(report.code, ApiError::Busy.code());

        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(fee.block_status(5), Some(BlockStatus::Invalid));
        assert_eq!(fee.set_mode(Mode::Fast), Ok(()));
        assert_eq!(fee.driver().mode(), Mode::Fast);
    }

    #[test]
    fn test_cancel() {
        let mut fee = ready(small_config());
        assert_eq!(fee.cancel(), Err(ApiError::InvalidCancel));

        fee.write(1, &[1; 8]).unwrap();
        fee.main_function();
        fee.cancel().unwrap();
        assert_eq!(fee.status(), Status::Idle);
        assert_eq!(fee.job_result(), JobResult::Cancelled);
        assert!(fee.engine().group(0).unwrap().force_swap);
        assert_eq!(fee.block_status(1), Some(BlockStatus::Invalid));

        // Nothing left for the driver
        fee.main_function();
        assert_eq!(fee.job_result(), JobResult::Cancelled);

        assert_eq!(write(&mut fee, 1, &[2; 8]), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 1);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [2; 8]);
    }

    #[test]
    fn test_unreadable_cluster_header_fails_init() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        let (driver, log) = fee.into_parts();
        let mut flash = driver.into_inner();
        flash.fail_read_at(0);
        let erases = flash.stats().erases;
        let mut fee =
            Fee::new(small_config(), SimDriver::new(flash), log, Notifications::default()).unwrap();

        fee.init().unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Failed);
        assert_eq!(fee.status(), Status::Uninit);
        assert_eq!(fee.driver().flash().stats().erases, erases);

        fee.init().unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().generation, 1);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);
    }

    #[test]
    fn test_payload_gap_forces_swap() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        // Block 5 leaves 0x1E8..0x1F8 unaccounted for
        let mut fee = reboot(fee, small_config(), |flash| {
            plant(flash, &Layout::new(), 64, record(5, 8, 0x1E0), &[5; 8]);
        });
        assert_eq!(fee.block_status(5), Some(BlockStatus::Valid));
        assert!(force_swap_pending(&fee, 0));
        assert_eq!(fee.engine().group(0).unwrap().cursors.data, 0x1E0);
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [5; 8]);

        assert_eq!(write(&mut fee, 7, &[7; 20]), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 1);
        assert!(!force_swap_pending(&fee, 0));
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [5; 8]);
        assert_eq!(read(&mut fee, 7, 0, 20).1[..], [7; 20]);
    }

    #[test]
    fn test_payload_outside_free_space_stops_walk() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        // Block 5 claims the payload of block 1; block 7 behind it is not trusted
        let mut fee = reboot(fee, small_config(), |flash| {
            let layout = Layout::new();
            plant(flash, &layout, 64, record(5, 8, 0x1F8), &[]);
            plant(flash, &layout, 96, record(7, 20, 0x1D8), &[7; 24]);
        });
        assert_eq!(fee.block_status(5), Some(BlockStatus::Invalid));
        assert_eq!(fee.block_status(7), Some(BlockStatus::Invalid));
        assert!(force_swap_pending(&fee, 0));
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);

        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 1);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [5; 8]);
        assert_eq!(read(&mut fee, 7, 0, 20).0, JobResult::BlockInvalid);
    }

    /// Small config plus a second group owning block 5, with project tags
    fn two_groups() -> FeeConfig {
        let mut config = small_config();
        config.layout.project_byte = true;
        let mut group = crate::config::ClusterGroupConfig::default();
        for start in [0x400, 0x600] {
            group
                .clusters
                .push(crate::config::ClusterConfig {
                    start,
                    length: 0x200,
                })
                .unwrap();
        }
        config.groups.push(group).unwrap();
        config.blocks[1].cluster_group = 1;
        config
    }

    #[test]
    fn test_record_contradicting_config_forces_swap() {
        let config = two_groups();
        let mut fee = boot(config.clone(), SimFlash::new(0x800));
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        let mut fee = reboot(fee, config.clone(), |flash| {
            let layout = config.layout;
            // Block 5 belongs to group 1
            plant(flash, &layout, 64, record(5, 8, 0x1F0), &[5; 8]);
            // Block 7 is 20 bytes
            plant(flash, &layout, 96, record(7, 16, 0x1E0), &[7; 16]);
            // Block 9 is immediate
            plant(flash, &layout, 128, record(9, 8, 0x1D8), &[9; 8]);
            // Block 1 carries project tag 0
            let foreign = BlockHeader {
                project: 3,
                ..record(1, 8, 0x1D0)
            };
            plant(flash, &layout, 160, foreign, &[3; 8]);
        });

        assert_eq!(fee.block_status(5), Some(BlockStatus::Invalid));
        assert_eq!(fee.block_status(7), Some(BlockStatus::Invalid));
        assert_eq!(fee.block_status(9), Some(BlockStatus::Invalid));
        assert!(force_swap_pending(&fee, 0));
        assert!(!force_swap_pending(&fee, 1));
        // The contradicting record does not replace the committed one
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);

        assert_eq!(write(&mut fee, 1, &[2; 8]), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 1);
        assert_eq!(fee.runtime_info(1).unwrap().number_of_swaps, 0);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [2; 8]);
    }

    #[test]
    fn test_garbled_flag_page_forces_swap() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Ok);

        let mut fee = reboot(fee, small_config(), |flash| {
            let valid = 32 + Layout::new().block_valid_offset() as usize;
            flash.image_mut()[valid + 1] = 0x00;
        });
        assert_eq!(fee.block_status(5), Some(BlockStatus::Inconsistent));
        assert!(force_swap_pending(&fee, 0));
        assert_eq!(read(&mut fee, 5, 0, 8).0, JobResult::BlockInconsistent);

        assert_eq!(write(&mut fee, 5, &[6; 8]), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 1);
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [6; 8]);
    }

    #[test]
    fn test_foreign_block_beyond_cluster_capacity_not_adopted() {
        let mut config = small_config();
        config.blocks.truncate(2);
        config.blocks.push(BlockConfig::new(100, 256)).unwrap();
        let mut fee = ready(config);
        assert_eq!(write(&mut fee, 100, &[0xAB; 256]), JobResult::Ok);

        // With blocks 7 and 9 configured, one copy of everything no longer
        // fits a cluster
        let mut fee = reboot(fee, with_foreign(2), |_| {});
        assert_eq!(fee.block_status(100), None);
        assert_eq!(fee.engine().foreign_blocks(), 0);
        assert!(fee.engine().group(0).unwrap().foreign_overflow);
        assert!(fee.sink().has_runtime_error(RuntimeFault::ForeignTableFull.code()));

        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);
        fee.force_swap_on_next_write(0).unwrap();
        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Failed);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);
    }

    #[test]
    fn test_cancel_read() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        fee.read(1, 0, 8).unwrap();
        fee.main_function();
        fee.cancel().unwrap();
        assert_eq!(fee.status(), Status::Idle);
        assert_eq!(fee.job_result(), JobResult::Cancelled);
        assert!(fee.read_data().is_empty());
        assert!(!force_swap_pending(&fee, 0));

        fee.main_function();
        assert_eq!(fee.job_result(), JobResult::Cancelled);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);
    }

    #[test]
    fn test_cancel_invalidate() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Ok);
        let writes = flash_writes(&fee);

        fee.invalidate_block(5).unwrap();
        fee.main_function();
        fee.cancel().unwrap();
        assert_eq!(fee.job_result(), JobResult::Cancelled);
        assert_eq!(flash_writes(&fee), writes);
        assert_eq!(fee.block_status(5), Some(BlockStatus::Valid));
        assert!(force_swap_pending(&fee, 0));
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [5; 8]);

        fee.invalidate_block(5).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(read(&mut fee, 5, 0, 8).0, JobResult::BlockInvalid);
    }

    #[test]
    fn test_internal_jobs_cannot_be_cancelled() {
        let mut fee = Fee::new(
            small_config(),
            sim_driver(0x400),
            FaultLog::new(),
            Notifications::default(),
        )
        .unwrap();
        fee.init().unwrap();
        assert_eq!(fee.cancel(), Err(ApiError::BusyInternal));
        assert!(fee.sink().has_error(ApiError::BusyInternal.code()));
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
    }

    #[test]
    fn test_read_failure_mid_scan_forces_swap() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);
        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Ok);
        assert_eq!(write(&mut fee, 7, &[7; 20]), JobResult::Ok);

        // Header slots start at 32 and are 32 bytes apart; block 5 is second
        let mut fee = reboot(fee, small_config(), |flash| flash.fail_read_at(64));
        assert_eq!(fee.block_status(5), Some(BlockStatus::Invalid));
        assert_eq!(fee.block_status(7), Some(BlockStatus::Valid));
        assert!(fee.engine().group(0).unwrap().force_swap);
        assert_eq!(read(&mut fee, 7, 0, 20).1[..], [7; 20]);

        assert_eq!(write(&mut fee, 1, &[0x10; 8]), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 1);
        assert!(!fee.engine().group(0).unwrap().force_swap);
        assert_eq!(read(&mut fee, 7, 0, 20).1[..], [7; 20]);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [0x10; 8]);
    }

    #[test]
    fn test_torn_header_keeps_previous_data() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 5, &[1; 8]), JobResult::Ok);

        fee.driver_mut().flash_mut().cut_power_after(10);
        assert_eq!(write(&mut fee, 5, &[2; 8]), JobResult::Failed);

        let mut fee = reboot(fee, small_config(), |_| {});
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [1; 8]);
        let g = fee.engine().group(0).unwrap();
        assert!(g.force_swap);
        // Past the torn slot, below the payload it announced
        assert_eq!(g.cursors.header, 96);
        assert_eq!(g.cursors.data, 0x1F0);

        assert_eq!(write(&mut fee, 5, &[3; 8]), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 1);
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [3; 8]);
    }

    #[test]
    fn test_torn_payload_is_inconsistent() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 5, &[1; 8]), JobResult::Ok);

        // Header (16 bytes) lands, payload is cut short
        fee.driver_mut().flash_mut().cut_power_after(20);
        assert_eq!(write(&mut fee, 5, &[2; 8]), JobResult::Failed);
        assert!(fee.sink().has_runtime_error(RuntimeFault::FlashJobFailed.code()));

        let mut fee = reboot(fee, small_config(), |_| {});
        assert_eq!(fee.block_status(5), Some(BlockStatus::Inconsistent));
        assert_eq!(read(&mut fee, 5, 0, 8).0, JobResult::BlockInconsistent);

        // A compaction keeps the header but no payload
        fee.force_swap_on_next_write(0).unwrap();
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);
        assert_eq!(fee.block_status(5), Some(BlockStatus::Inconsistent));
        let fee = reboot(fee, small_config(), |_| {});
        assert_eq!(fee.block_status(5), Some(BlockStatus::Inconsistent));
    }

    #[test]
    fn test_garbled_cluster_header_is_not_a_candidate() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        // A half-written generation 2 header in the standby cluster
        let mut fee = reboot(fee, small_config(), |flash| {
            flash.image_mut()[0x200..0x206].copy_from_slice(&[2, 0, 0, 0, 0, 2]);
        });
        let info = fee.runtime_info(0).unwrap();
        assert_eq!(info.active_cluster, 0);
        assert_eq!(info.generation, 1);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);
    }

    #[test]
    fn test_copy_read_failure_marks_inconsistent_copy() {
        let mut fee = ready(small_config());
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);
        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Ok);

        // Payload of block 1 sits at the top of cluster 0
        fee.driver_mut().flash_mut().fail_read_at(0x1F8);
        fee.force_swap_on_next_write(0).unwrap();
        assert_eq!(write(&mut fee, 7, &[7; 20]), JobResult::Ok);

        assert_eq!(fee.block_status(1), Some(BlockStatus::InconsistentCopy));
        assert_eq!(read(&mut fee, 1, 0, 8).0, JobResult::BlockInconsistent);
        assert_eq!(read(&mut fee, 5, 0, 8).1[..], [5; 8]);
        assert_eq!(read(&mut fee, 7, 0, 20).1[..], [7; 20]);
    }

    #[test]
    fn test_immediate_block() {
        let mut fee = ready(small_config());
        assert_eq!(fee.erase_immediate_block(5), Err(ApiError::NotImmediate));

        let writes = flash_writes(&fee);
        fee.erase_immediate_block(9).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(flash_writes(&fee), writes + 1);
        assert_eq!(fee.block_status(9), Some(BlockStatus::Inconsistent));

        // A second allocation request is a no-op
        fee.erase_immediate_block(9).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(flash_writes(&fee), writes + 1);

        // Payload and validity flag only
        assert_eq!(write(&mut fee, 9, &[9; 8]), JobResult::Ok);
        assert_eq!(flash_writes(&fee), writes + 3);
        assert_eq!(read(&mut fee, 9, 0, 8).1[..], [9; 8]);

        // Without a fresh allocation the normal path is taken
        assert_eq!(write(&mut fee, 9, &[8; 8]), JobResult::Ok);
        assert_eq!(flash_writes(&fee), writes + 6);
        assert_eq!(read(&mut fee, 9, 0, 8).1[..], [8; 8]);
    }

    #[test]
    fn test_legacy_mode_immediate_block() {
        let mut config = small_config();
        config.features.legacy_mode = true;
        let mut fee = ready(config);

        let writes = flash_writes(&fee);
        fee.erase_immediate_block(9).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(flash_writes(&fee), writes);

        assert_eq!(write(&mut fee, 9, &[9; 8]), JobResult::Ok);
        assert_eq!(flash_writes(&fee), writes + 3);
        assert_eq!(read(&mut fee, 9, 0, 8).1[..], [9; 8]);
    }

    #[test]
    fn test_reserved_area() {
        let mut config = small_config();
        config.features.reserved_area = true;
        config.groups[0].reserved = 96;
        let mut fee = ready(config);

        // Non-immediate writes must leave 96 bytes: six 56-byte records fit
        for fill in 0..6u8 {
            assert_eq!(write(&mut fee, 7, &[fill; 20]), JobResult::Ok);
        }
        let info = fee.runtime_info(0).unwrap();
        assert_eq!(info.free_space, 112);
        assert!(!info.reserved_occupied);

        // The immediate block may dip into the reserved area
        fee.erase_immediate_block(9).unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        let info = fee.runtime_info(0).unwrap();
        assert_eq!(info.number_of_swaps, 0);
        assert_eq!(info.reserved_space, 96);
        assert!(info.reserved_occupied);
        assert_eq!(info.reserved_blocks, 1);
        assert_eq!(write(&mut fee, 9, &[9; 8]), JobResult::Ok);

        // Anything else compacts first
        assert_eq!(write(&mut fee, 7, &[0x77; 20]), JobResult::Ok);
        let info = fee.runtime_info(0).unwrap();
        assert_eq!(info.number_of_swaps, 1);
        assert!(!info.reserved_occupied);
        assert_eq!(info.reserved_blocks, 0);
        assert_eq!(read(&mut fee, 9, 0, 8).1[..], [9; 8]);
        assert_eq!(read(&mut fee, 7, 0, 20).1[..], [0x77; 20]);
    }

    fn with_extra_blocks(numbers: &[u16]) -> FeeConfig {
        let mut config = small_config();
        for &n in numbers {
            config.blocks.push(BlockConfig::new(n, 8)).unwrap();
        }
        config
    }

    fn with_foreign(capacity: u8) -> FeeConfig {
        let mut config = small_config();
        config.features.foreign_blocks = capacity;
        config
    }

    #[test]
    fn test_foreign_block_adopted_and_kept() {
        let mut fee = ready(with_extra_blocks(&[100]));
        assert_eq!(write(&mut fee, 100, &[0xF0; 8]), JobResult::Ok);
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        let mut fee = reboot(fee, with_foreign(2), |_| {});
        assert_eq!(fee.engine().foreign_blocks(), 1);
        assert_eq!(fee.block_status(100), Some(BlockStatus::Valid));
        assert_eq!(read(&mut fee, 100, 0, 8).1[..], [0xF0; 8]);

        fee.force_swap_on_next_write(0).unwrap();
        assert_eq!(write(&mut fee, 1, &[2; 8]), JobResult::Ok);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 1);
        assert_eq!(read(&mut fee, 100, 0, 8).1[..], [0xF0; 8]);
    }

    #[test]
    fn test_unknown_block_dropped_without_foreign_table() {
        let mut fee = ready(with_extra_blocks(&[100]));
        assert_eq!(write(&mut fee, 100, &[0xF0; 8]), JobResult::Ok);

        let mut fee = reboot(fee, small_config(), |_| {});
        assert_eq!(fee.block_status(100), None);
        assert_eq!(fee.read(100, 0, 8), Err(ApiError::InvalidBlockNumber));
        assert!(fee.sink().has_error(ApiError::InvalidBlockNumber.code()));
    }

    #[test]
    fn test_foreign_table_overflow_fails_only_compaction() {
        let mut fee = ready(with_extra_blocks(&[100, 101]));
        assert_eq!(write(&mut fee, 100, &[0xA0; 8]), JobResult::Ok);
        assert_eq!(write(&mut fee, 101, &[0xA1; 8]), JobResult::Ok);

        let mut fee = reboot(fee, with_foreign(1), |_| {});
        let code = RuntimeFault::ForeignTableFull.code();
        assert_eq!(fee.sink().runtime.iter().filter(|r| r.code == code).count(), 1);
        assert_eq!(fee.block_status(100), Some(BlockStatus::Valid));
        assert_eq!(fee.block_status(101), None);

        // Writes that fit are unaffected
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        // A compaction would lose block 101
        fee.force_swap_on_next_write(0).unwrap();
        assert_eq!(write(&mut fee, 5, &[5; 8]), JobResult::Failed);
        assert_eq!(fee.sink().runtime.iter().filter(|r| r.code == code).count(), 2);
        assert_eq!(fee.runtime_info(0).unwrap().number_of_swaps, 0);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);
    }

    #[test]
    fn test_rejected_flash_request_fails_job() {
        // The standby cluster runs past the end of the device
        let mut fee = boot(small_config(), SimFlash::new(0x300));
        assert_eq!(write(&mut fee, 1, &[1; 8]), JobResult::Ok);

        fee.force_swap_on_next_write(0).unwrap();
        assert_eq!(write(&mut fee, 1, &[2; 8]), JobResult::Failed);
        assert!(fee.sink().has_runtime_error(RuntimeFault::FlashRejected.code()));
        assert_eq!(fee.status(), Status::Idle);

        let info = fee.runtime_info(0).unwrap();
        assert_eq!(info.number_of_swaps, 0);
        assert_eq!(info.active_cluster, 0);
        assert_eq!(read(&mut fee, 1, 0, 8).1[..], [1; 8]);
    }

    #[test]
    fn test_uninit_api() {
        let mut fee = Fee::with_driver(small_config(), sim_driver(0x400)).unwrap();
        assert_eq!(fee.write(1, &[0; 8]), Err(ApiError::Uninit));
        assert_eq!(fee.runtime_info(0), Err(ApiError::Uninit));
        assert_eq!(fee.force_swap_on_next_write(0), Err(ApiError::Uninit));
        assert_eq!(fee.set_mode(Mode::Fast), Err(ApiError::Uninit));
    }

    #[test]
    fn test_failed_format_leaves_module_uninit() {
        let mut flash = SimFlash::new(0x400);
        flash.fail_erase_at(0);
        let mut fee = Fee::new(
            small_config(),
            SimDriver::new(flash),
            FaultLog::new(),
            Notifications::default(),
        )
        .unwrap();
        fee.init().unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Failed);
        assert_eq!(fee.status(), Status::Uninit);

        // Injected faults fire once; a second init succeeds
        fee.init().unwrap();
        assert_eq!(run_to_idle(&mut fee), JobResult::Ok);
        assert_eq!(fee.status(), Status::Idle);
    }

    proptest! {
        #[test]
        fn prop_read_returns_written_slice(
            data in proptest::collection::vec(any::<u8>(), 20),
            offset in 0u16..20,
            length in 1u16..=20,
        ) {
            prop_assume!(offset + length <= 20);
            let mut fee = ready(small_config());
            prop_assert_eq!(write(&mut fee, 7, &data), JobResult::Ok);
            let (result, bytes) = read(&mut fee, 7, offset, length);
            prop_assert_eq!(result, JobResult::Ok);
            prop_assert_eq!(&bytes[..], &data[offset as usize..(offset + length) as usize]);
        }

        #[test]
        fn prop_writes_survive_compactions(
            ops in proptest::collection::vec((0usize..3, any::<u8>()), 1..40),
        ) {
            const BLOCKS: [(u16, usize); 3] = [(1, 8), (5, 8), (7, 20)];
            let mut fee = ready(small_config());
            let mut last: [Option<u8>; 3] = [None; 3];

            for &(slot, fill) in ops.iter() {
                let (number, size) = BLOCKS[slot];
                let data = [fill; 20];
                prop_assert_eq!(write(&mut fee, number, &data[..size]), JobResult::Ok);
                last[slot] = Some(fill);
                let g = fee.engine().group(0).unwrap();
                prop_assert!(g.cursors.header <= g.cursors.data);
            }

            let mut fee = reboot(fee, small_config(), |_| {});
            for (slot, &(number, size)) in BLOCKS.iter().enumerate() {
                let (result, bytes) = read(&mut fee, number, 0, size as u16);
                match last[slot] {
                    Some(fill) => {
                        prop_assert_eq!(result, JobResult::Ok);
                        prop_assert!(bytes.iter().all(|&b| b == fill));
                    }
                    None => prop_assert_eq!(result, JobResult::BlockInvalid),
                }
            }
        }
    }
}
