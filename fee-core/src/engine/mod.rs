//! Job scheduler
//!
//! [`Engine`] owns every runtime table and runs one flash operation at a
//! time. It never calls the flash driver itself: each step hands back the
//! next [`FlashOp`] to submit, and the outcome of that operation comes back
//! through [`Engine::advance`] as an [`Event`].
//!
//! ```text
//!  request_*() ──▶ Start ──▶ start() ──▶ Submit(op) ──▶ driver
//!                                             ▲            │
//!                                             │            ▼
//!                         Finished(outcome) ◀─┴─ advance(Event)
//! ```
//!
//! The scan and compactions are job sequences of their own and run with
//! [`Status::BusyInternal`]. A user job that needs a compaction first is
//! remembered and resumed once the compaction has finished.

mod scan;
mod swap;
mod user;

use fee_layout::flags::encode_flag;
use fee_layout::{BlockHeader, ClusterHeader, Layout};
use heapless::{Deque, Vec};

use crate::config::{
    ClusterConfig, ConfigError, FeeConfig, MAX_BLOCK_SIZE, MAX_CLUSTER_GROUPS, SCRATCH_SIZE,
};
use crate::runtime::{
    Allocation, BlockRuntimeInfo, BlockTable, GroupRuntime, ReservedMap, RuntimeInfo,
};
use crate::state::{ApiError, BlockStatus, JobResult, RuntimeFault, Status};

use scan::ScanState;
use swap::SwapState;

/// Runtime faults buffered between two driver interactions
const MAX_PENDING_FAULTS: usize = 4;

/// Flash operation requested by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashOp {
    /// Erase a whole cluster
    Erase { address: u32, length: u32 },
    /// Program the bytes returned by [`Engine::staged`]
    Write { address: u32 },
    /// Read `length` bytes
    Read { address: u32, length: u32 },
}

/// Outcome of the last submitted flash operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// Erase or write finished
    Done,
    /// Read finished with these bytes
    Data(&'a [u8]),
    /// Operation rejected or failed
    Failed,
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Outcome {
    /// Final job result
    pub result: JobResult,
    /// Job was requested by a user operation (not the init scan)
    pub user: bool,
    /// The scan had to format an empty cluster group
    pub formatted: bool,
}

/// What the caller must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Submit this operation and report its outcome
    Submit(FlashOp),
    /// The job is over
    Finished(Outcome),
}

/// Operation accepted from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Request {
    Init,
    Read { index: usize, offset: u16, length: u16 },
    Write { index: usize },
    Invalidate { index: usize },
    EraseImmediate { index: usize },
}

/// Current job; each variant waits for exactly one flash operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Job {
    Idle,
    /// Request accepted, first step not taken yet
    Start,
    // Scan
    ScanCluster { group: u8, cluster: u8 },
    ScanBlock { group: u8 },
    FormatErase { group: u8 },
    FormatHeader { group: u8 },
    FormatValid { group: u8 },
    // Compaction
    SwapErase,
    SwapHeader,
    SwapBlockHeader { index: usize },
    SwapRead { index: usize, done: u32 },
    SwapWrite { index: usize, done: u32 },
    SwapBlockValid { index: usize },
    SwapValidate,
    // User jobs
    Read { address: u32, remaining: u16 },
    WriteHeader { index: usize, alloc: Allocation },
    WriteData { index: usize, done: u32 },
    WriteValid { index: usize },
    Invalidate { index: usize },
    EraseImmediate { index: usize, alloc: Allocation },
}

/// Fee engine state
pub struct Engine {
    config: FeeConfig,
    blocks: BlockTable,
    groups: Vec<GroupRuntime, MAX_CLUSTER_GROUPS>,
    reserved: ReservedMap,
    status: Status,
    result: JobResult,
    job: Job,
    request: Option<Request>,
    scan: ScanState,
    swap: SwapState,
    /// Data of the write being served
    payload: Vec<u8, MAX_BLOCK_SIZE>,
    /// Data of the last successful read
    read_buf: Vec<u8, MAX_BLOCK_SIZE>,
    /// Bytes of the write operation in flight
    staged: Vec<u8, SCRATCH_SIZE>,
    faults: Deque<RuntimeFault, MAX_PENDING_FAULTS>,
    formatted: bool,
}

impl Engine {
    /// Create an uninitialized engine
    pub fn new(config: FeeConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut groups = Vec::new();
        for _ in config.groups.iter() {
            let _ = groups.push(GroupRuntime::default());
        }

        Ok(Self {
            blocks: BlockTable::new(&config),
            groups,
            reserved: ReservedMap::new(),
            status: Status::Uninit,
            result: JobResult::Ok,
            job: Job::Idle,
            request: None,
            scan: ScanState::default(),
            swap: SwapState::default(),
            payload: Vec::new(),
            read_buf: Vec::new(),
            staged: Vec::new(),
            faults: Deque::new(),
            formatted: false,
            config,
        })
    }

    /// Static configuration
    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Module status
    pub fn status(&self) -> Status {
        self.status
    }

    /// Result of the last job
    pub fn job_result(&self) -> JobResult {
        self.result
    }

    /// Bytes to program for a [`FlashOp::Write`]
    pub fn staged(&self) -> &[u8] {
        &self.staged
    }

    /// Data of the last read job, empty unless it finished with `Ok`
    pub fn read_data(&self) -> &[u8] {
        &self.read_buf
    }

    /// Pop the oldest unreported runtime fault
    pub fn take_fault(&mut self) -> Option<RuntimeFault> {
        self.faults.pop_front()
    }

    /// Runtime state of block `number`
    pub fn block_info(&self, number: u16) -> Option<BlockRuntimeInfo> {
        self.blocks.find(number).map(|i| *self.blocks.info(i))
    }

    /// Resolved status of block `number`
    pub fn block_status(&self, number: u16) -> Option<BlockStatus> {
        self.block_info(number).map(|info| info.status)
    }

    /// Number of adopted foreign blocks
    pub fn foreign_blocks(&self) -> usize {
        self.blocks.foreign_count()
    }

    /// Runtime state of cluster group `group`
    pub fn group(&self, group: usize) -> Option<&GroupRuntime> {
        self.groups.get(group)
    }

    /// Space and compaction figures of `group`
    pub fn runtime_info(&self, group: usize) -> Result<RuntimeInfo, ApiError> {
        if self.status == Status::Uninit {
            return Err(ApiError::Uninit);
        }
        let cfg = self
            .config
            .groups
            .get(group)
            .ok_or(ApiError::InvalidClusterGroup)?;
        let g = &self.groups[group];
        let layout = &self.config.layout;
        let free = g.cursors.free_space(layout);

        Ok(RuntimeInfo {
            total_space: cfg.clusters[g.active as usize].length,
            free_space: free,
            header_overhead: layout.block_record_len(),
            cluster_overhead: layout.cluster_record_len(),
            separator: layout.block_record_len(),
            reserved_space: cfg.reserved,
            reserved_occupied: self.config.features.reserved_area && free < cfg.reserved,
            reserved_blocks: self.reserved.count(self.blocks.in_group(group as u8)) as u16,
            number_of_swaps: g.swaps,
            generation: g.generation,
            active_cluster: g.active,
        })
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    fn check_idle(&self) -> Result<(), ApiError> {
        match self.status {
            Status::Idle => Ok(()),
            Status::Uninit => Err(ApiError::Uninit),
            Status::Busy => Err(ApiError::Busy),
            Status::BusyInternal => Err(ApiError::BusyInternal),
        }
    }

    fn lookup(&self, number: u16) -> Result<usize, ApiError> {
        self.blocks.find(number).ok_or(ApiError::InvalidBlockNumber)
    }

    fn seed(&mut self, request: Request, status: Status) {
        self.request = Some(request);
        self.status = status;
        self.result = JobResult::Pending;
        self.job = Job::Start;
        self.read_buf.clear();
    }

    /// Reset every runtime table and queue the scan
    pub fn request_init(&mut self) -> Result<(), ApiError> {
        match self.status {
            Status::Busy => return Err(ApiError::Busy),
            Status::BusyInternal => return Err(ApiError::BusyInternal),
            Status::Uninit | Status::Idle => {}
        }

        self.blocks.reset();
        for g in self.groups.iter_mut() {
            *g = GroupRuntime::default();
        }
        self.reserved.clear_all();
        self.formatted = false;
        self.seed(Request::Init, Status::BusyInternal);
        Ok(())
    }

    /// Queue a read of `length` bytes at `offset` of block `number`
    pub fn request_read(&mut self, number: u16, offset: u16, length: u16) -> Result<(), ApiError> {
        self.check_idle()?;
        let index = self.lookup(number)?;
        let size = self.blocks.descriptor(index).size;
        if offset >= size {
            return Err(ApiError::InvalidOffset);
        }
        if length == 0 || offset as u32 + length as u32 > size as u32 {
            return Err(ApiError::InvalidLength);
        }
        self.seed(Request::Read { index, offset, length }, Status::Busy);
        Ok(())
    }

    /// Queue a write of `data` to block `number`
    ///
    /// `data` is copied; it must cover the whole block.
    pub fn request_write(&mut self, number: u16, data: &[u8]) -> Result<(), ApiError> {
        self.check_idle()?;
        let index = self.lookup(number)?;
        if data.is_empty() {
            return Err(ApiError::InvalidBuffer);
        }
        if data.len() != self.blocks.descriptor(index).size as usize {
            return Err(ApiError::InvalidLength);
        }

        self.payload.clear();
        self.payload
            .extend_from_slice(data)
            .map_err(|_| ApiError::InvalidLength)?;
        self.seed(Request::Write { index }, Status::Busy);
        Ok(())
    }

    /// Queue an invalidation of block `number`
    pub fn request_invalidate(&mut self, number: u16) -> Result<(), ApiError> {
        self.check_idle()?;
        let index = self.lookup(number)?;
        self.seed(Request::Invalidate { index }, Status::Busy);
        Ok(())
    }

    /// Queue the space allocation of immediate block `number`
    pub fn request_erase_immediate(&mut self, number: u16) -> Result<(), ApiError> {
        self.check_idle()?;
        let index = self.lookup(number)?;
        if !self.blocks.descriptor(index).immediate {
            return Err(ApiError::NotImmediate);
        }
        self.seed(Request::EraseImmediate { index }, Status::Busy);
        Ok(())
    }

    /// Make the next allocation in `group` compact first
    pub fn force_swap(&mut self, group: usize) -> Result<(), ApiError> {
        if self.status == Status::Uninit {
            return Err(ApiError::Uninit);
        }
        let g = self
            .groups
            .get_mut(group)
            .ok_or(ApiError::InvalidClusterGroup)?;
        g.force_swap = true;
        Ok(())
    }

    /// Abort the running user job without rollback
    ///
    /// Space handed out to the job stays consumed and its group compacts on
    /// the next allocation.
    pub fn cancel(&mut self) -> Result<(), ApiError> {
        match self.status {
            Status::Uninit => return Err(ApiError::Uninit),
            Status::Idle => return Err(ApiError::InvalidCancel),
            Status::BusyInternal => return Err(ApiError::BusyInternal),
            Status::Busy => {}
        }

        match self.job {
            Job::WriteHeader { index, .. }
            | Job::WriteData { index, .. }
            | Job::WriteValid { index }
            | Job::Invalidate { index }
            | Job::EraseImmediate { index, .. } => {
                self.blocks.info_mut(index).prepared = false;
                let group = self.blocks.descriptor(index).cluster_group as usize;
                self.groups[group].force_swap = true;
            }
            _ => {}
        }

        warn!("job cancelled");
        self.job = Job::Idle;
        self.request = None;
        self.status = Status::Idle;
        self.result = JobResult::Cancelled;
        self.read_buf.clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Take the first step of a queued request
    pub fn start(&mut self) -> Option<Step> {
        if self.job != Job::Start {
            return None;
        }
        let step = match self.request? {
            Request::Init => self.scan_start(),
            Request::Read { index, offset, length } => self.read_start(index, offset, length),
            Request::Write { index } => self.write_start(index, false),
            Request::Invalidate { index } => self.invalidate_start(index),
            Request::EraseImmediate { index } => self.erase_immediate_start(index, false),
        };
        Some(step)
    }

    /// Feed the outcome of the submitted flash operation
    ///
    /// Returns `None` if no operation was outstanding.
    pub fn advance(&mut self, event: Event<'_>) -> Option<Step> {
        let step = match self.job {
            Job::Idle | Job::Start => return None,
            Job::ScanCluster { .. }
            | Job::ScanBlock { .. }
            | Job::FormatErase { .. }
            | Job::FormatHeader { .. }
            | Job::FormatValid { .. } => self.scan_advance(event),
            Job::SwapErase
            | Job::SwapHeader
            | Job::SwapBlockHeader { .. }
            | Job::SwapRead { .. }
            | Job::SwapWrite { .. }
            | Job::SwapBlockValid { .. }
            | Job::SwapValidate => self.swap_advance(event),
            _ => self.user_advance(event),
        };
        Some(step)
    }

    fn submit(&mut self, job: Job, op: FlashOp) -> Step {
        self.job = job;
        Step::Submit(op)
    }

    fn finish(&mut self, result: JobResult) -> Step {
        let request = self.request.take();
        self.status = match request {
            Some(Request::Init) if result != JobResult::Ok => Status::Uninit,
            _ => Status::Idle,
        };
        if result != JobResult::Ok {
            self.read_buf.clear();
        }
        self.result = result;
        self.job = Job::Idle;

        Step::Finished(Outcome {
            result,
            user: !matches!(request, Some(Request::Init) | None),
            formatted: core::mem::take(&mut self.formatted),
        })
    }

    fn fault(&mut self, fault: RuntimeFault) {
        let _ = self.faults.push_back(fault);
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn layout(&self) -> Layout {
        self.config.layout
    }

    fn cluster(&self, group: u8, cluster: u8) -> ClusterConfig {
        self.config.groups[group as usize].clusters[cluster as usize]
    }

    fn stage_block_header(&mut self, header: &BlockHeader) {
        let layout = self.layout();
        self.staged.clear();
        let _ = self
            .staged
            .resize(layout.block_header_len() as usize, layout.erase_value);
        let _ = header.encode(&layout, &mut self.staged);
    }

    fn stage_cluster_header(&mut self, header: &ClusterHeader) {
        let layout = self.layout();
        self.staged.clear();
        let _ = self
            .staged
            .resize(layout.cluster_header_len() as usize, layout.erase_value);
        let _ = header.encode(&layout, &mut self.staged);
    }

    fn stage_flag(&mut self) {
        let layout = self.layout();
        self.staged.clear();
        let _ = self.staged.resize(layout.page() as usize, layout.erase_value);
        let _ = encode_flag(&layout, true, &mut self.staged);
    }

    /// Stage `len` payload bytes from `from`, padding past the payload end
    fn stage_payload(&mut self, from: usize, len: usize) {
        let erase = self.config.layout.erase_value;
        self.staged.clear();
        let end = (from + len).min(self.payload.len());
        if from < end {
            let _ = self.staged.extend_from_slice(&self.payload[from..end]);
        }
        let _ = self.staged.resize(len, erase);
    }

    fn header_for(&self, index: usize, data_address: u32) -> BlockHeader {
        let desc = self.blocks.descriptor(index);
        BlockHeader {
            number: desc.number,
            length: desc.size,
            data_address,
            immediate: desc.immediate,
            project: desc.project,
        }
    }

    /// Update the reserved-area bookkeeping after a record of `index` was
    /// placed in `group`
    fn track_reserved(&mut self, group: usize, index: usize) {
        if !self.config.features.reserved_area {
            return;
        }
        let reserved = self.config.groups[group].reserved;
        let free = self.groups[group].cursors.free_space(&self.config.layout);
        if free >= reserved {
            self.reserved.clear(index);
        } else if self.blocks.descriptor(index).immediate {
            self.reserved.set(index);
        } else {
            warn!(
                "block {} encroaches on the reserved area of group {}",
                self.blocks.descriptor(index).number,
                group
            );
            self.reserved.clear(index);
            self.groups[group].force_swap = true;
        }
    }
}
