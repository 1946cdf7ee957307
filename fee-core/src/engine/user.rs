//! User jobs: read, write, invalidate and immediate-block allocation

use super::{Engine, Event, FlashOp, Job, Step};
use crate::runtime::{Allocation, BlockRuntimeInfo};
use crate::state::{BlockStatus, JobResult, RuntimeFault};

impl Engine {
    pub(super) fn user_advance(&mut self, event: Event<'_>) -> Step {
        match self.job {
            Job::Read { address, remaining } => self.on_read(address, remaining, event),
            Job::WriteHeader { index, alloc } => {
                if event == Event::Failed {
                    return self.write_failed(index);
                }
                *self.blocks.info_mut(index) = BlockRuntimeInfo {
                    status: BlockStatus::Inconsistent,
                    header_address: Some(alloc.header),
                    data_address: alloc.data,
                    prepared: false,
                };
                self.write_data(index, 0)
            }
            Job::WriteData { index, done } => {
                if event == Event::Failed {
                    return self.write_failed(index);
                }
                let done = done + self.staged.len() as u32;
                self.write_data(index, done)
            }
            Job::WriteValid { index } => {
                if event == Event::Failed {
                    return self.write_failed(index);
                }
                let info = self.blocks.info_mut(index);
                info.status = BlockStatus::Valid;
                info.prepared = false;
                self.finish(JobResult::Ok)
            }
            Job::Invalidate { index } => {
                if event == Event::Failed {
                    return self.write_failed(index);
                }
                let status = if self.config.layout.invalidated_status {
                    BlockStatus::Invalidated
                } else {
                    BlockStatus::Invalid
                };
                let info = self.blocks.info_mut(index);
                info.status = status;
                info.prepared = false;
                self.finish(JobResult::Ok)
            }
            Job::EraseImmediate { index, alloc } => {
                if event == Event::Failed {
                    return self.write_failed(index);
                }
                *self.blocks.info_mut(index) = BlockRuntimeInfo {
                    status: BlockStatus::Inconsistent,
                    header_address: Some(alloc.header),
                    data_address: alloc.data,
                    prepared: true,
                };
                self.finish(JobResult::Ok)
            }
            _ => self.finish(JobResult::Failed),
        }
    }

    /// A write-type job failed after space was handed out
    fn write_failed(&mut self, index: usize) -> Step {
        let desc = *self.blocks.descriptor(index);
        error!("write to block {} failed", desc.number);
        self.blocks.info_mut(index).prepared = false;
        self.groups[desc.cluster_group as usize].force_swap = true;
        self.finish(JobResult::Failed)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub(super) fn read_start(&mut self, index: usize, offset: u16, length: u16) -> Step {
        let info = *self.blocks.info(index);
        match info.status {
            BlockStatus::Valid => self.read_chunk(info.data_address + offset as u32, length),
            BlockStatus::Inconsistent | BlockStatus::InconsistentCopy => {
                self.finish(JobResult::BlockInconsistent)
            }
            BlockStatus::Invalid | BlockStatus::Invalidated => self.finish(JobResult::BlockInvalid),
        }
    }

    fn read_chunk(&mut self, address: u32, remaining: u16) -> Step {
        let length = remaining.min(self.config.copy_chunk_size);
        self.submit(
            Job::Read { address, remaining },
            FlashOp::Read {
                address,
                length: length as u32,
            },
        )
    }

    fn on_read(&mut self, address: u32, remaining: u16, event: Event<'_>) -> Step {
        let Event::Data(bytes) = event else {
            error!("read at {=u32:#x} failed", address);
            return self.finish(JobResult::Failed);
        };
        let expected = remaining.min(self.config.copy_chunk_size);
        if bytes.len() != expected as usize || self.read_buf.extend_from_slice(bytes).is_err() {
            return self.finish(JobResult::Failed);
        }

        let remaining = remaining - expected;
        if remaining == 0 {
            self.finish(JobResult::Ok)
        } else {
            self.read_chunk(address + expected as u32, remaining)
        }
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    pub(super) fn write_start(&mut self, index: usize, swapped: bool) -> Step {
        let desc = *self.blocks.descriptor(index);
        let info = *self.blocks.info(index);

        if desc.immediate && info.prepared && !self.config.features.legacy_mode {
            debug!("block {} written into prepared space", desc.number);
            return self.write_data(index, 0);
        }

        match self.allocate(index, swapped) {
            Ok(alloc) => {
                let header = self.header_for(index, alloc.data);
                self.stage_block_header(&header);
                self.submit(
                    Job::WriteHeader { index, alloc },
                    FlashOp::Write {
                        address: alloc.header,
                    },
                )
            }
            Err(step) => step,
        }
    }

    /// Program payload chunks from `done`, then the validity flag
    fn write_data(&mut self, index: usize, done: u32) -> Step {
        let layout = self.config.layout;
        let info = *self.blocks.info(index);
        let total = layout.data_len(self.blocks.descriptor(index).size);

        if done >= total {
            let Some(header) = info.header_address else {
                return self.finish(JobResult::Failed);
            };
            self.stage_flag();
            return self.submit(
                Job::WriteValid { index },
                FlashOp::Write {
                    address: header + layout.block_valid_offset(),
                },
            );
        }

        let length = (self.config.copy_chunk_size as u32).min(total - done);
        self.stage_payload(done as usize, length as usize);
        self.submit(
            Job::WriteData { index, done },
            FlashOp::Write {
                address: info.data_address + done,
            },
        )
    }

    /// Hand out space for a new record of `index`
    ///
    /// Starts a compaction instead if the group is flagged or full. The
    /// error carries the step to return to the caller.
    fn allocate(&mut self, index: usize, swapped: bool) -> Result<Allocation, Step> {
        let layout = self.config.layout;
        let desc = *self.blocks.descriptor(index);
        let group = desc.cluster_group as usize;
        let keep = if self.config.features.reserved_area && !desc.immediate {
            self.config.groups[group].reserved
        } else {
            0
        };

        let g = self.groups[group];
        if !g.force_swap && g.cursors.fits(&layout, desc.size, keep) {
            let alloc = self.groups[group].cursors.allocate(&layout, desc.size);
            self.track_reserved(group, index);
            return Ok(alloc);
        }

        if swapped {
            error!("block {} does not fit after compaction", desc.number);
            self.fault(RuntimeFault::OutOfSpace);
            return Err(self.finish(JobResult::Failed));
        }
        if g.foreign_overflow {
            error!("group {} holds unadopted records, compaction refused", group);
            self.fault(RuntimeFault::ForeignTableFull);
            return Err(self.finish(JobResult::Failed));
        }
        Err(self.swap_start(desc.cluster_group))
    }

    // ------------------------------------------------------------------
    // Invalidate and immediate allocation
    // ------------------------------------------------------------------

    pub(super) fn invalidate_start(&mut self, index: usize) -> Step {
        let info = *self.blocks.info(index);
        let header = match info.header_address {
            Some(header) if !info.status.is_invalid() => header,
            _ => {
                debug!("block {} already invalid", self.blocks.descriptor(index).number);
                return self.finish(JobResult::Ok);
            }
        };

        let layout = self.config.layout;
        self.stage_flag();
        self.submit(
            Job::Invalidate { index },
            FlashOp::Write {
                address: header + layout.block_invalid_offset(),
            },
        )
    }

    pub(super) fn erase_immediate_start(&mut self, index: usize, swapped: bool) -> Step {
        if self.config.features.legacy_mode || self.blocks.info(index).prepared {
            return self.finish(JobResult::Ok);
        }

        match self.allocate(index, swapped) {
            Ok(alloc) => {
                let header = self.header_for(index, alloc.data);
                self.stage_block_header(&header);
                self.submit(
                    Job::EraseImmediate { index, alloc },
                    FlashOp::Write {
                        address: alloc.header,
                    },
                )
            }
            Err(step) => step,
        }
    }
}
