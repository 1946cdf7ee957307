//! Cluster swap (compaction)
//!
//! ```text
//! EraseStandby ─▶ FormatStandby ─▶ CopyBlocks ─▶ ValidateStandby ─▶ Finalize
//!                 (generation+1)   header, payload    valid flag     resume job
//!                                  chunks, flag
//! ```
//!
//! Only the latest record of each Valid, Inconsistent or InconsistentCopy
//! block moves; Inconsistent records keep their header but no payload. A
//! payload that cannot be read is dropped and the block becomes
//! InconsistentCopy. Until the standby validity flag is written the old
//! cluster stays active, both in RAM and for a scan after power loss.

use fee_layout::ClusterHeader;
use heapless::Vec;

use super::{Engine, Event, FlashOp, Job, Request, Step};
use crate::config::MAX_RUNTIME_BLOCKS;
use crate::runtime::{Allocation, Cursors, ReservedMap};
use crate::state::{BlockStatus, JobResult, RuntimeFault, Status};

/// New home of one block in the standby cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Relocation {
    alloc: Allocation,
    status: BlockStatus,
    prepared: bool,
}

/// Compaction in progress
#[derive(Debug, Clone, Default)]
pub(crate) struct SwapState {
    group: u8,
    target: u8,
    generation: u32,
    /// Write cursors of the standby cluster
    cursors: Cursors,
    /// Per block table index
    moved: Vec<Option<Relocation>, MAX_RUNTIME_BLOCKS>,
    /// Reserved-area bookkeeping after the swap
    reserved: ReservedMap,
}

impl Engine {
    pub(super) fn swap_start(&mut self, group: u8) -> Step {
        let layout = self.config.layout;
        let clusters = self.config.groups[group as usize].clusters.len();
        let g = self.groups[group as usize];
        let target = ((g.active as usize + 1) % clusters) as u8;
        let cluster = self.cluster(group, target);

        info!(
            "group {} compaction: cluster {} -> {}",
            group,
            g.active,
            target
        );

        self.status = Status::BusyInternal;
        self.swap.group = group;
        self.swap.target = target;
        self.swap.generation = g.generation.wrapping_add(1);
        self.swap.cursors = Cursors::empty(&cluster, &layout);
        self.swap.moved.clear();
        for _ in 0..self.blocks.len() {
            let _ = self.swap.moved.push(None);
        }
        self.swap.reserved = self.reserved;
        for index in self.blocks.in_group(group) {
            self.swap.reserved.clear(index);
        }

        self.submit(
            Job::SwapErase,
            FlashOp::Erase {
                address: cluster.start,
                length: cluster.length,
            },
        )
    }

    pub(super) fn swap_advance(&mut self, event: Event<'_>) -> Step {
        let layout = self.config.layout;

        if let Job::SwapRead { index, done } = self.job {
            return match event {
                Event::Data(bytes) => {
                    let Some(target) = self.relocation(index) else {
                        return self.swap_failed();
                    };
                    self.staged.clear();
                    let _ = self.staged.extend_from_slice(bytes);
                    self.submit(
                        Job::SwapWrite { index, done },
                        FlashOp::Write {
                            address: target.alloc.data + done,
                        },
                    )
                }
                _ => {
                    warn!(
                        "payload of block {} unreadable, dropped",
                        self.blocks.descriptor(index).number
                    );
                    if let Some(Some(r)) = self.swap.moved.get_mut(index) {
                        r.status = BlockStatus::InconsistentCopy;
                    }
                    self.copy_next(index + 1)
                }
            };
        }

        if event == Event::Failed {
            return self.swap_failed();
        }

        match self.job {
            Job::SwapErase => {
                let cluster = self.cluster(self.swap.group, self.swap.target);
                self.stage_cluster_header(&ClusterHeader {
                    generation: self.swap.generation,
                    start: cluster.start,
                    length: cluster.length,
                });
                self.submit(
                    Job::SwapHeader,
                    FlashOp::Write {
                        address: cluster.start,
                    },
                )
            }
            Job::SwapHeader => self.copy_next(0),
            Job::SwapBlockHeader { index } => match self.relocation(index) {
                Some(r) if r.status == BlockStatus::Valid => self.copy_chunk(index, 0),
                Some(_) => self.copy_next(index + 1),
                None => self.swap_failed(),
            },
            Job::SwapWrite { index, done } => {
                let done = done + self.staged.len() as u32;
                let size = self.blocks.descriptor(index).size;
                if done < layout.data_len(size) {
                    return self.copy_chunk(index, done);
                }
                let Some(r) = self.relocation(index) else {
                    return self.swap_failed();
                };
                self.stage_flag();
                self.submit(
                    Job::SwapBlockValid { index },
                    FlashOp::Write {
                        address: r.alloc.header + layout.block_valid_offset(),
                    },
                )
            }
            Job::SwapBlockValid { index } => {
                if let Some(Some(r)) = self.swap.moved.get_mut(index) {
                    r.status = BlockStatus::Valid;
                }
                self.copy_next(index + 1)
            }
            Job::SwapValidate => self.swap_finish(),
            _ => self.swap_failed(),
        }
    }

    fn relocation(&self, index: usize) -> Option<Relocation> {
        self.swap.moved.get(index).copied().flatten()
    }

    /// Move the next surviving block of the group at or after `from`
    fn copy_next(&mut self, from: usize) -> Step {
        let layout = self.config.layout;
        let group = self.swap.group;

        let next = (from..self.blocks.len()).find(|&i| {
            let info = self.blocks.info(i);
            self.blocks.descriptor(i).cluster_group == group
                && info.status.survives_swap()
                && info.header_address.is_some()
        });

        let Some(index) = next else {
            let cluster = self.cluster(group, self.swap.target);
            self.stage_flag();
            return self.submit(
                Job::SwapValidate,
                FlashOp::Write {
                    address: cluster.start + layout.cluster_valid_offset(),
                },
            );
        };

        let desc = *self.blocks.descriptor(index);
        if !self.swap.cursors.fits(&layout, desc.size, 0) {
            error!("block {} does not fit the compacted cluster", desc.number);
            self.fault(RuntimeFault::OutOfSpace);
            return self.swap_failed();
        }

        let alloc = self.swap.cursors.allocate(&layout, desc.size);
        let reserved = self.config.groups[group as usize].reserved;
        if self.config.features.reserved_area
            && desc.immediate
            && self.swap.cursors.free_space(&layout) < reserved
        {
            self.swap.reserved.set(index);
        }

        let info = *self.blocks.info(index);
        if let Some(slot) = self.swap.moved.get_mut(index) {
            *slot = Some(Relocation {
                alloc,
                status: info.status,
                prepared: info.prepared,
            });
        }

        let header = self.header_for(index, alloc.data);
        self.stage_block_header(&header);
        self.submit(
            Job::SwapBlockHeader { index },
            FlashOp::Write {
                address: alloc.header,
            },
        )
    }

    fn copy_chunk(&mut self, index: usize, done: u32) -> Step {
        let layout = self.config.layout;
        let total = layout.data_len(self.blocks.descriptor(index).size);
        let length = (self.config.copy_chunk_size as u32).min(total - done);
        let address = self.blocks.info(index).data_address + done;
        self.submit(
            Job::SwapRead { index, done },
            FlashOp::Read { address, length },
        )
    }

    /// Switch the runtime tables over to the standby cluster
    fn swap_finish(&mut self) -> Step {
        let group = self.swap.group;

        for index in 0..self.blocks.len() {
            if self.blocks.descriptor(index).cluster_group != group {
                continue;
            }
            let moved = self.swap.moved.get(index).copied().flatten();
            let info = self.blocks.info_mut(index);
            match moved {
                Some(r) => {
                    info.status = r.status;
                    info.header_address = Some(r.alloc.header);
                    info.data_address = r.alloc.data;
                    info.prepared = r.prepared;
                }
                None => {
                    info.header_address = None;
                    info.prepared = false;
                }
            }
        }

        let g = &mut self.groups[group as usize];
        g.active = self.swap.target;
        g.generation = self.swap.generation;
        g.cursors = self.swap.cursors;
        g.force_swap = false;
        g.swaps += 1;
        self.reserved = self.swap.reserved;

        info!(
            "group {} compacted into cluster {}, generation {}",
            group,
            g.active,
            g.generation
        );

        self.status = Status::Busy;
        match self.request {
            Some(Request::Write { index }) => self.write_start(index, true),
            Some(Request::EraseImmediate { index }) => self.erase_immediate_start(index, true),
            _ => self.finish(JobResult::Ok),
        }
    }

    fn swap_failed(&mut self) -> Step {
        error!("compaction of group {} failed", self.swap.group);
        self.finish(JobResult::Failed)
    }
}
