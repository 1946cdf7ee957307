//! Flash scan run by init
//!
//! For each cluster group:
//!
//! 1. Read every cluster header; the verified one with the highest
//!    generation id becomes active. If every header was read and none
//!    verifies, cluster 0 is erased and formatted as generation 1. A header
//!    that cannot be read fails the init.
//! 2. Walk the block headers of the active cluster until a blank region.
//!    The latest record of a block wins. Anything suspicious (garbled
//!    header or flag, unreadable slot, payload gap, record that contradicts
//!    the configuration) flags the group for compaction on its next
//!    allocation.

use fee_layout::{BlockHeader, ClusterHeader, Decoded, RecordState};

use super::{Engine, Event, FlashOp, Job, Step};
use crate::config::{BlockConfig, MAX_BLOCK_SIZE};
use crate::runtime::BlockRuntimeInfo;
use crate::state::{BlockStatus, JobResult, RuntimeFault};

/// Best cluster candidate of the group being scanned
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScanState {
    /// Cluster index and generation id
    best: Option<(u8, u32)>,
}

impl Engine {
    pub(super) fn scan_start(&mut self) -> Step {
        info!("scan start, {} cluster groups", self.groups.len());
        self.scan_group(0)
    }

    fn scan_group(&mut self, group: u8) -> Step {
        if group as usize >= self.groups.len() {
            info!("scan done, {} foreign blocks", self.blocks.foreign_count());
            return self.finish(JobResult::Ok);
        }
        self.scan.best = None;
        self.read_cluster_header(group, 0)
    }

    fn read_cluster_header(&mut self, group: u8, cluster: u8) -> Step {
        let address = self.cluster(group, cluster).start;
        let length = self.config.layout.cluster_record_len();
        self.submit(
            Job::ScanCluster { group, cluster },
            FlashOp::Read { address, length },
        )
    }

    pub(super) fn scan_advance(&mut self, event: Event<'_>) -> Step {
        match self.job {
            Job::ScanCluster { group, cluster } => self.on_cluster_header(group, cluster, event),
            Job::ScanBlock { group } => self.on_block_header(group, event),
            Job::FormatErase { group } => {
                if event == Event::Failed {
                    return self.format_failed(group);
                }
                let cluster = self.cluster(group, 0);
                self.stage_cluster_header(&ClusterHeader {
                    generation: 1,
                    start: cluster.start,
                    length: cluster.length,
                });
                self.submit(
                    Job::FormatHeader { group },
                    FlashOp::Write {
                        address: cluster.start,
                    },
                )
            }
            Job::FormatHeader { group } => {
                if event == Event::Failed {
                    return self.format_failed(group);
                }
                let address = self.cluster(group, 0).start + self.config.layout.cluster_valid_offset();
                self.stage_flag();
                self.submit(Job::FormatValid { group }, FlashOp::Write { address })
            }
            Job::FormatValid { group } => {
                if event == Event::Failed {
                    return self.format_failed(group);
                }
                let cluster = self.cluster(group, 0);
                let layout = self.config.layout;
                self.groups[group as usize].activate(0, &cluster, 1, &layout);
                self.formatted = true;
                info!("group {} formatted", group);
                self.scan_group(group + 1)
            }
            _ => self.finish(JobResult::Failed),
        }
    }

    fn format_failed(&mut self, group: u8) -> Step {
        error!("formatting group {} failed", group);
        self.finish(JobResult::Failed)
    }

    fn on_cluster_header(&mut self, group: u8, cluster: u8, event: Event<'_>) -> Step {
        let cfg = self.cluster(group, cluster);
        match event {
            Event::Data(region) => {
                if let Ok(Decoded::Record {
                    header,
                    state: RecordState::Valid,
                    ..
                }) = ClusterHeader::decode(&self.config.layout, region)
                {
                    let newer = self
                        .scan
                        .best
                        .map_or(true, |(_, generation)| header.generation > generation);
                    if header.start == cfg.start && header.length == cfg.length && newer {
                        self.scan.best = Some((cluster, header.generation));
                    }
                }
            }
            _ => {
                // Never format over a header that could not be read
                error!("cluster header at {=u32:#x} unreadable", cfg.start);
                return self.finish(JobResult::Failed);
            }
        }

        let next = cluster + 1;
        if (next as usize) < self.config.groups[group as usize].clusters.len() {
            return self.read_cluster_header(group, next);
        }

        match self.scan.best {
            Some((active, generation)) => {
                let cluster = self.cluster(group, active);
                let layout = self.config.layout;
                self.groups[group as usize].activate(active, &cluster, generation, &layout);
                info!(
                    "group {}: cluster {} active, generation {}",
                    group,
                    active,
                    generation
                );
                self.read_block_header(group)
            }
            None => {
                info!("group {}: no valid cluster, formatting", group);
                let cluster = self.cluster(group, 0);
                self.submit(
                    Job::FormatErase { group },
                    FlashOp::Erase {
                        address: cluster.start,
                        length: cluster.length,
                    },
                )
            }
        }
    }

    fn read_block_header(&mut self, group: u8) -> Step {
        let record = self.config.layout.block_record_len();
        let cursors = self.groups[group as usize].cursors;
        if cursors.header + record > cursors.data {
            return self.scan_group_done(group);
        }
        self.submit(
            Job::ScanBlock { group },
            FlashOp::Read {
                address: cursors.header,
                length: record,
            },
        )
    }

    fn scan_group_done(&mut self, group: u8) -> Step {
        let g = &self.groups[group as usize];
        debug!(
            "group {} walk done: header {=u32:#x}, data {=u32:#x}, force swap {}",
            group,
            g.cursors.header,
            g.cursors.data,
            g.force_swap
        );
        self.scan_group(group + 1)
    }

    fn on_block_header(&mut self, group: u8, event: Event<'_>) -> Step {
        let layout = self.config.layout;
        let record = layout.block_record_len();
        let slot = self.groups[group as usize].cursors.header;

        let Event::Data(region) = event else {
            warn!("header at {=u32:#x} unreadable, skipping", slot);
            let g = &mut self.groups[group as usize];
            g.force_swap = true;
            g.cursors.header += record;
            return self.read_block_header(group);
        };

        match BlockHeader::decode(&layout, region) {
            Ok(Decoded::Blank) => self.scan_group_done(group),
            Ok(Decoded::Record {
                header,
                state,
                garbled,
            }) => {
                let g = &mut self.groups[group as usize];
                g.cursors.header += record;
                if garbled {
                    warn!("garbled flag at {=u32:#x}", slot);
                    g.force_swap = true;
                }
                if !self.claim_payload(group, slot, &header) {
                    return self.scan_group_done(group);
                }
                self.resolve_record(group, slot, &header, state);
                self.read_block_header(group)
            }
            Ok(Decoded::HeaderInvalid) | Err(_) => {
                warn!("garbled header at {=u32:#x}, walk stopped", slot);
                let page = layout.page();
                let g = &mut self.groups[group as usize];
                g.force_swap = true;
                g.cursors.header += record;

                // Keep clear of the payload the torn header may point to
                if let Some(bytes) = region.get(4..8) {
                    let address = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    if address % page == 0
                        && address >= g.cursors.header
                        && address < g.cursors.data
                    {
                        g.cursors.data = address;
                    }
                }
                g.cursors.header = g.cursors.header.min(g.cursors.data);
                self.scan_group_done(group)
            }
        }
    }

    /// Move the data cursor below the payload of a verified record
    ///
    /// Returns `false` if the payload lies outside the free space, in which
    /// case the walk cannot trust anything that follows.
    fn claim_payload(&mut self, group: u8, slot: u32, header: &BlockHeader) -> bool {
        let layout = self.config.layout;
        let record = layout.block_record_len();
        let g = &mut self.groups[group as usize];

        let start = header.data_address;
        let end = start.checked_add(layout.data_len(header.length));
        let inside = start % layout.page() == 0
            && start >= g.cursors.header + record
            && end.is_some_and(|end| end <= g.cursors.data);

        if !inside {
            warn!("record at {=u32:#x} points outside the free space", slot);
            g.force_swap = true;
            return false;
        }
        if end != Some(g.cursors.data) {
            warn!("payload gap above record at {=u32:#x}", slot);
            g.force_swap = true;
        }
        g.cursors.data = start;
        true
    }

    fn resolve_record(&mut self, group: u8, slot: u32, header: &BlockHeader, state: RecordState) {
        let layout = self.config.layout;
        let index = match self.blocks.find(header.number) {
            Some(index) => index,
            None => match self.adopt_foreign(group, header) {
                Some(index) => index,
                None => return,
            },
        };

        let desc = *self.blocks.descriptor(index);
        let project_ok = !layout.project_byte || desc.project == header.project;
        if desc.cluster_group != group
            || desc.size != header.length
            || desc.immediate != header.immediate
            || !project_ok
        {
            warn!(
                "record of block {} at {=u32:#x} contradicts its configuration",
                header.number,
                slot
            );
            self.groups[group as usize].force_swap = true;
            return;
        }

        let status = match state {
            RecordState::Valid => BlockStatus::Valid,
            RecordState::Invalid => BlockStatus::Invalid,
            RecordState::Invalidated => BlockStatus::Invalidated,
            RecordState::Inconsistent => BlockStatus::Inconsistent,
        };
        *self.blocks.info_mut(index) = BlockRuntimeInfo {
            status,
            header_address: Some(slot),
            data_address: header.data_address,
            prepared: false,
        };
        self.track_reserved(group as usize, index);
    }

    fn adopt_foreign(&mut self, group: u8, header: &BlockHeader) -> Option<usize> {
        if self.config.features.foreign_blocks == 0 {
            debug!("record of unknown block {} dropped", header.number);
            return None;
        }
        if header.length == 0 || header.length as usize > MAX_BLOCK_SIZE {
            warn!("unknown block {} has unsupported size {}", header.number, header.length);
            self.groups[group as usize].force_swap = true;
            return None;
        }

        let block = BlockConfig {
            number: header.number,
            size: header.length,
            cluster_group: group,
            immediate: header.immediate,
            project: header.project,
        };
        if !self.compaction_fits(group, &block) {
            error!("foreign block {} would not survive compaction, dropped", header.number);
            self.foreign_overflow(group);
            return None;
        }
        match self.blocks.adopt(block) {
            Some(index) => {
                info!("foreign block {} adopted", header.number);
                Some(index)
            }
            None => {
                error!("foreign block table full, block {} dropped", header.number);
                self.foreign_overflow(group);
                None
            }
        }
    }

    fn foreign_overflow(&mut self, group: u8) {
        let g = &mut self.groups[group as usize];
        if !g.foreign_overflow {
            g.foreign_overflow = true;
            self.fault(RuntimeFault::ForeignTableFull);
        }
    }

    /// Check that one copy of every block of `group`, plus `extra`, fits the
    /// smallest cluster of the group next to the separator and reserved area
    fn compaction_fits(&self, group: u8, extra: &BlockConfig) -> bool {
        let layout = &self.config.layout;
        let cfg = &self.config.groups[group as usize];
        let Some(smallest) = cfg.clusters.iter().map(|c| c.length).min() else {
            return false;
        };
        let needed = self
            .blocks
            .in_group(group)
            .map(|i| self.config.block_footprint(self.blocks.descriptor(i)))
            .fold(self.config.block_footprint(extra), u32::saturating_add)
            .saturating_add(layout.cluster_record_len() + layout.block_record_len())
            .saturating_add(cfg.reserved);
        needed <= smallest
    }
}
