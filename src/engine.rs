//! The discrete-event simulation engine.
//!
//! One run flattens the workload into per-transfer state, precomputes every
//! route, builds a start-time queue and the dependency checkpoints, then
//! marches time forward one timestep at a time: activate ready transfers,
//! compute per-transfer bandwidth under contention, advance byte counters,
//! complete checkpoints, and record statistics. A run either drains every
//! transfer or trips the global cycle cap.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::config::SimConfig;
use crate::coord::{Cycle, MESH_DEVICE, NocDestination, NocType};
use crate::dependency::{CheckpointId, DependencyTracker};
use crate::device::{DeviceModel, build_device_model};
use crate::error::{MAX_CYCLE_LIMIT, SimError, SimResult};
use crate::stats::{SimStats, update_simulation_stats};
use crate::timeline;
use crate::topology::{LinkType, Route};
use crate::workload::{TransferGroupId, TransferId, Workload, WorkloadTransfer};

// Depending on the n-2 transfer in a source NIU's queue roughly approximates
// the hardware's two virtual channels.
const NIU_SERIALIZATION_STRIDE: usize = 2;

const ETH_HOP_CYCLE_DELAY_BASE: Cycle = 600;
const ETH_HOP_CYCLE_DELAY_PER_BYTE: f32 = 0.1055;

// ---------------------------------------------------------------------------
// TransferState
// ---------------------------------------------------------------------------

/// Mutable runtime state of one transfer; created once per run from the
/// workload and mutated only by the engine.
#[derive(Debug, Clone)]
pub struct TransferState {
    /// Immutable snapshot of the workload transfer.
    pub params: WorkloadTransfer,
    /// Precomputed link-by-link path.
    pub route: Route,
    /// Checkpoints this transfer completes toward.
    pub required_by: Vec<CheckpointId>,
    /// Checkpoint gating activation, if any.
    pub depends_on: Option<CheckpointId>,
    pub start_cycle: Cycle,
    /// Zero until the transfer completes.
    pub end_cycle: Cycle,
    /// Bytes/cycle granted for the current timestep.
    pub curr_bandwidth: f32,
    pub total_bytes_transferred: u64,
}

impl TransferState {
    pub fn new(params: WorkloadTransfer, start_cycle: Cycle, route: Route) -> Self {
        TransferState {
            params,
            route,
            required_by: Vec::new(),
            depends_on: None,
            start_cycle,
            end_cycle: 0,
            curr_bandwidth: 0.0,
            total_bytes_transferred: 0,
        }
    }

    fn complete(&self) -> bool {
        self.total_bytes_transferred == self.params.total_bytes
    }
}

/// Bucket discriminator for NIU serialization: the first link a transfer
/// takes, or a synthetic local bucket when it never enters the NoC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FirstHop {
    Link(LinkType),
    LocalNoc0,
    LocalNoc1,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    model: Box<dyn DeviceModel>,
}

impl Engine {
    pub fn new(cfg: &SimConfig) -> SimResult<Self> {
        cfg.validate()?;
        Ok(Engine { model: build_device_model(&cfg.device_name)? })
    }

    pub fn model(&self) -> &dyn DeviceModel {
        self.model.as_ref()
    }

    /// Preprocesses and validates the workload, then runs the estimation.
    pub fn run(&self, mut workload: Workload, cfg: &SimConfig) -> SimResult<SimStats> {
        if cfg.infer_injection_rate_from_src {
            workload.infer_injection_rates(self.model());
        }
        if cfg.scale_workload_schedule != 0.0 {
            workload.scale_workload_schedule(cfg.scale_workload_schedule);
        }
        if cfg.remove_localized_unicast_transfers {
            workload = workload.remove_local_unicast_transfers();
        }
        if !workload.validate(self.model()) {
            return Err(SimError::WorkloadValidationFailed);
        }
        self.run_perf_estimation(&workload, cfg)
    }

    /// Runs the estimation; with `estimate_cong_impact` set, a second
    /// congestion-free pass fills in `estimated_cong_free_cycles`.
    pub fn run_perf_estimation(&self, workload: &Workload, cfg: &SimConfig) -> SimResult<SimStats> {
        if !cfg.estimate_cong_impact {
            return self.run_single_sim(workload, cfg, true);
        }

        let mut stats = self.run_single_sim(workload, cfg, true)?;

        let mut cong_free_cfg = cfg.clone();
        cong_free_cfg.congestion_model_name = "none".to_string();
        cong_free_cfg.emit_timeline_file = false;
        match self.run_single_sim(workload, &cong_free_cfg, false) {
            Ok(cong_free_stats) => {
                for (device_id, device_stats) in stats.per_device.iter_mut() {
                    if let Some(cf) = cong_free_stats.per_device.get(device_id) {
                        device_stats.estimated_cong_free_cycles = cf.estimated_cycles;
                    }
                }
            }
            Err(err) => {
                warn!("congestion-free pass failed ({err}); reporting congested stats only");
            }
        }
        Ok(stats)
    }

    //------ setup ------------------------------------------------------------

    fn init_transfer_state(&self, workload: &Workload) -> Vec<TransferState> {
        let mut transfer_state = Vec::with_capacity(workload.num_transfers());
        for phase in workload.phases() {
            for transfer in &phase.transfers {
                debug_assert_eq!(transfer.id(), transfer_state.len());
                // all phases start at cycle 0
                transfer_state.push(TransferState::new(
                    transfer.clone(),
                    transfer.phase_cycle_offset,
                    self.model.route(transfer.noc_type, transfer.src, &transfer.dst),
                ));
            }
        }
        transfer_state
    }

    /// Builds the dispatch queue, sorted descending by `(start_cycle, id)` so
    /// the main loop pops ready transfers off the tail.
    fn create_transfer_queue(transfer_state: &[TransferState]) -> Vec<(Cycle, TransferId)> {
        let mut queue: Vec<(Cycle, TransferId)> = transfer_state
            .iter()
            .map(|t| (t.params.phase_cycle_offset, t.params.id()))
            .collect();
        queue.sort_by(|lhs, rhs| rhs.cmp(lhs));
        queue
    }

    /// Creates the checkpoint graph: stride-2 serialization of transfers
    /// sharing an injection port, plus transfer-group chains with ethernet
    /// hop delays. Self-validates, then rewinds the tracker for simulation.
    pub(crate) fn gen_dependencies(
        &self,
        transfer_state: &mut [TransferState],
    ) -> SimResult<DependencyTracker> {
        let mut dep_tracker = DependencyTracker::default();

        let mut bucketed: BTreeMap<(NocType, i16, i16, FirstHop), Vec<TransferId>> =
            BTreeMap::new();
        for transfer in transfer_state.iter() {
            let first_hop = match transfer.route.first() {
                Some(&link_id) => FirstHop::Link(self.model.link_attr(link_id).link_type),
                None => match transfer.params.noc_type {
                    NocType::Noc0 => FirstHop::LocalNoc0,
                    NocType::Noc1 => FirstHop::LocalNoc1,
                },
            };
            let key = (
                transfer.params.noc_type,
                transfer.params.src.row,
                transfer.params.src.col,
                first_hop,
            );
            bucketed.entry(key).or_default().push(transfer.params.id());
        }

        for transfers in bucketed.values_mut() {
            transfers.sort_by_key(|&id| transfer_state[id].start_cycle);
            for i in NIU_SERIALIZATION_STRIDE..transfers.len() {
                let checkpoint = dep_tracker.create_checkpoint(1, 0);
                transfer_state[transfers[i]].depends_on = Some(checkpoint);
                transfer_state[transfers[i - NIU_SERIALIZATION_STRIDE]]
                    .required_by
                    .push(checkpoint);
            }
        }

        // serialize transfer groups: each segment waits for its predecessor,
        // plus an ethernet hop delay when the chain crosses chips
        let mut group_member_ids: HashMap<(TransferGroupId, u32), TransferId> = HashMap::new();
        for transfer in transfer_state.iter() {
            if let (Some(group_id), Some(index)) =
                (transfer.params.transfer_group_id, transfer.params.transfer_group_index)
            {
                group_member_ids.insert((group_id, index), transfer.params.id());
            }
        }

        for id in 0..transfer_state.len() {
            let params = &transfer_state[id].params;
            let (Some(group_id), Some(index)) =
                (params.transfer_group_id, params.transfer_group_index)
            else {
                continue;
            };
            if index == 0 {
                continue;
            }
            let Some(&parent_id) = group_member_ids.get(&(group_id, index - 1)) else {
                error!("transfer group {group_id} is missing segment {}", index - 1);
                return Err(SimError::DependencyGenFailed(format!(
                    "transfer group {group_id} has no segment {}",
                    index - 1
                )));
            };

            let dst_coord = match &params.dst {
                NocDestination::Unicast(c) => *c,
                NocDestination::Multicast(m) => m.rects[0].start,
            };
            let mut checkpoint_delay =
                self.model.write_latency(params.src, dst_coord, params.noc_type);
            // ethernet hop cost applies only when this segment changed chips
            if params.src.device_id != transfer_state[parent_id].params.src.device_id {
                checkpoint_delay += ETH_HOP_CYCLE_DELAY_BASE
                    + (ETH_HOP_CYCLE_DELAY_PER_BYTE * params.packet_size as f32) as Cycle;
            }

            let checkpoint = dep_tracker.create_checkpoint(1, checkpoint_delay);
            transfer_state[id].depends_on = Some(checkpoint);
            transfer_state[parent_id].required_by.push(checkpoint);
        }

        // every checkpoint must be completable exactly by the required_by sets
        for transfer in transfer_state.iter() {
            for &checkpoint in &transfer.required_by {
                dep_tracker.update(checkpoint, 0);
            }
        }
        if !dep_tracker.sanity_check() || !dep_tracker.all_complete() {
            return Err(SimError::DependencyGenFailed(
                "checkpoint dependency counts are inconsistent".to_string(),
            ));
        }
        dep_tracker.reset();

        Ok(dep_tracker)
    }

    //------ main loop --------------------------------------------------------

    fn run_single_sim(
        &self,
        workload: &Workload,
        cfg: &SimConfig,
        timeline_pass: bool,
    ) -> SimResult<SimStats> {
        let sim_start = Instant::now();
        let model = self.model();
        let cycles_per_timestep = cfg.cycles_per_timestep as Cycle;
        let enable_congestion_model = cfg.congestion_enabled();

        let mut stats = SimStats::new(model.device_ids());
        let mut device_state = model.init_device_state();
        let mut transfer_state = self.init_transfer_state(workload);
        let mut transfer_queue = Self::create_transfer_queue(&transfer_state);
        let mut dep_tracker = self.gen_dependencies(&mut transfer_state)?;

        let link_bandwidth = model.link_bandwidth(0) as f64;
        let mut live_transfer_ids: Vec<TransferId> = Vec::with_capacity(transfer_state.len());

        let mut curr_cycle = cycles_per_timestep;
        loop {
            let start_of_timestep = curr_cycle - cycles_per_timestep;
            let prev_start_of_timestep = start_of_timestep.checked_sub(cycles_per_timestep);

            stats.insert_timestep(start_of_timestep, curr_cycle);

            // activate transfers whose start time has arrived and whose
            // gating checkpoint (if any) is done
            let mut activated = 0usize;
            let mut swap_pos = transfer_queue.len();
            let mut i = transfer_queue.len();
            while i > 0 {
                i -= 1;
                if transfer_queue[i].0 > curr_cycle {
                    break;
                }
                let id = transfer_queue[i].1;
                if dep_tracker.done(transfer_state[id].depends_on, curr_cycle) {
                    live_transfer_ids.push(id);
                    // a defined checkpoint pushes the start past its completion
                    if let Some(checkpoint) = transfer_state[id].depends_on {
                        transfer_state[id].start_cycle = transfer_state[id]
                            .start_cycle
                            .max(dep_tracker.end_cycle_plus_delay(checkpoint));
                    }
                    swap_pos -= 1;
                    transfer_queue.swap(swap_pos, i);
                    activated += 1;
                }
            }
            transfer_queue.truncate(transfer_queue.len() - activated);

            // the mesh entry tracks the live set for the timeline
            stats.mesh_mut().per_timestep_stats.last_mut().expect("timestep just inserted")
                .live_transfer_ids = live_transfer_ids.clone();

            model.compute_current_transfer_rate(
                start_of_timestep,
                curr_cycle,
                &mut transfer_state,
                &live_transfer_ids,
                &mut device_state,
                enable_congestion_model,
            );

            for (&device_id, device_stats) in stats.per_device.iter_mut() {
                let ts = device_stats
                    .per_timestep_stats
                    .last_mut()
                    .expect("timestep just inserted");
                update_simulation_stats(model, device_id, &device_state, ts, link_bandwidth);
            }

            // advance byte counters for all live transfers
            for &ltid in &live_transfer_ids {
                let lt = &mut transfer_state[ltid];
                debug_assert!(dep_tracker.done(lt.depends_on, curr_cycle));

                let remaining_bytes = lt.params.total_bytes - lt.total_bytes_transferred;
                let mut cycles_active = cycles_per_timestep.min(curr_cycle - lt.start_cycle);
                if let (Some(checkpoint), Some(prev_start)) =
                    (lt.depends_on, prev_start_of_timestep)
                {
                    // a checkpoint that landed late in the previous timestep
                    // grants the tail of that timestep as well
                    let dep_end_cycle = dep_tracker.end_cycle(checkpoint);
                    if lt.start_cycle < start_of_timestep
                        && dep_end_cycle >= prev_start
                        && dep_end_cycle < start_of_timestep
                    {
                        let adjusted_start = lt.start_cycle.max(dep_end_cycle);
                        cycles_active = curr_cycle - adjusted_start;
                        debug_assert!(cycles_active >= cycles_per_timestep);
                        debug_assert!(cycles_active <= 2 * cycles_per_timestep);
                    }
                }

                let max_transferrable_bytes =
                    (cycles_active as f64 * lt.curr_bandwidth as f64) as u64;
                let bytes_transferred = remaining_bytes.min(max_transferrable_bytes);
                lt.total_bytes_transferred += bytes_transferred;

                if lt.complete() {
                    let cycles_transferring =
                        (bytes_transferred as f64 / lt.curr_bandwidth as f64).ceil() as Cycle;
                    // the transfer may start and end within a single timestep
                    let transfer_start_within_timestep =
                        lt.start_cycle.max(start_of_timestep);
                    lt.end_cycle = transfer_start_within_timestep + cycles_transferring;

                    for &checkpoint in &lt.required_by {
                        dep_tracker.update(checkpoint, lt.end_cycle);
                    }
                }
            }

            live_transfer_ids.retain(|&id| !transfer_state[id].complete());

            if live_transfer_ids.is_empty() && transfer_queue.is_empty() {
                if !dep_tracker.sanity_check() || !dep_tracker.all_complete() {
                    error!("some transfer dependencies left unsatisfied at end of sim");
                }
                break;
            }
            if curr_cycle > MAX_CYCLE_LIMIT {
                return Err(SimError::ExceededSimCycleLimit);
            }
            curr_cycle += cycles_per_timestep;
        }

        self.finalize_stats(
            &mut stats,
            workload,
            &transfer_state,
            cycles_per_timestep,
            sim_start.elapsed().as_micros() as u64,
        );

        if timeline_pass && cfg.emit_timeline_file {
            match timeline::emit_timeline_file(cfg, model, workload, &transfer_state, stats.mesh())
            {
                Ok(path) => debug!("timeline written to {}", path.display()),
                Err(err) => warn!("failed to write timeline file: {err}"),
            }
        }

        Ok(stats)
    }

    /// Per-device golden windows decide which transfers count toward the
    /// estimate; per-timestep stats are trimmed to the estimated span.
    fn finalize_stats(
        &self,
        stats: &mut SimStats,
        workload: &Workload,
        transfer_state: &[TransferState],
        cycles_per_timestep: Cycle,
        wallclock_us: u64,
    ) {
        for (&device_id, device_stats) in stats.per_device.iter_mut() {
            device_stats.completed = true;
            device_stats.wallclock_runtime_us = wallclock_us;
            device_stats.golden_cycles = workload.device_golden_cycles(device_id);

            let (golden_start, golden_end) = workload.golden_window(device_id);
            let mut worst_case_end_cycle: Cycle = 0;
            for transfer in transfer_state {
                let offset = transfer.params.phase_cycle_offset;
                let on_device = device_id == MESH_DEVICE
                    || transfer.params.src.device_id == device_id;
                if golden_start <= offset && offset <= golden_end && on_device {
                    worst_case_end_cycle = worst_case_end_cycle.max(transfer.end_cycle);
                }
            }
            device_stats.estimated_cycles = worst_case_end_cycle;

            let len = device_stats.per_timestep_stats.len();
            let start_idx = ((golden_start / cycles_per_timestep) as usize).min(len);
            let end_idx = ((worst_case_end_cycle.div_ceil(cycles_per_timestep)) as usize)
                .clamp(start_idx, len);
            device_stats.per_timestep_stats =
                device_stats.per_timestep_stats[start_idx..end_idx].to_vec();
        }

        for device_stats in stats.per_device.values_mut() {
            device_stats.compute_summary_stats(workload, self.model());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coord;
    use crate::workload::WorkloadPhase;

    fn config(device: &str) -> SimConfig {
        SimConfig {
            device_name: device.to_string(),
            estimate_cong_impact: false,
            ..Default::default()
        }
    }

    fn unicast_transfer(
        bytes: u32,
        packets: u32,
        src: Coord,
        dst: Coord,
        noc: NocType,
    ) -> WorkloadTransfer {
        WorkloadTransfer::new(
            bytes,
            packets,
            src,
            NocDestination::Unicast(dst),
            28.1,
            0,
            noc,
            "",
        )
    }

    fn single_transfer_workload() -> Workload {
        let mut wl = Workload::new();
        wl.add_phase(WorkloadPhase::new(vec![unicast_transfer(
                2048,
                1,
                Coord::new(0, 1, 1),
                Coord::new(0, 1, 5),
                NocType::Noc1,
            )]));
        wl
    }

    #[test]
    fn single_unicast_completes_in_expected_cycle_range() {
        let cfg = config("wormhole_b0");
        let engine = Engine::new(&cfg).unwrap();
        let stats = engine.run(single_transfer_workload(), &cfg).unwrap();

        let device = &stats.per_device[&0];
        assert!(device.completed);
        // 2048 bytes at ~28.1 B/cycle is ~73 cycles of pure transfer time
        assert!(
            device.estimated_cycles >= 60 && device.estimated_cycles <= 150,
            "estimated {} cycles",
            device.estimated_cycles
        );
    }

    #[test]
    fn congestion_free_run_matches_shape() {
        let mut cfg = config("wormhole_b0");
        cfg.congestion_model_name = "none".to_string();
        let engine = Engine::new(&cfg).unwrap();
        let stats = engine.run(single_transfer_workload(), &cfg).unwrap();
        assert!(stats.per_device[&0].completed);
        assert!(stats.per_device[&0].estimated_cycles > 0);
    }

    #[test]
    fn congestion_impact_pass_fills_cong_free_cycles() {
        let mut cfg = config("wormhole_b0");
        cfg.estimate_cong_impact = true;
        let engine = Engine::new(&cfg).unwrap();
        let stats = engine.run(single_transfer_workload(), &cfg).unwrap();
        assert!(stats.per_device[&0].estimated_cong_free_cycles > 0);
        // uncontended workload: congestion changes nothing
        assert_eq!(
            stats.per_device[&0].estimated_cycles,
            stats.per_device[&0].estimated_cong_free_cycles,
        );
    }

    #[test]
    fn repeated_runs_are_deterministic() {
        let cfg = config("wormhole_b0");
        let engine = Engine::new(&cfg).unwrap();

        let mut wl = Workload::new();
        let mut transfers = Vec::new();
        for row in 1..5i16 {
            for col in 1..5i16 {
                let mut t = unicast_transfer(
                    4096,
                    8,
                    Coord::new(0, row, col),
                    Coord::new(0, ((row + 3) % 12).max(1), ((col + 5) % 10).max(1)),
                    if (row + col) % 2 == 0 { NocType::Noc0 } else { NocType::Noc1 },
                );
                t.phase_cycle_offset = (row as u64) * 37 + (col as u64) * 11;
                transfers.push(t);
            }
        }
        wl.add_phase(WorkloadPhase::new(transfers));

        let a = engine.run(wl.clone(), &cfg).unwrap();
        let b = engine.run(wl, &cfg).unwrap();
        for (dev, da) in &a.per_device {
            let db = &b.per_device[dev];
            assert_eq!(da.estimated_cycles, db.estimated_cycles);
            assert_eq!(da.num_timesteps, db.num_timesteps);
            assert_eq!(da.overall_avg_link_demand.to_bits(), db.overall_avg_link_demand.to_bits());
            assert_eq!(da.overall_max_niu_demand.to_bits(), db.overall_max_niu_demand.to_bits());
        }
    }

    #[test]
    fn oversized_workload_hits_cycle_cap() {
        let mut cfg = config("wormhole_b0");
        cfg.congestion_model_name = "none".to_string();
        cfg.cycles_per_timestep = 10_000;
        let engine = Engine::new(&cfg).unwrap();

        let mut wl = Workload::new();
        let transfers = (0..1000)
            .map(|_| {
                unicast_transfer(
                    100_000,
                    100_000,
                    Coord::new(0, 1, 1),
                    Coord::new(0, 1, 5),
                    NocType::Noc1,
                )
            })
            .collect();
        wl.add_phase(WorkloadPhase::new(transfers));

        assert!(matches!(
            engine.run(wl, &cfg),
            Err(SimError::ExceededSimCycleLimit)
        ));
    }

    #[test]
    fn niu_serialization_uses_stride_two() {
        let cfg = config("wormhole_b0");
        let engine = Engine::new(&cfg).unwrap();

        // four identical transfers out of one NIU and first link
        let mut wl = Workload::new();
        let transfers = (0..4)
            .map(|_| {
                unicast_transfer(
                    8192,
                    1,
                    Coord::new(0, 1, 1),
                    Coord::new(0, 1, 5),
                    NocType::Noc0,
                )
            })
            .collect();
        wl.add_phase(WorkloadPhase::new(transfers));

        let mut transfer_state = engine.init_transfer_state(&wl);
        let tracker = engine.gen_dependencies(&mut transfer_state).unwrap();
        assert_eq!(tracker.len(), 2);

        // index 2 depends on 0, index 3 depends on 1
        assert!(transfer_state[0].depends_on.is_none());
        assert!(transfer_state[1].depends_on.is_none());
        let cp2 = transfer_state[2].depends_on.unwrap();
        let cp3 = transfer_state[3].depends_on.unwrap();
        assert_eq!(transfer_state[0].required_by, vec![cp2]);
        assert_eq!(transfer_state[1].required_by, vec![cp3]);

        // and after a full run, the dependents start after their parents end
        let stats = engine.run(wl, &cfg).unwrap();
        assert!(stats.per_device[&0].completed);
    }

    #[test]
    fn serialized_transfers_start_after_their_parent_completes() {
        let cfg = config("wormhole_b0");
        let engine = Engine::new(&cfg).unwrap();

        let mut wl = Workload::new();
        let transfers = (0..4)
            .map(|_| {
                unicast_transfer(
                    8192,
                    1,
                    Coord::new(0, 1, 1),
                    Coord::new(0, 1, 5),
                    NocType::Noc0,
                )
            })
            .collect();
        wl.add_phase(WorkloadPhase::new(transfers));

        // replicate the run manually to inspect final transfer state
        let mut transfer_state = engine.init_transfer_state(&wl);
        let mut dep_tracker = engine.gen_dependencies(&mut transfer_state).unwrap();
        let model = engine.model();
        let mut device_state = model.init_device_state();
        let mut queue = Engine::create_transfer_queue(&transfer_state);
        let mut live: Vec<TransferId> = Vec::new();
        let mut curr: Cycle = 256;
        while !(queue.is_empty() && live.is_empty()) {
            let t0 = curr - 256;
            let mut i = queue.len();
            let mut swap_pos = queue.len();
            let mut activated = 0;
            while i > 0 {
                i -= 1;
                if queue[i].0 > curr {
                    break;
                }
                let id = queue[i].1;
                if dep_tracker.done(transfer_state[id].depends_on, curr) {
                    live.push(id);
                    if let Some(cp) = transfer_state[id].depends_on {
                        transfer_state[id].start_cycle = transfer_state[id]
                            .start_cycle
                            .max(dep_tracker.end_cycle_plus_delay(cp));
                    }
                    swap_pos -= 1;
                    queue.swap(swap_pos, i);
                    activated += 1;
                }
            }
            queue.truncate(queue.len() - activated);
            model.compute_current_transfer_rate(
                t0,
                curr,
                &mut transfer_state,
                &live,
                &mut device_state,
                true,
            );
            for &id in &live {
                let lt = &mut transfer_state[id];
                let remaining = lt.params.total_bytes - lt.total_bytes_transferred;
                let cycles_active = 256u64.min(curr - lt.start_cycle);
                let bytes = remaining.min((cycles_active as f64 * lt.curr_bandwidth as f64) as u64);
                lt.total_bytes_transferred += bytes;
                if lt.complete() {
                    lt.end_cycle = lt.start_cycle.max(t0)
                        + (bytes as f64 / lt.curr_bandwidth as f64).ceil() as Cycle;
                    for &cp in &lt.required_by {
                        dep_tracker.update(cp, lt.end_cycle);
                    }
                }
            }
            live.retain(|&id| !transfer_state[id].complete());
            curr += 256;
            assert!(curr < 1_000_000);
        }

        assert!(transfer_state[2].start_cycle >= transfer_state[0].end_cycle);
        assert!(transfer_state[3].start_cycle >= transfer_state[1].end_cycle);
    }

    #[test]
    fn transfer_group_chains_serialize_across_chips() {
        let cfg = config("T3K");
        let engine = Engine::new(&cfg).unwrap();

        let mut wl = Workload::new();
        let group = wl.register_transfer_group();
        let hop0 = unicast_transfer(
            4096,
            1,
            Coord::new(0, 1, 1),
            Coord::new(0, 0, 1),
            NocType::Noc0,
        )
        .with_transfer_group(group, 0);
        let hop1 = unicast_transfer(
            4096,
            1,
            Coord::new(1, 0, 1),
            Coord::new(1, 3, 3),
            NocType::Noc0,
        )
        .with_transfer_group(group, 1);
        wl.add_phase(WorkloadPhase::new(vec![hop0, hop1]));

        let mut transfer_state = engine.init_transfer_state(&wl);
        let tracker = engine.gen_dependencies(&mut transfer_state).unwrap();
        assert_eq!(tracker.len(), 1);
        let checkpoint = transfer_state[1].depends_on.unwrap();
        assert_eq!(transfer_state[0].required_by, vec![checkpoint]);
        // cross-chip hop carries the ethernet delay on top of write latency
        let eth_delay = 600 + (0.1055f32 * 4096.0) as Cycle;
        assert!(tracker.end_cycle_plus_delay(checkpoint) >= eth_delay);

        let stats = engine.run(wl, &cfg).unwrap();
        assert!(stats.per_device[&0].completed);
        assert!(stats.per_device[&1].estimated_cycles > stats.per_device[&0].estimated_cycles);
    }

    #[test]
    fn missing_transfer_group_segment_fails_dependency_generation() {
        let cfg = config("wormhole_b0");
        let engine = Engine::new(&cfg).unwrap();

        let mut wl = Workload::new();
        let group = wl.register_transfer_group();
        let orphan = unicast_transfer(
            1024,
            1,
            Coord::new(0, 1, 1),
            Coord::new(0, 1, 5),
            NocType::Noc0,
        )
        .with_transfer_group(group, 3);
        wl.add_phase(WorkloadPhase::new(vec![orphan]));

        let mut transfer_state = engine.init_transfer_state(&wl);
        assert!(matches!(
            engine.gen_dependencies(&mut transfer_state),
            Err(SimError::DependencyGenFailed(_))
        ));
    }

    #[test]
    fn local_transfers_still_complete() {
        let cfg = config("wormhole_b0");
        let engine = Engine::new(&cfg).unwrap();
        let mut wl = Workload::new();
        wl.add_phase(WorkloadPhase::new(vec![unicast_transfer(
                1024,
                1,
                Coord::new(0, 3, 3),
                Coord::new(0, 3, 3),
                NocType::Noc0,
            )]));
        let stats = engine.run(wl, &cfg).unwrap();
        assert!(stats.per_device[&0].completed);
        assert!(stats.per_device[&0].estimated_cycles > 0);
    }

    #[test]
    fn byte_counters_respect_totals() {
        let cfg = config("wormhole_b0");
        let engine = Engine::new(&cfg).unwrap();
        let mut wl = Workload::new();
        let transfers = (0..8)
            .map(|i: i16| {
                unicast_transfer(
                    2048,
                    16,
                    Coord::new(0, 1 + (i % 4), 1),
                    Coord::new(0, 1 + (i % 4), 7),
                    NocType::Noc0,
                )
            })
            .collect();
        wl.add_phase(WorkloadPhase::new(transfers));

        let mut transfer_state = engine.init_transfer_state(&wl);
        engine.gen_dependencies(&mut transfer_state).unwrap();
        // fresh state: nothing transferred yet and never above total
        for t in &transfer_state {
            assert!(t.total_bytes_transferred <= t.params.total_bytes);
        }
        let stats = engine.run(wl, &cfg).unwrap();
        assert!(stats.per_device[&0].completed);
    }
}
