//! Workload data model: transfers grouped into phases, plus validation and
//! the preprocessing passes (injection-rate inference, schedule scaling,
//! local-transfer removal).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::coord::{BytesPerCycle, Coord, Cycle, DeviceId, NocDestination, NocType};
use crate::device::DeviceModel;

pub type PhaseId = i32;
/// Index into the engine's flat transfer vectors; assigned by the workload.
pub type TransferId = usize;
pub type TransferGroupId = i32;

const UNASSIGNED_ID: TransferId = TransferId::MAX;

// ---------------------------------------------------------------------------
// WorkloadTransfer
// ---------------------------------------------------------------------------

/// One logical data movement. Immutable once the workload is built.
#[derive(Debug, Clone)]
pub struct WorkloadTransfer {
    pub packet_size: u32,
    pub num_packets: u32,
    pub src: Coord,
    pub dst: NocDestination,
    /// Bytes/cycle the source can inject; 0 means "infer from src core type".
    pub injection_rate: BytesPerCycle,
    /// Earliest allowed start, relative to the beginning of the phase.
    pub phase_cycle_offset: Cycle,
    pub noc_type: NocType,
    /// Opaque event tag carried through to the timeline output.
    pub noc_event_type: String,
    pub total_bytes: u64,
    /// Set when this transfer is one segment of a multichip/fabric send; the
    /// segment at `transfer_group_index - 1` is its parent.
    pub transfer_group_id: Option<TransferGroupId>,
    pub transfer_group_index: Option<u32>,
    phase_id: PhaseId,
    id: TransferId,
}

impl WorkloadTransfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        packet_size: u32,
        num_packets: u32,
        src: Coord,
        dst: NocDestination,
        injection_rate: BytesPerCycle,
        phase_cycle_offset: Cycle,
        noc_type: NocType,
        noc_event_type: &str,
    ) -> Self {
        WorkloadTransfer {
            packet_size,
            num_packets,
            src,
            dst,
            injection_rate,
            phase_cycle_offset,
            noc_type,
            noc_event_type: noc_event_type.to_string(),
            total_bytes: packet_size as u64 * num_packets as u64,
            transfer_group_id: None,
            transfer_group_index: None,
            phase_id: -1,
            id: UNASSIGNED_ID,
        }
    }

    pub fn with_transfer_group(mut self, group_id: TransferGroupId, index: u32) -> Self {
        self.transfer_group_id = Some(group_id);
        self.transfer_group_index = Some(index);
        self
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn phase_id(&self) -> PhaseId {
        self.phase_id
    }

    /// True when this is a unicast whose destination equals its source:
    /// pure latency, no NoC traffic.
    pub fn is_local_unicast(&self) -> bool {
        matches!(&self.dst, NocDestination::Unicast(dst) if *dst == self.src)
    }

    fn validate(&self, model: &dyn DeviceModel) -> bool {
        let rows = model.rows() as i16;
        let cols = model.cols() as i16;
        let coord_ok = |c: &Coord| {
            c.row >= 0
                && c.row < rows
                && c.col >= 0
                && c.col < cols
                && model.is_valid_device_id(c.device_id)
        };

        let valid_num_packets = self.num_packets > 0;
        let valid_packet_size = self.packet_size > 0;
        let valid_src = coord_ok(&self.src);
        let valid_dst = match &self.dst {
            NocDestination::Unicast(dst) => coord_ok(dst) && dst.device_id == self.src.device_id,
            NocDestination::Multicast(mcast) => {
                !mcast.rects.is_empty()
                    && mcast.rects.iter().all(|r| {
                        coord_ok(&r.start)
                            && coord_ok(&r.end)
                            && r.start.device_id == r.end.device_id
                            && r.start.row <= r.end.row
                            && r.start.col <= r.end.col
                    })
            }
        };

        let valid = valid_num_packets && valid_packet_size && valid_src && valid_dst;
        if !valid {
            error!(
                "workload validation: transfer #{} is invalid: {}{}{}{}",
                self.id,
                if valid_num_packets { "" } else { "INVALID_NUM_PACKETS " },
                if valid_packet_size { "" } else { "INVALID_PACKET_SIZE " },
                if valid_src { "" } else { "INVALID_SRC " },
                if valid_dst { "" } else { "INVALID_DST " },
            );
        }
        valid
    }
}

// ---------------------------------------------------------------------------
// WorkloadPhase / Workload
// ---------------------------------------------------------------------------

/// An ordered list of transfers with no mutual dependency.
#[derive(Debug, Clone)]
pub struct WorkloadPhase {
    pub transfers: Vec<WorkloadTransfer>,
    id: PhaseId,
}

impl WorkloadPhase {
    pub fn new(transfers: Vec<WorkloadTransfer>) -> Self {
        WorkloadPhase { transfers, id: -1 }
    }

    pub fn id(&self) -> PhaseId {
        self.id
    }
}

impl Default for WorkloadPhase {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// The complete simulation input: phases of transfers plus the golden
/// (hardware-observed) cycle reference used for error reporting.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    phases: Vec<WorkloadPhase>,
    next_transfer_id: TransferId,
    num_transfer_groups: TransferGroupId,
    golden_cycles: Cycle,
    /// Per-device span of event offsets, recorded by trace ingest.
    golden_windows: HashMap<DeviceId, (Cycle, Cycle)>,
    source_filepath: Option<PathBuf>,
}

impl Workload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a phase, assigning its ID and monotonic transfer IDs.
    pub fn add_phase(&mut self, mut phase: WorkloadPhase) -> PhaseId {
        let phase_id = self.phases.len() as PhaseId;
        phase.id = phase_id;
        for transfer in &mut phase.transfers {
            transfer.phase_id = phase_id;
            transfer.id = self.next_transfer_id;
            self.next_transfer_id += 1;
        }
        self.phases.push(phase);
        phase_id
    }

    pub fn phases(&self) -> &[WorkloadPhase] {
        &self.phases
    }

    pub fn num_transfers(&self) -> usize {
        self.next_transfer_id
    }

    pub fn transfers(&self) -> impl Iterator<Item = &WorkloadTransfer> {
        self.phases.iter().flat_map(|ph| ph.transfers.iter())
    }

    /// Allocates a fresh transfer-group ID for a chain of fabric segments.
    pub fn register_transfer_group(&mut self) -> TransferGroupId {
        let id = self.num_transfer_groups;
        self.num_transfer_groups += 1;
        id
    }

    pub fn num_transfer_groups(&self) -> TransferGroupId {
        self.num_transfer_groups
    }

    //------ golden reference -------------------------------------------------

    pub fn set_golden_cycles(&mut self, cycles: Cycle) {
        self.golden_cycles = cycles;
    }

    pub fn golden_cycles(&self) -> Cycle {
        self.golden_cycles
    }

    pub fn set_golden_window(&mut self, device_id: DeviceId, window: (Cycle, Cycle)) {
        self.golden_windows.insert(device_id, window);
    }

    /// Offset window whose transfers count toward a device's estimate;
    /// unbounded when no trace-derived window exists.
    pub fn golden_window(&self, device_id: DeviceId) -> (Cycle, Cycle) {
        self.golden_windows
            .get(&device_id)
            .copied()
            .unwrap_or((0, Cycle::MAX))
    }

    /// Golden cycle count for one device. Trace-derived windows subtract the
    /// ~20-cycle overhead between the last noc event and the kernel end
    /// timestamp; otherwise the workload-global golden count applies.
    pub fn device_golden_cycles(&self, device_id: DeviceId) -> Cycle {
        match self.golden_windows.get(&device_id) {
            Some(&(start, end)) => (end - start).saturating_sub(20),
            None => self.golden_cycles,
        }
    }

    //------ source file ------------------------------------------------------

    pub fn set_source_filepath(&mut self, path: &Path) {
        self.source_filepath = Some(path.to_path_buf());
    }

    pub fn source_filepath(&self) -> Option<&Path> {
        self.source_filepath.as_deref()
    }

    //------ validation & preprocessing ---------------------------------------

    /// True when every phase and transfer passes the sanity checks; every
    /// offender is logged.
    pub fn validate(&self, model: &dyn DeviceModel) -> bool {
        let mut phase_id_seen = vec![false; self.phases.len()];
        let mut transfer_id_seen = vec![false; self.next_transfer_id];

        let mut errors = 0usize;
        for phase in &self.phases {
            if phase.id < 0 || phase.id as usize >= self.phases.len() {
                error!("workload validation: phase {} has out-of-range ID", phase.id);
                errors += 1;
                continue;
            } else if phase_id_seen[phase.id as usize] {
                error!("workload validation: phase {} has repeated ID", phase.id);
                errors += 1;
                continue;
            }
            phase_id_seen[phase.id as usize] = true;

            for transfer in &phase.transfers {
                if transfer.id >= self.next_transfer_id {
                    error!(
                        "workload validation: transfer {} has out-of-range ID",
                        transfer.id
                    );
                    errors += 1;
                    continue;
                } else if transfer_id_seen[transfer.id] {
                    error!("workload validation: transfer {} has repeated ID", transfer.id);
                    errors += 1;
                    continue;
                }
                transfer_id_seen[transfer.id] = true;

                if !transfer.validate(model) {
                    errors += 1;
                }
            }
        }
        errors == 0
    }

    /// Replaces each zero injection rate with the source core type's rate.
    /// Idempotent: all rates are non-zero afterwards.
    pub fn infer_injection_rates(&mut self, model: &dyn DeviceModel) {
        for phase in &mut self.phases {
            for transfer in &mut phase.transfers {
                if transfer.injection_rate == 0.0 {
                    transfer.injection_rate = model.src_injection_rate(transfer.src);
                }
            }
        }
    }

    /// Linearly compresses or expands the input timeline.
    pub fn scale_workload_schedule(&mut self, scale_factor: f32) {
        for phase in &mut self.phases {
            for transfer in &mut phase.transfers {
                transfer.phase_cycle_offset =
                    (transfer.phase_cycle_offset as f64 * scale_factor as f64) as Cycle;
            }
        }
    }

    /// Returns a copy without src==dst unicast transfers. IDs are reassigned
    /// densely in the copy.
    pub fn remove_local_unicast_transfers(&self) -> Workload {
        let mut out = Workload {
            golden_cycles: self.golden_cycles,
            golden_windows: self.golden_windows.clone(),
            source_filepath: self.source_filepath.clone(),
            num_transfer_groups: self.num_transfer_groups,
            ..Default::default()
        };
        for phase in &self.phases {
            let kept = phase
                .transfers
                .iter()
                .filter(|t| !t.is_local_unicast())
                .cloned()
                .collect();
            out.add_phase(WorkloadPhase::new(kept));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MulticastCoordSet;
    use crate::wormhole::WormholeB0DeviceModel;

    fn unicast(src: Coord, dst: Coord) -> WorkloadTransfer {
        WorkloadTransfer::new(
            2048,
            1,
            src,
            NocDestination::Unicast(dst),
            28.1,
            0,
            NocType::Noc1,
            "READ",
        )
    }

    fn single_transfer_workload(transfer: WorkloadTransfer) -> Workload {
        let mut wl = Workload::new();
        wl.add_phase(WorkloadPhase::new(vec![transfer]));
        wl
    }

    #[test]
    fn add_phase_assigns_monotonic_ids() {
        let mut wl = Workload::new();
        let t = unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 5));
        wl.add_phase(WorkloadPhase::new(vec![t.clone(), t.clone()]));
        wl.add_phase(WorkloadPhase::new(vec![t]));

        let ids: Vec<TransferId> = wl.transfers().map(|t| t.id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(wl.phases()[1].id(), 1);
        assert_eq!(wl.num_transfers(), 3);
    }

    #[test]
    fn valid_workload_passes() {
        let model = WormholeB0DeviceModel::new();
        let wl = single_transfer_workload(unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 5)));
        assert!(wl.validate(&model));
    }

    #[test]
    fn rejects_out_of_range_src() {
        let model = WormholeB0DeviceModel::new();
        let wl = single_transfer_workload(unicast(Coord::new(0, 1, 100), Coord::new(0, 1, 5)));
        assert!(!wl.validate(&model));
    }

    #[test]
    fn rejects_out_of_range_dst() {
        let model = WormholeB0DeviceModel::new();
        let wl = single_transfer_workload(unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 100)));
        assert!(!wl.validate(&model));
    }

    #[test]
    fn rejects_zero_num_packets() {
        let model = WormholeB0DeviceModel::new();
        let mut t = unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 5));
        t.num_packets = 0;
        assert!(!single_transfer_workload(t).validate(&model));
    }

    #[test]
    fn rejects_zero_packet_size() {
        let model = WormholeB0DeviceModel::new();
        let mut t = unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 5));
        t.packet_size = 0;
        assert!(!single_transfer_workload(t).validate(&model));
    }

    #[test]
    fn rejects_mismatched_device_ids() {
        let model = WormholeB0DeviceModel::new();
        let wl = single_transfer_workload(unicast(Coord::new(1, 1, 1), Coord::new(2, 1, 5)));
        assert!(!wl.validate(&model));
    }

    #[test]
    fn rejects_unknown_source_device() {
        let model = WormholeB0DeviceModel::new();
        let wl = single_transfer_workload(unicast(Coord::new(100, 1, 1), Coord::new(0, 1, 5)));
        assert!(!wl.validate(&model));
    }

    #[test]
    fn rejects_inverted_multicast_rectangle() {
        let model = WormholeB0DeviceModel::new();
        let t = WorkloadTransfer::new(
            2048,
            1,
            Coord::new(0, 5, 5),
            NocDestination::Multicast(MulticastCoordSet::new(
                Coord::new(0, 4, 4),
                Coord::new(0, 1, 1),
            )),
            28.1,
            0,
            NocType::Noc0,
            "WRITE_MULTICAST",
        );
        assert!(!single_transfer_workload(t).validate(&model));
    }

    #[test]
    fn inference_fills_only_zero_rates_and_is_idempotent() {
        let model = WormholeB0DeviceModel::new();
        let mut explicit = unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 5));
        explicit.injection_rate = 12.5;
        let mut inferred = unicast(Coord::new(0, 1, 0), Coord::new(0, 1, 5));
        inferred.injection_rate = 0.0;

        let mut wl = Workload::new();
        wl.add_phase(WorkloadPhase::new(vec![explicit, inferred]));

        wl.infer_injection_rates(&model);
        let rates: Vec<f32> = wl.transfers().map(|t| t.injection_rate).collect();
        assert!((rates[0] - 12.5).abs() < 1e-6);
        assert!((rates[1] - 23.2).abs() < 1e-6); // DRAM core rate

        wl.infer_injection_rates(&model);
        let again: Vec<f32> = wl.transfers().map(|t| t.injection_rate).collect();
        assert_eq!(rates, again);
    }

    #[test]
    fn schedule_scaling_composes_multiplicatively() {
        let mk = || {
            let mut t = unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 5));
            t.phase_cycle_offset = 1000;
            single_transfer_workload(t)
        };

        let mut identity = mk();
        identity.scale_workload_schedule(1.0);
        assert_eq!(identity.transfers().next().unwrap().phase_cycle_offset, 1000);

        let mut chained = mk();
        chained.scale_workload_schedule(2.0);
        chained.scale_workload_schedule(3.0);
        let mut direct = mk();
        direct.scale_workload_schedule(6.0);
        assert_eq!(
            chained.transfers().next().unwrap().phase_cycle_offset,
            direct.transfers().next().unwrap().phase_cycle_offset,
        );
    }

    #[test]
    fn local_unicast_removal_reassigns_ids() {
        let mut wl = Workload::new();
        wl.set_golden_cycles(5000);
        wl.add_phase(WorkloadPhase::new(vec![
                unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 1)), // local
                unicast(Coord::new(0, 1, 1), Coord::new(0, 1, 5)),
                unicast(Coord::new(0, 2, 2), Coord::new(0, 2, 2)), // local
            ]));

        let pruned = wl.remove_local_unicast_transfers();
        assert_eq!(pruned.num_transfers(), 1);
        assert_eq!(pruned.transfers().next().unwrap().id(), 0);
        assert_eq!(pruned.golden_cycles(), 5000);
    }

    #[test]
    fn golden_window_defaults_to_unbounded() {
        let mut wl = Workload::new();
        wl.set_golden_cycles(10_000);
        assert_eq!(wl.golden_window(0), (0, Cycle::MAX));
        assert_eq!(wl.device_golden_cycles(0), 10_000);

        wl.set_golden_window(1, (100, 900));
        assert_eq!(wl.golden_window(1), (100, 900));
        assert_eq!(wl.device_golden_cycles(1), 780);
    }
}
