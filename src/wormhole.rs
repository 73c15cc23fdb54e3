//! Wormhole-B0 device model: a single 12×10 torus chip, plus the
//! bandwidth-scaled Wormhole-Q variant.
//!
//! Bandwidth tables and rate constants come from empirical measurement of the
//! silicon. The congestion model here is the wormhole-family variant, also
//! used by the multichip model; Blackhole carries its own copy.

use crate::coord::{BytesPerCycle, Coord, CoreType, Cycle, NocDestination, NocType};
use crate::device::{
    CoreRates, DeviceArch, DeviceModel, DeviceState, TransferBandwidthTable, core_type_grid,
    update_transfer_bandwidth,
};
use crate::engine::TransferState;
use crate::topology::{NiuType, NocTopology};
use crate::workload::TransferId;

pub(crate) const NUM_ROWS: usize = 12;
pub(crate) const NUM_COLS: usize = 10;

const LINK_BANDWIDTH: f32 = 30.0;
const AGGREGATE_DRAM_BANDWIDTH: f32 = 256.0;

/// packet_size -> steady-state bandwidth, measured on silicon.
const TRANSFER_BW_TABLE: [(u32, BytesPerCycle); 7] = [
    (0, 0.0),
    (128, 5.5),
    (256, 10.1),
    (512, 18.0),
    (1024, 27.4),
    (2048, 30.0),
    (8192, 30.0),
];

const INJECTION_RATES: CoreRates =
    CoreRates { undef: 28.1, worker: 28.1, dram: 23.2, eth: 23.2 };
const ABSORPTION_RATES: CoreRates =
    CoreRates { undef: 28.1, worker: 28.1, dram: 24.0, eth: 24.0 };

/// 12×10 core map: D = DRAM, E = ethernet, W = worker, . = unused.
const CORE_TYPE_ROWS: [&str; NUM_ROWS] = [
    "DEEEEDEEEE",
    "DWWWWDWWWW",
    ".WWWWDWWWW",
    ".WWWWDWWWW",
    ".WWWWDWWWW",
    "DWWWWDWWWW",
    "DEEEEDEEEE",
    "DWWWWDWWWW",
    ".WWWWDWWWW",
    ".WWWWDWWWW",
    ".WWWWDWWWW",
    "DWWWWDWWWW",
];

// Wormhole-Q scales the NoC fabric and the DRAM subsystem independently.
const Q_NOC_BW_MULTIPLIER: f32 = 2.0;
const Q_DRAM_BW_MULTIPLIER: f32 = 3.0;

// Startup latencies by src/dst alignment, and write cost per router hop.
const READ_LATENCY_SAME_CORE: Cycle = 70;
const READ_LATENCY_SAME_COL: Cycle = 190;
const READ_LATENCY_SAME_ROW: Cycle = 230;
const READ_LATENCY_DIAGONAL: Cycle = 340;
const WRITE_STARTUP_LATENCY: Cycle = 46;
const WRITE_CYCLES_PER_HOP: Cycle = 9;

pub struct WormholeB0DeviceModel {
    topology: NocTopology,
    core_types: Vec<CoreType>,
    transfer_bw_table: Vec<(u32, BytesPerCycle)>,
    link_bandwidth: f32,
    aggregate_dram_bandwidth: f32,
    injection_rates: CoreRates,
    absorption_rates: CoreRates,
}

impl WormholeB0DeviceModel {
    pub fn new() -> Self {
        WormholeB0DeviceModel {
            topology: NocTopology::new(1, NUM_ROWS, NUM_COLS),
            core_types: core_type_grid(&CORE_TYPE_ROWS),
            transfer_bw_table: TRANSFER_BW_TABLE.to_vec(),
            link_bandwidth: LINK_BANDWIDTH,
            aggregate_dram_bandwidth: AGGREGATE_DRAM_BANDWIDTH,
            injection_rates: INJECTION_RATES,
            absorption_rates: ABSORPTION_RATES,
        }
    }

    /// Wormhole-Q: identical topology with NoC bandwidths ×2 and DRAM ×3.
    pub fn new_q() -> Self {
        let mut model = Self::new();
        for entry in &mut model.transfer_bw_table {
            entry.1 *= Q_NOC_BW_MULTIPLIER;
        }
        model.link_bandwidth *= Q_NOC_BW_MULTIPLIER;
        model.aggregate_dram_bandwidth *= Q_DRAM_BW_MULTIPLIER;
        model.injection_rates =
            model.injection_rates.scaled(Q_NOC_BW_MULTIPLIER, Q_DRAM_BW_MULTIPLIER);
        model.absorption_rates =
            model.absorption_rates.scaled(Q_NOC_BW_MULTIPLIER, Q_DRAM_BW_MULTIPLIER);
        model
    }
}

impl Default for WormholeB0DeviceModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceModel for WormholeB0DeviceModel {
    fn arch(&self) -> DeviceArch {
        DeviceArch::Wormhole
    }

    fn topology(&self) -> &NocTopology {
        &self.topology
    }

    fn core_type(&self, c: Coord) -> CoreType {
        self.core_types[c.row as usize * NUM_COLS + c.col as usize]
    }

    fn src_injection_rate_for(&self, core_type: CoreType) -> BytesPerCycle {
        self.injection_rates.get(core_type)
    }

    fn sink_absorption_rate_for(&self, core_type: CoreType) -> BytesPerCycle {
        self.absorption_rates.get(core_type)
    }

    fn transfer_bw_table(&self) -> &TransferBandwidthTable {
        &self.transfer_bw_table
    }

    fn link_bandwidth(&self, _link_id: crate::topology::LinkId) -> f32 {
        self.link_bandwidth
    }

    fn aggregate_dram_bandwidth(&self) -> f32 {
        self.aggregate_dram_bandwidth
    }

    fn read_latency(&self, src: Coord, dst: Coord) -> Cycle {
        wormhole_read_latency(src, dst)
    }

    fn write_latency(&self, src: Coord, dst: Coord, noc_type: NocType) -> Cycle {
        WRITE_STARTUP_LATENCY + self.route_hops(src, dst, noc_type) * WRITE_CYCLES_PER_HOP
    }

    fn compute_current_transfer_rate(
        &self,
        start_timestep: Cycle,
        end_timestep: Cycle,
        transfers: &mut [TransferState],
        live_transfer_ids: &[TransferId],
        device_state: &mut DeviceState,
        enable_congestion_model: bool,
    ) {
        update_transfer_bandwidth(
            transfers,
            live_transfer_ids,
            self.transfer_bw_table(),
            self.max_noc_transfer_bw(),
        );
        if enable_congestion_model {
            model_congestion(
                self,
                start_timestep,
                end_timestep,
                transfers,
                live_transfer_ids,
                device_state,
            );
        }
    }
}

pub(crate) fn wormhole_read_latency(src: Coord, dst: Coord) -> Cycle {
    if src.row == dst.row && src.col == dst.col {
        READ_LATENCY_SAME_CORE
    } else if src.col == dst.col {
        READ_LATENCY_SAME_COL
    } else if src.row == dst.row {
        READ_LATENCY_SAME_ROW
    } else {
        READ_LATENCY_DIAGONAL
    }
}

// ---------------------------------------------------------------------------
// Congestion model (wormhole family)
// ---------------------------------------------------------------------------

/// First-order congestion derating, shared by the wormhole single- and
/// multi-chip models.
///
/// Pass 1 accumulates each live transfer's effective demand (time-in-timestep
/// fraction × current bandwidth) onto its source NIU, every link of its
/// route, and its sink NIU(s); multicast loads only WORKER sinks and also
/// charges the multicast-write grid. Pass 2 derates each transfer by the
/// worst bottleneck along its path. A single pass is intentional; mutual
/// derating is not iterated to convergence.
pub(crate) fn model_congestion(
    model: &dyn DeviceModel,
    start_timestep: Cycle,
    end_timestep: Cycle,
    transfers: &mut [TransferState],
    live_transfer_ids: &[TransferId],
    device_state: &mut DeviceState,
) {
    let cycles_per_timestep = (end_timestep - start_timestep) as f32;
    let link_bandwidth = model.link_bandwidth(0);
    let worker_sink_absorption_rate = model.sink_absorption_rate_for(CoreType::Worker);
    let topology = model.topology();

    device_state.reset();
    for &ltid in live_transfer_ids {
        let lt = &transfers[ltid];

        // transfers starting mid-timestep offer proportionally less demand
        let predicted_start = start_timestep.max(lt.start_cycle);
        let time_fraction = (end_timestep - predicted_start) as f32 / cycles_per_timestep;
        let effective_demand = time_fraction * lt.curr_bandwidth;

        let (src_niu_type, sink_niu_type) = niu_types_for(lt.params.noc_type);
        let src = lt.params.src;
        let src_niu = topology.niu_id_at(src.device_id, src.row, src.col, src_niu_type);
        device_state.niu_demand[src_niu as usize] += effective_demand;

        match &lt.params.dst {
            NocDestination::Unicast(dst) => {
                let sink_niu = topology.niu_id_at(dst.device_id, dst.row, dst.col, sink_niu_type);
                device_state.niu_demand[sink_niu as usize] += effective_demand;
            }
            NocDestination::Multicast(mcast) => {
                // multicast only loads WORKER NIUs; other cells ignore traffic
                for c in mcast.iter() {
                    if model.core_type(c) == CoreType::Worker {
                        let sink_niu =
                            topology.niu_id_at(c.device_id, c.row, c.col, sink_niu_type);
                        device_state.niu_demand[sink_niu as usize] += effective_demand;
                    }
                }
                for &link_id in &lt.route {
                    device_state.mcast_write_link_demand[link_id as usize] += effective_demand;
                }
            }
        }

        for &link_id in &lt.route {
            device_state.link_demand[link_id as usize] += effective_demand;
        }
    }

    for &ltid in live_transfer_ids {
        let lt = &mut transfers[ltid];

        let mut max_link_demand_on_route = 0.0f32;
        for &link_id in &lt.route {
            max_link_demand_on_route =
                max_link_demand_on_route.max(device_state.link_demand[link_id as usize]);
        }
        let link_bw_derate = link_bandwidth / max_link_demand_on_route;

        let (src_niu_type, sink_niu_type) = niu_types_for(lt.params.noc_type);
        let src = lt.params.src;
        let src_niu = topology.niu_id_at(src.device_id, src.row, src.col, src_niu_type);
        let src_bw_derate =
            lt.params.injection_rate / device_state.niu_demand[src_niu as usize];

        let sink_bw_derate = match &lt.params.dst {
            NocDestination::Unicast(dst) => {
                let sink_niu = topology.niu_id_at(dst.device_id, dst.row, dst.col, sink_niu_type);
                model.sink_absorption_rate(*dst) / device_state.niu_demand[sink_niu as usize]
            }
            NocDestination::Multicast(mcast) => {
                // multicast transfer speed is set by its most contended WORKER sink
                let mut min_sink_demand = f32::INFINITY;
                for c in mcast.iter() {
                    if model.core_type(c) == CoreType::Worker {
                        let sink_niu =
                            topology.niu_id_at(c.device_id, c.row, c.col, sink_niu_type);
                        min_sink_demand =
                            min_sink_demand.min(device_state.niu_demand[sink_niu as usize]);
                    }
                }
                if min_sink_demand.is_finite() {
                    worker_sink_absorption_rate / min_sink_demand
                } else {
                    1.0
                }
            }
        };

        let min_niu_bw_derate = src_bw_derate.min(sink_bw_derate);
        if link_bw_derate < 1.0 || min_niu_bw_derate < 1.0 {
            lt.curr_bandwidth *= link_bw_derate.min(min_niu_bw_derate);
        }
    }
}

pub(crate) fn niu_types_for(noc_type: NocType) -> (NiuType, NiuType) {
    match noc_type {
        NocType::Noc0 => (NiuType::Noc0Src, NiuType::Noc0Sink),
        NocType::Noc1 => (NiuType::Noc1Src, NiuType::Noc1Sink),
    }
}
