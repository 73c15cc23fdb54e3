//! Blackhole device model: a single 12×17 grid chip in P100 (7 DRAM banks)
//! or P150 (8 banks) trim.
//!
//! Carries its own copy of the congestion pass. The wormhole family and
//! Blackhole diverged here in the source material and are deliberately not
//! unified; at the shipped constants (one iteration, unit gradient factor)
//! the two produce identical numbers.

use crate::coord::{BytesPerCycle, Coord, CoreType, Cycle, NocDestination, NocType};
use crate::device::{
    CoreRates, DeviceArch, DeviceModel, DeviceState, TransferBandwidthTable, core_type_grid,
    update_transfer_bandwidth,
};
use crate::engine::TransferState;
use crate::topology::NocTopology;
use crate::workload::TransferId;
use crate::wormhole::niu_types_for;

const NUM_ROWS: usize = 12;
const NUM_COLS: usize = 17;

const LINK_BANDWIDTH: f32 = 60.9;
const AI_CLK_GHZ: f32 = 1.35;
const DRAM_RATE: f32 = 54.0 / AI_CLK_GHZ;
// ETH rate is unused on a single chip; kept out of reach of real traffic.
const ETH_RATE: f32 = 999.9;

const TRANSFER_BW_TABLE: [(u32, BytesPerCycle); 9] = [
    (0, 0.0),
    (128, 6.0),
    (256, 12.1),
    (512, 24.2),
    (1024, 48.0),
    (2048, 57.7),
    (4096, 58.7),
    (8192, 60.4),
    (16384, 60.9),
];

const INJECTION_RATES: CoreRates =
    CoreRates { undef: 60.9, worker: 60.9, dram: DRAM_RATE, eth: ETH_RATE };
const ABSORPTION_RATES: CoreRates =
    CoreRates { undef: 60.9, worker: 60.9, dram: DRAM_RATE, eth: ETH_RATE };

/// 12×17 core map: D = DRAM, E = ethernet, W = worker, . = unused.
const CORE_TYPE_ROWS: [&str; NUM_ROWS] = [
    "D........D.......",
    "DEEEEEEE.DEEEEEEE",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
    "DWWWWWWW.DWWWWWWW",
];

// Hardcoded blackhole startup latencies.
const READ_LATENCY_SAME_CORE: Cycle = 65;
const READ_LATENCY_SAME_COL: Cycle = 177;
const READ_LATENCY_SAME_ROW: Cycle = 217;
const READ_LATENCY_DIAGONAL: Cycle = 329;
const WRITE_STARTUP_LATENCY: Cycle = 40;
const WRITE_CYCLES_PER_HOP: Cycle = 11; // ~11.5 measured

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlackholeVariant {
    P100,
    P150,
}

pub struct BlackholeDeviceModel {
    topology: NocTopology,
    core_types: Vec<CoreType>,
    num_dram_banks: usize,
}

impl BlackholeDeviceModel {
    pub fn new(variant: BlackholeVariant) -> Self {
        BlackholeDeviceModel {
            topology: NocTopology::new(1, NUM_ROWS, NUM_COLS),
            core_types: core_type_grid(&CORE_TYPE_ROWS),
            num_dram_banks: match variant {
                BlackholeVariant::P100 => 7,
                BlackholeVariant::P150 => 8,
            },
        }
    }

    /// One congestion iteration; the gradient-descent formulation is kept
    /// with `grad_fac = 1`, which collapses to a straight multiply.
    fn model_congestion(
        &self,
        start_timestep: Cycle,
        end_timestep: Cycle,
        transfers: &mut [TransferState],
        live_transfer_ids: &[TransferId],
        device_state: &mut DeviceState,
    ) {
        let cycles_per_timestep = (end_timestep - start_timestep) as f32;
        let link_bandwidth = self.link_bandwidth(0);
        let worker_sink_absorption_rate = self.sink_absorption_rate_for(CoreType::Worker);
        let topology = self.topology();

        const NUM_ITERS: usize = 1;
        const GRAD_FAC: f32 = 1.0;

        for _iter in 0..NUM_ITERS {
            device_state.reset();
            for &ltid in live_transfer_ids {
                let lt = &transfers[ltid];

                let predicted_start = start_timestep.max(lt.start_cycle);
                let time_fraction = (end_timestep - predicted_start) as f32 / cycles_per_timestep;
                let effective_demand = time_fraction * lt.curr_bandwidth;

                let (src_niu_type, sink_niu_type) = niu_types_for(lt.params.noc_type);
                let src = lt.params.src;
                let src_niu = topology.niu_id_at(src.device_id, src.row, src.col, src_niu_type);
                device_state.niu_demand[src_niu as usize] += effective_demand;

                match &lt.params.dst {
                    NocDestination::Unicast(dst) => {
                        let sink_niu =
                            topology.niu_id_at(dst.device_id, dst.row, dst.col, sink_niu_type);
                        device_state.niu_demand[sink_niu as usize] += effective_demand;
                    }
                    NocDestination::Multicast(mcast) => {
                        for c in mcast.iter() {
                            if self.core_type(c) == CoreType::Worker {
                                let sink_niu =
                                    topology.niu_id_at(c.device_id, c.row, c.col, sink_niu_type);
                                device_state.niu_demand[sink_niu as usize] += effective_demand;
                            }
                        }
                        for &link_id in &lt.route {
                            device_state.mcast_write_link_demand[link_id as usize] +=
                                effective_demand;
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
                        let sink_niu =
                            topology.niu_id_at(dst.device_id, dst.row, dst.col, sink_niu_type);
                        self.sink_absorption_rate(*dst)
                            / device_state.niu_demand[sink_niu as usize]
                    }
                    NocDestination::Multicast(mcast) => {
                        let mut min_sink_demand = f32::INFINITY;
                        for c in mcast.iter() {
                            if self.core_type(c) == CoreType::Worker {
                                let sink_niu =
                                    topology.niu_id_at(c.device_id, c.row, c.col, sink_niu_type);
                                min_sink_demand = min_sink_demand
                                    .min(device_state.niu_demand[sink_niu as usize]);
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
                    let overall_bw_derate = link_bw_derate.min(min_niu_bw_derate);
                    lt.curr_bandwidth *= 1.0 - (GRAD_FAC * (1.0 - overall_bw_derate));
                }
            }
        }
    }
}

impl DeviceModel for BlackholeDeviceModel {
    fn arch(&self) -> DeviceArch {
        DeviceArch::Blackhole
    }

    fn topology(&self) -> &NocTopology {
        &self.topology
    }

    fn core_type(&self, c: Coord) -> CoreType {
        self.core_types[c.row as usize * NUM_COLS + c.col as usize]
    }

    fn src_injection_rate_for(&self, core_type: CoreType) -> BytesPerCycle {
        INJECTION_RATES.get(core_type)
    }

    fn sink_absorption_rate_for(&self, core_type: CoreType) -> BytesPerCycle {
        ABSORPTION_RATES.get(core_type)
    }

    fn transfer_bw_table(&self) -> &TransferBandwidthTable {
        &TRANSFER_BW_TABLE
    }

    fn link_bandwidth(&self, _link_id: crate::topology::LinkId) -> f32 {
        LINK_BANDWIDTH
    }

    fn aggregate_dram_bandwidth(&self) -> f32 {
        self.num_dram_banks as f32
            * ((INJECTION_RATES.dram + ABSORPTION_RATES.dram) / 2.0)
    }

    fn read_latency(&self, src: Coord, dst: Coord) -> Cycle {
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
            self.model_congestion(
                start_timestep,
                end_timestep,
                transfers,
                live_transfer_ids,
                device_state,
            );
        }
    }
}
