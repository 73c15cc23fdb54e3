//! Device model abstraction queried by the simulation engine.
//!
//! A device model owns the geometry, routing tables, core-type map, and
//! bandwidth characteristics of one simulated hardware target, and performs
//! the per-timestep bandwidth computation (including congestion derating).
//! Models are immutable after construction; the engine holds one behind a
//! `Box<dyn DeviceModel>` built by [`build_device_model`].

use crate::blackhole::{BlackholeDeviceModel, BlackholeVariant};
use crate::coord::{BytesPerCycle, Coord, CoreType, Cycle, DeviceId, NocType, wrap_to_range};
use crate::engine::TransferState;
use crate::error::{SimError, SimResult};
use crate::topology::{LinkAttr, LinkId, NiuAttr, NiuId, NocTopology, Route};
use crate::workload::TransferId;
use crate::wormhole::WormholeB0DeviceModel;
use crate::wormhole_multichip::WormholeMultichipDeviceModel;

/// Silicon architecture family; selects latency tables and the timeline tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceArch {
    Wormhole,
    Blackhole,
}

impl std::fmt::Display for DeviceArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceArch::Wormhole  => write!(f, "wormhole_b0"),
            DeviceArch::Blackhole => write!(f, "blackhole"),
        }
    }
}

/// `(packet_size, steady_state_bandwidth)` rows, monotone by packet size.
pub type TransferBandwidthTable = [(u32, BytesPerCycle)];

// ---------------------------------------------------------------------------
// Demand grids
// ---------------------------------------------------------------------------

/// Per-timestep congestion state: effective-demand accumulators addressed by
/// dense link/NIU IDs, plus a separate accumulator for multicast writes.
pub struct DeviceState {
    pub niu_demand: Vec<f32>,
    pub link_demand: Vec<f32>,
    pub mcast_write_link_demand: Vec<f32>,
}

impl DeviceState {
    pub fn new(num_nius: usize, num_links: usize) -> Self {
        DeviceState {
            niu_demand: vec![0.0; num_nius],
            link_demand: vec![0.0; num_links],
            mcast_write_link_demand: vec![0.0; num_links],
        }
    }

    pub fn reset(&mut self) {
        self.niu_demand.fill(0.0);
        self.link_demand.fill(0.0);
        self.mcast_write_link_demand.fill(0.0);
    }
}

// ---------------------------------------------------------------------------
// Core-type rate tables
// ---------------------------------------------------------------------------

/// Injection or absorption rate per core type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CoreRates {
    pub undef: BytesPerCycle,
    pub worker: BytesPerCycle,
    pub dram: BytesPerCycle,
    pub eth: BytesPerCycle,
}

impl CoreRates {
    pub fn get(&self, core_type: CoreType) -> BytesPerCycle {
        match core_type {
            CoreType::Undef  => self.undef,
            CoreType::Worker => self.worker,
            CoreType::Dram   => self.dram,
            CoreType::Eth    => self.eth,
        }
    }

    pub fn scaled(&self, noc_multiplier: f32, dram_multiplier: f32) -> CoreRates {
        CoreRates {
            undef: self.undef * noc_multiplier,
            worker: self.worker * noc_multiplier,
            dram: self.dram * dram_multiplier,
            eth: self.eth * noc_multiplier,
        }
    }
}

/// Parses a row-per-string core-type map ('D' DRAM, 'E' ETH, 'W' worker,
/// '.' undefined) into a row-major grid.
pub(crate) fn core_type_grid(rows: &[&str]) -> Vec<CoreType> {
    rows.iter()
        .flat_map(|row| {
            row.chars().map(|ch| match ch {
                'D' => CoreType::Dram,
                'E' => CoreType::Eth,
                'W' => CoreType::Worker,
                '.' => CoreType::Undef,
                other => panic!("unknown core type glyph '{other}' in device map"),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Bandwidth interpolation
// ---------------------------------------------------------------------------

/// Peak bandwidth for a transfer of `num_packets` packets of `packet_size`
/// bytes. Piecewise-linear over the bandwidth table, with a first-transfer
/// blend: the first packet moves at `max_transfer_bw` (pipeline warmup), the
/// remaining `num_packets - 1` at the interpolated steady-state rate. Packet
/// sizes beyond the table clamp to the last entry.
pub fn interpolate_bw(
    tbt: &TransferBandwidthTable,
    max_transfer_bw: f32,
    packet_size: u32,
    num_packets: u32,
) -> f32 {
    debug_assert!(packet_size > 0);
    for window in tbt.windows(2) {
        let (start_range, start_bw) = window[0];
        let (end_range, end_bw) = window[1];
        if packet_size >= start_range && packet_size <= end_range {
            let pct = (packet_size - start_range) as f32 / (end_range - start_range) as f32;
            let steady_state_bw = start_bw + pct * (end_bw - start_bw);

            let steady_state_ratio = (num_packets - 1) as f32 / num_packets as f32;
            let first_transfer_ratio = 1.0 - steady_state_ratio;
            return first_transfer_ratio * max_transfer_bw + steady_state_ratio * steady_state_bw;
        }
    }
    tbt.last().map(|&(_, bw)| bw).unwrap_or(0.0)
}

/// Sets each live transfer's bandwidth for the coming timestep to the lesser
/// of its injection rate and the packet-size-dependent NoC peak rate.
pub fn update_transfer_bandwidth(
    transfers: &mut [TransferState],
    live_transfer_ids: &[TransferId],
    tbt: &TransferBandwidthTable,
    max_transfer_bw: f32,
) {
    for &ltid in live_transfer_ids {
        let lt = &mut transfers[ltid];
        let noc_limited_bw =
            interpolate_bw(tbt, max_transfer_bw, lt.params.packet_size, lt.params.num_packets);
        lt.curr_bandwidth = lt.params.injection_rate.min(noc_limited_bw);
    }
}

// ---------------------------------------------------------------------------
// DeviceModel trait
// ---------------------------------------------------------------------------

pub trait DeviceModel {
    fn arch(&self) -> DeviceArch;

    /// Grid geometry and dense ID bijections for this model.
    fn topology(&self) -> &NocTopology;

    fn core_type(&self, c: Coord) -> CoreType;

    fn src_injection_rate_for(&self, core_type: CoreType) -> BytesPerCycle;
    fn sink_absorption_rate_for(&self, core_type: CoreType) -> BytesPerCycle;

    fn transfer_bw_table(&self) -> &TransferBandwidthTable;

    /// All links share one bandwidth today; the ID is accepted for forward
    /// compatibility with heterogeneous links.
    fn link_bandwidth(&self, link_id: LinkId) -> f32;

    /// Nominal bytes/cycle across all DRAM cores, the denominator for the
    /// DRAM utilization statistic.
    fn aggregate_dram_bandwidth(&self) -> f32;

    /// Hardware startup latency of a read, by source/destination alignment.
    fn read_latency(&self, src: Coord, dst: Coord) -> Cycle;

    /// Hardware startup latency of a write: fixed startup plus per-hop cost.
    fn write_latency(&self, src: Coord, dst: Coord, noc_type: NocType) -> Cycle;

    /// Per-timestep bandwidth computation: packet-size peak rate, then
    /// (optionally) congestion derating over the demand grids.
    fn compute_current_transfer_rate(
        &self,
        start_timestep: Cycle,
        end_timestep: Cycle,
        transfers: &mut [TransferState],
        live_transfer_ids: &[TransferId],
        device_state: &mut DeviceState,
        enable_congestion_model: bool,
    );

    //------ provided geometry / lookup helpers -------------------------------

    fn rows(&self) -> usize {
        self.topology().rows()
    }

    fn cols(&self) -> usize {
        self.topology().cols()
    }

    fn num_chips(&self) -> usize {
        self.topology().num_chips()
    }

    fn device_ids(&self) -> &[DeviceId] {
        self.topology().device_ids()
    }

    fn is_valid_device_id(&self, device_id: DeviceId) -> bool {
        self.device_ids().contains(&device_id)
    }

    fn src_injection_rate(&self, c: Coord) -> BytesPerCycle {
        self.src_injection_rate_for(self.core_type(c))
    }

    fn sink_absorption_rate(&self, c: Coord) -> BytesPerCycle {
        self.sink_absorption_rate_for(self.core_type(c))
    }

    /// Maximum possible bandwidth of a single NoC transaction.
    fn max_noc_transfer_bw(&self) -> f32 {
        self.transfer_bw_table()
            .iter()
            .fold(0.0f32, |max_bw, &(_, bw)| max_bw.max(bw))
    }

    fn link_attr(&self, link_id: LinkId) -> &LinkAttr {
        self.topology().link_attr(link_id)
    }

    fn link_id(&self, attr: &LinkAttr) -> LinkId {
        self.topology().link_id(attr)
    }

    fn niu_attr(&self, niu_id: NiuId) -> &NiuAttr {
        self.topology().niu_attr(niu_id)
    }

    fn niu_id(&self, attr: &NiuAttr) -> NiuId {
        self.topology().niu_id(attr)
    }

    fn route(&self, noc_type: NocType, src: Coord, dst: &crate::coord::NocDestination) -> Route {
        self.topology().route(noc_type, src, dst)
    }

    fn init_device_state(&self) -> DeviceState {
        DeviceState::new(self.topology().num_nius(), self.topology().num_links())
    }

    /// Number of router hops from `src` to `dst` under the NoC's direction
    /// convention on the torus.
    fn route_hops(&self, src: Coord, dst: Coord, noc_type: NocType) -> u64 {
        let rows = self.rows() as i64;
        let cols = self.cols() as i64;
        let hops = match noc_type {
            NocType::Noc0 => {
                wrap_to_range((dst.col - src.col) as i64, cols)
                    + wrap_to_range((dst.row - src.row) as i64, rows)
            }
            NocType::Noc1 => {
                wrap_to_range((src.col - dst.col) as i64, cols)
                    + wrap_to_range((src.row - dst.row) as i64, rows)
            }
        };
        hops as u64
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds the device model for a device name; `DeviceModelInitFailed` for
/// anything unrecognized.
pub fn build_device_model(device_name: &str) -> SimResult<Box<dyn DeviceModel>> {
    match device_name {
        "wormhole_b0" | "N150" | "n150" => Ok(Box::new(WormholeB0DeviceModel::new())),
        "wormhole_q" => Ok(Box::new(WormholeB0DeviceModel::new_q())),
        "N300" | "n300" => Ok(Box::new(WormholeMultichipDeviceModel::new(2))),
        "T3K" => Ok(Box::new(WormholeMultichipDeviceModel::new(8))),
        "GALAXY" => Ok(Box::new(WormholeMultichipDeviceModel::new(32))),
        "TG" => Ok(Box::new(WormholeMultichipDeviceModel::new(36))),
        "blackhole" | "P100" => {
            Ok(Box::new(BlackholeDeviceModel::new(BlackholeVariant::P100)))
        }
        "P150" => Ok(Box::new(BlackholeDeviceModel::new(BlackholeVariant::P150))),
        other => Err(SimError::DeviceModelInitFailed(format!(
            "unknown device '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TBT: [(u32, BytesPerCycle); 7] = [
        (0, 0.0),
        (128, 5.5),
        (256, 10.1),
        (512, 18.0),
        (1024, 27.4),
        (2048, 30.0),
        (8192, 30.0),
    ];

    #[test]
    fn interpolation_is_linear_within_a_segment() {
        // many packets -> essentially steady state
        let bw = interpolate_bw(&TBT, 30.0, 192, 1_000_000);
        assert!((bw - 7.8).abs() < 0.05, "got {bw}");
    }

    #[test]
    fn single_packet_transfer_runs_at_max_bandwidth() {
        let bw = interpolate_bw(&TBT, 30.0, 512, 1);
        assert!((bw - 30.0).abs() < 1e-5);
    }

    #[test]
    fn first_transfer_blend_splits_by_packet_count() {
        // steady state at 512B is 18.0; two packets -> (30 + 18) / 2
        let bw = interpolate_bw(&TBT, 30.0, 512, 2);
        assert!((bw - 24.0).abs() < 1e-4, "got {bw}");
    }

    #[test]
    fn oversized_packets_clamp_to_last_table_entry() {
        let bw = interpolate_bw(&TBT, 30.0, 1 << 20, 4);
        assert!((bw - 30.0).abs() < 1e-5);
    }

    #[test]
    fn factory_rejects_unknown_device() {
        assert!(matches!(
            build_device_model("undef"),
            Err(SimError::DeviceModelInitFailed(_))
        ));
    }

    #[test]
    fn factory_builds_all_known_devices() {
        for name in [
            "wormhole_b0",
            "wormhole_q",
            "N150",
            "N300",
            "T3K",
            "TG",
            "GALAXY",
            "blackhole",
            "P100",
            "P150",
        ] {
            let model = build_device_model(name).unwrap();
            assert!(model.rows() > 0 && model.cols() > 0);
            assert!(model.max_noc_transfer_bw() > 0.0);
        }
    }

    #[test]
    fn device_state_reset_zeroes_all_grids() {
        let mut state = DeviceState::new(4, 8);
        state.niu_demand[1] = 3.0;
        state.link_demand[7] = 2.0;
        state.mcast_write_link_demand[0] = 1.0;
        state.reset();
        assert!(state.niu_demand.iter().all(|&d| d == 0.0));
        assert!(state.link_demand.iter().all(|&d| d == 0.0));
        assert!(state.mcast_write_link_demand.iter().all(|&d| d == 0.0));
    }
}
