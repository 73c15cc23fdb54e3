//! Multichip wormhole device model: N chips sharing the Wormhole-B0 per-chip
//! topology (N150/N300/T3K/GALAXY/TG configurations).
//!
//! Per-chip link/NIU ID spaces are concatenated chip-major, so one pair of
//! demand grids covers the whole mesh. All traffic routes within its own
//! device; cross-chip fabric sends arrive from ingest as transfer groups of
//! per-chip segments, serialized by the dependency tracker.

use crate::coord::{BytesPerCycle, Coord, CoreType, Cycle, NocType};
use crate::device::{DeviceArch, DeviceModel, DeviceState, TransferBandwidthTable};
use crate::device::update_transfer_bandwidth;
use crate::engine::TransferState;
use crate::topology::NocTopology;
use crate::workload::TransferId;
use crate::wormhole::{self, WormholeB0DeviceModel};

pub struct WormholeMultichipDeviceModel {
    chip: WormholeB0DeviceModel,
    topology: NocTopology,
}

impl WormholeMultichipDeviceModel {
    pub fn new(num_chips: usize) -> Self {
        WormholeMultichipDeviceModel {
            chip: WormholeB0DeviceModel::new(),
            topology: NocTopology::new(num_chips, wormhole::NUM_ROWS, wormhole::NUM_COLS),
        }
    }
}

impl DeviceModel for WormholeMultichipDeviceModel {
    fn arch(&self) -> DeviceArch {
        DeviceArch::Wormhole
    }

    fn topology(&self) -> &NocTopology {
        &self.topology
    }

    // Per-cell properties are identical on every chip; the device component
    // of the coordinate is irrelevant to the lookup.
    fn core_type(&self, c: Coord) -> CoreType {
        self.chip.core_type(Coord::new(0, c.row, c.col))
    }

    fn src_injection_rate_for(&self, core_type: CoreType) -> BytesPerCycle {
        self.chip.src_injection_rate_for(core_type)
    }

    fn sink_absorption_rate_for(&self, core_type: CoreType) -> BytesPerCycle {
        self.chip.sink_absorption_rate_for(core_type)
    }

    fn transfer_bw_table(&self) -> &TransferBandwidthTable {
        self.chip.transfer_bw_table()
    }

    fn link_bandwidth(&self, link_id: crate::topology::LinkId) -> f32 {
        self.chip.link_bandwidth(link_id)
    }

    fn aggregate_dram_bandwidth(&self) -> f32 {
        self.num_chips() as f32 * self.chip.aggregate_dram_bandwidth()
    }

    fn read_latency(&self, src: Coord, dst: Coord) -> Cycle {
        self.chip.read_latency(src, dst)
    }

    fn write_latency(&self, src: Coord, dst: Coord, noc_type: NocType) -> Cycle {
        self.chip.write_latency(src, dst, noc_type)
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
            wormhole::model_congestion(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::NocDestination;

    #[test]
    fn eight_chip_mesh_has_eight_id_spaces() {
        let m = WormholeMultichipDeviceModel::new(8);
        assert_eq!(m.num_chips(), 8);
        assert_eq!(m.device_ids(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(m.topology().num_links(), 8 * 12 * 10 * 4);
        assert!(m.is_valid_device_id(7));
        assert!(!m.is_valid_device_id(8));
    }

    #[test]
    fn routes_stay_on_the_source_chip() {
        let m = WormholeMultichipDeviceModel::new(4);
        let route = m.route(
            NocType::Noc0,
            Coord::new(2, 1, 1),
            &NocDestination::Unicast(Coord::new(2, 3, 3)),
        );
        assert_eq!(route.len(), 4);
        for &link in &route {
            assert_eq!(m.link_attr(link).coord.device_id, 2);
        }
    }

    #[test]
    fn same_route_shape_on_every_chip() {
        let m = WormholeMultichipDeviceModel::new(2);
        let shape = |device| {
            m.route(
                NocType::Noc1,
                Coord::new(device, 5, 5),
                &NocDestination::Unicast(Coord::new(device, 1, 1)),
            )
            .iter()
            .map(|&l| (m.link_attr(l).coord.row, m.link_attr(l).coord.col, m.link_attr(l).link_type))
            .collect::<Vec<_>>()
        };
        assert_eq!(shape(0), shape(1));
    }

    #[test]
    fn aggregate_dram_bandwidth_scales_with_chips() {
        let m2 = WormholeMultichipDeviceModel::new(2);
        let m8 = WormholeMultichipDeviceModel::new(8);
        assert!((m2.aggregate_dram_bandwidth() - 2.0 * 256.0).abs() < 1e-3);
        assert!((m8.aggregate_dram_bandwidth() - 8.0 * 256.0).abs() < 1e-3);
    }
}
