//! Per-timestep and summary simulation statistics.
//!
//! Stats are kept per device plus one mesh aggregate entry keyed by
//! [`MESH_DEVICE`]; the mesh entry additionally snapshots the demand grids
//! and live-transfer set each timestep for the timeline output. All demand
//! and utilization figures are percentages of link bandwidth.

use std::collections::BTreeMap;

use serde_json::json;

use crate::coord::{CoreType, Cycle, DeviceId, MESH_DEVICE, NocDestination, NocType};
use crate::device::{DeviceModel, DeviceState};
use crate::workload::{TransferId, Workload};

// ---------------------------------------------------------------------------
// TimestepStats
// ---------------------------------------------------------------------------

/// Aggregates for one simulation timestep.
///
/// Demand sums every transfer's offered bandwidth and can exceed 100% when
/// routes overlap; utilization clamps each resource at its capacity and
/// cannot.
#[derive(Debug, Clone, Default)]
pub struct TimestepStats {
    pub start_cycle: Cycle,
    pub end_cycle: Cycle,

    pub avg_link_demand: f64,
    pub max_link_demand: f64,
    pub avg_link_util: f64,
    pub avg_niu_demand: f64,
    pub max_niu_demand: f64,

    pub avg_noc0_link_demand: f64,
    pub avg_noc0_link_util: f64,
    pub max_noc0_link_demand: f64,
    pub avg_noc1_link_demand: f64,
    pub avg_noc1_link_util: f64,
    pub max_noc1_link_demand: f64,

    pub avg_mcast_write_link_util: f64,

    // mesh entry only: copied for timeline emission
    pub link_demand_grid: Vec<f32>,
    pub niu_demand_grid: Vec<f32>,
    pub live_transfer_ids: Vec<TransferId>,
}

// ---------------------------------------------------------------------------
// DeviceStats
// ---------------------------------------------------------------------------

/// Results of one simulation run for one device (or the mesh aggregate).
#[derive(Debug, Clone, Default)]
pub struct DeviceStats {
    pub completed: bool,
    pub estimated_cycles: Cycle,
    pub estimated_cong_free_cycles: Cycle,
    pub golden_cycles: Cycle,
    pub cycle_prediction_error: f64,
    pub wallclock_runtime_us: u64,
    pub num_timesteps: usize,

    pub overall_avg_link_demand: f64,
    pub overall_max_link_demand: f64,
    pub overall_avg_link_util: f64,
    pub overall_max_link_util: f64,
    pub overall_avg_niu_demand: f64,
    pub overall_max_niu_demand: f64,

    pub overall_avg_noc0_link_demand: f64,
    pub overall_avg_noc0_link_util: f64,
    pub overall_max_noc0_link_demand: f64,
    pub overall_avg_noc1_link_demand: f64,
    pub overall_avg_noc1_link_util: f64,
    pub overall_max_noc1_link_demand: f64,

    pub overall_avg_mcast_write_link_util: f64,

    pub dram_bw_util: f64,
    pub dram_bw_util_sim: f64,

    pub per_timestep_stats: Vec<TimestepStats>,
}

impl DeviceStats {
    /// Percentage of estimated runtime recoverable without congestion.
    pub fn congestion_impact(&self) -> f64 {
        if self.estimated_cycles == 0 || self.estimated_cong_free_cycles == 0 {
            0.0
        } else {
            100.0 * (self.estimated_cycles as f64 - self.estimated_cong_free_cycles as f64)
                / self.estimated_cycles as f64
        }
    }

    /// Populates the summary fields from the (already truncated) per-timestep
    /// stats and the workload's DRAM traffic.
    pub fn compute_summary_stats(&mut self, workload: &Workload, model: &dyn DeviceModel) {
        self.num_timesteps = self.per_timestep_stats.len();

        for ts in &self.per_timestep_stats {
            self.overall_avg_link_demand += ts.avg_link_demand;
            self.overall_max_link_demand = self.overall_max_link_demand.max(ts.max_link_demand);
            self.overall_avg_link_util += ts.avg_link_util;
            self.overall_max_link_util = self.overall_max_link_util.max(ts.avg_link_util);
            self.overall_avg_niu_demand += ts.avg_niu_demand;
            self.overall_max_niu_demand = self.overall_max_niu_demand.max(ts.max_niu_demand);

            self.overall_avg_noc0_link_demand += ts.avg_noc0_link_demand;
            self.overall_avg_noc0_link_util += ts.avg_noc0_link_util;
            self.overall_max_noc0_link_demand =
                self.overall_max_noc0_link_demand.max(ts.max_noc0_link_demand);
            self.overall_avg_noc1_link_demand += ts.avg_noc1_link_demand;
            self.overall_avg_noc1_link_util += ts.avg_noc1_link_util;
            self.overall_max_noc1_link_demand =
                self.overall_max_noc1_link_demand.max(ts.max_noc1_link_demand);

            self.overall_avg_mcast_write_link_util += ts.avg_mcast_write_link_util;
        }
        if self.num_timesteps > 0 {
            let n = self.num_timesteps as f64;
            self.overall_avg_link_demand /= n;
            self.overall_avg_link_util /= n;
            self.overall_avg_niu_demand /= n;
            self.overall_avg_noc0_link_demand /= n;
            self.overall_avg_noc0_link_util /= n;
            self.overall_avg_noc1_link_demand /= n;
            self.overall_avg_noc1_link_util /= n;
            self.overall_avg_mcast_write_link_util /= n;
        }

        if self.golden_cycles > 0 {
            self.cycle_prediction_error = 100.0
                * (self.estimated_cycles as f64 - self.golden_cycles as f64)
                / self.golden_cycles as f64;
        }

        // aggregate DRAM bandwidth utilization over the whole workload
        let mut read_bytes: u64 = 0;
        let mut write_bytes: u64 = 0;
        for transfer in workload.transfers() {
            if model.core_type(transfer.src) == CoreType::Dram {
                read_bytes += transfer.total_bytes;
            } else if let NocDestination::Unicast(dst) = &transfer.dst {
                if model.core_type(*dst) == CoreType::Dram {
                    write_bytes += transfer.total_bytes;
                }
            }
        }
        let total_bytes = (read_bytes + write_bytes) as f64;
        let dram_bw = model.aggregate_dram_bandwidth() as f64;
        if self.golden_cycles > 0 && dram_bw > 0.0 {
            self.dram_bw_util = 100.0 * total_bytes / (self.golden_cycles as f64 * dram_bw);
        }
        if self.estimated_cycles > 0 && dram_bw > 0.0 {
            self.dram_bw_util_sim =
                100.0 * total_bytes / (self.estimated_cycles as f64 * dram_bw);
        }
    }

    pub fn report(&self, verbose: bool) -> String {
        let mut out = String::new();
        out.push_str(&format!("  congestion impact: {:5.1}%\n", self.congestion_impact()));
        out.push_str(&format!("   estimated cycles: {:5}\n", self.estimated_cycles));
        out.push_str(&format!("      golden cycles: {:5}\n", self.golden_cycles));
        if self.golden_cycles > 0 {
            out.push_str(&format!("   cycle pred error: {:5.1}%\n", self.cycle_prediction_error));
        }
        out.push('\n');
        out.push_str(&format!("       DRAM BW util: {:5.1}% (using golden)\n", self.dram_bw_util));
        out.push_str(&format!(
            "       DRAM BW util: {:5.1}% (using estimated)\n",
            self.dram_bw_util_sim
        ));
        out.push('\n');
        out.push_str(&format!("      avg link util: {:5.1}%\n", self.overall_avg_link_util));
        out.push_str(&format!("      max link util: {:5.1}%\n", self.overall_max_link_util));
        out.push('\n');
        out.push_str(&format!("    avg link demand: {:5.1}%\n", self.overall_avg_link_demand));
        out.push_str(&format!("    max link demand: {:5.1}%\n", self.overall_max_link_demand));
        out.push('\n');
        out.push_str(&format!("    avg NIU  demand: {:5.1}%\n", self.overall_avg_niu_demand));
        out.push_str(&format!("    max NIU  demand: {:5.1}%\n", self.overall_max_niu_demand));
        if verbose {
            out.push('\n');
            out.push_str(&format!("      num timesteps: {:5}\n", self.num_timesteps));
            out.push_str(&format!("     wallclock time: {:5} us\n", self.wallclock_runtime_us));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// SimStats
// ---------------------------------------------------------------------------

/// Stats for every device of one run, plus the mesh aggregate. Keys iterate
/// in sorted order so repeated runs produce byte-identical output.
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub per_device: BTreeMap<DeviceId, DeviceStats>,
}

impl SimStats {
    pub fn new(device_ids: &[DeviceId]) -> Self {
        let mut per_device = BTreeMap::new();
        for &id in device_ids {
            per_device.insert(id, DeviceStats::default());
        }
        per_device.insert(MESH_DEVICE, DeviceStats::default());
        SimStats { per_device }
    }

    pub fn mesh(&self) -> &DeviceStats {
        &self.per_device[&MESH_DEVICE]
    }

    pub fn mesh_mut(&mut self) -> &mut DeviceStats {
        self.per_device
            .get_mut(&MESH_DEVICE)
            .expect("mesh stats entry always exists")
    }

    /// Opens a fresh timestep record on every device.
    pub fn insert_timestep(&mut self, start_cycle: Cycle, end_cycle: Cycle) {
        for stats in self.per_device.values_mut() {
            stats.per_timestep_stats.push(TimestepStats {
                start_cycle,
                end_cycle,
                ..Default::default()
            });
        }
    }

    pub fn report(&self, verbose: bool) -> String {
        let num_devices = self.per_device.len() - 1;
        let mut out = String::new();
        for (&device_id, stats) in &self.per_device {
            if device_id == MESH_DEVICE {
                continue;
            }
            if num_devices > 1 {
                out.push_str(&format!("---- device {device_id} ----\n"));
            }
            out.push_str(&stats.report(verbose));
            out.push('\n');
        }
        if num_devices > 1 {
            out.push_str("---- mesh aggregate ----\n");
            out.push_str(&self.mesh().report(verbose));
        }
        out
    }

    /// Summary fields as a JSON document (grids and per-timestep data omitted).
    pub fn summary_json(&self) -> serde_json::Value {
        let mut devices = serde_json::Map::new();
        for (&device_id, stats) in &self.per_device {
            let key = if device_id == MESH_DEVICE {
                "mesh".to_string()
            } else {
                device_id.to_string()
            };
            devices.insert(
                key,
                json!({
                    "completed": stats.completed,
                    "estimated_cycles": stats.estimated_cycles,
                    "estimated_cong_free_cycles": stats.estimated_cong_free_cycles,
                    "golden_cycles": stats.golden_cycles,
                    "cycle_prediction_error": stats.cycle_prediction_error,
                    "congestion_impact": stats.congestion_impact(),
                    "dram_bw_util": stats.dram_bw_util,
                    "dram_bw_util_sim": stats.dram_bw_util_sim,
                    "overall_avg_link_demand": stats.overall_avg_link_demand,
                    "overall_max_link_demand": stats.overall_max_link_demand,
                    "overall_avg_link_util": stats.overall_avg_link_util,
                    "overall_max_link_util": stats.overall_max_link_util,
                    "overall_avg_niu_demand": stats.overall_avg_niu_demand,
                    "overall_max_niu_demand": stats.overall_max_niu_demand,
                    "num_timesteps": stats.num_timesteps,
                    "wallclock_runtime_us": stats.wallclock_runtime_us,
                }),
            );
        }
        json!({ "devices": devices })
    }
}

// ---------------------------------------------------------------------------
// Per-timestep aggregation
// ---------------------------------------------------------------------------

/// Folds the demand grids into one device's current timestep record and
/// normalizes to percentages of link bandwidth. The mesh entry sees every
/// grid cell and also keeps a copy of the raw grids.
pub(crate) fn update_simulation_stats(
    model: &dyn DeviceModel,
    device_id: DeviceId,
    device_state: &DeviceState,
    ts: &mut TimestepStats,
    link_bandwidth: f64,
) {
    let topology = model.topology();

    for (link_id, &demand) in device_state.link_demand.iter().enumerate() {
        let attr = topology.link_attr(link_id as crate::topology::LinkId);
        if device_id != MESH_DEVICE && device_id != attr.coord.device_id {
            continue;
        }
        let demand = demand as f64;
        let mcast_demand = device_state.mcast_write_link_demand[link_id] as f64;
        ts.avg_link_demand += demand;
        ts.avg_link_util += demand.min(link_bandwidth);
        ts.avg_mcast_write_link_util += mcast_demand.min(link_bandwidth);
        ts.max_link_demand = ts.max_link_demand.max(demand);
        match attr.link_type.noc_type() {
            NocType::Noc0 => {
                ts.avg_noc0_link_demand += demand;
                ts.avg_noc0_link_util += demand.min(link_bandwidth);
                ts.max_noc0_link_demand = ts.max_noc0_link_demand.max(demand);
            }
            NocType::Noc1 => {
                ts.avg_noc1_link_demand += demand;
                ts.avg_noc1_link_util += demand.min(link_bandwidth);
                ts.max_noc1_link_demand = ts.max_noc1_link_demand.max(demand);
            }
        }
    }

    let total_links = device_state.link_demand.len();
    let link_grid_size = if device_id == MESH_DEVICE {
        total_links
    } else {
        total_links / model.num_chips()
    } as f64;
    ts.avg_link_demand *= 100.0 / (link_bandwidth * link_grid_size);
    ts.avg_link_util *= 100.0 / (link_bandwidth * link_grid_size);
    ts.avg_mcast_write_link_util *= 100.0 / (link_bandwidth * link_grid_size);
    ts.max_link_demand *= 100.0 / link_bandwidth;

    let num_noc0_links = link_grid_size / 2.0;
    ts.avg_noc0_link_demand *= 100.0 / (link_bandwidth * num_noc0_links);
    ts.avg_noc0_link_util *= 100.0 / (link_bandwidth * num_noc0_links);
    ts.max_noc0_link_demand *= 100.0 / link_bandwidth;

    let num_noc1_links = link_grid_size / 2.0;
    ts.avg_noc1_link_demand *= 100.0 / (link_bandwidth * num_noc1_links);
    ts.avg_noc1_link_util *= 100.0 / (link_bandwidth * num_noc1_links);
    ts.max_noc1_link_demand *= 100.0 / link_bandwidth;

    for (niu_id, &demand) in device_state.niu_demand.iter().enumerate() {
        let attr = topology.niu_attr(niu_id as crate::topology::NiuId);
        if device_id != MESH_DEVICE && device_id != attr.coord.device_id {
            continue;
        }
        let demand = demand as f64;
        ts.avg_niu_demand += demand;
        ts.max_niu_demand = ts.max_niu_demand.max(demand);
    }
    // NOTE: link bandwidth is only an approximation of NIU bandwidth
    let total_nius = device_state.niu_demand.len();
    let niu_grid_size = if device_id == MESH_DEVICE {
        total_nius
    } else {
        total_nius / model.num_chips()
    } as f64;
    ts.avg_niu_demand *= 100.0 / (link_bandwidth * niu_grid_size);
    ts.max_niu_demand *= 100.0 / link_bandwidth;

    // copying the grids is costly, so only the mesh entry keeps them
    if device_id == MESH_DEVICE {
        ts.link_demand_grid = device_state.link_demand.clone();
        ts.niu_demand_grid = device_state.niu_demand.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Coord, NocType};
    use crate::device::DeviceModel;
    use crate::workload::{WorkloadPhase, WorkloadTransfer};
    use crate::wormhole::WormholeB0DeviceModel;

    #[test]
    fn dram_bw_util_uses_golden_cycles() {
        let model = WormholeB0DeviceModel::new();
        // one read sourced at DRAM core (0,0,0): 512 packets x 2048B = 1 MiB
        let transfer = WorkloadTransfer::new(
            2048,
            512,
            Coord::new(0, 0, 0),
            NocDestination::Unicast(Coord::new(0, 1, 1)),
            23.2,
            0,
            NocType::Noc0,
            "READ",
        );
        let mut wl = Workload::new();
        wl.add_phase(WorkloadPhase::new(vec![transfer]));
        wl.set_golden_cycles(10_000);

        let mut stats = DeviceStats {
            golden_cycles: 10_000,
            estimated_cycles: 8_000,
            ..Default::default()
        };
        stats.compute_summary_stats(&wl, &model);

        // 100 * 1048576 / (10000 * 256) = 40.96
        assert!((stats.dram_bw_util - 40.96).abs() < 1e-3, "got {}", stats.dram_bw_util);
        // estimated flavour uses estimated cycles: 100 * 1048576 / (8000 * 256)
        assert!((stats.dram_bw_util_sim - 51.2).abs() < 1e-3);
    }

    #[test]
    fn writes_to_dram_count_toward_dram_traffic() {
        let model = WormholeB0DeviceModel::new();
        let write = WorkloadTransfer::new(
            1024,
            1024,
            Coord::new(0, 1, 1),
            NocDestination::Unicast(Coord::new(0, 1, 5)), // DRAM core
            28.1,
            0,
            NocType::Noc0,
            "WRITE_",
        );
        let mut wl = Workload::new();
        wl.add_phase(WorkloadPhase::new(vec![write]));

        let mut stats = DeviceStats { golden_cycles: 10_000, ..Default::default() };
        stats.compute_summary_stats(&wl, &model);
        assert!((stats.dram_bw_util - 40.96).abs() < 1e-3);
    }

    #[test]
    fn congestion_impact_guards_zero_terms() {
        let stats = DeviceStats::default();
        assert_eq!(stats.congestion_impact(), 0.0);

        let stats = DeviceStats {
            estimated_cycles: 1000,
            estimated_cong_free_cycles: 800,
            ..Default::default()
        };
        assert!((stats.congestion_impact() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn cycle_prediction_error_is_signed() {
        let model = WormholeB0DeviceModel::new();
        let wl = Workload::new();
        let mut stats = DeviceStats {
            golden_cycles: 1000,
            estimated_cycles: 900,
            ..Default::default()
        };
        stats.compute_summary_stats(&wl, &model);
        assert!((stats.cycle_prediction_error + 10.0).abs() < 1e-9);
    }

    #[test]
    fn summary_averages_across_timesteps() {
        let model = WormholeB0DeviceModel::new();
        let wl = Workload::new();
        let mut stats = DeviceStats::default();
        for demand in [10.0, 30.0] {
            stats.per_timestep_stats.push(TimestepStats {
                avg_link_demand: demand,
                max_link_demand: demand * 2.0,
                avg_link_util: demand / 2.0,
                ..Default::default()
            });
        }
        stats.compute_summary_stats(&wl, &model);
        assert_eq!(stats.num_timesteps, 2);
        assert!((stats.overall_avg_link_demand - 20.0).abs() < 1e-9);
        assert!((stats.overall_max_link_demand - 60.0).abs() < 1e-9);
        assert!((stats.overall_avg_link_util - 10.0).abs() < 1e-9);
        assert!((stats.overall_max_link_util - 15.0).abs() < 1e-9);
    }

    #[test]
    fn mesh_entry_snapshots_demand_grids() {
        let model = WormholeB0DeviceModel::new();
        let mut state = model.init_device_state();
        state.link_demand[5] = 12.0;
        state.niu_demand[3] = 7.0;

        let mut mesh_ts = TimestepStats::default();
        update_simulation_stats(&model, MESH_DEVICE, &state, &mut mesh_ts, 30.0);
        assert_eq!(mesh_ts.link_demand_grid[5], 12.0);
        assert_eq!(mesh_ts.niu_demand_grid[3], 7.0);
        assert!(mesh_ts.avg_link_demand > 0.0);
        assert!((mesh_ts.max_link_demand - 40.0).abs() < 1e-6); // 12/30 of bw

        let mut dev_ts = TimestepStats::default();
        update_simulation_stats(&model, 0, &state, &mut dev_ts, 30.0);
        assert!(dev_ts.link_demand_grid.is_empty());
        // single-chip device sees the same cells as the mesh
        assert!((dev_ts.avg_link_demand - mesh_ts.avg_link_demand).abs() < 1e-12);
    }
}
