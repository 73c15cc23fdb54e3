//! Simulation configuration, populated from CLI options or directly via the API.

use crate::error::{SimError, SimResult};

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Device model to simulate (see the device factory for accepted names).
    pub device_name: String,
    /// Congestion model: "fast" enables derating, "none" disables it.
    pub congestion_model_name: String,
    /// Path of the workload file this config was loaded with, if any.
    pub workload_json: String,
    /// Number of device cycles each simulation timestep spans.
    pub cycles_per_timestep: u32,
    /// 0 = normal, up to 3 = most verbose.
    pub verbosity: u8,
    /// Point the user at the congestion TUI after a run.
    pub enable_visualizations: bool,
    /// Replace zero injection rates with the source core type's rate.
    pub infer_injection_rate_from_src: bool,
    pub emit_stats_as_json: bool,
    /// Run a second congestion-free pass to estimate congestion impact.
    pub estimate_cong_impact: bool,
    /// Treat the workload file as a tt-metal noc trace instead of npe JSON.
    pub workload_is_noc_trace: bool,
    /// Drop unicast transfers whose src == dst before simulating.
    pub remove_localized_unicast_transfers: bool,
    pub stats_json_filepath: String,
    pub emit_timeline_file: bool,
    /// Empty means "derive from the workload filename".
    pub timeline_filepath: String,
    /// Multiplier applied to every phase cycle offset; 0 disables scaling.
    pub scale_workload_schedule: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            device_name: "wormhole_b0".to_string(),
            congestion_model_name: "fast".to_string(),
            workload_json: String::new(),
            cycles_per_timestep: 256,
            verbosity: 0,
            enable_visualizations: false,
            infer_injection_rate_from_src: true,
            emit_stats_as_json: false,
            estimate_cong_impact: true,
            workload_is_noc_trace: false,
            remove_localized_unicast_transfers: false,
            stats_json_filepath: "npe_stats.json".to_string(),
            emit_timeline_file: false,
            timeline_filepath: String::new(),
            scale_workload_schedule: 0.0,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.cycles_per_timestep == 0 {
            return Err(SimError::InvalidConfig(format!(
                "illegal cycles per timestep '{}'",
                self.cycles_per_timestep
            )));
        }
        if self.congestion_model_name != "none" && self.congestion_model_name != "fast" {
            return Err(SimError::InvalidConfig(format!(
                "illegal congestion model name '{}'",
                self.congestion_model_name
            )));
        }
        Ok(())
    }

    pub fn congestion_enabled(&self) -> bool {
        self.congestion_model_name != "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_cycles_per_timestep() {
        let cfg = SimConfig { cycles_per_timestep: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_unknown_congestion_model() {
        let cfg = SimConfig {
            congestion_model_name: "gradient".to_string(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(SimError::InvalidConfig(_))));
        assert!(SimConfig { congestion_model_name: "none".into(), ..Default::default() }
            .validate()
            .is_ok());
    }

    #[test]
    fn congestion_enabled_tracks_model_name() {
        assert!(SimConfig::default().congestion_enabled());
        let off = SimConfig { congestion_model_name: "none".into(), ..Default::default() };
        assert!(!off.congestion_enabled());
    }
}
