//! Workload ingestion: the native JSON workload schema and tt-metal noc
//! trace conversion.
//!
//! Both readers are tolerant of individually malformed records: a transfer
//! or event missing required fields is logged and skipped rather than
//! failing the whole file. File-level problems (unreadable, unparseable,
//! wrong top-level shape) fail the ingest.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::coord::{Coord, Cycle, DeviceId, MulticastCoordSet, NocDestination, NocType};
use crate::device::DeviceModel;
use crate::error::{SimError, SimResult};
use crate::workload::{Workload, WorkloadPhase, WorkloadTransfer};

const SUPPORTED_NOC_EVENTS: [&str; 14] = [
    "READ",
    "READ_SET_STATE",
    "READ_WITH_STATE",
    "READ_WITH_STATE_AND_TRID",
    "READ_DRAM_SHARDED_SET_STATE",
    "READ_DRAM_SHARDED_WITH_STATE",
    "WRITE_",
    "WRITE_MULTICAST",
    "WRITE_SET_STATE",
    "WRITE_WITH_STATE",
    "FABRIC_UNICAST_WRITE",
    "FABRIC_UNICAST_INLINE_WRITE",
    "FABRIC_UNICAST_ATOMIC_INC",
    "FABRIC_FUSED_UNICAST_ATOMIC_INC",
];

fn parse_noc_type(name: &str) -> NocType {
    if name == "NOC_0" { NocType::Noc0 } else { NocType::Noc1 }
}

// ---------------------------------------------------------------------------
// npe JSON workload format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawWorkload {
    golden_result: Option<RawGoldenResult>,
    phases: Vec<RawPhase>,
}

#[derive(Debug, Deserialize)]
struct RawGoldenResult {
    cycles: u64,
}

#[derive(Debug, Deserialize)]
struct RawPhase {
    #[serde(default)]
    transfers: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawTransfer {
    packet_size: Option<i64>,
    num_packets: Option<i64>,
    src_x: Option<i64>,
    src_y: Option<i64>,
    device_id: Option<i64>,
    dst_x: Option<i64>,
    dst_y: Option<i64>,
    mcast_start_x: Option<i64>,
    mcast_start_y: Option<i64>,
    mcast_end_x: Option<i64>,
    mcast_end_y: Option<i64>,
    injection_rate: Option<f32>,
    phase_cycle_offset: Option<i64>,
    noc_type: Option<String>,
    noc_event_type: Option<String>,
}

/// Parses the native JSON workload schema from text.
pub fn parse_json_workload(text: &str) -> SimResult<Workload> {
    let raw: RawWorkload = serde_json::from_str(text).map_err(|err| {
        SimError::TraceIngestFailed(format!("workload JSON is malformed: {err}"))
    })?;

    let mut workload = Workload::new();
    if let Some(golden) = raw.golden_result {
        workload.set_golden_cycles(golden.cycles);
    }

    for raw_phase in raw.phases {
        let mut phase = WorkloadPhase::default();
        for value in raw_phase.transfers {
            let Ok(t) = serde_json::from_value::<RawTransfer>(value) else {
                error!("transfer record has wrongly-typed fields; skipping");
                continue;
            };
            let (Some(packet_size), Some(num_packets)) = (t.packet_size, t.num_packets) else {
                error!("transfer event missing 'packet_size' or 'num_packets'; skipping");
                continue;
            };
            let (Some(src_x), Some(src_y)) = (t.src_x, t.src_y) else {
                error!("transfer event missing 'src_x' or 'src_y'; skipping");
                continue;
            };
            let Some(noc_type) = t.noc_type.as_deref() else {
                error!("transfer event missing 'noc_type'; skipping");
                continue;
            };
            let device_id = t.device_id.unwrap_or(0) as DeviceId;

            // unicast when dst_x/dst_y are present, multicast otherwise
            let dst = match (t.dst_x, t.dst_y) {
                (Some(dst_x), Some(dst_y)) => {
                    NocDestination::Unicast(Coord::new(device_id, dst_y as i16, dst_x as i16))
                }
                _ => {
                    let (Some(sx), Some(sy), Some(ex), Some(ey)) =
                        (t.mcast_start_x, t.mcast_start_y, t.mcast_end_x, t.mcast_end_y)
                    else {
                        error!("multicast transfer event missing mcast corner fields; skipping");
                        continue;
                    };
                    NocDestination::Multicast(MulticastCoordSet::new(
                        Coord::new(device_id, sy as i16, sx as i16),
                        Coord::new(device_id, ey as i16, ex as i16),
                    ))
                }
            };

            if t.phase_cycle_offset.is_none() {
                warn!("transfer event missing 'phase_cycle_offset'; assuming 0");
            }

            // note: row is the y position, col the x position
            phase.transfers.push(WorkloadTransfer::new(
                packet_size as u32,
                num_packets as u32,
                Coord::new(device_id, src_y as i16, src_x as i16),
                dst,
                t.injection_rate.unwrap_or(0.0),
                t.phase_cycle_offset.unwrap_or(0).max(0) as Cycle,
                parse_noc_type(noc_type),
                t.noc_event_type.as_deref().unwrap_or(""),
            ));
        }
        workload.add_phase(phase);
    }

    Ok(workload)
}

// ---------------------------------------------------------------------------
// tt-metal noc trace format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    proc: Option<String>,
    timestamp: Option<i64>,
    num_bytes: Option<i64>,
    sx: Option<i64>,
    sy: Option<i64>,
    dx: Option<i64>,
    dy: Option<i64>,
    noc: Option<String>,
    src_device_id: Option<i64>,
    dst_device_id: Option<i64>,
    mcast_start_x: Option<i64>,
    mcast_start_y: Option<i64>,
    mcast_end_x: Option<i64>,
    mcast_end_y: Option<i64>,
    fabric_send: Option<RawFabricSend>,
}

#[derive(Debug, Deserialize)]
struct RawFabricSend {
    path: Option<Vec<RawFabricSegment>>,
}

#[derive(Debug, Deserialize)]
struct RawFabricSegment {
    noc: Option<String>,
    device: Option<i64>,
    segment_start_x: Option<i64>,
    segment_start_y: Option<i64>,
    segment_end_x: Option<i64>,
    segment_end_y: Option<i64>,
}

/// Register slots for `*_SET_STATE` / `*_WITH_STATE` event pairs.
#[derive(Debug, Clone, Copy, Default)]
struct SavedEventState {
    sx: i64,
    sy: i64,
    dx: i64,
    dy: i64,
    num_bytes: i64,
}

/// Converts a tt-metal noc trace (array of events) into a workload, adding
/// per-architecture startup latencies to each event's cycle offset and
/// deriving golden cycles from per-core timestamp spans.
pub fn parse_noc_trace(text: &str, model: &dyn DeviceModel) -> SimResult<Workload> {
    let values: Vec<serde_json::Value> = serde_json::from_str(text).map_err(|err| {
        SimError::TraceIngestFailed(format!("noc trace is not a JSON array: {err}"))
    })?;

    let events: Vec<RawEvent> = values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<RawEvent>(v) {
            Ok(ev) => Some(ev),
            Err(err) => {
                warn!("skipping unparseable trace event: {err}");
                None
            }
        })
        .collect();

    let mut workload = Workload::new();

    // pass 1: timestamp origin, per-core spans (golden), per-device windows
    let mut t0_timestamp = i64::MAX;
    let mut per_core_ts: HashMap<(String, i64, i64), (i64, i64)> = HashMap::new();
    let mut per_device_ts: HashMap<DeviceId, (i64, i64)> = HashMap::new();
    for event in &events {
        let ts = event.timestamp.unwrap_or(0);
        t0_timestamp = t0_timestamp.min(ts);

        let proc = event.proc.as_deref().unwrap_or("");
        let sx = event.sx.unwrap_or(-1);
        let sy = event.sy.unwrap_or(-1);
        if !proc.is_empty() && sx != -1 && sy != -1 {
            per_core_ts
                .entry((proc.to_string(), sx, sy))
                .and_modify(|(min_ts, max_ts)| {
                    *min_ts = (*min_ts).min(ts);
                    *max_ts = (*max_ts).max(ts);
                })
                .or_insert((ts, ts));
            let device_id = event.src_device_id.unwrap_or(0) as DeviceId;
            per_device_ts
                .entry(device_id)
                .and_modify(|(min_ts, max_ts)| {
                    *min_ts = (*min_ts).min(ts);
                    *max_ts = (*max_ts).max(ts);
                })
                .or_insert((ts, ts));
        }
    }
    if t0_timestamp == i64::MAX {
        t0_timestamp = 0;
    }

    let max_kernel_cycles = per_core_ts
        .values()
        .map(|(min_ts, max_ts)| (max_ts - min_ts) as Cycle)
        .max()
        .unwrap_or(0);
    // ~20 cycles elapse between the last noc event and the kernel end timestamp
    workload.set_golden_cycles(max_kernel_cycles.saturating_sub(20));
    for (device_id, (min_ts, max_ts)) in &per_device_ts {
        // a single-sample span carries no usable window
        if max_ts > min_ts {
            workload.set_golden_window(
                *device_id,
                ((min_ts - t0_timestamp) as Cycle, (max_ts - t0_timestamp) as Cycle),
            );
        }
    }

    // pass 2: convert events into transfers
    let mut phase = WorkloadPhase::default();
    let mut saved_read_state = SavedEventState::default();
    let mut saved_write_state = SavedEventState::default();

    for event in &events {
        let event_type = event.event_type.as_deref().unwrap_or("");
        if !SUPPORTED_NOC_EVENTS.contains(&event_type) {
            continue;
        }
        if event.proc.as_deref().unwrap_or("").is_empty() {
            warn!("no processor defined for event; skipping");
            continue;
        }

        let mut num_bytes = event.num_bytes.unwrap_or(0);
        let mut sx = event.sx.unwrap_or(-1);
        let mut sy = event.sy.unwrap_or(-1);
        let mut dx = event.dx.unwrap_or(-1);
        let mut dy = event.dy.unwrap_or(-1);
        let src_device_id = event.src_device_id.unwrap_or(0) as DeviceId;
        let dst_device_id =
            event.dst_device_id.unwrap_or(src_device_id as i64) as DeviceId;

        if (event_type == "WRITE_" || event_type == "READ") && num_bytes == 0 {
            warn!("no num_bytes defined for READ/WRITE event; skipping");
            continue;
        }

        if event_type.ends_with("SET_STATE") {
            let saved = SavedEventState { sx, sy, dx, dy, num_bytes };
            if event_type.starts_with("READ") {
                saved_read_state = saved;
            } else if event_type.starts_with("WRITE") {
                saved_write_state = saved;
            }
            continue;
        }

        if event_type.contains("WITH_STATE") {
            let saved = if event_type.contains("READ") {
                &saved_read_state
            } else {
                &saved_write_state
            };
            sx = saved.sx;
            sy = saved.sy;
            dx = saved.dx;
            dy = saved.dy;
            if saved.num_bytes > 0 {
                num_bytes = saved.num_bytes;
            }
        }

        // the source of a read is the data producer at the far end
        if event_type.starts_with("READ") {
            std::mem::swap(&mut sx, &mut dx);
            std::mem::swap(&mut sy, &mut dy);
        }

        let Some(noc_name) = event.noc.as_deref() else {
            error!("no NoC type specified for event; skipping");
            continue;
        };
        let noc_type = parse_noc_type(noc_name);

        let ts = event.timestamp.unwrap_or(0);
        let mut phase_cycle_offset = (ts - t0_timestamp).max(0) as Cycle;
        let src = Coord::new(src_device_id, sy as i16, sx as i16);
        let dst_coord = Coord::new(dst_device_id, dy as i16, dx as i16);
        if event_type.starts_with("READ") {
            phase_cycle_offset += model.read_latency(src, dst_coord);
        } else {
            // all fabric events are writes
            phase_cycle_offset += model.write_latency(src, dst_coord, noc_type);
        }

        let dst = if event_type == "WRITE_MULTICAST" {
            let (Some(msx), Some(msy), Some(mex), Some(mey)) = (
                event.mcast_start_x,
                event.mcast_start_y,
                event.mcast_end_x,
                event.mcast_end_y,
            ) else {
                error!("multicast event missing mcast corner fields; skipping");
                continue;
            };
            // NOC1 multicast rectangles arrive corner-reversed
            let (start, end) = match noc_type {
                NocType::Noc0 => (
                    Coord::new(dst_device_id, msy as i16, msx as i16),
                    Coord::new(dst_device_id, mey as i16, mex as i16),
                ),
                NocType::Noc1 => (
                    Coord::new(dst_device_id, mey as i16, mex as i16),
                    Coord::new(dst_device_id, msy as i16, msx as i16),
                ),
            };
            NocDestination::Multicast(MulticastCoordSet::new(start, end))
        } else {
            NocDestination::Unicast(dst_coord)
        };

        // a fabric path override turns this event into a chain of per-chip
        // segments sharing a transfer group
        let fabric_path = event
            .fabric_send
            .as_ref()
            .and_then(|fs| fs.path.as_ref());
        if let Some(path) = fabric_path {
            let group_id = workload.register_transfer_group();
            let mut group_index = 0u32;
            for segment in path {
                let (Some(device), Some(start_x), Some(start_y), Some(end_x), Some(end_y)) = (
                    segment.device,
                    segment.segment_start_x,
                    segment.segment_start_y,
                    segment.segment_end_x,
                    segment.segment_end_y,
                ) else {
                    error!(
                        "fabric send path at timestamp {ts} has missing segment fields; skipping"
                    );
                    continue;
                };
                let segment_noc = parse_noc_type(segment.noc.as_deref().unwrap_or("NOC_0"));
                phase.transfers.push(
                    WorkloadTransfer::new(
                        num_bytes as u32,
                        1,
                        Coord::new(device as DeviceId, start_y as i16, start_x as i16),
                        NocDestination::Unicast(Coord::new(
                            device as DeviceId,
                            end_y as i16,
                            end_x as i16,
                        )),
                        0.0,
                        phase_cycle_offset,
                        segment_noc,
                        event_type,
                    )
                    .with_transfer_group(group_id, group_index),
                );
                group_index += 1;
            }
        } else {
            phase.transfers.push(WorkloadTransfer::new(
                num_bytes as u32,
                1,
                src,
                dst,
                0.0,
                phase_cycle_offset,
                noc_type,
                event_type,
            ));
        }
    }
    workload.add_phase(phase);

    Ok(workload)
}

// ---------------------------------------------------------------------------
// File entry points
// ---------------------------------------------------------------------------

/// Loads a workload file: either the native JSON schema or a noc trace. When
/// JSON parsing of a supposed workload file fails, falls back to trying the
/// trace format, matching the profiler's loose file naming.
pub fn create_workload_from_json(
    path: &Path,
    model: &dyn DeviceModel,
    workload_is_noc_trace: bool,
) -> SimResult<Workload> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        SimError::TraceIngestFailed(format!("cannot read workload file '{}': {err}", path.display()))
    })?;

    let mut workload = if workload_is_noc_trace {
        parse_noc_trace(&text, model)?
    } else {
        match parse_json_workload(&text) {
            Ok(wl) => wl,
            Err(err) => {
                warn!("failed to load as npe workload ({err}); retrying as noc trace");
                parse_noc_trace(&text, model)?
            }
        }
    };
    workload.set_source_filepath(path);
    info!(
        "loaded workload '{}' with {} transfers",
        path.display(),
        workload.num_transfers()
    );
    Ok(workload)
}
