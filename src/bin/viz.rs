//! nocsim congestion visualizer — browse a timeline file timestep by timestep.
//!
//! Run after a simulation that emitted a timeline:
//!   cargo run --bin nocsim -- -w workload.json --emit-timeline-file
//!   cargo run --bin viz -- npe_timeline_workload.json
//!
//! Renders a router-grid heatmap of per-timestep link demand:
//!
//!   ┌ header: device / timestep / cycle range ───────────────────┐
//!   │ router heatmap (one cell per router) │ timestep stats      │
//!   │ ←/→: timestep   ↑/↓: chip   q/esc: quit                    │
//!
//! The simulation is not involved; this is a read-only view of the file.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

// ---------------------------------------------------------------------------
// Timeline file model
// ---------------------------------------------------------------------------

struct TimestepView {
    start_cycle: u64,
    end_cycle: u64,
    num_active_transfers: usize,
    avg_link_demand: f64,
    avg_link_util: f64,
    /// Worst demand seen at each router cell, keyed by (device, row, col).
    cell_demand: HashMap<(i64, i64, i64), f64>,
}

struct Timeline {
    device_name: String,
    arch: String,
    num_rows: usize,
    num_cols: usize,
    cycles_per_timestep: u64,
    device_ids: Vec<i64>,
    timesteps: Vec<TimestepView>,
    max_cell_demand: f64,
}

fn load_timeline(path: &str) -> Result<Timeline, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let doc: serde_json::Value = serde_json::from_str(&text)?;

    let common = &doc["common_info"];
    let num_rows = common["num_rows"].as_u64().unwrap_or(0) as usize;
    let num_cols = common["num_cols"].as_u64().unwrap_or(0) as usize;
    if num_rows == 0 || num_cols == 0 {
        return Err("timeline file is missing grid dimensions".into());
    }

    let mut device_ids: Vec<i64> = Vec::new();
    let mut timesteps = Vec::new();
    let mut max_cell_demand = 0.0f64;

    for ts in doc["timestep_data"].as_array().into_iter().flatten() {
        let mut cell_demand: HashMap<(i64, i64, i64), f64> = HashMap::new();
        for entry in ts["link_demand"].as_array().into_iter().flatten() {
            // entries are [device, row, col, terminal-or-link-name, demand]
            let (Some(device), Some(row), Some(col), Some(demand)) = (
                entry.get(0).and_then(|v| v.as_i64()),
                entry.get(1).and_then(|v| v.as_i64()),
                entry.get(2).and_then(|v| v.as_i64()),
                entry.get(4).and_then(|v| v.as_f64()),
            ) else {
                continue;
            };
            let cell = cell_demand.entry((device, row, col)).or_insert(0.0);
            *cell = cell.max(demand);
            max_cell_demand = max_cell_demand.max(demand);
            if !device_ids.contains(&device) {
                device_ids.push(device);
            }
        }
        timesteps.push(TimestepView {
            start_cycle: ts["start_cycle"].as_u64().unwrap_or(0),
            end_cycle: ts["end_cycle"].as_u64().unwrap_or(0),
            num_active_transfers: ts["active_transfers"]
                .as_array()
                .map(|a| a.len())
                .unwrap_or(0),
            avg_link_demand: ts["avg_link_demand"].as_f64().unwrap_or(0.0),
            avg_link_util: ts["avg_link_util"].as_f64().unwrap_or(0.0),
            cell_demand,
        });
    }

    if timesteps.is_empty() {
        return Err("timeline file contains no timestep data".into());
    }
    device_ids.sort_unstable();
    if device_ids.is_empty() {
        device_ids.push(0);
    }

    Ok(Timeline {
        device_name: common["mesh_device"].as_str().unwrap_or("?").to_string(),
        arch: common["arch"].as_str().unwrap_or("?").to_string(),
        num_rows,
        num_cols,
        cycles_per_timestep: common["cycles_per_timestep"].as_u64().unwrap_or(0),
        device_ids,
        timesteps,
        max_cell_demand,
    })
}

// ---------------------------------------------------------------------------
// Entry point / event loop
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "npe_timeline.json".to_string());
    let timeline = load_timeline(&path)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &timeline);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    timeline: &Timeline,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut timestep_idx = 0usize;
    let mut device_idx = 0usize;

    loop {
        terminal.draw(|f| render(f, timeline, timestep_idx, device_idx))?;

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                let num_ts = timeline.timesteps.len();
                let num_dev = timeline.device_ids.len();
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Left => timestep_idx = (timestep_idx + num_ts - 1) % num_ts,
                    KeyCode::Right => timestep_idx = (timestep_idx + 1) % num_ts,
                    KeyCode::Up if num_dev > 1 => {
                        device_idx = (device_idx + num_dev - 1) % num_dev;
                    }
                    KeyCode::Down if num_dev > 1 => {
                        device_idx = (device_idx + 1) % num_dev;
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, timeline: &Timeline, timestep_idx: usize, device_idx: usize) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(6),    // heatmap + stats
            Constraint::Length(1), // footer
        ])
        .split(f.area());

    render_header(f, rows[0], timeline, timestep_idx);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(68), Constraint::Percentage(32)])
        .split(rows[1]);

    render_heatmap(f, cols[0], timeline, timestep_idx, device_idx);
    render_stats(f, cols[1], timeline, timestep_idx);
    render_footer(f, rows[2], timeline);
}

fn render_header(f: &mut Frame, area: Rect, timeline: &Timeline, timestep_idx: usize) {
    let block = Block::default()
        .title(Span::styled(
            " nocsim congestion viewer ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let ts = &timeline.timesteps[timestep_idx];
    let spans = vec![
        Span::styled("  device: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{} ({})", timeline.device_name, timeline.arch),
            Style::default().fg(Color::Yellow),
        ),
        Span::styled("   timestep: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{}/{}", timestep_idx + 1, timeline.timesteps.len()),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled("   cycles: ", Style::default().fg(Color::DarkGray)),
        Span::raw(format!("{}..{}", ts.start_cycle, ts.end_cycle)),
    ];
    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

fn render_heatmap(
    f: &mut Frame,
    area: Rect,
    timeline: &Timeline,
    timestep_idx: usize,
    device_idx: usize,
) {
    let device = timeline.device_ids[device_idx];
    let title = if timeline.device_ids.len() > 1 {
        format!(" link demand (chip {device}) ")
    } else {
        " link demand ".to_string()
    };
    let block = Block::default().title(title).borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let ts = &timeline.timesteps[timestep_idx];
    let scale = timeline.max_cell_demand.max(f64::EPSILON);

    let legend = Line::from(vec![
        Span::styled("██", Style::default().fg(Color::Red)),
        Span::raw(" hot  "),
        Span::styled("██", Style::default().fg(Color::Yellow)),
        Span::raw(" busy  "),
        Span::styled("██", Style::default().fg(Color::Green)),
        Span::raw(" light  "),
        Span::styled("░░", Style::default().fg(Color::DarkGray)),
        Span::raw(" idle"),
    ]);
    let mut lines: Vec<Line> = vec![legend, Line::raw("")];

    for row in 0..timeline.num_rows as i64 {
        let mut spans: Vec<Span> = vec![Span::raw(" ")];
        for col in 0..timeline.num_cols as i64 {
            let demand = ts
                .cell_demand
                .get(&(device, row, col))
                .copied()
                .unwrap_or(0.0);
            let (symbol, color) = if demand <= 0.0 {
                ("░░", Color::DarkGray)
            } else if demand < scale * 0.33 {
                ("██", Color::Green)
            } else if demand < scale * 0.66 {
                ("██", Color::Yellow)
            } else {
                ("██", Color::Red)
            };
            spans.push(Span::styled(symbol, Style::default().fg(color)));
            spans.push(Span::raw(" "));
        }
        lines.push(Line::from(spans));
    }

    f.render_widget(Paragraph::new(lines), inner);
}

fn render_stats(f: &mut Frame, area: Rect, timeline: &Timeline, timestep_idx: usize) {
    let block = Block::default().title(" timestep ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let ts = &timeline.timesteps[timestep_idx];
    let text = vec![
        Line::from(vec![
            Span::styled("Active transfers: ", Style::default().fg(Color::DarkGray)),
            Span::raw(ts.num_active_transfers.to_string()),
        ]),
        Line::from(vec![
            Span::styled("Avg link demand:  ", Style::default().fg(Color::DarkGray)),
            Span::raw(format!("{:.1}%", ts.avg_link_demand)),
        ]),
        Line::from(vec![
            Span::styled("Avg link util:    ", Style::default().fg(Color::DarkGray)),
            Span::raw(format!("{:.1}%", ts.avg_link_util)),
        ]),
        Line::raw(""),
        Line::from(vec![
            Span::styled("Cycles/timestep:  ", Style::default().fg(Color::DarkGray)),
            Span::raw(timeline.cycles_per_timestep.to_string()),
        ]),
        Line::from(vec![
            Span::styled("Peak cell demand: ", Style::default().fg(Color::DarkGray)),
            Span::raw(format!("{:.1} B/cy", timeline.max_cell_demand)),
        ]),
    ];
    f.render_widget(Paragraph::new(text), inner);
}

fn render_footer(f: &mut Frame, area: Rect, timeline: &Timeline) {
    let chips_hint = if timeline.device_ids.len() > 1 {
        "   ↑/↓: chip"
    } else {
        ""
    };
    let text = Paragraph::new(Span::styled(
        format!("  ←/→: timestep{chips_hint}   q/esc: quit"),
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(text, area);
}
