//! CLI output: text and JSON rendering, and error mapping.

use crate::error::StreamError;
use crate::lifecycle::BoundaryState;
use crate::metrics::StreamMetrics;
use crate::simulation::SimulationReport;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;

/// Map engine and config errors to a string for CLI output.
pub fn map_error(e: &StreamError) -> String {
    match &e.boundary_id {
        Some(boundary_id) => format!("{} (boundary {})", e, boundary_id),
        None => e.to_string(),
    }
}

fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn format_state(state: BoundaryState) -> String {
    match state {
        BoundaryState::Completed => state.green().to_string(),
        BoundaryState::Error => state.red().to_string(),
        BoundaryState::Aborted => state.yellow().to_string(),
        _ => state.to_string(),
    }
}

pub fn format_metrics_text(metrics: &StreamMetrics) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Streams")));

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    let rows: [(&str, String); 10] = [
        ("Active", metrics.active_streams.to_string()),
        ("Completed", metrics.completed_streams.to_string()),
        ("Failed", metrics.failed_streams.to_string()),
        ("Aborted", metrics.aborted_streams.to_string()),
        ("Chunks", metrics.total_chunks.to_string()),
        ("Bytes", metrics.total_bytes_transferred.to_string()),
        ("Backpressure events", metrics.backpressure_events.to_string()),
        ("Retry attempts", metrics.retry_attempts.to_string()),
        (
            "Avg chunk latency",
            format!("{:.1} ms", metrics.average_chunk_latency_ms),
        ),
        (
            "Avg time to first chunk",
            format!("{:.1} ms", metrics.average_time_to_first_chunk_ms),
        ),
    ];
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value]);
    }
    out.push_str(&format!("{}\n", table));

    if !metrics.boundaries.is_empty() {
        out.push_str(&format!("\n{}\n\n", format_section_heading("Boundaries")));
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec![
            "Boundary", "Priority", "Chunks", "Bytes", "First chunk", "Duration", "Retries",
        ]);
        let mut ids: Vec<_> = metrics.boundaries.keys().collect();
        ids.sort();
        for id in ids {
            let m = &metrics.boundaries[id];
            let first = m
                .time_to_first_chunk_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                id.clone(),
                m.priority.to_string(),
                m.chunk_count.to_string(),
                m.bytes.to_string(),
                first,
                format!("{} ms", m.total_duration_ms),
                m.retry_count.to_string(),
            ]);
        }
        out.push_str(&format!("{}\n", table));
    }
    out
}

pub fn format_metrics_json(metrics: &StreamMetrics) -> Result<String, StreamError> {
    serde_json::to_string_pretty(metrics).map_err(StreamError::unknown)
}

pub fn format_simulation_text(report: &SimulationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Simulation")));
    out.push_str(&format!("  Started: {}\n", report.started_at));
    out.push_str(&format!("  Elapsed: {} ms\n", report.elapsed_ms));
    out.push_str(&format!(
        "  Delivered: {} chunks, {} bytes\n\n",
        report.delivered_chunks, report.delivered_bytes
    ));

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Boundary", "Outcome"]);
    for (id, state) in &report.outcomes {
        table.add_row(vec![id.clone(), format_state(*state)]);
    }
    out.push_str(&format!("{}\n\n", table));
    out.push_str(&format_metrics_text(&report.metrics));
    out
}
