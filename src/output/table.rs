use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::engine::{Decision, DecisionReason};
use crate::runner::RunReport;
use crate::snapshot::store::DecisionRecord;

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn multiplier(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

fn reason_cell(d: &Decision) -> Cell {
    let cell = Cell::new(d.reason.to_string());
    match d.reason {
        DecisionReason::Increase => cell.fg(Color::Green),
        DecisionReason::Decrease | DecisionReason::DecreaseUnproven => cell.fg(Color::Red),
        DecisionReason::Clamped => cell.fg(Color::Yellow),
        DecisionReason::Untargetable => cell.fg(Color::DarkGrey),
        DecisionReason::WithinDeadBand | DecisionReason::AtBound => cell,
    }
}

fn decision_cells(d: &Decision) -> Vec<Cell> {
    vec![
        Cell::new(format!("{} {}", d.campaign, d.campaign_name).trim().to_string()),
        Cell::new(d.device.to_string()),
        Cell::new(&d.window),
        Cell::new(multiplier(d.old)),
        Cell::new(multiplier(d.new)),
        Cell::new(format!("{:.3}", d.target)),
        Cell::new(format!("{:.1}", d.conversions)),
        reason_cell(d),
        Cell::new(if d.applied { "yes" } else { "no" }),
    ]
}

const DECISION_HEADER: [&str; 9] = [
    "Campaign",
    "Device",
    "Window",
    "Old",
    "New",
    "Target",
    "Conv.",
    "Reason",
    "Applied",
];

pub fn render_decisions_table(decisions: &[Decision]) -> String {
    let mut table = base_table();
    table.set_header(DECISION_HEADER.to_vec());
    for d in decisions {
        table.add_row(Row::from(decision_cells(d)));
    }
    table.to_string()
}

pub fn render_run_summary(report: &RunReport) -> String {
    let mut table = base_table();
    table.set_header(vec![
        "Window",
        "Candidates",
        "Evaluated",
        "Skipped",
        "Failed",
        "Changes",
    ]);
    for w in &report.windows {
        let failed = if w.failed > 0 {
            Cell::new(w.failed).fg(Color::Red)
        } else {
            Cell::new(w.failed)
        };
        table.add_row(Row::from(vec![
            Cell::new(&w.window),
            Cell::new(w.candidates),
            Cell::new(w.evaluated),
            Cell::new(w.skipped),
            failed,
            Cell::new(w.changes),
        ]));
    }
    let mode = if report.dry_run { " (dry run)" } else { "" };
    format!(
        "{table}\nRun {}{mode}: {} change(s) across {} campaign(s), {} failure(s)",
        report.run_id,
        report.changes(),
        report.evaluated_campaigns(),
        report.failures.len()
    )
}

pub fn render_history_table(records: &[DecisionRecord]) -> String {
    let mut table = base_table();
    let mut header = vec!["Captured"];
    header.extend(DECISION_HEADER);
    table.set_header(header);
    for r in records {
        let mut cells = vec![Cell::new(r.captured_at.format("%Y-%m-%d %H:%M").to_string())];
        cells.extend(decision_cells(&r.decision));
        table.add_row(Row::from(cells));
    }
    table.to_string()
}
