//! Output formatting utilities

use anyhow::Result;
use console::style;
use dlrelay_types::{Percent, ProgressSnapshot};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Print a value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Percentage with a colour hinting at its state
pub fn styled_percent(percent: Percent) -> String {
    match percent {
        Percent::Known(100) => style("100%").green().bold().to_string(),
        Percent::Known(p) => style(format!("{}%", p)).cyan().to_string(),
        Percent::Unknown => style("unknown").dim().to_string(),
    }
}

#[derive(Tabled)]
struct ProgressRow {
    #[tabled(rename = "Download")]
    label: String,
    #[tabled(rename = "Progress")]
    progress: String,
}

/// Render a snapshot as a table, one row per download
pub fn snapshot_table(snapshot: &ProgressSnapshot) -> String {
    let rows: Vec<ProgressRow> = snapshot
        .entries
        .iter()
        .map(|entry| ProgressRow {
            label: entry.label.clone(),
            progress: entry.percent.to_string(),
        })
        .collect();
    Table::new(rows).to_string()
}
