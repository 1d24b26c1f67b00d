//! Table and JSON output for CLI commands

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use imaging_db::{Scan, ScanField, ScanFile, ScanInfo};
use serde::Serialize;

/// Print a table with headers and rows
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

/// Errors in `--json` mode go to stdout as `{"error": ...}`.
pub fn print_json_error(err: &anyhow::Error) {
    let payload = serde_json::json!({ "error": format!("{:#}", err) });
    println!("{}", payload);
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

pub fn print_scan_detail(
    scan: &Scan,
    info: Option<&ScanInfo>,
    fields: &[ScanField],
    files: &[ScanFile],
) {
    println!("Scan {} ({})", scan.key, scan.acq_software);
    if let Some(scanner) = &scan.scanner {
        println!("Scanner: {}", scanner);
    }
    if !scan.scan_notes.is_empty() {
        println!("Notes: {}", scan.scan_notes);
    }

    let Some(info) = info else {
        println!("Not ingested yet.");
        return;
    };

    print_table(
        &["nfields", "nchannels", "ndepths", "nframes", "nrois", "fps", "bidirectional"],
        vec![vec![
            info.nfields.to_string(),
            info.nchannels.to_string(),
            info.ndepths.to_string(),
            info.nframes.to_string(),
            info.nrois.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            format!("{:.3}", info.fps),
            info.bidirectional.to_string(),
        ]],
    );

    print_table(
        &["field", "px (h x w)", "um (h x w)", "x", "y", "z", "delay", "roi"],
        fields
            .iter()
            .map(|f| {
                vec![
                    f.field_idx.to_string(),
                    format!("{} x {}", f.px_height, f.px_width),
                    format!("{} x {}", opt(f.um_height), opt(f.um_width)),
                    opt(f.field_x),
                    opt(f.field_y),
                    opt(f.field_z),
                    f.delay_image
                        .as_ref()
                        .map(|d| format!("{}x{}", d.rows(), d.cols()))
                        .unwrap_or_else(|| "-".to_string()),
                    f.roi.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect(),
    );

    for file in files {
        println!("  {}", file.file_path);
    }
}
