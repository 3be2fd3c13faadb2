use serde::Serialize;
use smartquery_core::{Column, ColumnSummary, HistoryEntry, Row};
use std::io::{self, Write};
use std::sync::Arc;

const MAX_CELL_WIDTH: usize = 24;

pub struct Style {
    pub json: bool,
    pub max_rows: usize,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn clip(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

pub fn print_rows(columns: &[Column], rows: &[Arc<Row>], style: &Style) -> anyhow::Result<()> {
    let shown = &rows[..rows.len().min(style.max_rows)];
    if style.json {
        let plain: Vec<&Row> = shown.iter().map(Arc::as_ref).collect();
        return print_json(&plain);
    }
    let widths: Vec<usize> = columns
        .iter()
        .map(|c| {
            shown
                .iter()
                .map(|r| r.get(&c.key).as_text().chars().count())
                .chain(std::iter::once(c.label.chars().count()))
                .max()
                .unwrap_or(0)
                .min(MAX_CELL_WIDTH)
        })
        .collect();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<w$}", clip(&c.label, *w), w = *w))
        .collect();
    writeln!(out, "{}", header.join("  "))?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(out, "{}", rule.join("  "))?;
    for row in shown {
        let cells: Vec<String> = columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", clip(&row.get(&c.key).as_text(), *w), w = *w))
            .collect();
        writeln!(out, "{}", cells.join("  ").trim_end())?;
    }
    if rows.len() > shown.len() {
        writeln!(out, "… {} more rows", rows.len() - shown.len())?;
    }
    writeln!(out, "{} row(s)", rows.len())?;
    Ok(())
}

pub fn print_schema(columns: &[Column], row_count: usize, style: &Style) -> anyhow::Result<()> {
    if style.json {
        return print_json(columns);
    }
    println!("{:<16} {}", "Rows:", row_count);
    println!("{:<16} {}", "Columns:", columns.len());
    for c in columns {
        println!("  {:<20} {:<8} {}", c.key, c.column_type, c.label);
    }
    Ok(())
}

pub fn print_stats(stats: &[ColumnSummary], style: &Style) -> anyhow::Result<()> {
    if style.json {
        return print_json(stats);
    }
    println!("{:<20} {:<8} {:>7} {:>7} {:>9}  {}", "column", "type", "count", "nulls", "distinct", "min / max / mean");
    for s in stats {
        let numeric = s
            .numeric
            .as_ref()
            .map(|n| format!("{} / {} / {:.2}", n.min, n.max, n.mean))
            .unwrap_or_default();
        println!(
            "{:<20} {:<8} {:>7} {:>7} {:>9}  {}",
            clip(&s.column_key, 20),
            s.column_type,
            s.count,
            s.null_count,
            s.distinct_count,
            numeric
        );
    }
    Ok(())
}

pub fn print_history(entries: &[HistoryEntry], style: &Style) -> anyhow::Result<()> {
    if style.json {
        return print_json(entries);
    }
    if entries.is_empty() {
        println!("(no queries yet)");
    }
    for e in entries {
        let query = if e.query.is_empty() { "(reset)" } else { e.query.as_str() };
        println!(
            "{}  {:<10} {:>5} rows  {}",
            e.timestamp.format("%H:%M:%S"),
            format!("{:?}", e.source).to_lowercase(),
            e.result_count,
            query
        );
    }
    Ok(())
}
