//! Per-run statistics and the box-drawn tables used in log output.

use std::fmt;
use std::time::Duration;

use colored::Colorize;

use crate::utils::truncate;

pub const STEP_NAME_WIDTH: usize = 41;

//==================================================================================
// 1. Box Tables
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Align {
    Left,
    Right,
}

pub(crate) struct Column {
    pub title: &'static str,
    pub width: usize,
    pub align: Align,
}

impl Column {
    pub const fn new(title: &'static str, width: usize, align: Align) -> Self {
        Self { title, width, align }
    }
}

fn pad(text: &str, width: usize, align: Align) -> String {
    match align {
        Align::Left => format!("{text:<width$}"),
        Align::Right => format!("{text:>width$}"),
    }
}

fn rule(columns: &[Column], left: char, mid: char, right: char) -> String {
    let mut line = String::new();
    line.push(left);
    for (i, col) in columns.iter().enumerate() {
        if i > 0 {
            line.push(mid);
        }
        line.push_str(&"─".repeat(col.width + 2));
    }
    line.push(right);
    line
}

/// Renders rows under a header. Cells are truncated to the column width;
/// `style` may decorate an already padded cell (colour codes do not count
/// towards the width).
pub(crate) fn box_table(
    columns: &[Column],
    rows: &[Vec<String>],
    style: &dyn Fn(usize, &str, String) -> String,
) -> String {
    let mut out = Vec::with_capacity(rows.len() + 4);
    out.push(rule(columns, '┌', '┬', '┐'));

    let header: Vec<String> = columns
        .iter()
        .map(|c| pad(c.title, c.width, c.align))
        .collect();
    out.push(format!("│ {} │", header.join(" │ ")));
    out.push(rule(columns, '├', '┼', '┤'));

    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let raw = row.get(i).map(String::as_str).unwrap_or("");
                let cell = truncate(raw, col.width);
                style(i, raw, pad(&cell, col.width, col.align))
            })
            .collect();
        out.push(format!("│ {} │", cells.join(" │ ")));
    }
    out.push(rule(columns, '└', '┴', '┘'));
    out.join("\n")
}

pub(crate) fn plain(_column: usize, _raw: &str, cell: String) -> String {
    cell
}

//==================================================================================
// 2. Run Report
//==================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StepStat {
    pub name: String,
    pub kind: &'static str,
    pub items_in: usize,
    pub items_out: usize,
    pub elapsed: Duration,
}

impl StepStat {
    pub fn delta(&self) -> i64 {
        self.items_out as i64 - self.items_in as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub session_key: String,
    pub steps: Vec<StepStat>,
    pub items_in: usize,
    pub items_out: usize,
    pub elapsed: Duration,
}

pub fn format_delta(delta: i64) -> String {
    match delta {
        0 => "=".to_string(),
        d if d > 0 => format!("+{d}"),
        d => d.to_string(),
    }
}

fn format_millis(elapsed: Duration) -> String {
    format!("{:.1}", elapsed.as_secs_f64() * 1000.0)
}

const REPORT_COLUMNS: [Column; 6] = [
    Column::new("#", 3, Align::Right),
    Column::new("Step", STEP_NAME_WIDTH, Align::Left),
    Column::new("In", 8, Align::Right),
    Column::new("Out", 8, Align::Right),
    Column::new("ms", 9, Align::Right),
    Column::new("Delta", 8, Align::Right),
];

impl RunReport {
    pub fn delta(&self) -> i64 {
        self.items_out as i64 - self.items_in as i64
    }

    pub fn render(&self, colorize: bool) -> String {
        let rows: Vec<Vec<String>> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                vec![
                    (i + 1).to_string(),
                    s.name.clone(),
                    s.items_in.to_string(),
                    s.items_out.to_string(),
                    format_millis(s.elapsed),
                    format_delta(s.delta()),
                ]
            })
            .collect();

        let highlight = |column: usize, raw: &str, cell: String| -> String {
            if !colorize || column != 5 {
                return cell;
            }
            match raw.chars().next() {
                Some('+') => cell.green().to_string(),
                Some('-') => cell.red().to_string(),
                _ => cell.dimmed().to_string(),
            }
        };

        let mut out = format!("[{}] Pipeline run report\n", self.session_key);
        out.push_str(&box_table(&REPORT_COLUMNS, &rows, &highlight));
        out.push_str(&format!(
            "\nTOTAL: {} → {} items in {}ms",
            self.items_in,
            self.items_out,
            format_millis(self.elapsed)
        ));
        out
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(name: &str, items_in: usize, items_out: usize) -> StepStat {
        StepStat {
            name: name.to_string(),
            kind: "item",
            items_in,
            items_out,
            elapsed: Duration::from_micros(1500),
        }
    }

    #[test]
    fn test_delta_formatting() {
        assert_eq!(format_delta(0), "=");
        assert_eq!(format_delta(4), "+4");
        assert_eq!(format_delta(-3), "-3");
    }

    #[test]
    fn test_render_plain_report() {
        let report = RunReport {
            session_key: "ABC".into(),
            steps: vec![
                stat("unwrap", 2, 5),
                stat("a step with a deliberately very long descriptive name", 5, 5),
            ],
            items_in: 2,
            items_out: 5,
            elapsed: Duration::from_millis(3),
        };
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "[ABC] Pipeline run report");
        assert!(lines[1].starts_with('┌'));
        assert!(lines[4].contains("unwrap") && lines[4].trim_end().ends_with("+4 │"));
        assert!(lines[5].contains('…'));
        assert!(lines[5].contains("= │"));
        assert_eq!(*lines.last().unwrap(), "TOTAL: 2 → 5 items in 3.0ms");

        // Every table line has the same display width.
        let width = lines[1].chars().count();
        assert!(lines[1..lines.len() - 1].iter().all(|l| l.chars().count() == width));
    }
}
