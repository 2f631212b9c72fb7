use std::fmt::Write as _;

use crate::data::Frame;

/// Renders rows as an aligned plain-text table with a dashed separator. Used
/// for terminal output and for the table samples embedded in prompts.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|h| h.chars().count().max(3))
        .collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(flatten(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers.iter(), &widths));
    let separators = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(separators.iter(), &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row.iter(), &widths));
    }
    output
}

/// The first `limit` rows of a frame as text, with a trailer when rows were
/// left out.
pub fn render_frame(frame: &Frame, limit: usize) -> String {
    let shown = frame.rows().iter().take(limit).cloned().collect::<Vec<_>>();
    let mut output = render_table(frame.headers(), &shown);
    if frame.row_count() > shown.len() {
        let _ = writeln!(
            output,
            "... {} more row(s)",
            frame.row_count() - shown.len()
        );
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row<'a>(cells: impl Iterator<Item = &'a String>, widths: &[usize]) -> String {
    let line = cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", flatten(cell), width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn flatten(value: &str) -> String {
    value.replace(['\n', '\r', '\t'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_padded_to_widest_cell() {
        let headers = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            vec!["1".to_string(), "Alexandra".to_string()],
            vec!["22".to_string(), "Bo\nb".to_string()],
        ];
        let rendered = render_table(&headers, &rows);
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "id   name");
        assert_eq!(lines[1], "---  ---------");
        assert_eq!(lines[2], "1    Alexandra");
        assert_eq!(lines[3], "22   Bo b");
    }

    #[test]
    fn render_frame_reports_hidden_rows() {
        let frame = Frame::from_rows(
            vec!["n".to_string()],
            (0..5).map(|i| vec![i.to_string()]).collect(),
        )
        .unwrap();
        let rendered = render_frame(&frame, 2);
        assert!(rendered.ends_with("... 3 more row(s)\n"), "{rendered}");
    }
}
