use shared::types::VmRecord;

const HEADERS: [&str; 3] = ["NAME", "MAC", "IP"];

/// Render records as a bordered three-column table.
/// Missing addresses are empty cells.
pub fn render(records: &[VmRecord]) -> String {
    let rows: Vec<[&str; 3]> = records
        .iter()
        .map(|r| [r.name.as_str(), r.mac.as_str(), r.ip.as_str()])
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = format!(
        "+{}+\n",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let line = |cells: &[&str; 3]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!(" {:<w$} ", cell, w = w))
            .collect();
        format!("|{}|\n", padded.join("|"))
    };

    let mut out = String::new();
    out.push_str(&border);
    out.push_str(&line(&HEADERS));
    out.push_str(&border);
    for row in &rows {
        out.push_str(&line(row));
    }
    if !rows.is_empty() {
        out.push_str(&border);
    }
    out
}
