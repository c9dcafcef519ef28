//! Markdown rendering of consolidated tables

use crate::merge::CanonicalTable;
use crate::session::{DocumentOutcome, DocumentResult};

/// Render a canonical table as a pipe table with its notes and totals below
pub fn table_to_markdown(table: &CanonicalTable) -> String {
    let mut output = String::new();

    let page_span = if table.first_page == table.last_page {
        format!("p. {}", table.first_page)
    } else {
        format!("pp. {}-{}", table.first_page, table.last_page)
    };
    output.push_str(&format!("### {} ({})\n\n", table.title, page_span));

    let num_cols = table.column_count;
    if num_cols == 0 {
        return output;
    }

    let header_cells: Vec<String> = (0..num_cols)
        .map(|col| table.headers.get(col).map(|h| escape_cell(h)).unwrap_or_default())
        .collect();
    let body: Vec<Vec<String>> = table
        .data
        .iter()
        .map(|row| {
            (0..num_cols)
                .map(|col| row.get(col).map(|c| escape_cell(&c.as_text())).unwrap_or_default())
                .collect()
        })
        .collect();

    // Column widths for alignment
    let col_widths: Vec<usize> = (0..num_cols)
        .map(|col| {
            std::iter::once(&header_cells)
                .chain(body.iter())
                .map(|row| row[col].chars().count())
                .max()
                .unwrap_or(3)
                .max(3)
        })
        .collect();

    push_row(&mut output, &header_cells, &col_widths);
    output.push('|');
    for width in &col_widths {
        output.push_str(&format!(" {} |", "-".repeat(*width)));
    }
    output.push('\n');
    for row in &body {
        push_row(&mut output, row, &col_widths);
    }

    if !table.totals.is_empty() {
        output.push('\n');
        for (label, value) in &table.totals {
            output.push_str(&format!("**{}:** {}\n", label, value));
        }
    }

    if !table.notes.is_empty() {
        output.push('\n');
        for note in &table.notes {
            output.push_str(note);
            output.push('\n');
        }
    }

    output
}

/// Render every table of a completed document, or a one-line status otherwise
pub fn document_to_markdown(result: &DocumentResult) -> String {
    let mut output = format!("## {}\n\n", result.document);
    match &result.outcome {
        DocumentOutcome::Complete { tables, .. } if tables.is_empty() => {
            output.push_str("_No tables found._\n");
        }
        DocumentOutcome::Complete { tables, .. } => {
            for (idx, table) in tables.iter().enumerate() {
                if idx > 0 {
                    output.push('\n');
                }
                output.push_str(&table_to_markdown(table));
            }
        }
        DocumentOutcome::Failed { message, .. } => {
            output.push_str(&format!("_Extraction failed: {}_\n", message));
        }
        DocumentOutcome::Cancelled { stage } => {
            output.push_str(&format!("_Extraction cancelled during {:?}._\n", stage));
        }
    }
    output
}

fn push_row(output: &mut String, cells: &[String], widths: &[usize]) {
    output.push('|');
    for (cell, width) in cells.iter().zip(widths) {
        let pad = width.saturating_sub(cell.chars().count());
        output.push(' ');
        output.push_str(cell);
        output.push_str(&" ".repeat(pad));
        output.push_str(" |");
    }
    output.push('\n');
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
