//! Terminal table of adaptive bin edges

use comfy_table::{presets::UTF8_FULL_CONDENSED, Attribute, Cell, CellAlignment, Color, Table};
use console::style;

use crate::pipeline::BinningOutcome;

/// Build the per-bin table: range, width and effective entries.
///
/// Bins below `min_effective_count` are highlighted; they only occur in the
/// out-of-range bins or in single-bin fallbacks.
pub fn binning_table(outcome: &BinningOutcome, min_effective_count: f64) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        Cell::new("Bin").add_attribute(Attribute::Bold),
        Cell::new("Low edge").add_attribute(Attribute::Bold),
        Cell::new("High edge").add_attribute(Attribute::Bold),
        Cell::new("Width").add_attribute(Attribute::Bold),
        Cell::new("N_eff").add_attribute(Attribute::Bold),
    ]);

    let edges = outcome.binning.edges();
    for (i, w) in edges.windows(2).enumerate() {
        let neff = outcome.effective_counts.get(i).copied().unwrap_or(0.0);
        let color = if neff >= min_effective_count {
            Color::Green
        } else {
            Color::Yellow
        };
        table.add_row(vec![
            Cell::new(i),
            Cell::new(format!("{:.6}", w[0])).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.6}", w[1])).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.4}", w[1] - w[0])).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", neff))
                .fg(color)
                .set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// Print the binning table with a header and out-of-domain totals
pub fn display_binning(outcome: &BinningOutcome, min_effective_count: f64) {
    println!();
    println!(
        "    {} {}",
        style("📐").cyan(),
        style(format!("BINNING: {}", outcome.binning.label())).white().bold()
    );
    println!("    {}", style("─".repeat(50)).dim());
    println!();

    // Indent the table
    for line in binning_table(outcome, min_effective_count).to_string().lines() {
        println!("    {}", line);
    }

    println!();
    println!(
        "      Total effective entries {}",
        style(format!("{:.1}", outcome.total_effective_count)).yellow().bold()
    );
    if outcome.below_domain_weight > 0.0 || outcome.above_domain_weight > 0.0 {
        println!(
            "      Outside domain {}",
            style(format!(
                "(below {:.3}, above {:.3})",
                outcome.below_domain_weight, outcome.above_domain_weight
            ))
            .dim()
        );
    }
}
