//! Terminal table of per-bin uncertainties

use comfy_table::{presets::UTF8_FULL_CONDENSED, Attribute, Cell, CellAlignment, Color, Table};
use console::style;

use crate::pipeline::VariableResult;

fn percent_cell(fraction: f64) -> Cell {
    Cell::new(format!("{:.2}%", fraction * 100.0)).set_alignment(CellAlignment::Right)
}

/// Per-bin nominal content, statistical error, each systematic's fractional
/// uncertainty and the total fractional uncertainty.
pub fn covariance_table(result: &VariableResult) -> Table {
    let names: Vec<&str> = result.systematic_names().collect();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);

    let mut header = vec![
        Cell::new("Bin").add_attribute(Attribute::Bold),
        Cell::new("Range").add_attribute(Attribute::Bold),
        Cell::new("Nominal").add_attribute(Attribute::Bold),
        Cell::new("Stat").add_attribute(Attribute::Bold),
    ];
    header.extend(
        names
            .iter()
            .map(|name| Cell::new(*name).add_attribute(Attribute::Bold)),
    );
    header.push(
        Cell::new("Total")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
    );
    if result.data.is_some() {
        header.push(Cell::new("Data").add_attribute(Attribute::Bold));
    }
    table.set_header(header);

    let fractions: Vec<Vec<f64>> = names
        .iter()
        .map(|name| result.fractional_uncertainties(name).unwrap_or_default())
        .collect();
    let stat = result.nominal.fractional_errors();
    let total = result.total_fractional_uncertainties();
    let edges = result.binning.edges();

    for (i, count) in result.nominal.counts().iter().enumerate() {
        let mut row = vec![
            Cell::new(i),
            Cell::new(format!("[{:.4}, {:.4})", edges[i], edges[i + 1])),
            Cell::new(format!("{:.2}", count)).set_alignment(CellAlignment::Right),
            percent_cell(stat.get(i).copied().unwrap_or(0.0)),
        ];
        row.extend(
            fractions
                .iter()
                .map(|f| percent_cell(f.get(i).copied().unwrap_or(0.0))),
        );
        row.push(percent_cell(total.get(i).copied().unwrap_or(0.0)).fg(Color::Cyan));
        if let Some(data) = &result.data {
            row.push(
                Cell::new(format!("{:.0}", data.counts().get(i).copied().unwrap_or(0.0)))
                    .set_alignment(CellAlignment::Right),
            );
        }
        table.add_row(row);
    }
    table
}

/// Print the uncertainty breakdown for one variable
pub fn display_covariance(result: &VariableResult) {
    println!();
    println!(
        "    {} {}",
        style("📊").cyan(),
        style(format!(
            "UNCERTAINTIES: {} / {}",
            result.region, result.variable
        ))
        .white()
        .bold()
    );
    println!("    {}", style("─".repeat(50)).dim());
    println!();

    for line in covariance_table(result).to_string().lines() {
        println!("    {}", line);
    }

    println!();
    println!(
        "      Prediction {} {} {}",
        style(format!("{:.2}", result.nominal.sum())).yellow().bold(),
        style("±").dim(),
        style(format!("{:.2}", result.nominal_with_band.total_error())).yellow()
    );
    if let Some(data) = &result.data {
        println!(
            "      Observed   {}",
            style(format!("{:.0}", data.sum())).green().bold()
        );
    }
    for (sample, value) in &result.yields {
        println!("      {} {:.2}", style(format!("{:<12}", sample)).dim(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BinnedHistogram, BinningDefinition};
    use faer::Mat;

    #[test]
    fn test_columns_follow_systematics() {
        let binning = BinningDefinition::new(vec![0.0, 1.0, 2.0], "x", "x").unwrap();
        let nominal = BinnedHistogram::from_fill(binning, vec![100.0, 25.0], &[100.0, 25.0]).unwrap();
        let mut result = VariableResult::new("r", "x", nominal);
        result.covariances.insert(
            "flux".to_string(),
            Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.0 }),
        );

        let table = covariance_table(&result);
        assert_eq!(table.row_iter().count(), 2);
        let rendered = table.to_string();
        assert!(rendered.contains("flux"));
        // stat error of the first bin is sqrt(100) / 100
        assert!(rendered.contains("10.00%"));
    }
}
