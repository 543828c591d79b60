//! Terminal styling utilities

use console::{style, Emoji};
use std::path::Path;

// Emoji icons with fallbacks for terminals that don't support them
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "[*] ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", ">> ");
pub static CHART: Emoji<'_, '_> = Emoji("📊 ", "");
pub static FOLDER: Emoji<'_, '_> = Emoji("📂 ", "");
pub static SAVE: Emoji<'_, '_> = Emoji("💾 ", "");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!] ");

/// Print the application banner
pub fn print_banner(version: &str) {
    println!();
    println!(
        "    {} {}",
        style("histsys").cyan().bold(),
        style(format!("v{}", version)).dim()
    );
    println!(
        "    {}",
        style("Adaptive binning and systematic covariance").dim()
    );
    println!("    {}", style("━".repeat(50)).dim());
    println!();
}

/// Print a configuration card of `(key, value)` rows
pub fn print_config(title: &str, rows: &[(&str, String)]) {
    let box_width = 56;
    let line = "─".repeat(box_width - 2);
    let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let value_width = box_width.saturating_sub(key_width + 7);

    println!("    ┌{}┐", line);
    println!(
        "    │ {:<width$}│",
        style(title).cyan().bold(),
        width = box_width - 3
    );
    println!("    ├{}┤", line);
    for (key, value) in rows {
        println!(
            "    │  {:<kw$}  {:<vw$}│",
            key,
            style(truncate_string(value, value_width)).yellow(),
            kw = key_width,
            vw = value_width
        );
    }
    println!("    └{}┘", line);
    println!();
}

/// Print a step header with styling
pub fn print_step_header(step_num: u8, title: &str) {
    println!();
    println!(
        "    {} {} {}",
        style(format!("STEP {}", step_num)).cyan().bold(),
        style("│").dim(),
        style(title).white().bold()
    );
    println!("    {}", style("─".repeat(50)).dim());
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("    {} {}", style("✓").green().bold(), style(message).green());
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("    {} {}", INFO, message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("    {} {}", WARN, style(message).yellow());
}

/// Print where an output file was written
pub fn print_saved(path: &Path) {
    println!("    {} Saved {}", SAVE, style(truncate_path(path, 60)).cyan());
}

/// Print the final completion message
pub fn print_completion(what: &str) {
    println!();
    println!("    {} {}", ROCKET, style(format!("{} complete!", what)).green().bold());
    println!();
}

/// Display form of a list of input files
pub fn describe_inputs(paths: &[&Path]) -> String {
    match paths {
        [] => "-".to_string(),
        [single] => format!("{}{}", FOLDER, truncate_path(single, 36)),
        [first, rest @ ..] => format!("{}{} (+{} more)", FOLDER, truncate_path(first, 28), rest.len()),
    }
}

/// Styled `N bins` count
pub fn format_bins(n: usize) -> String {
    format!("{}{} bins", CHART, n)
}

// Helper functions

pub(crate) fn truncate_path(path: &Path, max_len: usize) -> String {
    let path_str = path.display().to_string();
    truncate_string(&path_str, max_len)
}

pub(crate) fn truncate_string(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_string()
    } else {
        let keep = max_len.saturating_sub(3);
        let tail: String = chars[chars.len() - keep..].iter().collect();
        format!("...{}", tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("abcdefghijkl", 8), "...hijkl");
    }

    #[test]
    fn test_truncate_multibyte() {
        // Must not split inside a multi-byte character
        let s = "ééééééééé";
        assert_eq!(truncate_string(s, 5).chars().count(), 5);
    }
}
