//! Terminal output helpers

use console::{style, Term};

pub fn style_cyan(s: &str) -> String {
    style(s).cyan().to_string()
}

pub fn style_green(s: &str) -> String {
    style(s).green().to_string()
}

pub fn style_dim(s: &str) -> String {
    style(s).dim().to_string()
}

pub fn style_bold(s: &str) -> String {
    style(s).bold().to_string()
}

pub fn print_success(msg: &str) {
    println!("{} {}", style("✓").green(), msg);
}

pub fn print_error(msg: &str) {
    // Best effort; there is nowhere left to report a failed stderr write
    let _ = Term::stderr().write_line(&format!("{} {}", style("✗").red(), msg));
}

pub fn print_warning(msg: &str) {
    println!("{} {}", style("⚠").yellow(), msg);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", style(title).bold());
    println!("{}", "─".repeat(title.chars().count()));
}

/// `0x` hashes are shortened to their first 10 and last 6 characters.
pub fn truncate_hash(hash: &str) -> String {
    if hash.len() >= 20 && hash.is_ascii() {
        format!("{}...{}", &hash[..10], &hash[hash.len() - 6..])
    } else {
        hash.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_hash() {
        let full = format!("0x{}", "ab".repeat(32));
        assert_eq!(truncate_hash(&full), "0xabababab...ababab");
        assert_eq!(truncate_hash("0x1234"), "0x1234");
    }
}
