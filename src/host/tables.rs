//! Parsers for the kernel mount table and `showmount` output.

use std::collections::BTreeSet;

use camino::Utf8PathBuf;

/// Extracts mount targets (second column) from `/proc/self/mounts` content.
///
/// The kernel escapes space, tab, newline and backslash in paths as
/// three-digit octal sequences (`\040` and friends); these are decoded.
#[must_use]
pub fn parse_mount_targets(table: &str) -> Vec<Utf8PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|target| Utf8PathBuf::from(unescape_octal(target)))
        .collect()
}

/// Extracts exported paths from `showmount -e --no-headers` output.
///
/// Each line is `<path> <clients>`; only the path column is kept.
#[must_use]
pub fn parse_export_list(output: &str) -> BTreeSet<Utf8PathBuf> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(Utf8PathBuf::from)
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let mut decoded = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            decoded.push(ch);
            continue;
        }

        let digits: String = std::iter::from_fn(|| chars.next_if(|next| next.is_digit(8)))
            .take(3)
            .collect();
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) if digits.len() == 3 => decoded.push(char::from(byte)),
            _ => {
                decoded.push('\\');
                decoded.push_str(&digits);
            }
        }
    }

    decoded
}
