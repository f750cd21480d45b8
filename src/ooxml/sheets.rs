//! Worksheet names after translation: legal characters, at most 31 runes, unique per workbook.

use std::collections::HashSet;

use crate::ooxml::extract::MAX_SHEET_NAME_RUNES;
use crate::textutil::truncate_runes;

const ILLEGAL: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const FALLBACK_NAME: &str = "Sheet";

/// Drops characters Excel refuses in sheet names, trims surrounding quotes and whitespace and cuts
/// the result to 31 runes. May return an empty string.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !ILLEGAL.contains(c)).collect();
    let trimmed = trim_name(&cleaned);
    trim_name(truncate_runes(trimmed, MAX_SHEET_NAME_RUNES)).to_string()
}

fn trim_name(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '\'' || c == '"')
}

/// Computes final names for the renamed sheets.
///
/// `all_names` lists every sheet of the workbook in tab order, `renames` pairs an index into it
/// with the raw translation. Sheets without a rename keep their name and take part in collision
/// checks. Returns one final name per rename, in `renames` order.
pub fn resolve_sheet_names(all_names: &[String], renames: &[(usize, String)]) -> Vec<String> {
    let renamed: HashSet<usize> = renames.iter().map(|(i, _)| *i).collect();
    let mut taken: HashSet<String> = all_names
        .iter()
        .enumerate()
        .filter(|(i, _)| !renamed.contains(i))
        .map(|(_, n)| n.to_lowercase())
        .collect();

    let mut finals = Vec::with_capacity(renames.len());
    for (idx, translated) in renames {
        let original = all_names.get(*idx).map(String::as_str).unwrap_or_default();
        let mut candidate = sanitize_sheet_name(translated);
        if candidate.is_empty() {
            candidate = FALLBACK_NAME.to_string();
        }
        let name = if candidate == original && !taken.contains(&original.to_lowercase()) {
            original.to_string()
        } else {
            unique_name(&candidate, &taken)
        };
        if name != candidate {
            log::debug!("sheet name {candidate:?} already used, renamed to {name:?}");
        }
        taken.insert(name.to_lowercase());
        finals.push(name);
    }
    finals
}

fn unique_name(candidate: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&candidate.to_lowercase()) {
        return candidate.to_string();
    }
    let mut n = 1usize;
    loop {
        let suffix = format!("_{n}");
        let room = MAX_SHEET_NAME_RUNES.saturating_sub(suffix.chars().count());
        let name = format!("{}{}", truncate_runes(candidate, room), suffix);
        if !taken.contains(&name.to_lowercase()) {
            return name;
        }
        n += 1;
    }
}
