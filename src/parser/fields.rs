//! Small text scanning helpers shared by the alert parsers.

/// The rest of the line after `label` and a colon (ASCII or full-width).
/// The label match ignores ASCII case; the value is trimmed.
pub fn labelled_value<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let haystack = text.to_ascii_lowercase();
    let needle = label.to_ascii_lowercase();

    for (idx, _) in haystack.match_indices(needle.as_str()) {
        let rest = text[idx + needle.len()..].trim_start_matches([' ', '\t']);
        let mut chars = rest.chars();
        if let Some(':') | Some('：') = chars.next() {
            let line = chars.as_str().lines().next().unwrap_or_default();
            return Some(line.trim());
        }
    }
    None
}

/// Leading run of word characters (letters, digits, underscore).
pub fn leading_word(value: &str) -> &str {
    let end = value
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    &value[..end]
}

/// Leading run of digits and dots.
pub fn leading_number(value: &str) -> &str {
    let end = value
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    &value[..end]
}

/// `"NDX 19455.68, SPX 4561.37"` into symbol/price pairs. Malformed entries are skipped.
pub fn market_pairs(value: &str) -> Vec<(String, f64)> {
    value
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split_whitespace();
            let symbol = parts.next()?;
            let price = parts.next()?.parse::<f64>().ok()?;
            Some((symbol.to_string(), price))
        })
        .collect()
}

/// Number of CJK unified ideographs in `text`.
pub fn cjk_count(text: &str) -> usize {
    text.chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count()
}
