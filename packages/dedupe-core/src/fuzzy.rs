//! Token-sort fuzzy similarity on bounded text samples.

/// Token-sort ratio: split on whitespace, sort tokens, rejoin, then
/// normalized Levenshtein similarity. Inputs are truncated to `sample_size`
/// characters before tokenization to bound cost. Returns 0..=1; two empty
/// inputs compare equal at 1.0.
pub fn token_sort_ratio(a: &str, b: &str, sample_size: usize) -> f64 {
    let a = token_sort(truncate_chars(a, sample_size));
    let b = token_sort(truncate_chars(b, sample_size));
    strsim::normalized_levenshtein(&a, &b)
}

fn token_sort(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
