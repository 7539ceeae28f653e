//! Token-set fuzzy similarity

use std::collections::BTreeSet;

/// Lowercase, replace every non-alphanumeric character with a space and
/// collapse whitespace.
fn preprocess(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Length of the longest common subsequence of two char slices.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Indel similarity of two strings, 0 to 100. Empty input scores 0.
pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let matched = 2 * lcs_len(&a, &b);
    (100.0 * matched as f64 / total as f64).round() as u8
}

fn join_parts(head: &str, tail: &[&str]) -> String {
    let tail = tail.join(" ");
    format!("{} {}", head, tail).trim().to_string()
}

/// Compare two strings by their word sets.
///
/// Both strings are tokenized into sets. The sorted intersection is compared
/// against the intersection followed by each side's remaining tokens, and the
/// two reconstructions against each other. The best of the three ratios is
/// the score, so word order and extra words on one side do not count
/// against a match.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let a = preprocess(a);
    let b = preprocess(b);
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let sorted_sect = intersection.join(" ");
    let combined_a = join_parts(&sorted_sect, &only_a);
    let combined_b = join_parts(&sorted_sect, &only_b);

    [
        ratio(&sorted_sect, &combined_a),
        ratio(&sorted_sect, &combined_b),
        ratio(&combined_a, &combined_b),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}
